#![allow(dead_code)]

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};
use std::task::Waker;

use embassy_time::{Duration, MockDriver};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use embedded_storage::nor_flash::NorFlashErrorKind;
use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};
use remapper::hid::{HidError, ReportWriter};

// Init logger for tests
#[ctor::ctor]
pub fn init_log() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Virtual time a test may take before it's considered hung
const MAX_TEST_TIME: Duration = Duration::from_secs(60);

/// Tests that use the global channels and signals hold this lock
pub fn serialize_test() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Poll `future` to completion, advancing the mock clock by 1ms whenever it's pending
pub fn test_block_on<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    let mut cx = Context::from_waker(Waker::noop());
    let driver = MockDriver::get();
    let step = Duration::from_millis(1);
    let mut elapsed = Duration::from_ticks(0);
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        driver.advance(step);
        elapsed += step;
        assert!(elapsed < MAX_TEST_TIME, "Test timeout reached");
    }
}

/// `NorFlash` kept in memory, erased to 0xFF
pub struct MemFlash {
    pub data: Vec<u8>,
    pub erase_count: usize,
    pub write_count: usize,
}

impl MemFlash {
    pub const SIZE: usize = 4 * 4096;

    pub fn new() -> Self {
        Self {
            data: vec![0xFF; Self::SIZE],
            erase_count: 0,
            write_count: 0,
        }
    }

    fn check(&self, offset: u32, len: usize, align: usize) -> Result<(), NorFlashErrorKind> {
        let offset = offset as usize;
        if offset % align != 0 || len % align != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if offset + len > self.data.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(())
    }
}

impl embedded_storage_async::nor_flash::ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), Self::READ_SIZE)?;
        let offset = offset as usize;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.check(from, (to - from) as usize, Self::ERASE_SIZE)?;
        self.data[from as usize..to as usize].fill(0xFF);
        self.erase_count += 1;
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), Self::WRITE_SIZE)?;
        let offset = offset as usize;
        // Programming only clears bits
        for (cell, byte) in self.data[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        self.write_count += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReport {
    pub report_id: u8,
    pub payload: Vec<u8>,
}

/// `ReportWriter` that records every report, clones share the record
#[derive(Clone, Default)]
pub struct RecordingWriter {
    sent: Rc<RefCell<Vec<SentReport>>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<SentReport> {
        self.sent.borrow().clone()
    }

    pub fn take(&self) -> Vec<SentReport> {
        self.sent.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl ReportWriter for RecordingWriter {
    async fn write_report(&mut self, report_id: u8, payload: &[u8]) -> Result<(), HidError> {
        self.sent.borrow_mut().push(SentReport {
            report_id,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// One direction of an in-memory serial port, clones share the buffer
#[derive(Clone, Default)]
pub struct SerialPipe {
    buffer: Rc<RefCell<VecDeque<u8>>>,
}

impl SerialPipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        self.buffer.borrow_mut().extend(bytes);
    }

    pub fn take_all(&self) -> Vec<u8> {
        self.buffer.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }
}

impl ErrorType for SerialPipe {
    type Error = ErrorKind;
}

impl Read for SerialPipe {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        core::future::poll_fn(|_cx| {
            let mut buffer = self.buffer.borrow_mut();
            if buffer.is_empty() || buf.is_empty() {
                return Poll::Pending;
            }
            let n = buf.len().min(buffer.len());
            for (dst, src) in buf.iter_mut().zip(buffer.drain(..n)) {
                *dst = src;
            }
            Poll::Ready(Ok(n))
        })
        .await
    }
}

impl Write for SerialPipe {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.push(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
