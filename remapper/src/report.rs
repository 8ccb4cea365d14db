//! Bit level access to HID reports and the per report id buffers owned by the engine.
//!
//! All accessors are bounded by the slice they are given: bits that fall outside of it read as
//! zero and writes to them are dropped. Callers pass the report's declared length, never the
//! backing array, so a descriptor that declares a short report can't be overrun.

use heapless::Vec;

use crate::usage::ReportLayout;
use crate::{MAX_OUR_REPORTS, MAX_REPORT_SIZE};

/// Read `bit_size` bits starting at `bit_offset`, least significant bit first.
pub fn get_bits(buffer: &[u8], bit_offset: u16, bit_size: u8) -> u32 {
    let mut value = 0_u32;
    for i in 0..bit_size.min(32) as usize {
        let pos = bit_offset as usize + i;
        let Some(byte) = buffer.get(pos / 8) else {
            break;
        };
        if (byte >> (pos % 8)) & 1 != 0 {
            value |= 1 << i;
        }
    }
    value
}

/// Write the low `bit_size` bits of `value` starting at `bit_offset`, least significant bit first.
pub fn put_bits(buffer: &mut [u8], bit_offset: u16, bit_size: u8, value: u32) {
    for i in 0..bit_size.min(32) as usize {
        let pos = bit_offset as usize + i;
        let Some(byte) = buffer.get_mut(pos / 8) else {
            break;
        };
        if (value >> i) & 1 != 0 {
            *byte |= 1 << (pos % 8);
        } else {
            *byte &= !(1 << (pos % 8));
        }
    }
}

/// Interpret the low `bit_size` bits of `value` as a two's complement number.
pub fn sign_extend(value: u32, bit_size: u8) -> i32 {
    if bit_size == 0 || bit_size >= 32 {
        return value as i32;
    }
    if value & (1 << (bit_size - 1)) != 0 {
        (value | (u32::MAX << bit_size)) as i32
    } else {
        value as i32
    }
}

/// Live and last-sent buffers of one outgoing report.
#[derive(Clone)]
pub struct ReportBuffer {
    pub report_id: u8,
    len: usize,
    live: [u8; MAX_REPORT_SIZE],
    prev: [u8; MAX_REPORT_SIZE],
}

impl ReportBuffer {
    fn new(report_id: u8, len: usize) -> Self {
        Self {
            report_id,
            len: len.min(MAX_REPORT_SIZE),
            live: [0; MAX_REPORT_SIZE],
            prev: [0; MAX_REPORT_SIZE],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The report being assembled in the current tick.
    pub fn live(&self) -> &[u8] {
        &self.live[..self.len]
    }

    pub fn live_mut(&mut self) -> &mut [u8] {
        &mut self.live[..self.len]
    }

    /// The last report that was enqueued as a new entry.
    pub fn prev(&self) -> &[u8] {
        &self.prev[..self.len]
    }

    /// A report has to go out when a relative bit is set, or an absolute bit changed since the last one.
    pub fn needs_to_be_sent(&self, layout: &ReportLayout) -> bool {
        let live = self.live();
        let prev = self.prev();
        let relative = layout.relative_mask();
        let absolute = layout.absolute_mask();
        (0..self.len).any(|i| live[i] & relative[i] != 0 || (live[i] ^ prev[i]) & absolute[i] != 0)
    }

    pub(crate) fn commit(&mut self) {
        self.prev[..self.len].copy_from_slice(&self.live[..self.len]);
    }

    pub(crate) fn clear(&mut self) {
        self.live[..self.len].fill(0);
    }
}

/// Report id indexed buffers, allocated once from the outgoing report layouts.
pub struct ReportBuffers {
    buffers: Vec<ReportBuffer, MAX_OUR_REPORTS>,
}

impl ReportBuffers {
    pub fn new(layouts: &[ReportLayout]) -> Self {
        let mut buffers = Vec::new();
        for layout in layouts {
            // Layouts are bounded by the same capacity
            let _ = buffers.push(ReportBuffer::new(layout.report_id, layout.len()));
        }
        Self { buffers }
    }

    pub fn get_mut(&mut self, report_id: u8) -> Option<&mut ReportBuffer> {
        self.buffers.iter_mut().find(|b| b.report_id == report_id)
    }

    /// Zero the live and last-sent buffers of every report
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.clear();
            buffer.prev.fill(0);
        }
    }
}
