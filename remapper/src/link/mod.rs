//! Serial links between microcontrollers.
//!
//! Two links exist. In the dual setup, the board that hosts the input devices ("B") forwards
//! connection events and raw input reports to the board running the engine ("A") as
//! [`DualMessage`]s. Outgoing reports for a second host are sent over the forwarder link to a
//! device that writes them to its own USB HID interface, see [`SerialForwarder`].

pub mod frame;

use embedded_io_async::{Read, Write};
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub use frame::{FrameDecoder, FrameReader, FrameWriter, MAX_FRAME_PAYLOAD, encode_frame};

use crate::hid::{HidError, ReportWriter};
use crate::{MAX_DESCRIPTOR_SIZE, MAX_REPORT_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The serial port failed or was closed
    Serial,
    FrameTooLarge,
    Serialize,
    Deserialize,
}

/// Message exchanged between the two boards of the dual setup
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DualMessage {
    /// B asks A for its settings, repeated until A answers
    RequestBInit,
    /// A's answer to `RequestBInit`
    BInit { interval_override: u8 },
    /// An input interface was mounted on B
    DeviceConnected {
        vid: u16,
        pid: u16,
        dev_addr: u8,
        interface: u8,
        descriptor: Vec<u8, MAX_DESCRIPTOR_SIZE>,
    },
    DeviceDisconnected { dev_addr: u8, interface: u8 },
    /// A raw input report, including the report id when the interface uses them
    ReportReceived {
        dev_addr: u8,
        interface: u8,
        report: Vec<u8, MAX_REPORT_SIZE>,
    },
    /// Tells B to reboot, so that it asks for its settings again
    Restart,
}

/// Postcard encoded [`DualMessage`]s over a framed serial link.
pub struct DualLink<R: Read, W: Write> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: Read, W: Write> DualLink<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Wait for the next message, frames that fail to deserialize are reported as errors
    pub async fn read_message(&mut self) -> Result<DualMessage, LinkError> {
        let frame = self.reader.read_frame().await?;
        postcard::from_bytes(frame).map_err(|e| {
            error!("Postcard deserialize dual message error: {:?}", e);
            LinkError::Deserialize
        })
    }

    pub async fn write_message(&mut self, message: &DualMessage) -> Result<(), LinkError> {
        let mut buf = [0_u8; MAX_FRAME_PAYLOAD];
        let bytes = postcard::to_slice(message, &mut buf).map_err(|e| {
            error!("Postcard serialize dual message error: {:?}", e);
            LinkError::Serialize
        })?;
        self.writer.write_frame(bytes).await
    }
}

/// Sends outgoing reports to the forwarder device, one frame per report.
///
/// A frame is the report id followed by the report payload.
pub struct SerialForwarder<W: Write> {
    writer: FrameWriter<W>,
}

impl<W: Write> SerialForwarder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: FrameWriter::new(writer),
        }
    }
}

impl<W: Write> ReportWriter for SerialForwarder<W> {
    async fn write_report(&mut self, report_id: u8, payload: &[u8]) -> Result<(), HidError> {
        let mut frame: Vec<u8, { MAX_REPORT_SIZE + 1 }> = Vec::new();
        frame.push(report_id).map_err(|_| HidError::BufferOverflow)?;
        frame
            .extend_from_slice(payload)
            .map_err(|_| HidError::BufferOverflow)?;
        self.writer.write_frame(&frame).await.map_err(|e| {
            error!("Forwarding report {} failed: {:?}", report_id, e);
            HidError::Link
        })
    }
}
