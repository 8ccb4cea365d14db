//! SLIP style framing with a CRC-32 trailer.
//!
//! A frame on the wire is `END, escaped(payload ++ crc32_le(payload)), END`. `END` and `ESC` bytes
//! inside the frame are replaced by `ESC, ESC_END` and `ESC, ESC_ESC`.

use byteorder::{ByteOrder, LittleEndian};
use embedded_io_async::{Read, Write};
use heapless::Vec;

use super::LinkError;
use crate::MAX_DESCRIPTOR_SIZE;

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

const CRC_SIZE: usize = 4;

/// Largest frame payload, a full report descriptor plus the message header
pub const MAX_FRAME_PAYLOAD: usize = MAX_DESCRIPTOR_SIZE + 32;

/// Largest frame on the wire, every byte escaped plus both delimiters
pub const MAX_ENCODED_FRAME: usize = 2 * (MAX_FRAME_PAYLOAD + CRC_SIZE) + 2;

fn push_escaped(out: &mut Vec<u8, MAX_ENCODED_FRAME>, byte: u8) -> Result<(), LinkError> {
    let escaped: &[u8] = match byte {
        END => &[ESC, ESC_END],
        ESC => &[ESC, ESC_ESC],
        _ => &[byte],
    };
    out.extend_from_slice(escaped).map_err(|_| LinkError::FrameTooLarge)
}

/// Encode `payload` into a complete frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8, MAX_ENCODED_FRAME>, LinkError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(LinkError::FrameTooLarge);
    }
    let mut crc = [0_u8; CRC_SIZE];
    LittleEndian::write_u32(&mut crc, crc32fast::hash(payload));

    let mut out = Vec::new();
    out.push(END).map_err(|_| LinkError::FrameTooLarge)?;
    for byte in payload.iter().chain(crc.iter()) {
        push_escaped(&mut out, *byte)?;
    }
    out.push(END).map_err(|_| LinkError::FrameTooLarge)?;
    Ok(out)
}

/// Incremental frame decoder, fed one byte at a time.
///
/// Frames with a bad checksum or a payload longer than [`MAX_FRAME_PAYLOAD`] are dropped, so are
/// frames too short to carry a checksum. The delimiter that opens a frame closes an empty one,
/// which is dropped silently.
pub struct FrameDecoder {
    buffer: Vec<u8, { MAX_FRAME_PAYLOAD + CRC_SIZE }>,
    escaped: bool,
    overflow: bool,
    complete: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            escaped: false,
            overflow: false,
            complete: false,
        }
    }

    /// Feed one byte, returns true when a valid frame was completed by it.
    ///
    /// The payload is then available from [`FrameDecoder::frame`] until the next call.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.complete {
            self.buffer.clear();
            self.complete = false;
        }

        if self.escaped {
            self.escaped = false;
            let byte = match byte {
                ESC_END => END,
                ESC_ESC => ESC,
                // Invalid escape, keep the byte as is
                other => other,
            };
            self.store(byte);
            return false;
        }

        match byte {
            END => self.finish(),
            ESC => {
                self.escaped = true;
                false
            }
            other => {
                self.store(other);
                false
            }
        }
    }

    /// Payload of the last completed frame
    pub fn frame(&self) -> &[u8] {
        if self.complete {
            &self.buffer[..self.buffer.len() - CRC_SIZE]
        } else {
            &[]
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escaped = false;
        self.overflow = false;
        self.complete = false;
    }

    fn store(&mut self, byte: u8) {
        if self.buffer.push(byte).is_err() {
            self.overflow = true;
        }
    }

    fn finish(&mut self) -> bool {
        if core::mem::take(&mut self.overflow) {
            warn!("Link frame exceeds {} bytes, dropped", MAX_FRAME_PAYLOAD);
            self.buffer.clear();
            return false;
        }
        if self.buffer.len() <= CRC_SIZE {
            self.buffer.clear();
            return false;
        }

        let (payload, crc) = self.buffer.split_at(self.buffer.len() - CRC_SIZE);
        let valid = crc32fast::hash(payload) == LittleEndian::read_u32(crc);
        if !valid {
            warn!("Link frame checksum mismatch, dropped {} bytes", self.buffer.len());
            self.buffer.clear();
            return false;
        }
        self.complete = true;
        true
    }
}

/// Reads frames from a serial port.
pub struct FrameReader<R: Read> {
    reader: R,
    decoder: FrameDecoder,
    buf: [u8; 64],
    pos: usize,
    len: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            buf: [0; 64],
            pos: 0,
            len: 0,
        }
    }

    /// Wait for the next valid frame and return its payload
    pub async fn read_frame(&mut self) -> Result<&[u8], LinkError> {
        loop {
            while self.pos < self.len {
                let byte = self.buf[self.pos];
                self.pos += 1;
                if self.decoder.push(byte) {
                    return Ok(self.decoder.frame());
                }
            }

            let n_bytes = match self.reader.read(&mut self.buf).await {
                Ok(n) if n > 0 => n,
                // Read error, or the port was closed. A partial frame can't be completed anymore.
                _ => {
                    self.decoder.reset();
                    return Err(LinkError::Serial);
                }
            };
            self.pos = 0;
            self.len = n_bytes;
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes frames to a serial port.
pub struct FrameWriter<W: Write> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let frame = encode_frame(payload)?;
        self.writer.write_all(&frame).await.map_err(|_e| LinkError::Serial)?;
        self.writer.flush().await.map_err(|_e| LinkError::Serial)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
