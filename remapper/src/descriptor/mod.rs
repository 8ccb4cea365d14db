//! HID report descriptor parsing.
//!
//! The parser walks the short items of a report descriptor and derives where every input usage
//! lives in its report. Output and feature items are skipped, they don't contribute to input
//! report sizes.

mod our_descriptor;

pub use our_descriptor::{CONFIG_REPORT_ID, OUR_REPORT_DESCRIPTOR, RESOLUTION_MULTIPLIER_REPORT_ID};

use heapless::Vec;

use crate::MAX_REPORT_SIZE;
use crate::usage::{UsageDef, UsageSpan};

pub const MAX_DESCRIPTOR_SPANS: usize = 64;
pub const MAX_DESCRIPTOR_REPORTS: usize = 16;
const MAX_LOCAL_USAGES: usize = 32;
const GLOBAL_STACK_DEPTH: usize = 4;
/// Input fields ending past this bit are not decoded
const MAX_REPORT_BITS: u32 = (MAX_REPORT_SIZE * 8) as u32;

const INPUT_CONSTANT: u32 = 1 << 0;
const INPUT_VARIABLE: u32 = 1 << 1;
const INPUT_RELATIVE: u32 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorError {
    /// An item claims more data bytes than the descriptor has left
    Truncated,
    TooManyUsages,
    TooManyReports,
    /// A report is larger than the report buffers, or its bit length doesn't fit in 32 bits
    ReportTooLarge,
    /// Every interface bit is taken
    TooManyInterfaces,
    /// Unbalanced push/pop items
    GlobalStack,
}

/// Input usages of a descriptor and the byte length of every input report.
#[derive(Debug, Clone, Default)]
pub struct ParsedDescriptor {
    pub has_report_id: bool,
    pub spans: Vec<UsageSpan, MAX_DESCRIPTOR_SPANS>,
    /// `(report_id, length in bytes)`, excluding the report id byte
    pub report_sizes: Vec<(u8, usize), MAX_DESCRIPTOR_REPORTS>,
}

impl ParsedDescriptor {
    pub fn iter(&self) -> impl Iterator<Item = (u32, UsageDef)> + '_ {
        self.spans.iter().flat_map(|span| span.iter())
    }

    pub fn report_size(&self, report_id: u8) -> Option<usize> {
        self.report_sizes
            .iter()
            .find(|(id, _)| *id == report_id)
            .map(|(_, len)| *len)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GlobalItems {
    usage_page: u32,
    logical_minimum: i32,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

#[derive(Default)]
struct LocalItems {
    usages: Vec<u32, MAX_LOCAL_USAGES>,
    usage_minimum: Option<u32>,
    usage_maximum: Option<u32>,
}

impl LocalItems {
    /// Usage of the i-th slot of a variable field, the last usage repeats
    fn usage_for_slot(&self, i: u32) -> Option<u32> {
        if let Some(last) = self.usages.last() {
            return Some(*self.usages.get(i as usize).unwrap_or(last));
        }
        match (self.usage_minimum, self.usage_maximum) {
            (Some(min), Some(max)) => Some(min.saturating_add(i).min(max)),
            (Some(min), None) => Some(min.saturating_add(i)),
            _ => None,
        }
    }
}

struct Parser {
    global: GlobalItems,
    stack: Vec<GlobalItems, GLOBAL_STACK_DEPTH>,
    local: LocalItems,
    /// Input bits consumed so far per report id
    offsets: Vec<(u8, u32), MAX_DESCRIPTOR_REPORTS>,
    parsed: ParsedDescriptor,
}

/// Parse a HID report descriptor
pub fn parse(descriptor: &[u8]) -> Result<ParsedDescriptor, DescriptorError> {
    let mut parser = Parser {
        global: GlobalItems::default(),
        stack: Vec::new(),
        local: LocalItems::default(),
        offsets: Vec::new(),
        parsed: ParsedDescriptor::default(),
    };

    let mut pos = 0;
    while pos < descriptor.len() {
        let prefix = descriptor[pos];

        // Long item: prefix, data size, tag, data
        if prefix == 0xFE {
            let size = *descriptor.get(pos + 1).ok_or(DescriptorError::Truncated)? as usize;
            pos += 3 + size;
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let bytes = descriptor
            .get(pos + 1..pos + 1 + size)
            .ok_or(DescriptorError::Truncated)?;
        let mut data = 0_u32;
        for (i, b) in bytes.iter().enumerate() {
            data |= (*b as u32) << (8 * i);
        }
        let signed = match size {
            1 => data as u8 as i8 as i32,
            2 => data as u16 as i16 as i32,
            _ => data as i32,
        };

        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;
        match item_type {
            0 => parser.main_item(tag, data)?,
            1 => parser.global_item(tag, data, signed)?,
            2 => parser.local_item(tag, data, size),
            _ => {}
        }
        pos += 1 + size;
    }

    for (report_id, bits) in parser.offsets.iter() {
        // Same capacity as `offsets`
        let _ = parser
            .parsed
            .report_sizes
            .push((*report_id, bits.div_ceil(8) as usize));
    }
    Ok(parser.parsed)
}

impl Parser {
    fn main_item(&mut self, tag: u8, data: u32) -> Result<(), DescriptorError> {
        // Input
        if tag == 0x8 {
            self.input(data)?;
        }
        // Every main item ends the scope of local items
        self.local = LocalItems::default();
        Ok(())
    }

    fn global_item(&mut self, tag: u8, data: u32, signed: i32) -> Result<(), DescriptorError> {
        match tag {
            0x0 => self.global.usage_page = data,
            0x1 => self.global.logical_minimum = signed,
            0x7 => self.global.report_size = data,
            0x8 => {
                self.global.report_id = data as u8;
                self.parsed.has_report_id = true;
            }
            0x9 => self.global.report_count = data,
            0xA => self
                .stack
                .push(self.global)
                .map_err(|_| DescriptorError::GlobalStack)?,
            0xB => self.global = self.stack.pop().ok_or(DescriptorError::GlobalStack)?,
            // Logical maximum, physical extents, unit and reserved items don't affect layout
            _ => {}
        }
        Ok(())
    }

    fn local_item(&mut self, tag: u8, data: u32, size: usize) {
        let usage = if size == 4 {
            data
        } else {
            (self.global.usage_page << 16) | (data & 0xFFFF)
        };
        match tag {
            0x0 => {
                if self.local.usages.push(usage).is_err() {
                    warn!("Too many usages in one main item, dropping {:#x}", usage);
                }
            }
            0x1 => self.local.usage_minimum = Some(usage),
            0x2 => self.local.usage_maximum = Some(usage),
            _ => {}
        }
    }

    fn input(&mut self, flags: u32) -> Result<(), DescriptorError> {
        let report_id = self.global.report_id;
        let size = self.global.report_size;
        let count = self.global.report_count;
        let base = self.offset(report_id)?;
        let end = size
            .checked_mul(count)
            .and_then(|bits| base.checked_add(bits))
            .ok_or(DescriptorError::ReportTooLarge)?;

        if flags & INPUT_CONSTANT == 0 && size > 0 && size <= 32 {
            // Offsets of the fields that fit are below `MAX_REPORT_BITS`, so they fit in u16
            if end > MAX_REPORT_BITS {
                warn!(
                    "Input field of report {} ends at bit {}, past the supported report size",
                    report_id, end
                );
            } else {
                self.define_field(flags, base, size, count)?;
            }
        }

        if let Some(entry) = self.offsets.iter_mut().find(|(id, _)| *id == report_id) {
            entry.1 = end;
        }
        Ok(())
    }

    fn define_field(&mut self, flags: u32, base: u32, size: u32, count: u32) -> Result<(), DescriptorError> {
        let template = UsageDef {
            report_id: self.global.report_id,
            bit_offset: base as u16,
            bit_size: size as u8,
            is_relative: flags & INPUT_RELATIVE != 0,
            is_array: flags & INPUT_VARIABLE == 0,
            array_index: self.global.logical_minimum,
            array_count: count.min(u8::MAX as u32) as u8,
            logical_minimum: self.global.logical_minimum,
        };

        if template.is_array {
            return self.array_field(template);
        }
        for i in 0..count {
            let Some(usage) = self.local.usage_for_slot(i) else {
                break;
            };
            let def = UsageDef {
                bit_offset: (base + i * size) as u16,
                ..template
            };
            self.push_usage(usage, def)?;
        }
        Ok(())
    }

    fn array_field(&mut self, template: UsageDef) -> Result<(), DescriptorError> {
        if self.local.usages.is_empty() {
            if let (Some(min), Some(max)) = (self.local.usage_minimum, self.local.usage_maximum) {
                if max >= min {
                    let span = UsageSpan {
                        first_usage: min,
                        count: (max - min).saturating_add(1).min(u16::MAX as u32) as u16,
                        template,
                    };
                    return self.push_span(span);
                }
            }
            return Ok(());
        }
        let usages = core::mem::take(&mut self.local.usages);
        for (k, usage) in usages.iter().enumerate() {
            let def = UsageDef {
                array_index: template.array_index.wrapping_add(k as i32),
                ..template
            };
            self.push_usage(*usage, def)?;
        }
        Ok(())
    }

    /// Bits already consumed in the given input report
    fn offset(&mut self, report_id: u8) -> Result<u32, DescriptorError> {
        if let Some((_, bits)) = self.offsets.iter().find(|(id, _)| *id == report_id) {
            return Ok(*bits);
        }
        self.offsets
            .push((report_id, 0))
            .map_err(|_| DescriptorError::TooManyReports)?;
        Ok(0)
    }

    fn push_usage(&mut self, usage: u32, def: UsageDef) -> Result<(), DescriptorError> {
        if let Some(last) = self.parsed.spans.last_mut() {
            if last.try_extend(usage, &def) {
                return Ok(());
            }
        }
        self.push_span(UsageSpan::single(usage, def))
    }

    fn push_span(&mut self, span: UsageSpan) -> Result<(), DescriptorError> {
        self.parsed.spans.push(span).map_err(|_| {
            error!("Too many usage spans in descriptor, capacity is {}", MAX_DESCRIPTOR_SPANS);
            DescriptorError::TooManyUsages
        })
    }
}
