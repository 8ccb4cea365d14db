//! Usage definitions and the registry of outgoing ("our") usages.

use heapless::Vec;
use heapless::index_map::FnvIndexMap;

use crate::descriptor::{DescriptorError, ParsedDescriptor};
use crate::report::{get_bits, put_bits, sign_extend};
use crate::{MAX_OUR_REPORTS, MAX_OUR_USAGES, MAX_REPORT_SIZE};

/// Generic Desktop X, the horizontal pointer axis
pub const CURSOR_X_USAGE: u32 = 0x0001_0030;
/// Generic Desktop Y, the vertical pointer axis
pub const CURSOR_Y_USAGE: u32 = 0x0001_0031;
/// Generic Desktop Wheel
pub const V_SCROLL_USAGE: u32 = 0x0001_0038;
/// Consumer AC Pan
pub const H_SCROLL_USAGE: u32 = 0x000C_0238;
/// Vendor usage page whose usages `page | n` activate layer `n`
pub const LAYERS_USAGE_PAGE: u32 = 0xFFF1_0000;
/// Vendor usage that advances the active screen
pub const SWITCH_SCREEN_USAGE: u32 = 0xFFF2_0001;

/// Usage that activates the given layer when it's the target of a mapping
pub const fn layer_usage(layer: u8) -> u32 {
    LAYERS_USAGE_PAGE | layer as u32
}

pub const fn is_pointer_axis(usage: u32) -> bool {
    usage == CURSOR_X_USAGE || usage == CURSOR_Y_USAGE
}

pub const fn is_scroll(usage: u32) -> bool {
    usage == V_SCROLL_USAGE || usage == H_SCROLL_USAGE
}

/// Where a usage lives in a report and how its bits are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsageDef {
    pub report_id: u8,
    pub bit_offset: u16,
    pub bit_size: u8,
    pub is_relative: bool,
    /// Array fields report which usages are active as indices, instead of one bit per usage
    pub is_array: bool,
    /// Index value which marks this usage as active in an array field
    pub array_index: i32,
    /// Number of slots in the array field
    pub array_count: u8,
    pub logical_minimum: i32,
}

impl UsageDef {
    pub fn is_signed(&self) -> bool {
        self.logical_minimum < 0
    }

    /// Read the value at this usage's position, sign extended when the field is signed.
    pub fn read(&self, report: &[u8]) -> i32 {
        let raw = get_bits(report, self.bit_offset, self.bit_size);
        if self.is_signed() {
            sign_extend(raw, self.bit_size)
        } else {
            raw as i32
        }
    }

    pub fn write(&self, report: &mut [u8], value: i32) {
        put_bits(report, self.bit_offset, self.bit_size, value as u32);
    }
}

/// A run of usages sharing one layout template.
///
/// For variable fields usage `first_usage + k` sits `k * bit_size` bits after the template's offset.
/// For array fields every usage shares the field's slots and `k` is added to the array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsageSpan {
    pub first_usage: u32,
    pub count: u16,
    pub template: UsageDef,
}

impl UsageSpan {
    pub fn single(usage: u32, def: UsageDef) -> Self {
        Self {
            first_usage: usage,
            count: 1,
            template: def,
        }
    }

    pub fn last_usage(&self) -> u32 {
        self.first_usage.saturating_add(self.count.saturating_sub(1) as u32)
    }

    pub fn get(&self, k: u16) -> (u32, UsageDef) {
        let mut def = self.template;
        if def.is_array {
            def.array_index = def.array_index.wrapping_add(k as i32);
        } else {
            def.bit_offset += k * def.bit_size as u16;
        }
        (self.first_usage.wrapping_add(k as u32), def)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, UsageDef)> + '_ {
        (0..self.count).map(|k| self.get(k))
    }

    /// Grow the span by one usage when `usage` and `def` continue its pattern.
    pub(crate) fn try_extend(&mut self, usage: u32, def: &UsageDef) -> bool {
        let t = &self.template;
        if self.count == u16::MAX
            || Some(usage) != self.first_usage.checked_add(self.count as u32)
            || def.report_id != t.report_id
            || def.bit_size != t.bit_size
            || def.is_relative != t.is_relative
            || def.is_array != t.is_array
            || def.logical_minimum != t.logical_minimum
        {
            return false;
        }
        let continues = if t.is_array {
            def.bit_offset == t.bit_offset
                && def.array_count == t.array_count
                && Some(def.array_index) == t.array_index.checked_add(self.count as i32)
        } else {
            def.bit_offset as u32 == t.bit_offset as u32 + self.count as u32 * t.bit_size as u32
        };
        if continues {
            self.count += 1;
        }
        continues
    }
}

/// Byte length and change detection masks of one outgoing report.
#[derive(Clone)]
pub struct ReportLayout {
    pub report_id: u8,
    len: usize,
    relative_mask: [u8; MAX_REPORT_SIZE],
    absolute_mask: [u8; MAX_REPORT_SIZE],
}

impl ReportLayout {
    fn new(report_id: u8, len: usize) -> Self {
        Self {
            report_id,
            len: len.min(MAX_REPORT_SIZE),
            relative_mask: [0; MAX_REPORT_SIZE],
            absolute_mask: [0; MAX_REPORT_SIZE],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits that belong to relative usages
    pub fn relative_mask(&self) -> &[u8] {
        &self.relative_mask[..self.len]
    }

    /// Bits that belong to absolute and boolean usages
    pub fn absolute_mask(&self) -> &[u8] {
        &self.absolute_mask[..self.len]
    }

    /// True when the two reports are different in any absolute bit
    pub fn differ_on_absolute(&self, a: &[u8], b: &[u8]) -> bool {
        self.absolute_mask()
            .iter()
            .zip(a.iter().zip(b.iter()))
            .any(|(mask, (x, y))| (x ^ y) & mask != 0)
    }
}

/// The usages of the outgoing descriptor, flattened to `usage -> UsageDef`.
pub struct OurUsages {
    usages: FnvIndexMap<u32, UsageDef, MAX_OUR_USAGES>,
    layouts: Vec<ReportLayout, MAX_OUR_REPORTS>,
}

impl OurUsages {
    pub fn from_descriptor(parsed: &ParsedDescriptor) -> Result<Self, DescriptorError> {
        let mut layouts: Vec<ReportLayout, MAX_OUR_REPORTS> = Vec::new();
        for &(report_id, len) in parsed.report_sizes.iter() {
            if len > MAX_REPORT_SIZE {
                error!("Outgoing report {} is {} bytes long", report_id, len);
                return Err(DescriptorError::ReportTooLarge);
            }
            layouts
                .push(ReportLayout::new(report_id, len))
                .map_err(|_| DescriptorError::TooManyReports)?;
        }

        let mut usages = FnvIndexMap::new();
        for span in parsed.spans.iter() {
            for (usage, def) in span.iter() {
                if usages.insert(usage, def).is_err() {
                    error!("Too many outgoing usages, capacity is {}", MAX_OUR_USAGES);
                    return Err(DescriptorError::TooManyUsages);
                }
                if let Some(layout) = layouts.iter_mut().find(|l| l.report_id == def.report_id) {
                    let len = layout.len;
                    let mask = if def.is_relative {
                        &mut layout.relative_mask[..len]
                    } else {
                        &mut layout.absolute_mask[..len]
                    };
                    put_bits(mask, def.bit_offset, def.bit_size, u32::MAX);
                }
            }
        }

        debug!("Outgoing descriptor has {} usages in {} reports", usages.len(), layouts.len());
        Ok(Self { usages, layouts })
    }

    pub fn get(&self, usage: u32) -> Option<&UsageDef> {
        self.usages.get(&usage)
    }

    pub fn len(&self) -> usize {
        self.usages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &UsageDef)> {
        self.usages.iter().map(|(usage, def)| (*usage, def))
    }

    pub fn layouts(&self) -> &[ReportLayout] {
        &self.layouts
    }

    pub fn layout(&self, report_id: u8) -> Option<&ReportLayout> {
        self.layouts.iter().find(|l| l.report_id == report_id)
    }

    /// Relative usages carried by the given report
    pub fn relative_in(&self, report_id: u8) -> impl Iterator<Item = &UsageDef> {
        self.usages
            .values()
            .filter(move |def| def.report_id == report_id && def.is_relative)
    }

    /// All usages, ascending
    pub fn sorted_usages(&self) -> Vec<u32, MAX_OUR_USAGES> {
        let mut sorted: Vec<u32, MAX_OUR_USAGES> = self.usages.keys().copied().collect();
        sorted.sort_unstable();
        sorted
    }
}
