//! Incoming ("their") usages and the per usage input state.

use heapless::Vec;
use heapless::index_map::FnvIndexMap;
use heapless::index_set::FnvIndexSet;

use crate::descriptor::{DescriptorError, ParsedDescriptor, parse};
use crate::report::{get_bits, sign_extend};
use crate::rle::{UsageRange, encode};
use crate::usage::{UsageDef, UsageSpan};
use crate::{MAX_INPUT_USAGES, MAX_INTERFACES, MAX_THEIR_SPANS, MAX_USAGE_RANGES};

/// Interfaces are identified by `device address << 8 | interface number`
pub type InterfaceId = u16;

pub const fn interface_id(dev_addr: u8, interface: u8) -> InterfaceId {
    (dev_addr as u16) << 8 | interface as u16
}

/// Maximum number of slots of an array field that are inspected
const MAX_ARRAY_SLOTS: usize = 32;

/// Input usages of one connected interface
#[derive(Debug, Clone)]
pub struct InterfaceUsages {
    /// Bit this interface sets in the input state of absolute usages
    pub index: u8,
    pub has_report_id: bool,
    pub spans: Vec<UsageSpan, MAX_THEIR_SPANS>,
}

impl InterfaceUsages {
    pub fn iter(&self) -> impl Iterator<Item = (u32, UsageDef)> + '_ {
        self.spans.iter().flat_map(|span| span.iter())
    }
}

/// Usages of every connected input interface, shared between the ingestion path and the
/// device connection path.
#[derive(Default)]
pub struct TheirUsages {
    interfaces: FnvIndexMap<InterfaceId, InterfaceUsages, MAX_INTERFACES>,
}

impl TheirUsages {
    pub const fn new() -> Self {
        Self {
            interfaces: FnvIndexMap::new(),
        }
    }

    /// Parse the report descriptor of a newly connected interface and register its usages.
    ///
    /// Returns the interface's bit index.
    pub fn connect(&mut self, interface: InterfaceId, descriptor: &[u8]) -> Result<u8, DescriptorError> {
        let parsed = parse(descriptor)?;
        self.insert(interface, &parsed)
    }

    pub fn insert(&mut self, interface: InterfaceId, parsed: &ParsedDescriptor) -> Result<u8, DescriptorError> {
        let index = match self.interfaces.get(&interface) {
            Some(existing) => existing.index,
            None => (0..32_u8)
                .find(|i| !self.interfaces.values().any(|u| u.index == *i))
                .ok_or(DescriptorError::TooManyInterfaces)?,
        };
        let mut spans = Vec::new();
        for span in parsed.spans.iter() {
            if spans.push(*span).is_err() {
                warn!("Interface {:#x} has too many usages, ignoring the rest", interface);
                break;
            }
        }
        let usages = InterfaceUsages {
            index,
            has_report_id: parsed.has_report_id,
            spans,
        };
        if self.interfaces.insert(interface, usages).is_err() {
            error!("Too many interfaces, ignoring {:#x}", interface);
            return Err(DescriptorError::TooManyInterfaces);
        }
        info!("Interface {:#x} connected with index {}", interface, index);
        Ok(index)
    }

    /// Forget an interface, returns its bit index
    pub fn disconnect(&mut self, interface: InterfaceId) -> Option<u8> {
        let removed = self.interfaces.remove(&interface).map(|u| u.index);
        if removed.is_some() {
            info!("Interface {:#x} disconnected", interface);
        }
        removed
    }

    pub fn get(&self, interface: InterfaceId) -> Option<&InterfaceUsages> {
        self.interfaces.get(&interface)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Relative usages of every connected interface, collected into `out`
    pub fn relative_usages<const N: usize>(&self, out: &mut FnvIndexSet<u32, N>) {
        out.clear();
        for (usage, def) in self.interfaces.values().flat_map(|u| u.iter()) {
            if def.is_relative && out.insert(usage).is_err() {
                warn!("Too many relative usages, ignoring {:#x}", usage);
            }
        }
    }

    /// Every usage of every connected interface, run length encoded
    pub fn usage_ranges(&self) -> Vec<UsageRange, MAX_USAGE_RANGES> {
        let mut runs: Vec<(u32, u32), { MAX_INTERFACES * MAX_THEIR_SPANS }> = Vec::new();
        for span in self.interfaces.values().flat_map(|u| u.spans.iter()) {
            // Bounded by the number of interfaces times their spans
            let _ = runs.push((span.first_usage, span.last_usage()));
        }
        runs.sort_unstable();

        let mut next = 0_u32;
        encode(runs.into_iter().flat_map(move |(first, last)| {
            let start = first.max(next);
            next = next.max(last.saturating_add(1));
            start..=last
        }))
    }
}

/// Current value of every source usage.
///
/// Relative usages hold the latest delta. Absolute usages hold one bit per interface that
/// asserts them, so a usage stays active until every interface releases it.
pub struct InputState {
    values: FnvIndexMap<u32, i32, MAX_INPUT_USAGES>,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

impl InputState {
    pub const fn new() -> Self {
        Self {
            values: FnvIndexMap::new(),
        }
    }

    pub fn get(&self, usage: u32) -> i32 {
        self.values.get(&usage).copied().unwrap_or(0)
    }

    pub fn set(&mut self, usage: u32, value: i32) {
        if value == 0 {
            self.values.remove(&usage);
        } else if self.values.insert(usage, value).is_err() {
            warn!("Input state is full, dropping {:#x}", usage);
        }
    }

    fn assert_bit(&mut self, usage: u32, index: u8, asserted: bool) {
        let bit = 1_i32.wrapping_shl(index as u32);
        let current = self.get(usage);
        let value = if asserted { current | bit } else { current & !bit };
        if value != current {
            self.set(usage, value);
        }
    }

    /// Zero every relative usage after a tick consumed it
    pub fn clear_relative(&mut self, is_relative: impl Fn(u32) -> bool) {
        self.values.retain(|usage, _| !is_relative(*usage));
    }

    /// Release everything a disconnected interface was asserting
    pub fn release_interface(&mut self, index: u8, is_relative: impl Fn(u32) -> bool) {
        let bit = 1_i32.wrapping_shl(index as u32);
        self.values.retain(|usage, value| {
            if !is_relative(*usage) {
                *value &= !bit;
            }
            *value != 0
        });
    }
}

/// Update the input state from a report received on `interface`.
pub fn ingest(their: &TheirUsages, state: &mut InputState, interface: InterfaceId, report: &[u8]) {
    let Some(usages) = their.get(interface) else {
        trace!("Report from unknown interface {:#x}", interface);
        return;
    };
    let (report_id, data) = if usages.has_report_id {
        match report.split_first() {
            Some((id, rest)) => (*id, rest),
            None => return,
        }
    } else {
        (0, report)
    };

    for span in usages.spans.iter().filter(|s| s.template.report_id == report_id) {
        if span.template.is_array {
            let t = &span.template;
            let mut slots: Vec<i32, MAX_ARRAY_SLOTS> = Vec::new();
            for i in 0..(t.array_count as usize).min(MAX_ARRAY_SLOTS) {
                let raw = get_bits(data, t.bit_offset + (i as u16) * t.bit_size as u16, t.bit_size);
                let value = if t.is_signed() { sign_extend(raw, t.bit_size) } else { raw as i32 };
                let _ = slots.push(value);
            }
            for (usage, def) in span.iter() {
                let active = slots.contains(&def.array_index);
                state.assert_bit(usage, usages.index, active);
            }
        } else {
            for (usage, def) in span.iter() {
                let value = def.read(data);
                if def.is_relative {
                    state.set(usage, value);
                } else {
                    state.assert_bit(usage, usages.index, value != 0);
                }
            }
        }
    }
}
