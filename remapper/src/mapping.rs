//! The user configured mapping table and the reverse index the engine evaluates.

use heapless::Vec;

use crate::usage::{LAYERS_USAGE_PAGE, OurUsages, SWITCH_SCREEN_USAGE};
use crate::{MAX_MAPPINGS, MAX_OUR_USAGES, NLAYERS};

/// Bit of `MappingEntry::flags` that marks a sticky mapping
pub const MAPPING_FLAG_STICKY: u8 = 0x01;

/// Scaling of an identity mapping, values are ×1000 fixed point
pub const DEFAULT_SCALING: i32 = 1000;

const MAX_REVERSE_ENTRIES: usize = MAX_MAPPINGS + MAX_OUR_USAGES;
const MAX_LAYER_TRIGGERS: usize = 32;
const MAX_STICKY_USAGES: usize = 64;
const MAX_SCREEN_SWITCHES: usize = 16;

/// One `source -> target` record of the mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MappingEntry {
    pub target_usage: u32,
    pub source_usage: u32,
    pub scaling: i32,
    pub layer: u8,
    pub sticky: bool,
}

impl MappingEntry {
    pub fn new(source_usage: u32, target_usage: u32) -> Self {
        Self {
            target_usage,
            source_usage,
            scaling: DEFAULT_SCALING,
            layer: 0,
            sticky: false,
        }
    }

    pub fn flags(&self) -> u8 {
        if self.sticky { MAPPING_FLAG_STICKY } else { 0 }
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.sticky = flags & MAPPING_FLAG_STICKY != 0;
    }
}

/// Key of per layer state of a source usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LayerUsage {
    pub layer: u8,
    pub usage: u32,
}

impl LayerUsage {
    pub const fn new(layer: u8, usage: u32) -> Self {
        Self { layer, usage }
    }
}

/// A weighted source of a target usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MapSource {
    pub usage: u32,
    pub scaling: i32,
    pub sticky: bool,
    pub layer: u8,
}

impl MapSource {
    pub fn sticky_key(&self) -> LayerUsage {
        LayerUsage::new(self.layer, self.usage)
    }
}

/// A source of a target, as stored in the reverse index
#[derive(Debug, Clone, Copy)]
pub struct ReverseEntry {
    target: u32,
    order: u16,
    source: MapSource,
}

/// `target -> [MapSource]` compiled from the mapping table, plus the derived trigger sets.
///
/// Sources of a target keep the order of the mapping table. Passthrough sources come after
/// explicit ones.
pub struct ReverseIndex {
    entries: Vec<ReverseEntry, MAX_REVERSE_ENTRIES>,
    /// Sticky sources of layer activation, keyed by source usage
    layer_triggering_stickies: Vec<u32, MAX_LAYER_TRIGGERS>,
    /// Other sticky sources
    sticky_usages: Vec<LayerUsage, MAX_STICKY_USAGES>,
    /// Sources that advance the active screen
    screen_switch_usages: Vec<LayerUsage, MAX_SCREEN_SWITCHES>,
}

impl Default for ReverseIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ReverseIndex {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            layer_triggering_stickies: Vec::new(),
            sticky_usages: Vec::new(),
            screen_switch_usages: Vec::new(),
        }
    }

    /// Rebuild the whole index from the mapping table.
    pub fn rebuild(&mut self, mappings: &[MappingEntry], unmapped_passthrough: bool, our: &OurUsages) {
        self.entries.clear();
        self.layer_triggering_stickies.clear();
        self.sticky_usages.clear();
        self.screen_switch_usages.clear();

        let mut order = 0_u16;
        for mapping in mappings {
            let layer = if (mapping.layer as usize) < NLAYERS { mapping.layer } else { 0 };
            let source = MapSource {
                usage: mapping.source_usage,
                scaling: mapping.scaling,
                sticky: mapping.sticky,
                layer,
            };
            self.push(mapping.target_usage, order, source);
            order = order.wrapping_add(1);

            if mapping.sticky {
                if mapping.target_usage & 0xFFFF_0000 == LAYERS_USAGE_PAGE {
                    push_unique(&mut self.layer_triggering_stickies, mapping.source_usage);
                } else {
                    push_unique(&mut self.sticky_usages, source.sticky_key());
                }
            }
            if mapping.target_usage == SWITCH_SCREEN_USAGE {
                push_unique(&mut self.screen_switch_usages, source.sticky_key());
            }
        }

        if unmapped_passthrough {
            for (usage, _) in our.iter() {
                // Only mappings configured on layer 0 count, out of range layers don't
                let mapped = mappings.iter().any(|m| m.source_usage == usage && m.layer == 0);
                if !mapped {
                    let source = MapSource {
                        usage,
                        scaling: DEFAULT_SCALING,
                        sticky: false,
                        layer: 0,
                    };
                    self.push(usage, order, source);
                    order = order.wrapping_add(1);
                }
            }
        }

        self.entries.sort_unstable_by_key(|e| (e.target, e.order));
        debug!(
            "Reverse index rebuilt: {} sources, {} sticky, {} layer triggers",
            self.entries.len(),
            self.sticky_usages.len(),
            self.layer_triggering_stickies.len()
        );
    }

    fn push(&mut self, target: u32, order: u16, source: MapSource) {
        if self.entries.push(ReverseEntry { target, order, source }).is_err() {
            warn!("Reverse index is full, dropping source {:#x} of {:#x}", source.usage, target);
        }
    }

    /// Sources of the given target, in mapping table order
    pub fn sources(&self, target: u32) -> impl Iterator<Item = &MapSource> {
        let start = self.entries.partition_point(|e| e.target < target);
        self.entries[start..]
            .iter()
            .take_while(move |e| e.target == target)
            .map(|e| &e.source)
    }

    /// Every target with its sources
    pub fn targets(&self) -> impl Iterator<Item = (u32, &[ReverseEntry])> {
        self.entries
            .chunk_by(|a, b| a.target == b.target)
            .map(|group| (group[0].target, group))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn layer_triggering_stickies(&self) -> &[u32] {
        &self.layer_triggering_stickies
    }

    pub fn sticky_usages(&self) -> &[LayerUsage] {
        &self.sticky_usages
    }

    pub fn screen_switch_usages(&self) -> &[LayerUsage] {
        &self.screen_switch_usages
    }
}

impl ReverseEntry {
    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn source(&self) -> &MapSource {
        &self.source
    }
}

fn push_unique<T: PartialEq, const N: usize>(set: &mut Vec<T, N>, value: T) {
    if !set.contains(&value) && set.push(value).is_err() {
        warn!("Trigger set is full, capacity is {}", N);
    }
}
