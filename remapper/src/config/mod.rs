//! Runtime configuration of the remapper.
//!
//! The configuration is loaded from flash at boot ([`persist`]), edited by the configuration tool
//! through a feature report ([`protocol`]) and written back on request.

pub mod persist;
pub mod protocol;

use embassy_time::Duration;
use heapless::Vec;

use crate::MAX_MAPPINGS;
use crate::mapping::MappingEntry;
use crate::screen::{ConstraintMode, ScreenTable};

/// Version of both the persisted block and the configuration protocol
pub const CONFIG_VERSION: u8 = 4;

/// Bit of the config flags that enables passthrough of unmapped usages
pub const UNMAPPED_PASSTHROUGH_FLAG: u8 = 0x01;

/// Default partial scroll timeout, in microseconds
pub const DEFAULT_PARTIAL_SCROLL_TIMEOUT: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Configuration {
    /// Usages without a layer 0 mapping are passed through unchanged
    pub unmapped_passthrough: bool,
    /// Microseconds after which partial lo-res scroll movement is dropped
    pub partial_scroll_timeout: u32,
    /// Requested polling interval of input devices, 0 keeps the device's own interval
    pub interval_override: u8,
    pub constraint_mode: ConstraintMode,
    pub screens: ScreenTable,
    pub mappings: Vec<MappingEntry, MAX_MAPPINGS>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            unmapped_passthrough: true,
            partial_scroll_timeout: DEFAULT_PARTIAL_SCROLL_TIMEOUT,
            interval_override: 0,
            constraint_mode: ConstraintMode::Visible,
            screens: ScreenTable::default(),
            mappings: Vec::new(),
        }
    }
}

impl Configuration {
    pub fn flags(&self) -> u8 {
        if self.unmapped_passthrough {
            UNMAPPED_PASSTHROUGH_FLAG
        } else {
            0
        }
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.unmapped_passthrough = flags & UNMAPPED_PASSTHROUGH_FLAG != 0;
    }

    pub fn scroll_timeout(&self) -> Duration {
        Duration::from_micros(self.partial_scroll_timeout as u64)
    }

    /// Append a mapping, returns false when the table is full
    pub fn add_mapping(&mut self, mapping: MappingEntry) -> bool {
        if self.mappings.push(mapping).is_err() {
            warn!("Mapping table is full, dropping {:#x} -> {:#x}", mapping.source_usage, mapping.target_usage);
            return false;
        }
        true
    }
}
