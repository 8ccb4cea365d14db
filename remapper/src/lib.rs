//! HID report remapping engine.
//!
//! The crate turns reports received from one or more HID input devices into reports of its own
//! descriptor, according to a user programmable table of `source usage -> target usage`
//! mappings. It supports layers, sticky toggles, scroll resolution handling, a multi screen
//! cursor and forwarding of reports to a second microcontroller.
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod channel;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod hid;
pub mod input;
pub mod link;
pub mod mapping;
pub mod queue;
pub mod report;
pub mod rle;
pub mod runner;
pub mod screen;
pub mod scroll;
pub mod usage;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

pub use config::Configuration;
pub use engine::Remapper;
pub use hid::{HidError, ReportWriter};
pub use mapping::MappingEntry;

/// Raw mutex used by every shared static in the crate
pub type RawMutex = CriticalSectionRawMutex;

/// Number of layers, layer 0 is active while no other layer is
pub const NLAYERS: usize = 4;
/// Number of screens the cursor can move across
pub const NSCREENS: usize = 2;
/// Capacity of the mapping table, as many mappings as the persisted configuration block holds
pub const MAX_MAPPINGS: usize = 288;
/// Capacity of the outgoing usage registry, must be a power of two
pub const MAX_OUR_USAGES: usize = 256;
/// Number of outgoing input reports
pub const MAX_OUR_REPORTS: usize = 8;
/// Maximum length of an input report, excluding the report id
pub const MAX_REPORT_SIZE: usize = 64;
/// Capacity of the outgoing report queue
pub const OUTGOING_QUEUE_SIZE: usize = 8;
/// Number of incoming usages with a non zero value at the same time, must be a power of two
pub const MAX_INPUT_USAGES: usize = 256;
/// Number of input interfaces connected at the same time, must be a power of two
pub const MAX_INTERFACES: usize = 8;
/// Usage spans stored per input interface
pub const MAX_THEIR_SPANS: usize = 64;
/// Capacity of the run length encoded usage lists
pub const MAX_USAGE_RANGES: usize = 64;
/// Maximum length of a report descriptor received from an input device
pub const MAX_DESCRIPTOR_SIZE: usize = 512;
/// Capacity of the channel between the input devices and the engine
pub const INCOMING_REPORT_CHANNEL_SIZE: usize = 16;
