//! Channels and signals shared between the tasks of the remapper

use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::Vec;

use crate::input::InterfaceId;
use crate::link::DualMessage;
use crate::{INCOMING_REPORT_CHANNEL_SIZE, MAX_REPORT_SIZE, RawMutex};

/// Capacity of the device event channel
pub const DEVICE_EVENT_CHANNEL_SIZE: usize = 8;
/// Capacity of the channel from the USB host of the input board to the dual link
pub const INPUT_BOARD_CHANNEL_SIZE: usize = 4;

/// A raw report received from an input interface
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IncomingReport {
    pub interface: InterfaceId,
    /// Report bytes, starting with the report id when the interface uses them
    pub data: Vec<u8, MAX_REPORT_SIZE>,
}

/// Changes of the set of connected input interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceEvent {
    Connected,
    /// The interface that owned the slot `index` was removed
    Disconnected { index: u8 },
}

/// Raised once per USB frame, drives auto repeat of absolute mappings
pub static TICK_SIGNAL: Signal<RawMutex, ()> = Signal::new();
/// Reports from the input devices, consumed by the engine task
pub static INCOMING_REPORT_CHANNEL: Channel<RawMutex, IncomingReport, INCOMING_REPORT_CHANNEL_SIZE> = Channel::new();
pub static DEVICE_EVENT_CHANNEL: Channel<RawMutex, DeviceEvent, DEVICE_EVENT_CHANNEL_SIZE> = Channel::new();
/// Raised by the configuration protocol when the configuration should be written to flash
pub static PERSIST_SIGNAL: Signal<RawMutex, ()> = Signal::new();
/// Raised when the interval override changed, the dual link restarts the input board then
pub static INTERVAL_OVERRIDE_SIGNAL: Signal<RawMutex, u8> = Signal::new();
/// Messages the input board sends to the engine board: connections and input reports
pub static INPUT_BOARD_CHANNEL: Channel<RawMutex, DualMessage, INPUT_BOARD_CHANNEL_SIZE> = Channel::new();
