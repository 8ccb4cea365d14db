//! The configuration tool protocol.
//!
//! The tool talks to the device through a 32 byte vendor feature report. Every SET request is
//! `[version][command][26 bytes of data][crc32]`. Requests that read something first select
//! what to read with a SET, then fetch the answer with a GET of the same report.

use byteorder::{ByteOrder, LittleEndian};

use super::CONFIG_VERSION;
use super::persist::{MAPPING_SIZE, SCREEN_SIZE, read_mapping, read_screen, write_mapping, write_screen};
use crate::descriptor::{CONFIG_REPORT_ID, RESOLUTION_MULTIPLIER_REPORT_ID};
use crate::engine::Remapper;
use crate::rle::UsageRange;
use crate::screen::ConstraintMode;

/// Length of the config feature report, excluding the report id
pub const CONFIG_SIZE: usize = 32;

const CRC_OFFSET: usize = CONFIG_SIZE - 4;
const DATA_OFFSET: usize = 2;
/// Usage ranges returned by one GET_OUR_USAGES or GET_THEIR_USAGES
const USAGES_IN_PACKET: usize = 3;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigCommand {
    #[default]
    NoCommand = 0,
    ResetIntoBootsel = 1,
    SetConfig = 2,
    GetConfig = 3,
    ClearMapping = 4,
    AddMapping = 5,
    GetMapping = 6,
    PersistConfig = 7,
    GetOurUsages = 8,
    GetTheirUsages = 9,
    Suspend = 10,
    Resume = 11,
    SetScreen = 12,
    GetScreen = 13,
}

impl ConfigCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::NoCommand,
            1 => Self::ResetIntoBootsel,
            2 => Self::SetConfig,
            3 => Self::GetConfig,
            4 => Self::ClearMapping,
            5 => Self::AddMapping,
            6 => Self::GetMapping,
            7 => Self::PersistConfig,
            8 => Self::GetOurUsages,
            9 => Self::GetTheirUsages,
            10 => Self::Suspend,
            11 => Self::Resume,
            12 => Self::SetScreen,
            13 => Self::GetScreen,
            _ => return None,
        })
    }
}

/// What a SET request asks the rest of the firmware to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigEffect {
    None,
    /// Write the configuration to flash
    Persist,
    /// Reboot into the bootloader
    ResetIntoBootloader,
    /// The polling interval requested from input devices changed
    IntervalOverrideUpdated(u8),
}

/// The command and index selected by the last SET request, answered by the next GET
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolSession {
    last_command: ConfigCommand,
    requested_index: u32,
}

fn checksum_ok(data: &[u8]) -> bool {
    crc32fast::hash(&data[..CRC_OFFSET]) == LittleEndian::read_u32(&data[CRC_OFFSET..CONFIG_SIZE])
}

/// Write the checksum of the first 28 bytes into the last 4
pub fn seal(data: &mut [u8; CONFIG_SIZE]) {
    let crc = crc32fast::hash(&data[..CRC_OFFSET]);
    LittleEndian::write_u32(&mut data[CRC_OFFSET..], crc);
}

fn write_usage_ranges(buf: &mut [u8], ranges: &[UsageRange], start: u32) {
    let ranges = ranges.iter().skip(start as usize).take(USAGES_IN_PACKET);
    for (chunk, range) in buf.chunks_exact_mut(8).zip(ranges) {
        LittleEndian::write_u32(&mut chunk[0..4], range.start);
        LittleEndian::write_u32(&mut chunk[4..8], range.count);
    }
}

impl Remapper {
    /// Handle a SET_REPORT of a feature report.
    pub fn handle_set_feature(&mut self, report_id: u8, data: &[u8]) -> ConfigEffect {
        if report_id == RESOLUTION_MULTIPLIER_REPORT_ID {
            if let Some(value) = data.first() {
                self.set_resolution_multiplier(*value);
            }
            return ConfigEffect::None;
        }
        if report_id != CONFIG_REPORT_ID || data.len() < CONFIG_SIZE {
            return ConfigEffect::None;
        }
        let data = &data[..CONFIG_SIZE];
        if !checksum_ok(data) {
            warn!("Config request checksum mismatch");
            return ConfigEffect::None;
        }
        if data[0] != CONFIG_VERSION {
            warn!("Config request version {} isn't supported", data[0]);
            return ConfigEffect::None;
        }
        let Some(command) = ConfigCommand::from_u8(data[1]) else {
            warn!("Unknown config command {}", data[1]);
            self.session.last_command = ConfigCommand::NoCommand;
            return ConfigEffect::None;
        };
        debug!("Config command {:?}", command);
        self.session.last_command = command;
        let payload = &data[DATA_OFFSET..CRC_OFFSET];

        match command {
            ConfigCommand::NoCommand | ConfigCommand::GetConfig => ConfigEffect::None,
            ConfigCommand::ResetIntoBootsel => ConfigEffect::ResetIntoBootloader,
            ConfigCommand::SetConfig => {
                let previous_interval = self.config.interval_override;
                self.config.set_flags(payload[0]);
                self.config.partial_scroll_timeout = LittleEndian::read_u32(&payload[1..5]);
                self.config.interval_override = payload[5];
                self.config.constraint_mode = ConstraintMode::from_u8(payload[6]).unwrap_or_else(|| {
                    warn!("Unknown constraint mode {}", payload[6]);
                    ConstraintMode::default()
                });
                self.config.screens.offscreen_sensitivity = LittleEndian::read_u32(&payload[7..11]);
                self.rebuild();
                if previous_interval != self.config.interval_override {
                    ConfigEffect::IntervalOverrideUpdated(self.config.interval_override)
                } else {
                    ConfigEffect::None
                }
            }
            ConfigCommand::ClearMapping => {
                self.config.mappings.clear();
                self.rebuild();
                ConfigEffect::None
            }
            ConfigCommand::AddMapping => {
                if self.config.add_mapping(read_mapping(&payload[..MAPPING_SIZE])) {
                    self.rebuild();
                }
                ConfigEffect::None
            }
            ConfigCommand::GetMapping
            | ConfigCommand::GetOurUsages
            | ConfigCommand::GetTheirUsages
            | ConfigCommand::GetScreen => {
                self.session.requested_index = LittleEndian::read_u32(&payload[0..4]);
                ConfigEffect::None
            }
            ConfigCommand::PersistConfig => ConfigEffect::Persist,
            ConfigCommand::Suspend => {
                self.suspend();
                ConfigEffect::None
            }
            ConfigCommand::Resume => {
                self.resume();
                ConfigEffect::None
            }
            ConfigCommand::SetScreen => {
                let index = payload[0] as i8;
                let screen = read_screen(&payload[1..1 + SCREEN_SIZE]);
                if self.config.screens.set(index, screen) {
                    self.screens_updated();
                } else {
                    warn!("Screen {} doesn't exist", index);
                }
                ConfigEffect::None
            }
        }
    }

    /// Handle a GET_REPORT of a feature report, returns the number of bytes written to `buf`.
    pub fn handle_get_feature(&self, report_id: u8, buf: &mut [u8]) -> usize {
        if report_id == RESOLUTION_MULTIPLIER_REPORT_ID {
            return match buf.first_mut() {
                Some(b) => {
                    *b = self.resolution_multiplier();
                    1
                }
                None => 0,
            };
        }
        if report_id != CONFIG_REPORT_ID || buf.len() < CONFIG_SIZE {
            return 0;
        }

        let mut response = [0_u8; CONFIG_SIZE];
        let index = self.session.requested_index;
        match self.session.last_command {
            ConfigCommand::GetConfig => {
                let config = &self.config;
                response[0] = CONFIG_VERSION;
                response[1] = config.flags();
                LittleEndian::write_u32(&mut response[2..6], config.partial_scroll_timeout);
                LittleEndian::write_u32(&mut response[6..10], config.mappings.len() as u32);
                LittleEndian::write_u32(&mut response[10..14], self.our_usage_ranges().len() as u32);
                LittleEndian::write_u32(&mut response[14..18], self.their_usage_ranges().len() as u32);
                response[18] = config.interval_override;
                response[19] = config.constraint_mode as u8;
                LittleEndian::write_u32(&mut response[20..24], config.screens.offscreen_sensitivity);
            }
            ConfigCommand::GetMapping => {
                if let Some(mapping) = self.config.mappings.get(index as usize) {
                    write_mapping(&mut response[..MAPPING_SIZE], mapping);
                }
            }
            ConfigCommand::GetOurUsages => write_usage_ranges(&mut response[..CRC_OFFSET], self.our_usage_ranges(), index),
            ConfigCommand::GetTheirUsages => {
                write_usage_ranges(&mut response[..CRC_OFFSET], self.their_usage_ranges(), index)
            }
            ConfigCommand::GetScreen => {
                if let Some(screen) = self.config.screens.screens.get(index as usize) {
                    write_screen(&mut response[..SCREEN_SIZE], screen);
                }
            }
            _ => {}
        }
        seal(&mut response);
        buf[..CONFIG_SIZE].copy_from_slice(&response);
        CONFIG_SIZE
    }
}
