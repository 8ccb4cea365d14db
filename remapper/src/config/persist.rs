//! The configuration block stored in flash.
//!
//! The block is a fixed 4096 byte sector, all integers little endian:
//!
//! | offset | content                                                   |
//! |--------|-----------------------------------------------------------|
//! | 0      | version                                                   |
//! | 1      | flags                                                     |
//! | 2      | partial scroll timeout, u32                               |
//! | 6      | mapping count, u32                                        |
//! | 10     | interval override                                         |
//! | 11     | constraint mode                                           |
//! | 12     | offscreen sensitivity, u32                                |
//! | 16     | screens, `{x, y, w, h, sensitivity}` u32 each             |
//! | 56     | mappings, `{target u32, source u32, scaling i32, layer u8, flags u8}` |
//! | 4092   | CRC-32 of everything before it                            |

use byteorder::{ByteOrder, LittleEndian};
use embedded_storage_async::nor_flash::NorFlash;
use heapless::Vec;

use super::{CONFIG_VERSION, Configuration};
use crate::mapping::MappingEntry;
use crate::screen::{ConstraintMode, Screen};
use crate::{MAX_MAPPINGS, NSCREENS};

/// Size of the persisted block, one flash sector
pub const CONFIG_BLOCK_SIZE: usize = 4096;

pub(crate) const SCREEN_SIZE: usize = 20;
pub(crate) const MAPPING_SIZE: usize = 14;
const SCREENS_OFFSET: usize = 16;
const MAPPINGS_OFFSET: usize = SCREENS_OFFSET + NSCREENS * SCREEN_SIZE;
const CRC_OFFSET: usize = CONFIG_BLOCK_SIZE - 4;

// A full mapping table must fit in the block
const _: () = assert!(MAPPINGS_OFFSET + MAX_MAPPINGS * MAPPING_SIZE <= CRC_OFFSET);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// The flash driver failed
    Flash,
    Checksum,
    Version,
    /// The block declares more mappings than fit
    Layout,
}

pub(crate) fn write_screen(buf: &mut [u8], screen: &Screen) {
    LittleEndian::write_u32(&mut buf[0..4], screen.x);
    LittleEndian::write_u32(&mut buf[4..8], screen.y);
    LittleEndian::write_u32(&mut buf[8..12], screen.w);
    LittleEndian::write_u32(&mut buf[12..16], screen.h);
    LittleEndian::write_u32(&mut buf[16..20], screen.sensitivity);
}

pub(crate) fn read_screen(buf: &[u8]) -> Screen {
    Screen::new(
        LittleEndian::read_u32(&buf[0..4]),
        LittleEndian::read_u32(&buf[4..8]),
        LittleEndian::read_u32(&buf[8..12]),
        LittleEndian::read_u32(&buf[12..16]),
        LittleEndian::read_u32(&buf[16..20]),
    )
}

pub(crate) fn write_mapping(buf: &mut [u8], mapping: &MappingEntry) {
    LittleEndian::write_u32(&mut buf[0..4], mapping.target_usage);
    LittleEndian::write_u32(&mut buf[4..8], mapping.source_usage);
    LittleEndian::write_i32(&mut buf[8..12], mapping.scaling);
    buf[12] = mapping.layer;
    buf[13] = mapping.flags();
}

pub(crate) fn read_mapping(buf: &[u8]) -> MappingEntry {
    let mut mapping = MappingEntry::new(LittleEndian::read_u32(&buf[4..8]), LittleEndian::read_u32(&buf[0..4]));
    mapping.scaling = LittleEndian::read_i32(&buf[8..12]);
    mapping.layer = buf[12];
    mapping.set_flags(buf[13]);
    mapping
}

/// Serialize the configuration into a whole block, including the checksum.
pub fn encode(config: &Configuration, block: &mut [u8; CONFIG_BLOCK_SIZE]) {
    block.fill(0);
    block[0] = CONFIG_VERSION;
    block[1] = config.flags();
    LittleEndian::write_u32(&mut block[2..6], config.partial_scroll_timeout);
    LittleEndian::write_u32(&mut block[6..10], config.mappings.len() as u32);
    block[10] = config.interval_override;
    block[11] = config.constraint_mode as u8;
    LittleEndian::write_u32(&mut block[12..16], config.screens.offscreen_sensitivity);
    for (i, screen) in config.screens.screens.iter().enumerate() {
        let start = SCREENS_OFFSET + i * SCREEN_SIZE;
        write_screen(&mut block[start..start + SCREEN_SIZE], screen);
    }
    for (i, mapping) in config.mappings.iter().enumerate() {
        let start = MAPPINGS_OFFSET + i * MAPPING_SIZE;
        write_mapping(&mut block[start..start + MAPPING_SIZE], mapping);
    }
    let crc = crc32fast::hash(&block[..CRC_OFFSET]);
    LittleEndian::write_u32(&mut block[CRC_OFFSET..], crc);
}

/// Validate and parse a block.
pub fn decode(block: &[u8; CONFIG_BLOCK_SIZE]) -> Result<Configuration, StorageError> {
    if crc32fast::hash(&block[..CRC_OFFSET]) != LittleEndian::read_u32(&block[CRC_OFFSET..]) {
        return Err(StorageError::Checksum);
    }
    if block[0] != CONFIG_VERSION {
        return Err(StorageError::Version);
    }
    let mapping_count = LittleEndian::read_u32(&block[6..10]) as usize;
    if mapping_count > MAX_MAPPINGS || MAPPINGS_OFFSET + mapping_count * MAPPING_SIZE > CRC_OFFSET {
        return Err(StorageError::Layout);
    }

    let mut config = Configuration::default();
    config.set_flags(block[1]);
    config.partial_scroll_timeout = LittleEndian::read_u32(&block[2..6]);
    config.interval_override = block[10];
    config.constraint_mode = ConstraintMode::from_u8(block[11]).unwrap_or_default();
    config.screens.offscreen_sensitivity = LittleEndian::read_u32(&block[12..16]);
    for (i, screen) in config.screens.screens.iter_mut().enumerate() {
        let start = SCREENS_OFFSET + i * SCREEN_SIZE;
        *screen = read_screen(&block[start..start + SCREEN_SIZE]);
    }
    config.mappings = (0..mapping_count)
        .map(|i| {
            let start = MAPPINGS_OFFSET + i * MAPPING_SIZE;
            read_mapping(&block[start..start + MAPPING_SIZE])
        })
        .collect::<Vec<_, MAX_MAPPINGS>>();
    Ok(config)
}

/// Reads and writes the configuration block at a fixed offset of a flash.
pub struct ConfigStorage<F: NorFlash> {
    flash: F,
    offset: u32,
    buffer: [u8; CONFIG_BLOCK_SIZE],
}

impl<F: NorFlash> ConfigStorage<F> {
    /// `offset` must be aligned to the flash's erase size
    pub fn new(flash: F, offset: u32) -> Self {
        Self {
            flash,
            offset,
            buffer: [0; CONFIG_BLOCK_SIZE],
        }
    }

    pub async fn load(&mut self) -> Result<Configuration, StorageError> {
        self.flash.read(self.offset, &mut self.buffer).await.map_err(|_e| {
            error!("Failed to read the configuration block at {:#x}", self.offset);
            StorageError::Flash
        })?;
        decode(&self.buffer)
    }

    /// Load the stored configuration, falling back to the defaults when there is none
    pub async fn load_or_default(&mut self) -> Configuration {
        match self.load().await {
            Ok(config) => {
                info!("Loaded configuration with {} mappings", config.mappings.len());
                config
            }
            Err(e) => {
                warn!("No valid stored configuration, using defaults: {:?}", e);
                Configuration::default()
            }
        }
    }

    /// Erase the sector and write the configuration to it
    pub async fn persist(&mut self, config: &Configuration) -> Result<(), StorageError> {
        encode(config, &mut self.buffer);
        let end = self.offset + CONFIG_BLOCK_SIZE as u32;
        self.flash.erase(self.offset, end).await.map_err(|_e| {
            error!("Failed to erase the configuration block at {:#x}", self.offset);
            StorageError::Flash
        })?;
        self.flash.write(self.offset, &self.buffer).await.map_err(|_e| {
            error!("Failed to write the configuration block at {:#x}", self.offset);
            StorageError::Flash
        })?;
        info!("Configuration persisted, {} mappings", config.mappings.len());
        Ok(())
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}
