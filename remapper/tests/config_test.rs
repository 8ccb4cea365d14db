pub mod common;

use byteorder::{ByteOrder, LittleEndian};
use embassy_futures::block_on;
use remapper::config::CONFIG_VERSION;
use remapper::config::persist::{CONFIG_BLOCK_SIZE, ConfigStorage, StorageError};
use remapper::config::protocol::{CONFIG_SIZE, ConfigCommand, ConfigEffect, seal};
use remapper::descriptor::CONFIG_REPORT_ID;
use remapper::screen::{ConstraintMode, Screen};
use remapper::{Configuration, MappingEntry, Remapper};

use crate::common::MemFlash;

const CONFIG_OFFSET: u32 = 4096;

fn request(command: ConfigCommand, fill: impl FnOnce(&mut [u8])) -> [u8; CONFIG_SIZE] {
    let mut data = [0_u8; CONFIG_SIZE];
    data[0] = CONFIG_VERSION;
    data[1] = command as u8;
    fill(&mut data[2..CONFIG_SIZE - 4]);
    seal(&mut data);
    data
}

fn add_mapping(remapper: &mut Remapper, source: u32, target: u32, layer: u8) {
    let add = request(ConfigCommand::AddMapping, |d| {
        LittleEndian::write_u32(&mut d[0..4], target);
        LittleEndian::write_u32(&mut d[4..8], source);
        LittleEndian::write_i32(&mut d[8..12], 1000);
        d[12] = layer;
    });
    assert_eq!(remapper.handle_set_feature(CONFIG_REPORT_ID, &add), ConfigEffect::None);
}

fn configure(remapper: &mut Remapper) {
    let set_config = request(ConfigCommand::SetConfig, |d| {
        d[0] = 0;
        LittleEndian::write_u32(&mut d[1..5], 500_000);
        d[5] = 1;
        d[6] = ConstraintMode::NoConstraint as u8;
        LittleEndian::write_u32(&mut d[7..11], 3000);
    });
    assert_eq!(
        remapper.handle_set_feature(CONFIG_REPORT_ID, &set_config),
        ConfigEffect::IntervalOverrideUpdated(1)
    );
    remapper.handle_set_feature(CONFIG_REPORT_ID, &request(ConfigCommand::ClearMapping, |_| {}));
    add_mapping(remapper, 0x0009_0001, 0x0007_0004, 0);
    add_mapping(remapper, 0x0009_0002, 0x0007_0005, 1);

    let set_screen = request(ConfigCommand::SetScreen, |d| {
        d[0] = 1;
        LittleEndian::write_u32(&mut d[1..5], 0);
        LittleEndian::write_u32(&mut d[5..9], 9_000_000);
        LittleEndian::write_u32(&mut d[9..13], 16_000_000);
        LittleEndian::write_u32(&mut d[13..17], 9_000_000);
        LittleEndian::write_u32(&mut d[17..21], 2000);
    });
    remapper.handle_set_feature(CONFIG_REPORT_ID, &set_screen);
}

#[test]
fn test_configure_and_persist() {
    let mut remapper = Remapper::new(Configuration::default()).unwrap();
    configure(&mut remapper);
    let persist = request(ConfigCommand::PersistConfig, |_| {});
    assert_eq!(remapper.handle_set_feature(CONFIG_REPORT_ID, &persist), ConfigEffect::Persist);

    let mut storage = ConfigStorage::new(MemFlash::new(), CONFIG_OFFSET);
    block_on(storage.persist(remapper.configuration())).unwrap();
    let loaded = block_on(storage.load()).unwrap();
    assert_eq!(&loaded, remapper.configuration());

    assert!(!loaded.unmapped_passthrough);
    assert_eq!(loaded.partial_scroll_timeout, 500_000);
    assert_eq!(loaded.interval_override, 1);
    assert_eq!(loaded.constraint_mode, ConstraintMode::NoConstraint);
    assert_eq!(loaded.screens.offscreen_sensitivity, 3000);
    assert_eq!(loaded.screens.screens[1], Screen::new(0, 9_000_000, 16_000_000, 9_000_000, 2000));
    assert_eq!(loaded.mappings.len(), 2);
    assert_eq!(loaded.mappings[1].source_usage, 0x0009_0002);
    assert_eq!(loaded.mappings[1].layer, 1);

    // Only the configuration sector was touched
    let flash = storage.into_inner();
    assert_eq!(flash.erase_count, 1);
    assert!(flash.data[..CONFIG_OFFSET as usize].iter().all(|b| *b == 0xFF));
    let end = CONFIG_OFFSET as usize + CONFIG_BLOCK_SIZE;
    assert!(flash.data[end..].iter().all(|b| *b == 0xFF));
}

#[test]
fn test_persist_overwrites_previous_configuration() {
    let mut storage = ConfigStorage::new(MemFlash::new(), CONFIG_OFFSET);
    let mut first = Configuration::default();
    for i in 0..10 {
        first.add_mapping(MappingEntry::new(0x0009_0001 + i, 0x0007_0004 + i));
    }
    block_on(storage.persist(&first)).unwrap();

    let mut second = Configuration::default();
    second.add_mapping(MappingEntry::new(0x0009_0003, 0x0007_0006));
    block_on(storage.persist(&second)).unwrap();

    assert_eq!(block_on(storage.load()), Ok(second));
}

#[test]
fn test_erased_flash_falls_back_to_defaults() {
    let mut storage = ConfigStorage::new(MemFlash::new(), CONFIG_OFFSET);
    assert_eq!(block_on(storage.load()), Err(StorageError::Checksum));
    assert_eq!(block_on(storage.load_or_default()), Configuration::default());
}

#[test]
fn test_unaligned_offset_fails() {
    let mut storage = ConfigStorage::new(MemFlash::new(), 100);
    assert_eq!(
        block_on(storage.persist(&Configuration::default())),
        Err(StorageError::Flash)
    );
}

#[test]
fn test_loaded_configuration_drives_remapper() {
    let mut configured = Remapper::new(Configuration::default()).unwrap();
    configure(&mut configured);
    let mut storage = ConfigStorage::new(MemFlash::new(), CONFIG_OFFSET);
    block_on(storage.persist(configured.configuration())).unwrap();

    let remapper = Remapper::new(block_on(storage.load_or_default())).unwrap();
    // The cursor starts in the middle of screen 0
    assert_eq!(remapper.cursor().active_screen, 0);
    assert_eq!((remapper.cursor().x, remapper.cursor().y), (8_000_000, 4_500_000));

    let mut remapper = remapper;
    let select = request(ConfigCommand::GetConfig, |_| {});
    remapper.handle_set_feature(CONFIG_REPORT_ID, &select);
    let mut response = [0_u8; CONFIG_SIZE];
    assert_eq!(remapper.handle_get_feature(CONFIG_REPORT_ID, &mut response), CONFIG_SIZE);
    assert_eq!(response[0], CONFIG_VERSION);
    assert_eq!(response[1], 0);
    assert_eq!(LittleEndian::read_u32(&response[2..6]), 500_000);
    assert_eq!(LittleEndian::read_u32(&response[6..10]), 2);
    assert_eq!(response[18], 1);
    assert_eq!(response[19], ConstraintMode::NoConstraint as u8);
    assert_eq!(LittleEndian::read_u32(&response[20..24]), 3000);
}
