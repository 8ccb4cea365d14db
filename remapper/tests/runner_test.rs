pub mod common;

use core::cell::RefCell;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use remapper::channel::{
    DEVICE_EVENT_CHANNEL, DeviceEvent, INCOMING_REPORT_CHANNEL, INTERVAL_OVERRIDE_SIGNAL, PERSIST_SIGNAL,
    TICK_SIGNAL,
};
use remapper::config::CONFIG_VERSION;
use remapper::config::persist::ConfigStorage;
use remapper::config::protocol::{CONFIG_SIZE, ConfigCommand, ConfigEffect, seal};
use remapper::descriptor::{CONFIG_REPORT_ID, DescriptorError, RESOLUTION_MULTIPLIER_REPORT_ID};
use remapper::input::{InterfaceId, TheirUsages, interface_id};
use remapper::link::{DualLink, DualMessage};
use remapper::runner::{
    SharedRemapper, THEIR_USAGES, device_connected, device_disconnected, get_feature_report, report_received,
    run_config_storage, run_dual_link, run_remapper, set_feature_report, start_of_frame,
};
use remapper::usage::SWITCH_SCREEN_USAGE;
use remapper::{Configuration, MappingEntry, Remapper};

use crate::common::{MemFlash, RecordingWriter, SentReport, SerialPipe, serialize_test, test_block_on};

#[rustfmt::skip]
const MOUSE: &[u8] = &[
    0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0x09, 0x01, 0xA1, 0x00,
    0x05, 0x09, 0x19, 0x01, 0x29, 0x03, 0x15, 0x00, 0x25, 0x01,
    0x95, 0x03, 0x75, 0x01, 0x81, 0x02,
    0x95, 0x01, 0x75, 0x05, 0x81, 0x03,
    0x05, 0x01, 0x09, 0x30, 0x09, 0x31, 0x09, 0x38, 0x15, 0x81, 0x25, 0x7F,
    0x75, 0x08, 0x95, 0x03, 0x81, 0x06,
    0xC0, 0xC0,
];

const MOUSE_ID: InterfaceId = interface_id(1, 0);
const BUTTON_1: u32 = 0x0009_0001;
const BUTTON_2: u32 = 0x0009_0002;
const KEY_A: u32 = 0x0007_0004;
const KEYBOARD_REPORT: u8 = 1;

/// Start from empty channels and no connected interfaces
fn reset_globals() {
    INCOMING_REPORT_CHANNEL.clear();
    DEVICE_EVENT_CHANNEL.clear();
    TICK_SIGNAL.reset();
    PERSIST_SIGNAL.reset();
    INTERVAL_OVERRIDE_SIGNAL.reset();
    THEIR_USAGES.lock(|their| *their.borrow_mut() = TheirUsages::new());
}

fn shared(config: Configuration) -> SharedRemapper {
    Mutex::new(RefCell::new(Remapper::new(config).unwrap()))
}

fn mapped(mappings: &[MappingEntry]) -> Configuration {
    let mut config = Configuration {
        unmapped_passthrough: false,
        ..Default::default()
    };
    for mapping in mappings {
        config.add_mapping(*mapping);
    }
    config
}

/// Value of one of our usages in a sent report
fn read(report: &SentReport, usage: u32) -> i32 {
    let remapper = Remapper::new(Configuration::default()).unwrap();
    remapper.our_usages().get(usage).unwrap().read(&report.payload)
}

fn has_report(writer: &RecordingWriter, report_id: u8, usage: u32, value: i32) -> bool {
    writer
        .reports()
        .iter()
        .any(|r| r.report_id == report_id && read(r, usage) == value)
}

/// Run the engine with a 1ms tick until `done` holds
fn run_until(
    remapper: &SharedRemapper,
    local: &RecordingWriter,
    forward: &RecordingWriter,
    mut done: impl FnMut() -> bool,
) {
    let mut local = local.clone();
    let mut forward = forward.clone();
    test_block_on(async {
        match select(run_remapper(remapper, &mut local, &mut forward), async {
            while !done() {
                start_of_frame();
                Timer::after(Duration::from_millis(1)).await;
            }
        })
        .await
        {
            Either::First(_) => unreachable!(),
            Either::Second(()) => {}
        }
    });
}

fn config_request(command: ConfigCommand, fill: impl FnOnce(&mut [u8])) -> [u8; CONFIG_SIZE] {
    let mut data = [0_u8; CONFIG_SIZE];
    data[0] = CONFIG_VERSION;
    data[1] = command as u8;
    fill(&mut data[2..CONFIG_SIZE - 4]);
    seal(&mut data);
    data
}

#[test]
fn test_reports_reach_local_writer() {
    let _guard = serialize_test();
    reset_globals();
    let remapper = shared(Configuration::default());
    let local = RecordingWriter::new();
    let forward = RecordingWriter::new();

    device_connected(MOUSE_ID, MOUSE).unwrap();
    assert!(report_received(MOUSE_ID, &[0x01, 0, 0, 0]));
    run_until(&remapper, &local, &forward, || has_report(&local, 2, BUTTON_1, 1));

    // The engine picked up the interface
    remapper.lock(|r| assert!(!r.borrow().their_usage_ranges().is_empty()));

    assert!(report_received(MOUSE_ID, &[0x00, 0, 0, 0]));
    run_until(&remapper, &local, &forward, || {
        local.reports().last().is_some_and(|r| r.report_id == 2 && read(r, BUTTON_1) == 0)
    });
    assert!(forward.reports().is_empty());
}

#[test]
fn test_disconnect_releases_input() {
    let _guard = serialize_test();
    reset_globals();
    let remapper = shared(Configuration::default());
    let local = RecordingWriter::new();
    let forward = RecordingWriter::new();

    device_connected(MOUSE_ID, MOUSE).unwrap();
    report_received(MOUSE_ID, &[0x02, 0, 0, 0]);
    run_until(&remapper, &local, &forward, || has_report(&local, 2, BUTTON_2, 1));

    device_disconnected(MOUSE_ID);
    run_until(&remapper, &local, &forward, || {
        local.reports().last().is_some_and(|r| r.report_id == 2 && read(r, BUTTON_2) == 0)
    });
    remapper.lock(|r| assert!(r.borrow().their_usage_ranges().is_empty()));
}

#[test]
fn test_reports_for_second_screen_are_forwarded() {
    let _guard = serialize_test();
    reset_globals();
    let remapper = shared(mapped(&[
        MappingEntry::new(BUTTON_2, SWITCH_SCREEN_USAGE),
        MappingEntry::new(BUTTON_1, KEY_A),
    ]));
    let local = RecordingWriter::new();
    let forward = RecordingWriter::new();

    device_connected(MOUSE_ID, MOUSE).unwrap();
    report_received(MOUSE_ID, &[0x02, 0, 0, 0]);
    run_until(&remapper, &local, &forward, || {
        remapper.lock(|r| r.borrow().cursor().active_screen == 1)
    });

    report_received(MOUSE_ID, &[0x03, 0, 0, 0]);
    run_until(&remapper, &local, &forward, || has_report(&forward, KEYBOARD_REPORT, KEY_A, 1));
    assert!(!has_report(&local, KEYBOARD_REPORT, KEY_A, 1));
}

#[test]
fn test_feature_reports() {
    let _guard = serialize_test();
    reset_globals();
    let remapper = shared(Configuration::default());

    // Resolution multiplier
    assert_eq!(
        set_feature_report(&remapper, RESOLUTION_MULTIPLIER_REPORT_ID, &[0x05]),
        ConfigEffect::None
    );
    let mut buf = [0_u8; 1];
    assert_eq!(get_feature_report(&remapper, RESOLUTION_MULTIPLIER_REPORT_ID, &mut buf), 1);
    assert_eq!(buf[0], 0x05);

    // Changing the interval override notifies the dual link
    let set_config = config_request(ConfigCommand::SetConfig, |d| {
        d[0] = 1;
        d[1..5].copy_from_slice(&1_000_000_u32.to_le_bytes());
        d[5] = 2;
        d[7..11].copy_from_slice(&4000_u32.to_le_bytes());
    });
    assert_eq!(
        set_feature_report(&remapper, CONFIG_REPORT_ID, &set_config),
        ConfigEffect::IntervalOverrideUpdated(2)
    );
    assert_eq!(INTERVAL_OVERRIDE_SIGNAL.try_take(), Some(2));

    let select_config = config_request(ConfigCommand::GetConfig, |_| {});
    set_feature_report(&remapper, CONFIG_REPORT_ID, &select_config);
    let mut response = [0_u8; CONFIG_SIZE];
    assert_eq!(get_feature_report(&remapper, CONFIG_REPORT_ID, &mut response), CONFIG_SIZE);
    assert_eq!(response[18], 2);

    // Unknown report ids are answered with nothing
    assert_eq!(get_feature_report(&remapper, 42, &mut response), 0);
}

#[test]
fn test_persist_request_writes_flash() {
    let _guard = serialize_test();
    reset_globals();
    let remapper = shared(Configuration::default());
    let mut storage = ConfigStorage::new(MemFlash::new(), 0);

    let add = config_request(ConfigCommand::AddMapping, |d| {
        d[0..4].copy_from_slice(&KEY_A.to_le_bytes());
        d[4..8].copy_from_slice(&BUTTON_1.to_le_bytes());
        d[8..12].copy_from_slice(&1000_i32.to_le_bytes());
    });
    set_feature_report(&remapper, CONFIG_REPORT_ID, &add);
    let persist = config_request(ConfigCommand::PersistConfig, |_| {});
    assert_eq!(set_feature_report(&remapper, CONFIG_REPORT_ID, &persist), ConfigEffect::Persist);

    test_block_on(async {
        match select(
            run_config_storage(&remapper, &mut storage),
            Timer::after(Duration::from_millis(10)),
        )
        .await
        {
            Either::First(_) => unreachable!(),
            Either::Second(()) => {}
        }
    });

    let stored = test_block_on(storage.load()).unwrap();
    assert_eq!(stored.mappings.len(), 1);
    assert_eq!(stored.mappings[0].source_usage, BUTTON_1);
    remapper.lock(|r| assert_eq!(r.borrow().configuration(), &stored));
}

#[test]
fn test_dual_link_engine_side() {
    let _guard = serialize_test();
    reset_globals();
    let remapper = shared(Configuration {
        interval_override: 3,
        ..Default::default()
    });
    let to_a = SerialPipe::new();
    let to_b = SerialPipe::new();
    let mut a = DualLink::new(to_a.clone(), to_b.clone());
    let mut b = DualLink::new(to_b.clone(), to_a.clone());

    test_block_on(async {
        match select(run_dual_link(&mut a, &remapper), async {
            b.write_message(&DualMessage::RequestBInit).await.unwrap();
            assert_eq!(
                b.read_message().await.unwrap(),
                DualMessage::BInit { interval_override: 3 }
            );

            b.write_message(&DualMessage::DeviceConnected {
                vid: 0x1234,
                pid: 0x5678,
                dev_addr: 1,
                interface: 0,
                descriptor: Vec::from_slice(MOUSE).unwrap(),
            })
            .await
            .unwrap();
            b.write_message(&DualMessage::ReportReceived {
                dev_addr: 1,
                interface: 0,
                report: Vec::from_slice(&[0x01, 0x05, 0x00, 0x00]).unwrap(),
            })
            .await
            .unwrap();
            while INCOMING_REPORT_CHANNEL.is_empty() {
                Timer::after(Duration::from_millis(1)).await;
            }

            INTERVAL_OVERRIDE_SIGNAL.signal(4);
            assert_eq!(b.read_message().await.unwrap(), DualMessage::Restart);

            b.write_message(&DualMessage::DeviceDisconnected {
                dev_addr: 1,
                interface: 0,
            })
            .await
            .unwrap();
            while THEIR_USAGES.lock(|their| !their.borrow().is_empty()) {
                Timer::after(Duration::from_millis(1)).await;
            }
        })
        .await
        {
            Either::First(result) => panic!("Dual link stopped: {:?}", result),
            Either::Second(()) => {}
        }
    });

    let report = INCOMING_REPORT_CHANNEL.try_receive().unwrap();
    assert_eq!(report.interface, MOUSE_ID);
    assert_eq!(&report.data[..], &[0x01, 0x05, 0x00, 0x00]);
    assert!(matches!(DEVICE_EVENT_CHANNEL.try_receive(), Ok(DeviceEvent::Connected)));
    assert!(matches!(
        DEVICE_EVENT_CHANNEL.try_receive(),
        Ok(DeviceEvent::Disconnected { .. })
    ));
}

#[test]
fn test_bad_descriptor_is_rejected_on_connect() {
    let _guard = serialize_test();
    reset_globals();

    // Logical maximum with one of its two data bytes missing
    let truncated = [0x05, 0x01, 0x26, 0xFF];
    assert_eq!(device_connected(MOUSE_ID, &truncated), Err(DescriptorError::Truncated));

    // Report size and count multiply past 32 bits
    #[rustfmt::skip]
    let oversized = [
        0x05, 0x01, 0x09, 0x30,
        0x77, 0x00, 0x00, 0x01, 0x00,
        0x97, 0x00, 0x00, 0x01, 0x00,
        0x81, 0x02,
    ];
    assert_eq!(device_connected(MOUSE_ID, &oversized), Err(DescriptorError::ReportTooLarge));

    assert!(THEIR_USAGES.lock(|their| their.borrow().is_empty()));
    assert!(DEVICE_EVENT_CHANNEL.try_receive().is_err());

    // The interface can still connect with a good descriptor
    assert_eq!(device_connected(MOUSE_ID, MOUSE), Ok(0));
    assert!(matches!(DEVICE_EVENT_CHANNEL.try_receive(), Ok(DeviceEvent::Connected)));
}

#[test]
fn test_engine_lock_leaves_interrupts_enabled() {
    let _guard = serialize_test();
    let remapper = shared(Configuration::default());
    remapper.lock(|r| {
        r.borrow_mut().process_mapping(true);
        // Another context can enter a critical section while the engine is locked
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || critical_section::with(|_| tx.send(()).unwrap()));
        assert!(rx.recv_timeout(std::time::Duration::from_secs(5)).is_ok());
    });
}
