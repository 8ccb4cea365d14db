//! Tasks and entry points that drive the remapper on a board.
//!
//! The engine is shared as a [`SharedRemapper`] between [`run_remapper`], the USB control
//! handlers of the configuration protocol and [`run_config_storage`]. Input devices are
//! registered in [`THEIR_USAGES`] and deliver their reports through [`report_received`], either
//! from a local USB host stack or over the dual link, see [`run_dual_link`].

use core::cell::RefCell;

use embassy_futures::select::{Either, Either4, select, select4};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Duration, Ticker, Timer};
use embedded_io_async::{Read, Write};
use embedded_storage_async::nor_flash::NorFlash;
use heapless::Vec;
use static_cell::StaticCell;

use crate::RawMutex;
use crate::channel::{
    DEVICE_EVENT_CHANNEL, DeviceEvent, INCOMING_REPORT_CHANNEL, INPUT_BOARD_CHANNEL, INTERVAL_OVERRIDE_SIGNAL,
    IncomingReport, PERSIST_SIGNAL, TICK_SIGNAL,
};
use crate::config::persist::ConfigStorage;
use crate::config::protocol::ConfigEffect;
use crate::descriptor::DescriptorError;
use crate::engine::Remapper;
use crate::hid::ReportWriter;
use crate::input::{InterfaceId, TheirUsages, interface_id};
use crate::link::{DualLink, DualMessage, FrameReader, LinkError};

/// The engine, shared by tasks of one executor.
///
/// A tick holds the lock for a whole mapping pass, so it's a [`NoopRawMutex`] rather than a
/// critical section: interrupts stay enabled meanwhile. Feature report handlers must run in a task
/// of the same executor, not in an interrupt.
pub type SharedRemapper = Mutex<NoopRawMutex, RefCell<Remapper>>;
pub type SharedTheirUsages = Mutex<RawMutex, RefCell<TheirUsages>>;

/// Usages of the connected input interfaces
pub static THEIR_USAGES: SharedTheirUsages = Mutex::new(RefCell::new(TheirUsages::new()));

/// Interval between two init requests of the input board
const B_INIT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Move the remapper to static memory, so that every task can use it.
///
/// Must be called once.
pub fn share_remapper(remapper: Remapper) -> &'static SharedRemapper {
    static REMAPPER: StaticCell<SharedRemapper> = StaticCell::new();
    REMAPPER.init(Mutex::new(RefCell::new(remapper)))
}

fn notify(event: DeviceEvent) {
    if DEVICE_EVENT_CHANNEL.try_send(event).is_err() {
        error!("Device event channel full, dropped {:?}", event);
    }
}

/// Register a newly mounted input interface, returns its bit index
pub fn device_connected(interface: InterfaceId, descriptor: &[u8]) -> Result<u8, DescriptorError> {
    let index = THEIR_USAGES.lock(|their| their.borrow_mut().connect(interface, descriptor))?;
    info!("Input interface {:#06x} connected, index {}", interface, index);
    notify(DeviceEvent::Connected);
    Ok(index)
}

pub fn device_disconnected(interface: InterfaceId) {
    match THEIR_USAGES.lock(|their| their.borrow_mut().disconnect(interface)) {
        Some(index) => {
            info!("Input interface {:#06x} disconnected", interface);
            notify(DeviceEvent::Disconnected { index });
        }
        None => warn!("Unknown input interface {:#06x} disconnected", interface),
    }
}

/// Queue a report received from an input interface.
///
/// Never blocks, returns false when the report was dropped.
pub fn report_received(interface: InterfaceId, report: &[u8]) -> bool {
    let Ok(data) = Vec::from_slice(report) else {
        warn!("Input report of {} bytes is too long, dropped", report.len());
        return false;
    };
    if INCOMING_REPORT_CHANNEL.try_send(IncomingReport { interface, data }).is_err() {
        warn!("Incoming report channel full, report dropped");
        return false;
    }
    true
}

/// Call from the USB start of frame interrupt, or let [`run_tick_source`] do it
pub fn start_of_frame() {
    TICK_SIGNAL.signal(());
}

/// Tick source for boards without a start of frame interrupt
pub async fn run_tick_source() -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        ticker.next().await;
        TICK_SIGNAL.signal(());
    }
}

/// Handle a SET_REPORT request for a feature report
pub fn set_feature_report(remapper: &SharedRemapper, report_id: u8, data: &[u8]) -> ConfigEffect {
    let effect = remapper.lock(|r| r.borrow_mut().handle_set_feature(report_id, data));
    match effect {
        ConfigEffect::Persist => PERSIST_SIGNAL.signal(()),
        ConfigEffect::IntervalOverrideUpdated(interval) => INTERVAL_OVERRIDE_SIGNAL.signal(interval),
        ConfigEffect::ResetIntoBootloader | ConfigEffect::None => {}
    }
    effect
}

/// Answer a GET_REPORT request for a feature report, returns the length written to `buf`
pub fn get_feature_report(remapper: &SharedRemapper, report_id: u8, buf: &mut [u8]) -> usize {
    remapper.lock(|r| r.borrow().handle_get_feature(report_id, buf))
}

fn take_tick() -> bool {
    let pending = TICK_SIGNAL.signaled();
    if pending {
        TICK_SIGNAL.reset();
    }
    pending
}

fn handle_device_event(remapper: &SharedRemapper, event: DeviceEvent) {
    remapper.lock(|r| {
        let mut r = r.borrow_mut();
        if let DeviceEvent::Disconnected { index } = event {
            r.interface_disconnected(index);
        }
        THEIR_USAGES.lock(|their| r.update_their_derivatives(&their.borrow()));
    });
}

async fn send_pending_reports<L: ReportWriter, F: ReportWriter>(
    remapper: &SharedRemapper,
    local: &mut L,
    forward: &mut F,
) {
    while let Some(report) = remapper.lock(|r| r.borrow_mut().pop_report()) {
        let result = if report.target_screen == 0 {
            local.ready().await;
            local.write_report(report.report_id, &report.payload).await
        } else {
            forward.ready().await;
            forward.write_report(report.report_id, &report.payload).await
        };
        if let Err(e) = result {
            warn!(
                "Sending report {} to screen {} failed: {:?}",
                report.report_id, report.target_screen, e
            );
        }
    }
}

/// Run the engine.
///
/// Ingests incoming reports, evaluates the mappings on every tick and delivers the outgoing
/// reports: the ones for screen 0 to `local`, the others to `forward`. Counters are logged once
/// per second.
pub async fn run_remapper<L: ReportWriter, F: ReportWriter>(
    remapper: &SharedRemapper,
    local: &mut L,
    forward: &mut F,
) -> ! {
    let mut stats_ticker = Ticker::every(Duration::from_secs(1));
    info!("Remapper running");
    loop {
        match select4(
            INCOMING_REPORT_CHANNEL.receive(),
            TICK_SIGNAL.wait(),
            DEVICE_EVENT_CHANNEL.receive(),
            stats_ticker.next(),
        )
        .await
        {
            Either4::First(report) => {
                let tick_pending = take_tick();
                remapper.lock(|r| {
                    let mut r = r.borrow_mut();
                    THEIR_USAGES.lock(|their| {
                        r.handle_received_report(&their.borrow(), report.interface, &report.data)
                    });
                    r.process_mapping(tick_pending);
                });
            }
            Either4::Second(()) => remapper.lock(|r| r.borrow_mut().process_mapping(true)),
            Either4::Third(event) => handle_device_event(remapper, event),
            Either4::Fourth(()) => {
                let stats = remapper.lock(|r| r.borrow_mut().take_stats());
                info!(
                    "Reports received: {}, sent: {}, queue overflows: {}",
                    stats.reports_received, stats.reports_sent, stats.queue_overflows
                );
            }
        }
        send_pending_reports(remapper, local, forward).await;
    }
}

/// Write the configuration to flash whenever the configuration protocol asks for it
pub async fn run_config_storage<F: NorFlash>(remapper: &SharedRemapper, storage: &mut ConfigStorage<F>) -> ! {
    loop {
        PERSIST_SIGNAL.wait().await;
        let config = remapper.lock(|r| r.borrow().configuration().clone());
        if let Err(e) = storage.persist(&config).await {
            error!("Persisting the configuration failed: {:?}", e);
        }
    }
}

async fn handle_dual_message<R: Read, W: Write>(
    link: &mut DualLink<R, W>,
    remapper: &SharedRemapper,
    message: DualMessage,
) -> Result<(), LinkError> {
    match message {
        DualMessage::RequestBInit => {
            let interval_override = remapper.lock(|r| r.borrow().configuration().interval_override);
            link.write_message(&DualMessage::BInit { interval_override }).await?;
        }
        DualMessage::DeviceConnected {
            vid,
            pid,
            dev_addr,
            interface,
            descriptor,
        } => {
            info!("Device {:04x}:{:04x} connected, address {}", vid, pid, dev_addr);
            if let Err(e) = device_connected(interface_id(dev_addr, interface), &descriptor) {
                warn!("Ignoring interface {} of device {}: {:?}", interface, dev_addr, e);
            }
        }
        DualMessage::DeviceDisconnected { dev_addr, interface } => {
            device_disconnected(interface_id(dev_addr, interface));
        }
        DualMessage::ReportReceived {
            dev_addr,
            interface,
            report,
        } => {
            report_received(interface_id(dev_addr, interface), &report);
        }
        DualMessage::BInit { .. } | DualMessage::Restart => {
            warn!("Unexpected message from the input board");
        }
    }
    Ok(())
}

/// Run the engine side of the dual link.
///
/// Answers the init requests of the input board, registers the input interfaces it reports and
/// queues their reports. When the interval override changes, the input board is restarted so that
/// it applies the new interval. Returns when the serial port fails.
pub async fn run_dual_link<R: Read, W: Write>(
    link: &mut DualLink<R, W>,
    remapper: &SharedRemapper,
) -> Result<(), LinkError> {
    loop {
        match select(link.read_message(), INTERVAL_OVERRIDE_SIGNAL.wait()).await {
            Either::First(Ok(message)) => handle_dual_message(link, remapper, message).await?,
            Either::First(Err(LinkError::Serial)) => return Err(LinkError::Serial),
            Either::First(Err(e)) => warn!("Dropped dual link message: {:?}", e),
            Either::Second(interval) => {
                info!("Interval override changed to {}, restarting the input board", interval);
                link.write_message(&DualMessage::Restart).await?;
            }
        }
    }
}

/// Init handshake of the input board: request the settings until the engine board answers.
///
/// Returns the interval override to apply to the input devices.
pub async fn request_b_init<R: Read, W: Write>(link: &mut DualLink<R, W>) -> Result<u8, LinkError> {
    loop {
        link.write_message(&DualMessage::RequestBInit).await?;
        match select(link.read_message(), Timer::after(B_INIT_RETRY_INTERVAL)).await {
            Either::First(Ok(DualMessage::BInit { interval_override })) => return Ok(interval_override),
            Either::First(Ok(message)) => debug!("Ignoring {:?} before init", message),
            Either::First(Err(LinkError::Serial)) => return Err(LinkError::Serial),
            Either::First(Err(_)) | Either::Second(()) => {}
        }
    }
}

/// Queue a message of the input board's USB host for [`run_input_board`].
///
/// Never blocks, returns false when the message was dropped.
pub fn send_to_engine_board(message: DualMessage) -> bool {
    if INPUT_BOARD_CHANNEL.try_send(message).is_err() {
        warn!("Input board channel full, message dropped");
        return false;
    }
    true
}

/// Run the input board side of the dual link, after [`request_b_init`].
///
/// Sends the messages queued by [`send_to_engine_board`]. Returns `Ok` when the engine board
/// asks for a restart, the board should reboot then.
pub async fn run_input_board<R: Read, W: Write>(link: &mut DualLink<R, W>) -> Result<(), LinkError> {
    loop {
        match select(link.read_message(), INPUT_BOARD_CHANNEL.receive()).await {
            Either::First(Ok(DualMessage::Restart)) => {
                info!("Restart requested by the engine board");
                return Ok(());
            }
            Either::First(Ok(DualMessage::BInit { .. })) => debug!("Ignoring repeated init"),
            Either::First(Ok(_)) => warn!("Unexpected message from the engine board"),
            Either::First(Err(LinkError::Serial)) => return Err(LinkError::Serial),
            Either::First(Err(e)) => warn!("Dropped dual link message: {:?}", e),
            Either::Second(message) => match link.write_message(&message).await {
                Ok(()) => {}
                Err(LinkError::Serial) => return Err(LinkError::Serial),
                Err(e) => warn!("Dropped message for the engine board: {:?}", e),
            },
        }
    }
}

/// Run on the forwarder device: write every report received over the link to its HID interface.
///
/// Returns when the serial port fails.
pub async fn run_forwarder<R: Read, H: ReportWriter>(reader: R, writer: &mut H) -> Result<(), LinkError> {
    let mut reader = FrameReader::new(reader);
    info!("Forwarder running");
    loop {
        let frame = reader.read_frame().await?;
        let Some((report_id, payload)) = frame.split_first() else {
            continue;
        };
        writer.ready().await;
        if let Err(e) = writer.write_report(*report_id, payload).await {
            warn!("Forwarding report {} failed: {:?}", report_id, e);
        }
    }
}
