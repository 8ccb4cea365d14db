//! Traits for writing outgoing HID reports.

use core::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidError {
    /// The endpoint isn't configured by the host
    Disabled,
    BufferOverflow,
    /// Writing to the forwarding link failed
    Link,
}

/// ReportWriter is implemented by everything outgoing reports can be delivered to: the local USB
/// HID endpoint of the board, or the link to the device that forwards reports to another host.
pub trait ReportWriter {
    /// Wait until the transport is able to accept a report
    fn ready(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Write one input report, `payload` excludes the report id
    fn write_report(&mut self, report_id: u8, payload: &[u8]) -> impl Future<Output = Result<(), HidError>>;
}
