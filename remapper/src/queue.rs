//! Bounded queue of outgoing reports.
//!
//! Consecutive reports of the same screen and report id that only differ in relative usages are
//! merged, so bursts of motion don't fill the queue while the host is slow to poll.

use heapless::{Deque, Vec};

use crate::usage::{OurUsages, ReportLayout};
use crate::{MAX_REPORT_SIZE, OUTGOING_QUEUE_SIZE};

/// A finished report waiting for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutgoingReport {
    /// 0 is the local USB host, other screens go through the forwarding link
    pub target_screen: i8,
    pub report_id: u8,
    pub payload: Vec<u8, MAX_REPORT_SIZE>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Enqueued {
    /// Relative values were added to the last queued report
    Coalesced,
    /// A new entry was appended
    Appended,
    /// The queue was full
    Dropped,
}

pub struct ReportQueue {
    reports: Deque<OutgoingReport, OUTGOING_QUEUE_SIZE>,
    overflows: u32,
}

impl Default for ReportQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportQueue {
    pub const fn new() -> Self {
        Self {
            reports: Deque::new(),
            overflows: 0,
        }
    }

    /// Queue a report, merging it into the last entry when possible.
    pub fn enqueue(
        &mut self,
        target_screen: i8,
        report: &[u8],
        layout: &ReportLayout,
        our: &OurUsages,
    ) -> Enqueued {
        let report_id = layout.report_id;
        if let Some(last) = self.reports.back_mut() {
            if last.target_screen == target_screen
                && last.report_id == report_id
                && !layout.differ_on_absolute(&last.payload, report)
            {
                for def in our.relative_in(report_id) {
                    let value = def.read(report);
                    if value != 0 {
                        let queued = def.read(&last.payload);
                        def.write(&mut last.payload, queued.wrapping_add(value));
                    }
                }
                return Enqueued::Coalesced;
            }
        }

        let mut payload = Vec::new();
        // Reports are never longer than the buffer they were built in
        let _ = payload.extend_from_slice(&report[..report.len().min(MAX_REPORT_SIZE)]);
        let outgoing = OutgoingReport {
            target_screen,
            report_id,
            payload,
        };
        match self.reports.push_back(outgoing) {
            Ok(()) => Enqueued::Appended,
            Err(_) => {
                self.overflows = self.overflows.wrapping_add(1);
                warn!("Outgoing report queue overflow, dropping report {}", report_id);
                Enqueued::Dropped
            }
        }
    }

    pub fn pop(&mut self) -> Option<OutgoingReport> {
        self.reports.pop_front()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn clear(&mut self) {
        self.reports.clear();
    }

    /// Number of reports dropped because the queue was full
    pub fn overflows(&self) -> u32 {
        self.overflows
    }
}
