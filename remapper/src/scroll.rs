//! Wheel resolution handling.
//!
//! In hi-res mode the host accepts fractional wheel movement and values pass through unchanged.
//! In lo-res mode movement is accumulated per `(source, target)` until a whole detent is
//! reached, partial movement is forgotten after a period of inactivity.

use embassy_time::{Duration, Instant};
use heapless::index_map::{Entry, FnvIndexMap};

use crate::usage::{H_SCROLL_USAGE, V_SCROLL_USAGE};

/// Wheel detents are reported in 1/120 steps in hi-res mode
pub const RESOLUTION_MULTIPLIER: i32 = 120;

/// Bit of the resolution multiplier feature report that enables hi-res vertical scroll
pub const V_RESOLUTION_BITMASK: u8 = 1 << 0;
/// Bit of the resolution multiplier feature report that enables hi-res horizontal scroll
pub const H_RESOLUTION_BITMASK: u8 = 1 << 2;

const MAX_SCROLL_SOURCES: usize = 16;

pub fn is_hi_res(resolution_multiplier: u8, target: u32) -> bool {
    match target {
        V_SCROLL_USAGE => resolution_multiplier & V_RESOLUTION_BITMASK != 0,
        H_SCROLL_USAGE => resolution_multiplier & H_RESOLUTION_BITMASK != 0,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
struct PartialScroll {
    accumulated: i32,
    last_movement: Instant,
}

pub struct ScrollResolver {
    partial: FnvIndexMap<(u32, u32), PartialScroll, MAX_SCROLL_SOURCES>,
    /// Accumulated movement that makes one lo-res detent
    tick_threshold: i32,
}

impl Default for ScrollResolver {
    fn default() -> Self {
        Self::new(1000 * RESOLUTION_MULTIPLIER)
    }
}

impl ScrollResolver {
    pub fn new(tick_threshold: i32) -> Self {
        Self {
            partial: FnvIndexMap::new(),
            tick_threshold: tick_threshold.max(1),
        }
    }

    /// Resolve `movement` of `source` into the ×1000 contribution to `target`.
    pub fn resolve(
        &mut self,
        source: u32,
        target: u32,
        movement: i32,
        hi_res: bool,
        timeout: Duration,
        now: Instant,
    ) -> i32 {
        if hi_res {
            return movement;
        }

        if movement == 0 {
            if let Some(partial) = self.partial.get_mut(&(source, target)) {
                if partial.accumulated != 0 && now.saturating_duration_since(partial.last_movement) > timeout {
                    partial.accumulated = 0;
                }
            }
            return 0;
        }

        let partial = match self.partial.entry((source, target)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match entry.insert(PartialScroll {
                accumulated: 0,
                last_movement: now,
            }) {
                Ok(partial) => partial,
                Err(_) => {
                    warn!("Too many scroll sources, dropping {:#x}", source);
                    return 0;
                }
            },
        };

        partial.last_movement = now;
        partial.accumulated = partial.accumulated.saturating_add(movement);
        let ticks = partial.accumulated / self.tick_threshold;
        partial.accumulated -= ticks * self.tick_threshold;
        ticks * 1000
    }

    /// Forget partial movement that hasn't been added to for longer than `timeout`
    pub fn expire(&mut self, timeout: Duration, now: Instant) {
        for partial in self.partial.values_mut() {
            if partial.accumulated != 0 && now.saturating_duration_since(partial.last_movement) > timeout {
                trace!("Dropping partial scroll {}", partial.accumulated);
                partial.accumulated = 0;
            }
        }
    }

    /// Movement accumulated towards the next detent
    pub fn pending(&self, source: u32, target: u32) -> i32 {
        self.partial
            .get(&(source, target))
            .map(|p| p.accumulated)
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}
