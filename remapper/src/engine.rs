//! The tick engine.
//!
//! [`Remapper`] owns every piece of mutable remapping state: the input state, sticky and
//! accumulated values, the per report buffers, the cursor and the outgoing queue. It is driven by
//! [`Remapper::process_mapping`], once per tick and after every ingested report.

use embassy_time::Instant;
use heapless::Vec;
use heapless::index_map::FnvIndexMap;
use heapless::index_set::FnvIndexSet;

use crate::config::Configuration;
use crate::config::protocol::ProtocolSession;
use crate::descriptor::{DescriptorError, OUR_REPORT_DESCRIPTOR, parse};
use crate::input::{InputState, InterfaceId, TheirUsages, ingest};
use crate::mapping::{LayerUsage, ReverseIndex};
use crate::queue::{Enqueued, OutgoingReport, ReportQueue};
use crate::report::ReportBuffers;
use crate::rle::{UsageRange, encode};
use crate::screen::{Cursor, OFFSCREEN};
use crate::scroll::{RESOLUTION_MULTIPLIER, ScrollResolver, is_hi_res};
use crate::usage::{CURSOR_X_USAGE, CURSOR_Y_USAGE, OurUsages, is_pointer_axis, is_scroll, layer_usage};
use crate::{MAX_USAGE_RANGES, NLAYERS};

const MAX_STICKY_STATES: usize = 64;
const MAX_ACCUMULATORS: usize = 32;
const MAX_RELATIVE_USAGES: usize = 64;
const MAX_TRACKED_USAGES: usize = 128;

/// Counters logged by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    pub reports_received: u32,
    pub reports_sent: u32,
    pub queue_overflows: u32,
}

pub struct Remapper {
    pub(crate) config: Configuration,
    our: OurUsages,
    reports: ReportBuffers,
    reverse: ReverseIndex,
    input: InputState,
    /// Input values of trigger sources at the previous evaluation, for edge detection
    prev_input: FnvIndexMap<u32, i32, MAX_TRACKED_USAGES>,
    /// Only non zero states are stored
    sticky: FnvIndexMap<LayerUsage, i32, MAX_STICKY_STATES>,
    /// ×1000 fixed point values of relative targets
    accumulated: FnvIndexMap<u32, i32, MAX_ACCUMULATORS>,
    scroll: ScrollResolver,
    cursor: Cursor,
    queue: ReportQueue,
    /// Usages that some input interface reports as relative
    relative_usages: FnvIndexSet<u32, MAX_RELATIVE_USAGES>,
    our_usage_ranges: Vec<UsageRange, MAX_USAGE_RANGES>,
    their_usage_ranges: Vec<UsageRange, MAX_USAGE_RANGES>,
    resolution_multiplier: u8,
    suspended: bool,
    layer_state: [bool; NLAYERS],
    pub(crate) session: ProtocolSession,
    stats: Stats,
    overflows_reported: u32,
}

impl Remapper {
    /// Create the engine for the built-in outgoing descriptor
    pub fn new(config: Configuration) -> Result<Self, DescriptorError> {
        Self::with_descriptor(config, OUR_REPORT_DESCRIPTOR)
    }

    /// Create the engine for a custom outgoing descriptor
    pub fn with_descriptor(config: Configuration, descriptor: &[u8]) -> Result<Self, DescriptorError> {
        let our = OurUsages::from_descriptor(&parse(descriptor)?)?;
        let reports = ReportBuffers::new(our.layouts());
        let our_usage_ranges = encode(our.sorted_usages());
        let cursor = Cursor::new(&config.screens);
        let mut remapper = Self {
            config,
            our,
            reports,
            reverse: ReverseIndex::new(),
            input: InputState::new(),
            prev_input: FnvIndexMap::new(),
            sticky: FnvIndexMap::new(),
            accumulated: FnvIndexMap::new(),
            scroll: ScrollResolver::default(),
            cursor,
            queue: ReportQueue::new(),
            relative_usages: FnvIndexSet::new(),
            our_usage_ranges,
            their_usage_ranges: Vec::new(),
            resolution_multiplier: 0,
            suspended: false,
            layer_state: [false; NLAYERS],
            session: ProtocolSession::default(),
            stats: Stats::default(),
            overflows_reported: 0,
        };
        remapper.rebuild();
        Ok(remapper)
    }

    /// Recompile the reverse index from the mapping table
    pub fn rebuild(&mut self) {
        self.reverse
            .rebuild(&self.config.mappings, self.config.unmapped_passthrough, &self.our);
    }

    /// Recompute the screen bounding box and recenter the cursor on screen 0
    pub fn screens_updated(&mut self) {
        self.cursor.screens_updated(&self.config.screens);
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Update the input state from a report of one of the input interfaces.
    ///
    /// `their` is only borrowed for the duration of the call, callers hold its lock that long.
    pub fn handle_received_report(&mut self, their: &TheirUsages, interface: InterfaceId, report: &[u8]) {
        self.stats.reports_received = self.stats.reports_received.wrapping_add(1);
        ingest(their, &mut self.input, interface, report);
    }

    /// Refresh what's derived from the input descriptors, after an interface (dis)connected
    pub fn update_their_derivatives(&mut self, their: &TheirUsages) {
        their.relative_usages(&mut self.relative_usages);
        self.their_usage_ranges = their.usage_ranges();
        debug!(
            "{} input interfaces, {} relative usages",
            their.len(),
            self.relative_usages.len()
        );
    }

    /// Release every absolute usage held by a disconnected interface
    pub fn interface_disconnected(&mut self, index: u8) {
        let relative = &self.relative_usages;
        self.input.release_interface(index, |usage| relative.contains(&usage));
    }

    /// Run one evaluation at the current time.
    ///
    /// `auto_repeat` is set for tick driven evaluations, which apply held state. Evaluations right
    /// after an ingested report only apply relative sources.
    pub fn process_mapping(&mut self, auto_repeat: bool) {
        self.process_mapping_at(auto_repeat, Instant::now());
    }

    pub fn process_mapping_at(&mut self, auto_repeat: bool, now: Instant) {
        if self.suspended {
            return;
        }

        self.update_layers();
        self.update_stickies();
        self.switch_screens();
        self.snapshot_trigger_inputs();

        self.resolve_targets(auto_repeat, now);
        let relative = &self.relative_usages;
        self.input.clear_relative(|usage| relative.contains(&usage));
        self.scroll.expire(self.config.scroll_timeout(), now);

        self.move_cursor();
        self.flush_accumulated();
        self.emit_reports();
    }

    fn rising_edge(&self, usage: u32) -> bool {
        self.prev_input.get(&usage).copied().unwrap_or(0) == 0 && self.input.get(usage) != 0
    }

    fn toggle_sticky(&mut self, key: LayerUsage) {
        if self.sticky.remove(&key).is_none() && self.sticky.insert(key, 1).is_err() {
            warn!("Sticky state is full, dropping {:#x}", key.usage);
        }
    }

    fn sticky_state(&self, key: LayerUsage) -> i32 {
        self.sticky.get(&key).copied().unwrap_or(0)
    }

    fn update_layers(&mut self) {
        for i in 0..self.reverse.layer_triggering_stickies().len() {
            let usage = self.reverse.layer_triggering_stickies()[i];
            if self.rising_edge(usage) {
                self.toggle_sticky(LayerUsage::new(0, usage));
            }
        }

        // Layer triggers work no matter which layer they are defined on
        self.layer_state = [false; NLAYERS];
        self.layer_state[0] = true;
        for layer in 1..NLAYERS {
            let active = self.reverse.sources(layer_usage(layer as u8)).any(|source| {
                let value = if source.sticky {
                    self.sticky_state(LayerUsage::new(0, source.usage))
                } else {
                    self.input.get(source.usage)
                };
                value != 0
            });
            if active {
                self.layer_state[layer] = true;
                self.layer_state[0] = false;
            }
        }
    }

    fn update_stickies(&mut self) {
        for i in 0..self.reverse.sticky_usages().len() {
            let key = self.reverse.sticky_usages()[i];
            if self.layer_state[key.layer as usize] && self.rising_edge(key.usage) {
                self.toggle_sticky(key);
            }
        }
    }

    fn switch_screens(&mut self) {
        for i in 0..self.reverse.screen_switch_usages().len() {
            let key = self.reverse.screen_switch_usages()[i];
            if self.layer_state[key.layer as usize] && self.rising_edge(key.usage) {
                self.cursor.next_screen(&self.config.screens);
                info!("Switched to screen {}", self.cursor.active_screen);
            }
        }
    }

    /// Remember the current input of every trigger source
    fn snapshot_trigger_inputs(&mut self) {
        self.prev_input.clear();
        let usages = self
            .reverse
            .layer_triggering_stickies()
            .iter()
            .copied()
            .chain(self.reverse.sticky_usages().iter().map(|k| k.usage))
            .chain(self.reverse.screen_switch_usages().iter().map(|k| k.usage));
        for usage in usages {
            let value = self.input.get(usage);
            if value != 0 && self.prev_input.insert(usage, value).is_err() {
                warn!("Too many trigger sources, edges of {:#x} are lost", usage);
            }
        }
    }

    fn resolve_targets(&mut self, auto_repeat: bool, now: Instant) {
        let timeout = self.config.scroll_timeout();
        for (target, entries) in self.reverse.targets() {
            let Some(def) = self.our.get(target) else {
                continue;
            };

            if def.is_relative || is_pointer_axis(target) {
                for source in entries.iter().map(|e| e.source()) {
                    let source_is_relative = self.relative_usages.contains(&source.usage);
                    if !auto_repeat && !source_is_relative {
                        continue;
                    }
                    let value = if source.sticky {
                        self.sticky.get(&source.sticky_key()).copied().unwrap_or(0)
                    } else if self.layer_state[source.layer as usize] {
                        let input = self.input.get(source.usage);
                        if source_is_relative { input } else { (input != 0) as i32 }
                    } else {
                        0
                    };
                    let value = value.wrapping_mul(source.scaling);
                    if value == 0 {
                        continue;
                    }

                    let value = if is_scroll(target) {
                        self.scroll.resolve(
                            source.usage,
                            target,
                            value.saturating_mul(RESOLUTION_MULTIPLIER),
                            is_hi_res(self.resolution_multiplier, target),
                            timeout,
                            now,
                        )
                    } else {
                        value
                    };
                    add_accumulated(&mut self.accumulated, target, value);
                }
            } else {
                let mut value = 0;
                for source in entries.iter().map(|e| e.source()) {
                    let sticky = if source.sticky {
                        self.sticky.get(&source.sticky_key()).copied().unwrap_or(0)
                    } else {
                        0
                    };
                    if sticky != 0 {
                        value = sticky;
                    } else if self.layer_state[source.layer as usize] {
                        let input = self.input.get(source.usage);
                        let active = if self.relative_usages.contains(&source.usage) {
                            input.wrapping_mul(source.scaling) > 0
                        } else {
                            input != 0
                        };
                        if active {
                            value = 1;
                        }
                    }
                }
                if value != 0 {
                    if let Some(buffer) = self.reports.get_mut(def.report_id) {
                        def.write(buffer.live_mut(), value);
                    }
                }
            }
        }
    }

    /// Move the cursor by the accumulated pointer motion and write its position into the report
    fn move_cursor(&mut self) {
        let (Some(x_def), Some(y_def)) = (self.our.get(CURSOR_X_USAGE), self.our.get(CURSOR_Y_USAGE)) else {
            return;
        };
        let mut acc_x = self.accumulated.get(&CURSOR_X_USAGE).copied().unwrap_or(0);
        let mut acc_y = self.accumulated.get(&CURSOR_Y_USAGE).copied().unwrap_or(0);
        if acc_x != 0 || acc_y != 0 {
            self.cursor
                .apply_motion(&mut acc_x, &mut acc_y, self.config.constraint_mode, &self.config.screens);
            set_accumulated(&mut self.accumulated, CURSOR_X_USAGE, acc_x);
            set_accumulated(&mut self.accumulated, CURSOR_Y_USAGE, acc_y);
        }

        if self.cursor.active_screen == OFFSCREEN {
            return;
        }
        if let Some((x, y)) = self.cursor.local_position(&self.config.screens) {
            if let Some(buffer) = self.reports.get_mut(x_def.report_id) {
                x_def.write(buffer.live_mut(), x);
            }
            if let Some(buffer) = self.reports.get_mut(y_def.report_id) {
                y_def.write(buffer.live_mut(), y);
            }
        }
    }

    /// Add the whole part of every accumulator to its usage, keeping the fraction
    fn flush_accumulated(&mut self) {
        for (target, value) in self.accumulated.iter_mut() {
            // Pointer axes are consumed by the cursor
            if *value == 0 || is_pointer_axis(*target) {
                continue;
            }
            let Some(def) = self.our.get(*target) else {
                *value = 0;
                continue;
            };
            let whole = *value / 1000;
            if whole == 0 {
                continue;
            }
            *value -= whole * 1000;
            if let Some(buffer) = self.reports.get_mut(def.report_id) {
                let existing = def.read(buffer.live());
                def.write(buffer.live_mut(), existing.wrapping_add(whole));
            }
        }
        self.accumulated.retain(|_, value| *value != 0);
    }

    fn emit_reports(&mut self) {
        let active_screen = self.cursor.active_screen;
        for layout in self.our.layouts() {
            let Some(buffer) = self.reports.get_mut(layout.report_id) else {
                continue;
            };
            if active_screen != OFFSCREEN && buffer.needs_to_be_sent(layout) {
                let enqueued = self.queue.enqueue(active_screen, buffer.live(), layout, &self.our);
                if enqueued == Enqueued::Appended {
                    buffer.commit();
                }
            }
            buffer.clear();
        }
    }

    /// Next report to transmit, nothing is sent while suspended
    pub fn pop_report(&mut self) -> Option<OutgoingReport> {
        if self.suspended {
            return None;
        }
        let report = self.queue.pop()?;
        self.stats.reports_sent = self.stats.reports_sent.wrapping_add(1);
        Some(report)
    }

    /// The USB device was (re)mounted, the host starts over in lo-res scroll mode
    pub fn usb_mounted(&mut self) {
        self.resolution_multiplier = 0;
    }

    pub fn resolution_multiplier(&self) -> u8 {
        self.resolution_multiplier
    }

    pub fn set_resolution_multiplier(&mut self, value: u8) {
        debug!("Resolution multiplier set to {:#x}", value);
        self.resolution_multiplier = value;
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Leave suspend mode. Motion and output that piled up while suspended are dropped, held
    /// inputs, sticky toggles and the cursor position are kept.
    pub fn resume(&mut self) {
        self.suspended = false;
        let relative = &self.relative_usages;
        self.input.clear_relative(|usage| relative.contains(&usage));
        self.accumulated.clear();
        self.scroll.clear();
        self.queue.clear();
        self.reports.clear_all();
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn our_usages(&self) -> &OurUsages {
        &self.our
    }

    pub fn our_usage_ranges(&self) -> &[UsageRange] {
        &self.our_usage_ranges
    }

    pub fn their_usage_ranges(&self) -> &[UsageRange] {
        &self.their_usage_ranges
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn layer_state(&self) -> &[bool; NLAYERS] {
        &self.layer_state
    }

    pub fn sticky(&self, layer: u8, usage: u32) -> i32 {
        self.sticky_state(LayerUsage::new(layer, usage))
    }

    /// Current ×1000 accumulator of a relative target
    pub fn accumulated(&self, target: u32) -> i32 {
        self.accumulated.get(&target).copied().unwrap_or(0)
    }

    pub fn input(&self, usage: u32) -> i32 {
        self.input.get(usage)
    }

    /// Counters since the previous call
    pub fn take_stats(&mut self) -> Stats {
        let overflows = self.queue.overflows();
        let stats = Stats {
            queue_overflows: overflows.wrapping_sub(self.overflows_reported),
            ..self.stats
        };
        self.overflows_reported = overflows;
        self.stats = Stats::default();
        stats
    }
}

fn add_accumulated<const N: usize>(accumulated: &mut FnvIndexMap<u32, i32, N>, target: u32, value: i32) {
    let current = accumulated.get(&target).copied().unwrap_or(0);
    set_accumulated(accumulated, target, current.saturating_add(value));
}

fn set_accumulated<const N: usize>(accumulated: &mut FnvIndexMap<u32, i32, N>, target: u32, value: i32) {
    if value == 0 {
        accumulated.remove(&target);
    } else if accumulated.insert(target, value).is_err() {
        warn!("Too many accumulated usages, dropping {:#x}", target);
    }
}
