//! Synchronization Scheduler.
//!
//! Runs once per engine tick. Each gated tick does two independent things:
//!
//! 1. OS cursor mirror. The active cursor's position is converted to physical
//!    pixels. When it differs from the last position written and no write is
//!    in flight, one write is scheduled for the *next* tick and the in-flight
//!    flag is raised. The flag drops when the write worker reports back. The
//!    OS position is never read back into virtual state.
//! 2. Render batch. Every visible cursor is snapshotted, unconditionally.
//!
//! The two paths are not synchronized with each other; the surface may be up
//! to one tick ahead of the OS cursor.

use std::time::{Duration, Instant};

use crate::render::{timestamp_ms, RenderBatch};
use crate::store::{CursorStore, Point};

/// A position in physical OS cursor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsPoint {
    pub x: i32,
    pub y: i32,
}

impl OsPoint {
    /// `round(p * scale)` per axis.
    pub fn from_virtual(p: Point, scale: f64) -> Self {
        Self {
            x: (p.x * scale).round() as i32,
            y: (p.y * scale).round() as i32,
        }
    }
}

/// What one gated tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// Write scheduled on the previous tick, due now.
    pub dispatch: Option<OsPoint>,
    pub batch: RenderBatch,
}

pub struct SyncScheduler {
    scale_factor: f64,
    min_interval: Duration,
    /// False when no OS cursor writer exists; step 1 is skipped entirely.
    mirroring: bool,
    last_tick: Option<Instant>,
    last_written: Option<OsPoint>,
    pending: Option<OsPoint>,
    in_flight: bool,
    cancelled: bool,
}

impl SyncScheduler {
    pub fn new(scale_factor: f64, min_interval: Duration, mirroring: bool) -> Self {
        Self {
            scale_factor,
            min_interval,
            mirroring,
            last_tick: None,
            last_written: None,
            pending: None,
            in_flight: false,
            cancelled: false,
        }
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_written(&self) -> Option<OsPoint> {
        self.last_written
    }

    pub fn target_for(&self, p: Point) -> OsPoint {
        OsPoint::from_virtual(p, self.scale_factor)
    }

    /// Runs one tick. Returns `None` when the frequency gate rejects it or
    /// the scheduler has been cancelled.
    ///
    /// `now` should be the tick's scheduled deadline. The gate advances on a
    /// fixed grid of `min_interval` steps, so a tick handled late does not
    /// push the next one out of its slot. After a gap longer than one
    /// interval the grid restarts at `now`.
    pub fn tick(&mut self, now: Instant, store: &CursorStore) -> Option<TickOutput> {
        if self.cancelled {
            return None;
        }
        self.last_tick = match self.last_tick {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => {
                return None;
            }
            Some(last) => {
                let slot = last + self.min_interval;
                if now.saturating_duration_since(slot) >= self.min_interval {
                    Some(now)
                } else {
                    Some(slot)
                }
            }
            None => Some(now),
        };

        let dispatch = self.pending.take();

        if self.mirroring {
            if let Some(cursor) = store.active_cursor() {
                let target = self.target_for(cursor.position);
                if self.last_written != Some(target) && !self.in_flight {
                    log::trace!("scheduler: deferring OS write to {target:?}");
                    self.pending = Some(target);
                    self.in_flight = true;
                }
            }
        }

        Some(TickOutput {
            dispatch,
            batch: RenderBatch::visible(store, timestamp_ms()),
        })
    }

    /// Seeds one deferred write outside the normal diff check (startup
    /// centering). Ignored while another write is in flight.
    pub fn request(&mut self, target: OsPoint) -> bool {
        if !self.mirroring || self.in_flight || self.cancelled {
            return false;
        }
        self.pending = Some(target);
        self.in_flight = true;
        true
    }

    /// The write worker finished `target`. A rejected write leaves
    /// `last_written` alone so the next tick retries.
    pub fn write_completed(&mut self, target: OsPoint, ok: bool) {
        if ok {
            self.last_written = Some(target);
        }
        self.in_flight = false;
    }

    /// The write never reached the worker.
    pub fn write_rejected(&mut self) {
        self.in_flight = false;
    }

    /// Drops any scheduled write and stops producing ticks.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.in_flight = false;
        self.cancelled = true;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
