//! Cursor State Store: the authoritative per-device virtual cursor state.
//!
//! Only the engine holds a `CursorStore`, and only through `&mut` from its
//! single event loop, so there is no interior locking. Maps are insertion
//! ordered; "first remaining device" on active reassignment is therefore the
//! oldest surviving cursor.

use std::time::Instant;

use indexmap::IndexMap;

use crate::capture::DeviceDelta;
use crate::device::{Device, DeviceHandle, DeviceId};
use crate::shape::CursorShape;

/// Cumulative `|dx| + |dy|` a cursor must exceed before it is rendered.
pub const MOVED_ONCE_THRESHOLD: u64 = 10;

/// A position in render-surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Render-surface extent. Valid positions are `[0, width] × [0, height]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenBounds {
    pub width: f64,
    pub height: f64,
}

impl ScreenBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.width / 2.0,
            y: self.height / 2.0,
        }
    }

    pub fn clamp(&self, p: Point) -> Point {
        Point {
            x: p.x.clamp(0.0, self.width),
            y: p.y.clamp(0.0, self.height),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorState {
    pub device_id: DeviceId,
    pub position: Point,
    pub color: String,
    pub total_movement: u64,
    /// Set once `total_movement` exceeds the threshold; never cleared.
    pub has_moved_once: bool,
    pub shape: CursorShape,
    pub last_update: Instant,
}

/// Deterministic palette slot for a device id.
///
/// 31-multiplier string hash over UTF-16 code units, wrapped to 32 bits.
pub fn stable_color_index(id: &DeviceId, palette_len: usize) -> usize {
    if palette_len == 0 {
        return 0;
    }
    let hash = id
        .as_str()
        .encode_utf16()
        .fold(0i32, |h, unit| (h << 5).wrapping_sub(h).wrapping_add(i32::from(unit)));
    hash.unsigned_abs() as usize % palette_len
}

pub struct CursorStore {
    devices: IndexMap<DeviceId, Device>,
    cursors: IndexMap<DeviceId, CursorState>,
    active: Option<DeviceId>,
    bounds: ScreenBounds,
    palette: Vec<String>,
}

impl CursorStore {
    pub fn new(bounds: ScreenBounds, palette: Vec<String>) -> Self {
        Self {
            devices: IndexMap::new(),
            cursors: IndexMap::new(),
            active: None,
            bounds,
            palette,
        }
    }

    pub fn bounds(&self) -> ScreenBounds {
        self.bounds
    }

    /// Replaces the palette for cursors created from now on.
    pub fn set_palette(&mut self, palette: Vec<String>) {
        self.palette = palette;
    }

    pub fn active(&self) -> Option<&DeviceId> {
        self.active.as_ref()
    }

    pub fn active_cursor(&self) -> Option<&CursorState> {
        self.active.as_ref().and_then(|id| self.cursors.get(id))
    }

    pub fn cursor(&self, id: &DeviceId) -> Option<&CursorState> {
        self.cursors.get(id)
    }

    pub fn cursors(&self) -> impl Iterator<Item = &CursorState> {
        self.cursors.values()
    }

    /// Cursors that have crossed the movement threshold.
    pub fn visible_cursors(&self) -> impl Iterator<Item = &CursorState> {
        self.cursors.values().filter(|c| c.has_moved_once)
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.cursors.is_empty()
    }

    /// Records a device seen by enumeration or a hot-plug notice, without
    /// creating a cursor. Returns true if the device was new.
    pub fn register_device(
        &mut self,
        id: DeviceId,
        handle: DeviceHandle,
        name: &str,
        now: Instant,
    ) -> bool {
        if let Some(device) = self.devices.get_mut(&id) {
            device.last_seen = now;
            return false;
        }
        self.devices
            .insert(id.clone(), Device::new(id, handle, name, now));
        true
    }

    /// Applies one movement delta.
    ///
    /// `feed_shape` is the last shape reported by the sampler; it is copied
    /// onto the cursor only if this device was already active before the
    /// delta. Zero deltas are ignored entirely. Returns the updated cursor.
    pub fn apply_delta(
        &mut self,
        delta: &DeviceDelta,
        sensitivity: f64,
        feed_shape: CursorShape,
        now: Instant,
    ) -> Option<&CursorState> {
        if delta.dx == 0 && delta.dy == 0 {
            return None;
        }

        self.register_device(delta.id.clone(), delta.handle, &delta.name, now);

        let was_active = self.active.as_ref() == Some(&delta.id);
        let bounds = self.bounds;
        let palette = &self.palette;

        let cursor = self
            .cursors
            .entry(delta.id.clone())
            .or_insert_with(|| {
                log::debug!("store: new cursor for {}", delta.id);
                CursorState {
                    device_id: delta.id.clone(),
                    position: bounds.center(),
                    color: palette
                        .get(stable_color_index(&delta.id, palette.len()))
                        .cloned()
                        .unwrap_or_default(),
                    total_movement: 0,
                    has_moved_once: false,
                    shape: CursorShape::Arrow,
                    last_update: now,
                }
            });

        cursor.position = bounds.clamp(Point {
            x: cursor.position.x + f64::from(delta.dx) * sensitivity,
            y: cursor.position.y + f64::from(delta.dy) * sensitivity,
        });
        cursor.total_movement = cursor
            .total_movement
            .saturating_add(u64::from(delta.dx.unsigned_abs()) + u64::from(delta.dy.unsigned_abs()));
        if cursor.total_movement > MOVED_ONCE_THRESHOLD {
            cursor.has_moved_once = true;
        }
        if was_active {
            cursor.shape = feed_shape;
        }
        cursor.last_update = now;

        self.active = Some(delta.id.clone());
        self.cursors.get(&delta.id)
    }

    /// Applies a new sampler shape to the active cursor, if any.
    pub fn set_active_shape(&mut self, shape: CursorShape) -> Option<&DeviceId> {
        let id = self.active.as_ref()?;
        if let Some(cursor) = self.cursors.get_mut(id) {
            cursor.shape = shape;
        }
        Some(id)
    }

    /// Removes a device and its cursor. If it was active, the first remaining
    /// cursor (or none) becomes active. Returns the removed device, marked
    /// disconnected, or `None` if nothing was tracked under `id`.
    pub fn remove(&mut self, id: &DeviceId) -> Option<Device> {
        // Every cursor has a device entry; the reverse does not hold.
        let mut device = self.devices.shift_remove(id)?;
        self.cursors.shift_remove(id);
        device.connected = false;

        if self.active.as_ref() == Some(id) {
            self.active = self.cursors.keys().next().cloned();
            log::debug!("store: active device now {:?}", self.active);
        }
        Some(device)
    }

    /// Removes every tracked device. Returns the removed ids in order.
    pub fn remove_all(&mut self) -> Vec<DeviceId> {
        let ids = self.devices.keys().cloned().collect();
        self.clear();
        ids
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.cursors.clear();
        self.active = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
