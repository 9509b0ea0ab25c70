//! Render Surface Client.
//!
//! The render surface is an external process. Messages go out as
//! newline-delimited JSON objects tagged by `type`; the surface paints what
//! it receives and never talks back except through control commands.
//!
//! `RenderClient` sits in front of the transport. Updates for the active
//! device are written immediately; updates for any other device are parked in
//! a per-device map (last write wins) and flushed with the next batch, so at
//! most one message per device reaches the surface per presentation frame.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::Config;
use crate::device::DeviceId;
use crate::shape::CursorShape;
use crate::store::{CursorState, CursorStore};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("render message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Milliseconds since the Unix epoch, as the surface expects.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorSnapshot {
    pub device_id: DeviceId,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub shape: CursorShape,
    pub visible: bool,
}

impl CursorSnapshot {
    pub fn from_state(cursor: &CursorState) -> Self {
        Self {
            device_id: cursor.device_id.clone(),
            x: cursor.position.x,
            y: cursor.position.y,
            color: cursor.color.clone(),
            shape: cursor.shape,
            visible: cursor.has_moved_once,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderBatch {
    pub cursors: Vec<CursorSnapshot>,
    pub active_device_id: Option<DeviceId>,
    pub timestamp: u64,
}

impl RenderBatch {
    /// Every cursor that has crossed the movement threshold.
    pub fn visible(store: &CursorStore, timestamp: u64) -> Self {
        Self {
            cursors: store.visible_cursors().map(CursorSnapshot::from_state).collect(),
            active_device_id: store.active().cloned(),
            timestamp,
        }
    }

    /// Every tracked cursor, visible or not. Sent when a surface (re)attaches.
    pub fn replay(store: &CursorStore, timestamp: u64) -> Self {
        Self {
            cursors: store.cursors().map(CursorSnapshot::from_state).collect(),
            active_device_id: store.active().cloned(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorInstant {
    pub device_id: DeviceId,
    pub x: f64,
    pub y: f64,
    pub shape: CursorShape,
    pub timestamp: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorRemoved {
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeChanged {
    pub shape: CursorShape,
    pub css: &'static str,
    pub file: &'static str,
    pub active_device_id: Option<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub name: String,
    pub connected: bool,
    pub has_cursor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesUpdated {
    pub count: usize,
    pub devices: Vec<DeviceSummary>,
}

impl DevicesUpdated {
    pub fn from_store(store: &CursorStore) -> Self {
        let devices: Vec<DeviceSummary> = store
            .devices()
            .map(|d| DeviceSummary {
                id: d.id.clone(),
                name: d.name.clone(),
                connected: d.connected,
                has_cursor: store.cursor(&d.id).is_some(),
            })
            .collect();
        Self {
            count: devices.len(),
            devices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub sensitivity: f64,
    pub cursor_size: u32,
    pub cursor_colors: Vec<String>,
    pub max_cursors: u32,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sensitivity: config.sensitivity,
            cursor_size: config.cursor_size,
            cursor_colors: config.cursor_colors.clone(),
            max_cursors: config.max_cursors,
        }
    }
}

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RenderMessage {
    CursorsBatch(RenderBatch),
    CursorInstant(CursorInstant),
    CursorRemoved(CursorRemoved),
    ShapeChanged(ShapeChanged),
    DevicesUpdated(DevicesUpdated),
    Settings(Settings),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Where render messages are delivered.
pub trait RenderSink: Send {
    fn send(&mut self, message: &RenderMessage) -> Result<(), RenderError>;

    /// Called once per presentation frame.
    fn flush(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Newline-delimited JSON over any writer.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> RenderSink for JsonLinesSink<W> {
    fn send(&mut self, message: &RenderMessage) -> Result<(), RenderError> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Opens the render transport: `path` (a file or FIFO) when given, stdout
/// otherwise.
pub fn open_sink(path: Option<&Path>) -> Result<Box<dyn RenderSink>, RenderError> {
    match path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            log::info!("render: writing to {}", path.display());
            Ok(Box::new(JsonLinesSink::new(BufWriter::new(file))))
        }
        None => {
            log::info!("render: writing to stdout");
            Ok(Box::new(JsonLinesSink::new(BufWriter::new(io::stdout()))))
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RenderClient {
    sink: Box<dyn RenderSink>,
    pending: IndexMap<DeviceId, CursorInstant>,
    precise: bool,
    /// Cleared after the first transport failure so a dead surface does not
    /// flood the log; set again on the next success.
    healthy: bool,
}

impl RenderClient {
    pub fn new(sink: Box<dyn RenderSink>, precise: bool) -> Self {
        Self {
            sink,
            pending: IndexMap::new(),
            precise,
            healthy: true,
        }
    }

    pub fn set_precise(&mut self, precise: bool) {
        self.precise = precise;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Single-cursor update. Sent now for the active device. Other cursors
    /// (the engine sends the one that just lost focus) are coalesced per
    /// device and go out with the next `present`.
    pub fn cursor_update(&mut self, cursor: &CursorState, is_active: bool) {
        let instant = CursorInstant {
            device_id: cursor.device_id.clone(),
            x: self.quantize(cursor.position.x),
            y: self.quantize(cursor.position.y),
            shape: cursor.shape,
            timestamp: timestamp_ms(),
            is_active,
        };

        if is_active {
            self.pending.shift_remove(&instant.device_id);
            self.send(RenderMessage::CursorInstant(instant));
        } else {
            self.pending.insert(instant.device_id.clone(), instant);
        }
    }

    /// Ends a presentation frame: coalesced updates first, then the batch.
    pub fn present(&mut self, mut batch: RenderBatch) {
        let pending: Vec<CursorInstant> = self.pending.drain(..).map(|(_, v)| v).collect();
        for instant in pending {
            self.send(RenderMessage::CursorInstant(instant));
        }

        if !self.precise {
            for cursor in &mut batch.cursors {
                cursor.x = cursor.x.round();
                cursor.y = cursor.y.round();
            }
        }
        self.send(RenderMessage::CursorsBatch(batch));

        if let Err(e) = self.sink.flush() {
            self.report(&e);
        }
    }

    pub fn cursor_removed(&mut self, device_id: &DeviceId) {
        self.pending.shift_remove(device_id);
        self.send(RenderMessage::CursorRemoved(CursorRemoved {
            device_id: device_id.clone(),
        }));
    }

    pub fn shape_changed(&mut self, shape: CursorShape, active_device_id: Option<DeviceId>) {
        self.send(RenderMessage::ShapeChanged(ShapeChanged {
            shape,
            css: shape.css(),
            file: shape.file_name(),
            active_device_id,
        }));
    }

    pub fn devices_updated(&mut self, store: &CursorStore) {
        self.send(RenderMessage::DevicesUpdated(DevicesUpdated::from_store(store)));
    }

    pub fn settings(&mut self, config: &Config) {
        self.send(RenderMessage::Settings(Settings::from_config(config)));
    }

    /// Pushes buffered output without waiting for the next frame.
    pub fn flush(&mut self) {
        if let Err(e) = self.sink.flush() {
            self.report(&e);
        }
    }

    fn quantize(&self, v: f64) -> f64 {
        if self.precise {
            v
        } else {
            v.round()
        }
    }

    fn send(&mut self, message: RenderMessage) {
        match self.sink.send(&message) {
            Ok(()) => self.healthy = true,
            Err(e) => self.report(&e),
        }
    }

    fn report(&mut self, e: &RenderError) {
        if self.healthy {
            log::warn!("render: {e}");
            self.healthy = false;
        } else {
            log::debug!("render: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::DeviceDelta;
    use crate::device::DeviceHandle;
    use crate::store::ScreenBounds;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// Keeps every message as parsed JSON for inspection.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) messages: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl RecordingSink {
        pub(crate) fn of_type(&self, kind: &str) -> Vec<serde_json::Value> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m["type"] == kind)
                .cloned()
                .collect()
        }

        pub(crate) fn clear(&self) {
            self.messages.lock().unwrap().clear();
        }
    }

    impl RenderSink for RecordingSink {
        fn send(&mut self, message: &RenderMessage) -> Result<(), RenderError> {
            self.messages.lock().unwrap().push(serde_json::to_value(message)?);
            Ok(())
        }
    }

    struct BrokenSink;

    impl RenderSink for BrokenSink {
        fn send(&mut self, _message: &RenderMessage) -> Result<(), RenderError> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "surface gone").into())
        }
    }

    fn store_with(moves: &[(u64, i32, i32)]) -> CursorStore {
        let mut store = CursorStore::new(ScreenBounds::new(200.0, 100.0), vec!["#ABCDEF".into()]);
        for &(h, dx, dy) in moves {
            let delta = DeviceDelta {
                id: DeviceId::from_handle(DeviceHandle(h)),
                handle: DeviceHandle(h),
                name: "Mouse".into(),
                dx,
                dy,
            };
            store.apply_delta(&delta, 0.5, CursorShape::Arrow, Instant::now());
        }
        store
    }

    #[test]
    fn batch_wire_format() {
        let store = store_with(&[(1, 30, 0)]);
        let message = RenderMessage::CursorsBatch(RenderBatch::visible(&store, 7));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "cursors-batch");
        assert_eq!(json["activeDeviceId"], "device_1");
        assert_eq!(json["timestamp"], 7);
        let cursor = &json["cursors"][0];
        assert_eq!(cursor["deviceId"], "device_1");
        assert_eq!(cursor["x"], 115.0);
        assert_eq!(cursor["color"], "#ABCDEF");
        assert_eq!(cursor["shape"], "Arrow");
        assert_eq!(cursor["visible"], true);
    }

    #[test]
    fn batch_excludes_cursors_below_threshold_but_replay_includes_them() {
        let store = store_with(&[(1, 30, 0), (2, 3, 0)]);
        assert_eq!(RenderBatch::visible(&store, 0).cursors.len(), 1);
        let replay = RenderBatch::replay(&store, 0);
        assert_eq!(replay.cursors.len(), 2);
        assert!(!replay.cursors[1].visible);
    }

    #[test]
    fn active_update_is_sent_immediately() {
        let sink = RecordingSink::default();
        let mut client = RenderClient::new(Box::new(sink.clone()), true);
        let store = store_with(&[(1, 30, 0)]);
        client.cursor_update(store.active_cursor().unwrap(), true);

        let instants = sink.of_type("cursor-instant");
        assert_eq!(instants.len(), 1);
        assert_eq!(instants[0]["isActive"], true);
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn non_active_updates_coalesce_until_present() {
        let sink = RecordingSink::default();
        let mut client = RenderClient::new(Box::new(sink.clone()), true);
        let mut store = store_with(&[(1, 30, 0), (2, 30, 0)]);
        let id = DeviceId::from_handle(DeviceHandle(1));

        client.cursor_update(store.cursor(&id).unwrap(), false);
        let delta = DeviceDelta {
            id: id.clone(),
            handle: DeviceHandle(1),
            name: "Mouse".into(),
            dx: 10,
            dy: 0,
        };
        store.apply_delta(&delta, 1.0, CursorShape::Arrow, Instant::now());
        client.cursor_update(store.cursor(&id).unwrap(), false);

        assert!(sink.of_type("cursor-instant").is_empty());
        assert_eq!(client.pending_len(), 1);

        client.present(RenderBatch::visible(&store, 1));
        let instants = sink.of_type("cursor-instant");
        assert_eq!(instants.len(), 1);
        assert_eq!(instants[0]["x"], 125.0);
        assert_eq!(sink.of_type("cursors-batch").len(), 1);
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn removal_drops_pending_update() {
        let sink = RecordingSink::default();
        let mut client = RenderClient::new(Box::new(sink.clone()), true);
        let store = store_with(&[(1, 30, 0)]);
        let id = DeviceId::from_handle(DeviceHandle(1));
        client.cursor_update(store.cursor(&id).unwrap(), false);
        client.cursor_removed(&id);
        client.present(RenderBatch::visible(&CursorStore::new(ScreenBounds::new(1.0, 1.0), vec![]), 0));

        assert!(sink.of_type("cursor-instant").is_empty());
        assert_eq!(sink.of_type("cursor-removed")[0]["deviceId"], "device_1");
    }

    #[test]
    fn imprecise_mode_rounds_coordinates() {
        let sink = RecordingSink::default();
        let mut client = RenderClient::new(Box::new(sink.clone()), false);
        let store = store_with(&[(1, 31, 1)]);
        client.cursor_update(store.active_cursor().unwrap(), true);
        client.present(RenderBatch::visible(&store, 0));

        assert_eq!(sink.of_type("cursor-instant")[0]["x"], 116.0);
        assert_eq!(sink.of_type("cursors-batch")[0]["cursors"][0]["y"], 51.0);
    }

    #[test]
    fn shape_changed_carries_presentation() {
        let sink = RecordingSink::default();
        let mut client = RenderClient::new(Box::new(sink.clone()), true);
        client.shape_changed(CursorShape::SizeWE, None);
        let msg = &sink.of_type("shape-changed")[0];
        assert_eq!(msg["shape"], "SizeWE");
        assert_eq!(msg["css"], "ew-resize");
        assert_eq!(msg["file"], "aero_ew.cur");
        assert!(msg["activeDeviceId"].is_null());
    }

    #[test]
    fn settings_and_device_list_wire_format() {
        let sink = RecordingSink::default();
        let mut client = RenderClient::new(Box::new(sink.clone()), true);
        client.settings(&Config::default());
        client.devices_updated(&store_with(&[(4, 1, 0)]));

        let settings = &sink.of_type("settings")[0];
        assert_eq!(settings["cursorSize"], 20);
        assert_eq!(settings["maxCursors"], 4);
        let devices = &sink.of_type("devices-updated")[0];
        assert_eq!(devices["count"], 1);
        assert_eq!(devices["devices"][0]["id"], "device_4");
        assert_eq!(devices["devices"][0]["hasCursor"], true);
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_line() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let msg = RenderMessage::CursorRemoved(CursorRemoved {
            device_id: DeviceId::from("device_1"),
        });
        sink.send(&msg).unwrap();
        sink.send(&msg).unwrap();
        let text = String::from_utf8(sink.out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(text.lines().next().unwrap(), r#"{"type":"cursor-removed","deviceId":"device_1"}"#);
    }

    #[test]
    fn transport_failure_is_swallowed() {
        let mut client = RenderClient::new(Box::new(BrokenSink), true);
        client.settings(&Config::default());
        client.present(RenderBatch::visible(&store_with(&[]), 0));
        assert!(!client.healthy);
    }
}
