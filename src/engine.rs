//! The engine: one task, one loop, every handler runs to completion.
//!
//! Out-of-band producers (capture thread, sampler task, enumeration worker,
//! cursor mirror thread, stdin reader) only ever push `EngineEvent`s into a
//! bounded channel. The loop in `run()` selects over that channel, the
//! scheduler tick, the presence interval and Ctrl-C. The store, feed,
//! monitor and scheduler are plain owned fields mutated through `&mut self`,
//! so handlers can never interleave.
//!
//! Shutdown order: cancel the scheduler (drops any deferred write), stop the
//! capture pump, kill the sampler, clear the store, restore the OS cursor and
//! stop the mirror, then persist the config. `Drop` runs the same sequence
//! if `run()` never reached it, including while unwinding from a panic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::capture::{CaptureAdapter, CaptureEvent};
use crate::config::Config;
use crate::control::{self, ControlCommand};
use crate::device::{DeviceId, DeviceIdentities};
use crate::mirror::{CursorMirror, MirrorCompletion};
use crate::platform::{
    CursorWriter, DeviceChange, DeviceEnumerator, EnumeratedDevice, InputCapture, PlatformError,
};
use crate::presence::{apply_disconnects, PresenceMonitor};
use crate::render::{timestamp_ms, RenderBatch, RenderClient, RenderSink};
use crate::sampler::{SamplerEvent, ShapeSampler};
use crate::scheduler::{OsPoint, SyncScheduler};
use crate::shape::ShapeFeed;
use crate::store::{CursorStore, ScreenBounds};

/// Engine event queue capacity. Capture bursts from several high-rate mice
/// stay well below this between two loop turns.
const EVENT_CAPACITY: usize = 4096;

#[derive(Debug)]
pub enum EngineEvent {
    Capture(CaptureEvent),
    Sampler(SamplerEvent),
    Enumerated(Result<Vec<EnumeratedDevice>, PlatformError>),
    /// The blocking enumeration call returned, possibly after its timeout
    /// was already reported through `Enumerated`.
    EnumerationFinished,
    WriteCompleted(MirrorCompletion),
    Control(ControlCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Platform collaborators handed to the engine at construction.
pub struct Backends {
    pub capture: Box<dyn InputCapture>,
    pub enumerator: Arc<dyn DeviceEnumerator>,
    /// `None` disables OS cursor mirroring.
    pub writer: Option<Box<dyn CursorWriter>>,
    /// Shape sampler argv; empty runs without one.
    pub sampler_command: Vec<String>,
}

/// Non-blocking push used by every out-of-band producer.
fn forward(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if let Err(mpsc::error::TrySendError::Full(dropped)) = tx.try_send(event) {
        log::debug!("engine: event queue full, dropped {dropped:?}");
    }
}

pub struct Engine {
    config: Config,
    config_path: Option<PathBuf>,
    store: CursorStore,
    identities: DeviceIdentities,
    feed: ShapeFeed,
    presence: PresenceMonitor,
    scheduler: SyncScheduler,
    render: RenderClient,
    capture: CaptureAdapter,
    enumerator: Arc<dyn DeviceEnumerator>,
    mirror: Option<CursorMirror>,
    sampler: Option<ShapeSampler>,
    sampler_command: Vec<String>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    system_cursor_hidden: bool,
    shut_down: bool,
}

impl Engine {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        bounds: ScreenBounds,
        backends: Backends,
        sink: Box<dyn RenderSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        let mirror = backends.writer.map(|writer| {
            let tx = events_tx.clone();
            CursorMirror::spawn(
                writer,
                Box::new(move |completion| {
                    // Blocking is fine: this runs on the mirror thread, and a
                    // lost completion would leave the in-flight flag stuck.
                    if tx.blocking_send(EngineEvent::WriteCompleted(completion)).is_err() {
                        log::debug!("mirror: engine gone, completion dropped");
                    }
                }),
            )
        });
        if mirror.is_none() {
            log::warn!("engine: no OS cursor writer, mirroring disabled");
        }

        let scheduler = SyncScheduler::new(
            config.screen.scale_factor,
            config.min_sync_interval(),
            mirror.is_some(),
        );

        Self {
            store: CursorStore::new(bounds, config.cursor_colors.clone()),
            identities: DeviceIdentities::new(),
            feed: ShapeFeed::new(),
            presence: PresenceMonitor::new(Duration::from_millis(config.presence.debounce_ms)),
            scheduler,
            render: RenderClient::new(sink, config.precise_positioning),
            capture: CaptureAdapter::new(backends.capture),
            enumerator: backends.enumerator,
            mirror,
            sampler: None,
            sampler_command: backends.sampler_command,
            events_tx,
            events_rx,
            system_cursor_hidden: false,
            shut_down: false,
            config,
            config_path,
        }
    }

    /// Runs until Ctrl-C or a `quit` command, then shuts down.
    pub async fn run(mut self) {
        self.start();

        let tx = self.events_tx.clone();
        let stdin = tokio::spawn(control::read_stdin(move |cmd| {
            forward(&tx, EngineEvent::Control(cmd));
        }));

        let mut tick = time::interval(self.config.tick_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut presence = time::interval(Duration::from_millis(
            self.config.presence.interval_ms.max(1),
        ));
        presence.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ctrl_c_armed = true;

        log::info!("engine: running");
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    if self.handle_event(event, Instant::now()) == Flow::Quit {
                        log::info!("engine: quit requested");
                        break;
                    }
                }
                deadline = tick.tick() => self.on_tick(deadline.into_std()),
                _ = presence.tick() => self.check_presence(Instant::now()),
                result = &mut ctrl_c, if ctrl_c_armed => match result {
                    Ok(()) => {
                        log::info!("engine: interrupted");
                        break;
                    }
                    Err(e) => {
                        log::warn!("engine: cannot listen for Ctrl-C: {e}");
                        ctrl_c_armed = false;
                    }
                },
            }
        }

        stdin.abort();
        self.shutdown();
    }

    /// Startup: capture, OS cursor centering, sampler, initial settings.
    fn start(&mut self) {
        let tx = self.events_tx.clone();
        self.capture
            .start(move |event| forward(&tx, EngineEvent::Capture(event)));
        if !self.capture.is_running() {
            log::warn!("engine: no pointer capture, running with zero cursors");
        }

        let center = self.scheduler.target_for(self.store.bounds().center());
        if self.scheduler.request(center) {
            log::debug!("engine: centering OS cursor at {center:?}");
        }

        self.start_sampler();
        self.render.settings(&self.config);
        self.render.flush();
    }

    fn start_sampler(&mut self) {
        if self.sampler_command.is_empty() {
            log::info!("sampler: none configured, shapes stay at {}", self.feed.current());
            return;
        }

        let tx = self.events_tx.clone();
        match ShapeSampler::spawn(&self.sampler_command, move |event| {
            forward(&tx, EngineEvent::Sampler(event));
        }) {
            Ok(sampler) => {
                self.sampler = Some(sampler);
                self.feed.mark_active();
            }
            Err(e) => log::warn!("sampler: failed to start, shape frozen: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Event dispatch
    // -----------------------------------------------------------------------

    pub fn handle_event(&mut self, event: EngineEvent, now: Instant) -> Flow {
        match event {
            EngineEvent::Capture(event) => self.on_capture(event, now),
            EngineEvent::Sampler(SamplerEvent::Token(token)) => self.on_shape_token(&token),
            EngineEvent::Sampler(SamplerEvent::Stopped) => {
                self.feed.mark_inactive();
                log::warn!("sampler: stopped, keeping shape {}", self.feed.current());
            }
            EngineEvent::Enumerated(result) => self.on_enumerated(result, now),
            EngineEvent::EnumerationFinished => self.presence.finish_check(),
            EngineEvent::WriteCompleted(c) => self.scheduler.write_completed(c.target, c.ok),
            EngineEvent::Control(cmd) => return self.on_control(cmd),
        }
        Flow::Continue
    }

    fn on_capture(&mut self, event: CaptureEvent, now: Instant) {
        if let Some(delta) = event.resolve_delta(&mut self.identities) {
            let new_device = self.store.device(&delta.id).is_none();
            let new_cursor = self.store.cursor(&delta.id).is_none();

            let previous = self.store.active().filter(|a| **a != delta.id).cloned();

            let Some(cursor) =
                self.store
                    .apply_delta(&delta, self.config.sensitivity, self.feed.current(), now)
            else {
                return;
            };
            if cursor.has_moved_once {
                self.render.cursor_update(cursor, true);
            }
            // The cursor that just lost focus is re-sent as inactive with the
            // next frame.
            if let Some(prev) = previous
                .and_then(|id| self.store.cursor(&id))
                .filter(|c| c.has_moved_once)
            {
                self.render.cursor_update(prev, false);
            }

            if new_device {
                log::info!("engine: tracking {} ({})", delta.id, delta.name);
                self.render.devices_updated(&self.store);
            }
            if new_cursor {
                self.update_cursor_visibility();
            }
            return;
        }

        if let CaptureEvent::Changed {
            handle,
            name,
            change,
        } = event
        {
            match change {
                DeviceChange::Added => {
                    let id = self.identities.resolve(handle);
                    if self.store.register_device(id.clone(), handle, &name, now) {
                        log::info!("engine: device {id} ({name}) attached");
                        self.render.devices_updated(&self.store);
                    }
                }
                DeviceChange::Removed => {
                    if let Some(id) = self.identities.get(handle).cloned() {
                        self.remove_device(&id);
                    }
                }
            }
        }
    }

    fn on_shape_token(&mut self, token: &str) {
        let Some(shape) = self.feed.observe(token) else {
            return;
        };
        log::debug!("engine: shape {shape}");
        let active = self.store.set_active_shape(shape).cloned();
        self.render.shape_changed(shape, active);
    }

    fn on_enumerated(&mut self, result: Result<Vec<EnumeratedDevice>, PlatformError>, now: Instant) {
        let outcome = self.presence.reconcile(result);
        if outcome.is_empty() {
            return;
        }

        let removed = apply_disconnects(
            self.config.presence.disconnect_policy,
            &outcome.disconnected,
            &self.identities,
            &mut self.store,
        );
        for id in &removed {
            self.render.cursor_removed(id);
        }

        let mut changed = !removed.is_empty();
        for device in &outcome.connected {
            let id = self.identities.resolve(device.handle);
            changed |= self
                .store
                .register_device(id, device.handle, &device.name, now);
        }

        if changed {
            self.render.devices_updated(&self.store);
            self.update_cursor_visibility();
        }
    }

    fn on_control(&mut self, cmd: ControlCommand) -> Flow {
        match cmd {
            ControlCommand::IncreaseSensitivity => {
                self.config.increase_sensitivity();
                self.settings_changed();
            }
            ControlCommand::DecreaseSensitivity => {
                self.config.decrease_sensitivity();
                self.settings_changed();
            }
            ControlCommand::ResetSensitivity => {
                self.config.reset_sensitivity();
                self.settings_changed();
            }
            ControlCommand::Remove(id) => {
                if !self.remove_device(&id) {
                    log::warn!("engine: no tracked device {id}");
                }
            }
            ControlCommand::ClearDisconnected => self.clear_disconnected(),
            ControlCommand::List => self.list_devices(),
            ControlCommand::RendererReady => {
                log::info!("engine: renderer ready, replaying {} cursor(s)", self.store.cursor_count());
                self.render.settings(&self.config);
                self.render.devices_updated(&self.store);
                self.render.present(RenderBatch::replay(&self.store, timestamp_ms()));
            }
            ControlCommand::ResetConfig => {
                self.config = Config::default();
                self.store.set_palette(self.config.cursor_colors.clone());
                self.scheduler.set_min_interval(self.config.min_sync_interval());
                self.render.set_precise(self.config.precise_positioning);
                self.update_cursor_visibility();
                self.settings_changed();
            }
            ControlCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    // -----------------------------------------------------------------------
    // Tick and presence
    // -----------------------------------------------------------------------

    fn on_tick(&mut self, now: Instant) {
        let Some(output) = self.scheduler.tick(now, &self.store) else {
            return;
        };
        if let Some(target) = output.dispatch {
            self.dispatch_write(target);
        }
        self.render.present(output.batch);
    }

    fn dispatch_write(&mut self, target: OsPoint) {
        let queued = match self.mirror.as_ref() {
            Some(mirror) => mirror.move_to(target),
            None => Err(PlatformError::Unavailable("no cursor writer".into())),
        };
        if let Err(e) = queued {
            log::debug!("engine: OS write to {target:?} not queued: {e}");
            self.scheduler.write_rejected();
        }
    }

    /// Starts one enumeration off-thread if the monitor allows it.
    fn check_presence(&mut self, now: Instant) {
        if !self.presence.begin_check(now) {
            return;
        }

        let enumerator = Arc::clone(&self.enumerator);
        let tx = self.events_tx.clone();
        let timeout = Duration::from_millis(self.config.presence.enumeration_timeout_ms);

        tokio::spawn(async move {
            let mut job = tokio::task::spawn_blocking(move || enumerator.enumerate());
            let (result, timed_out) = match time::timeout(timeout, &mut job).await {
                Ok(Ok(result)) => (result, false),
                Ok(Err(e)) => (
                    Err(PlatformError::Other(format!("enumeration task failed: {e}"))),
                    false,
                ),
                Err(_) => (
                    Err(PlatformError::Other(format!(
                        "enumeration timed out after {timeout:?}"
                    ))),
                    true,
                ),
            };
            // Awaited rather than try_send: neither message may be dropped,
            // the second one clears the monitor's in-flight flag.
            if tx.send(EngineEvent::Enumerated(result)).await.is_err() {
                log::debug!("presence: engine gone, enumeration result dropped");
                return;
            }
            if timed_out {
                // A late result is stale; only its completion matters.
                let _ = job.await;
                log::warn!("presence: timed-out enumeration returned, checks resume");
            }
            let _ = tx.send(EngineEvent::EnumerationFinished).await;
        });
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Removes one device and tells the surface. Returns false if unknown.
    fn remove_device(&mut self, id: &DeviceId) -> bool {
        let Some(device) = self.store.remove(id) else {
            return false;
        };
        log::info!("engine: removed {} ({})", device.id, device.name);
        self.render.cursor_removed(id);
        self.render.devices_updated(&self.store);
        self.update_cursor_visibility();
        true
    }

    /// Drops every device the last enumeration did not list.
    fn clear_disconnected(&mut self) {
        if !self.presence.has_baseline() {
            log::warn!("engine: no enumeration yet, cannot tell which devices are gone");
            return;
        }
        let gone: Vec<DeviceId> = self
            .store
            .devices()
            .filter(|d| !self.presence.is_known(d.handle))
            .map(|d| d.id.clone())
            .collect();
        log::info!("engine: clearing {} disconnected device(s)", gone.len());
        for id in &gone {
            self.remove_device(id);
        }
    }

    fn list_devices(&mut self) {
        log::info!(
            "engine: {} device(s), active {:?}, enumerated {}{}",
            self.store.devices().count(),
            self.store.active(),
            self.presence.known_handles().count(),
            if self.presence.is_in_flight() { " (check running)" } else { "" }
        );
        log::info!(
            "engine: sampler {}, shape {}, OS cursor at {:?}{}, {} coalesced update(s)",
            if self.feed.is_active() { "running" } else { "stopped" },
            self.feed.current(),
            self.scheduler.last_written(),
            if self.scheduler.is_in_flight() { " (write in flight)" } else { "" },
            self.render.pending_len()
        );
        for device in self.store.devices() {
            match self.store.cursor(&device.id) {
                Some(c) => log::info!(
                    "  {} {:?} at ({:.1}, {:.1}) {} moved={}",
                    device.id,
                    device.name,
                    c.position.x,
                    c.position.y,
                    c.color,
                    c.has_moved_once
                ),
                None => log::info!("  {} {:?} (no cursor yet)", device.id, device.name),
            }
        }
        self.render.devices_updated(&self.store);
    }

    fn settings_changed(&mut self) {
        log::info!("engine: sensitivity {:.1}", self.config.sensitivity);
        self.persist_config();
        self.render.settings(&self.config);
    }

    fn persist_config(&self) {
        let Some(path) = self.config_path.as_deref() else {
            return;
        };
        match self.config.save(path) {
            Ok(()) => log::debug!("engine: config saved to {}", path.display()),
            Err(e) => log::warn!("engine: {e}"),
        }
    }

    /// Hides the OS cursor while virtual cursors exist, if configured.
    fn update_cursor_visibility(&mut self) {
        let want_hidden = self.config.hide_system_cursor && self.store.cursor_count() > 0;
        if want_hidden == self.system_cursor_hidden {
            return;
        }
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };
        match mirror.set_hidden(want_hidden) {
            Ok(()) => self.system_cursor_hidden = want_hidden,
            Err(e) => log::warn!("engine: cannot change system cursor visibility: {e}"),
        }
    }

    /// Best-effort, idempotent teardown.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("engine: shutting down");

        self.scheduler.cancel();
        self.capture.stop();
        if let Some(mut sampler) = self.sampler.take() {
            sampler.stop();
        }
        self.feed.mark_inactive();
        if !self.store.is_empty() {
            log::debug!("engine: dropping {} cursor(s)", self.store.cursor_count());
            self.store.clear();
        }

        // Unblocks a mirror thread waiting for queue space.
        self.events_rx.close();
        if let Some(mut mirror) = self.mirror.take() {
            if self.system_cursor_hidden {
                if let Err(e) = mirror.set_hidden(false) {
                    log::debug!("engine: cannot restore system cursor: {e}");
                }
            }
            mirror.shutdown();
        }
        self.system_cursor_hidden = false;

        self.persist_config();
        self.render.flush();
        log::info!("engine: stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::ScriptedCapture;
    use crate::config::DisconnectPolicy;
    use crate::device::DeviceHandle;
    use crate::mirror::tests::{RecordingWriter, WriterCall};
    use crate::platform::PointerEvent;
    use crate::render::tests::RecordingSink;
    use crate::shape::CursorShape;

    struct NoEnumeration;

    impl DeviceEnumerator for NoEnumeration {
        fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, PlatformError> {
            Err(PlatformError::Unavailable("test".into()))
        }
    }

    /// Blocks its worker thread for a fixed time, then reports no devices.
    struct SlowEnumeration(Duration);

    impl DeviceEnumerator for SlowEnumeration {
        fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, PlatformError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    struct Harness {
        engine: Engine,
        capture: ScriptedCapture,
        sink: RecordingSink,
    }

    fn harness(config: Config, writer: Option<RecordingWriter>) -> Harness {
        harness_with(config, writer, Arc::new(NoEnumeration))
    }

    fn harness_with(
        config: Config,
        writer: Option<RecordingWriter>,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> Harness {
        let capture = ScriptedCapture::default();
        let sink = RecordingSink::default();
        let backends = Backends {
            capture: Box::new(capture.clone()),
            enumerator,
            writer: writer.map(|w| Box::new(w) as Box<dyn CursorWriter>),
            sampler_command: Vec::new(),
        };
        let engine = Engine::new(
            config,
            None,
            ScreenBounds::new(1000.0, 800.0),
            backends,
            Box::new(sink.clone()),
        );
        Harness {
            engine,
            capture,
            sink,
        }
    }

    fn id(handle: u64) -> DeviceId {
        DeviceId::from_handle(DeviceHandle(handle))
    }

    fn delta(handle: u64, dx: i32, dy: i32) -> EngineEvent {
        EngineEvent::Capture(CaptureEvent::Delta {
            handle: DeviceHandle(handle),
            name: format!("Mouse {handle}"),
            dx,
            dy,
        })
    }

    fn enumerated(handles: &[u64]) -> EngineEvent {
        EngineEvent::Enumerated(Ok(handles
            .iter()
            .map(|&h| EnumeratedDevice {
                handle: DeviceHandle(h),
                name: format!("Mouse {h}"),
            })
            .collect()))
    }

    impl Harness {
        fn send(&mut self, event: EngineEvent) -> Flow {
            self.engine.handle_event(event, Instant::now())
        }
    }

    #[test]
    fn zero_delta_produces_nothing() {
        let mut h = harness(Config::default(), None);
        h.send(delta(1, 0, 0));
        assert!(h.engine.store.is_empty());
        assert!(h.sink.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn instant_updates_start_once_moved() {
        let mut h = harness(Config::default(), None);
        h.send(delta(1, 5, 0));
        h.send(delta(1, 5, 0));
        assert!(h.sink.of_type("cursor-instant").is_empty());
        h.send(delta(1, 5, 0));

        let instants = h.sink.of_type("cursor-instant");
        assert_eq!(instants.len(), 1);
        assert_eq!(instants[0]["deviceId"], "device_1");
        assert_eq!(instants[0]["x"], 515.0);
        assert_eq!(h.sink.of_type("devices-updated").len(), 1);
    }

    #[test]
    fn tick_batch_excludes_device_below_threshold() {
        let mut h = harness(Config::default(), None);
        for _ in 0..3 {
            h.send(delta(0xA, 5, 0));
        }
        h.send(delta(0xB, 0, 5));
        h.engine.on_tick(Instant::now());

        let batch = &h.sink.of_type("cursors-batch")[0];
        assert_eq!(batch["activeDeviceId"], "device_11");
        assert_eq!(batch["cursors"].as_array().unwrap().len(), 1);
        assert_eq!(batch["cursors"][0]["deviceId"], "device_10");
    }

    #[test]
    fn focus_change_resends_previous_cursor_as_inactive() {
        let mut h = harness(Config::default(), None);
        h.send(delta(1, 20, 0));
        h.send(delta(2, 20, 0));

        let instants = h.sink.of_type("cursor-instant");
        assert_eq!(instants.len(), 2);
        assert_eq!(instants[1]["deviceId"], "device_2");
        assert_eq!(h.engine.render.pending_len(), 1);

        h.engine.on_tick(Instant::now());
        let instants = h.sink.of_type("cursor-instant");
        assert_eq!(instants.len(), 3);
        assert_eq!(instants[2]["deviceId"], "device_1");
        assert_eq!(instants[2]["isActive"], false);
        assert_eq!(h.engine.render.pending_len(), 0);

        // Same device again: nothing goes stale.
        h.send(delta(2, 20, 0));
        assert_eq!(h.engine.render.pending_len(), 0);
    }

    #[test]
    fn coarse_disconnect_removes_every_tracked_device() {
        let mut config = Config::default();
        config.presence.disconnect_policy = DisconnectPolicy::InvalidateAll;
        let mut h = harness(config, None);
        for handle in 1..=3 {
            h.send(delta(handle, 20, 0));
        }
        h.send(enumerated(&[1, 2, 3]));
        assert!(h.sink.of_type("cursor-removed").is_empty());

        h.send(enumerated(&[1, 3]));
        let removed: Vec<_> = h
            .sink
            .of_type("cursor-removed")
            .into_iter()
            .map(|m| m["deviceId"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(removed, vec!["device_1", "device_2", "device_3"]);
        assert!(h.engine.store.is_empty());
        assert!(h.engine.store.active().is_none());
    }

    #[test]
    fn precise_disconnect_removes_matching_device() {
        let mut h = harness(Config::default(), None);
        for handle in 1..=3 {
            h.send(delta(handle, 20, 0));
        }
        h.send(enumerated(&[1, 2, 3]));
        h.send(enumerated(&[1, 3]));

        assert_eq!(h.sink.of_type("cursor-removed").len(), 1);
        assert!(h.engine.store.cursor(&id(2)).is_none());
        assert_eq!(h.engine.store.active(), Some(&id(3)));
    }

    #[test]
    fn failed_enumeration_changes_nothing() {
        let mut h = harness(Config::default(), None);
        h.send(enumerated(&[1]));
        h.send(delta(1, 20, 0));
        h.sink.clear();
        h.send(EngineEvent::Enumerated(Err(PlatformError::Other("timed out".into()))));
        assert!(h.sink.messages.lock().unwrap().is_empty());
        assert!(h.engine.store.cursor(&id(1)).is_some());
    }

    #[tokio::test]
    async fn enumeration_timeout_counts_as_failure() {
        let mut config = Config::default();
        config.presence.enumeration_timeout_ms = 20;
        let mut h = harness_with(
            config,
            None,
            Arc::new(SlowEnumeration(Duration::from_millis(300))),
        );
        h.send(enumerated(&[1]));
        h.send(delta(1, 20, 0));
        h.sink.clear();

        h.engine.check_presence(Instant::now());
        assert!(h.engine.presence.is_in_flight());

        let event = h.engine.events_rx.recv().await.unwrap();
        assert!(matches!(
            &event,
            EngineEvent::Enumerated(Err(PlatformError::Other(msg))) if msg.contains("timed out")
        ));
        h.send(event);
        assert!(h.engine.presence.is_in_flight());
        assert!(h.engine.store.cursor(&id(1)).is_some());
        assert!(h.sink.messages.lock().unwrap().is_empty());

        // No second blocking call while the first one is still running.
        h.engine.check_presence(Instant::now() + Duration::from_secs(60));
        let event = h.engine.events_rx.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::EnumerationFinished));
        h.send(event);
        assert!(!h.engine.presence.is_in_flight());
        assert!(h.engine.store.cursor(&id(1)).is_some());
        assert!(h.engine.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enumeration_result_then_completion_are_delivered() {
        let mut h = harness_with(
            Config::default(),
            None,
            Arc::new(SlowEnumeration(Duration::ZERO)),
        );
        h.engine.check_presence(Instant::now());

        let event = h.engine.events_rx.recv().await.unwrap();
        assert!(matches!(&event, EngineEvent::Enumerated(Ok(devices)) if devices.is_empty()));
        h.send(event);
        assert!(h.engine.presence.has_baseline());

        let event = h.engine.events_rx.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::EnumerationFinished));
        h.send(event);
        assert!(!h.engine.presence.is_in_flight());
    }

    #[test]
    fn enumeration_hit_registers_device_without_cursor() {
        let mut h = harness(Config::default(), None);
        h.send(enumerated(&[7]));
        assert!(h.engine.store.device(&id(7)).is_some());
        assert!(h.engine.store.cursor(&id(7)).is_none());
        assert_eq!(h.sink.of_type("devices-updated")[0]["count"], 1);
    }

    #[test]
    fn repeated_shape_token_notifies_once() {
        let mut h = harness(Config::default(), None);
        h.send(delta(1, 20, 0));
        h.send(EngineEvent::Sampler(SamplerEvent::Token("Hand".into())));
        h.send(EngineEvent::Sampler(SamplerEvent::Token("Hand".into())));

        let changes = h.sink.of_type("shape-changed");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["activeDeviceId"], "device_1");
        assert_eq!(h.engine.store.cursor(&id(1)).unwrap().shape, CursorShape::Hand);
    }

    #[test]
    fn sampler_exit_keeps_last_shape() {
        let mut h = harness(Config::default(), None);
        h.send(EngineEvent::Sampler(SamplerEvent::Token("Wait".into())));
        h.send(EngineEvent::Sampler(SamplerEvent::Stopped));
        assert!(!h.engine.feed.is_active());

        h.send(delta(1, 1, 0));
        h.send(delta(1, 1, 0));
        assert_eq!(h.engine.store.cursor(&id(1)).unwrap().shape, CursorShape::Wait);
    }

    #[test]
    fn sensitivity_commands_persist_and_notify() {
        let path = std::env::temp_dir().join(format!("multicursor-engine-{}.toml", std::process::id()));
        let mut h = harness(Config::default(), None);
        h.engine.config_path = Some(path.clone());

        h.send(EngineEvent::Control(ControlCommand::IncreaseSensitivity));
        h.send(EngineEvent::Control(ControlCommand::IncreaseSensitivity));
        assert_eq!(h.engine.config.sensitivity, 1.2);
        assert_eq!(Config::load_or_default(&path).sensitivity, 1.2);
        assert_eq!(h.sink.of_type("settings").last().unwrap()["sensitivity"], 1.2);

        h.send(EngineEvent::Control(ControlCommand::ResetSensitivity));
        assert_eq!(Config::load_or_default(&path).sensitivity, 1.0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sensitivity_scales_subsequent_deltas() {
        let mut h = harness(Config::default(), None);
        for _ in 0..10 {
            h.send(EngineEvent::Control(ControlCommand::IncreaseSensitivity));
        }
        h.send(delta(1, 10, 0));
        assert_eq!(h.engine.store.cursor(&id(1)).unwrap().position.x, 520.0);
    }

    #[test]
    fn remove_command_reassigns_active() {
        let mut h = harness(Config::default(), None);
        h.send(delta(1, 20, 0));
        h.send(delta(2, 20, 0));
        h.send(EngineEvent::Control(ControlCommand::Remove(id(2))));
        assert_eq!(h.engine.store.active(), Some(&id(1)));
        assert_eq!(h.sink.of_type("cursor-removed")[0]["deviceId"], "device_2");

        h.sink.clear();
        h.send(EngineEvent::Control(ControlCommand::Remove(id(2))));
        assert!(h.sink.of_type("cursor-removed").is_empty());
    }

    #[test]
    fn capture_removal_notice_removes_device() {
        let mut h = harness(Config::default(), None);
        h.send(delta(5, 20, 0));
        h.send(EngineEvent::Capture(CaptureEvent::Changed {
            handle: DeviceHandle(5),
            name: "Mouse 5".into(),
            change: DeviceChange::Removed,
        }));
        assert!(h.engine.store.is_empty());
    }

    #[test]
    fn clear_disconnected_drops_devices_missing_from_enumeration() {
        let mut h = harness(Config::default(), None);
        h.send(EngineEvent::Control(ControlCommand::ClearDisconnected));
        h.send(enumerated(&[1]));
        h.send(delta(1, 20, 0));
        h.send(delta(2, 20, 0));
        h.send(EngineEvent::Control(ControlCommand::ClearDisconnected));

        assert!(h.engine.store.cursor(&id(1)).is_some());
        assert!(h.engine.store.cursor(&id(2)).is_none());
    }

    #[test]
    fn renderer_ready_replays_hidden_cursors() {
        let mut h = harness(Config::default(), None);
        h.send(delta(1, 2, 0));
        h.send(EngineEvent::Control(ControlCommand::RendererReady));

        let batch = &h.sink.of_type("cursors-batch")[0];
        assert_eq!(batch["cursors"][0]["visible"], false);
        assert_eq!(h.sink.of_type("settings").len(), 1);
    }

    #[test]
    fn quit_command_ends_loop() {
        let mut h = harness(Config::default(), None);
        assert_eq!(h.send(EngineEvent::Control(ControlCommand::List)), Flow::Continue);
        assert_eq!(h.send(EngineEvent::Control(ControlCommand::Quit)), Flow::Quit);
    }

    #[test]
    fn os_cursor_write_round_trip() {
        let writer = RecordingWriter::default();
        let mut config = Config::default();
        config.high_performance_mode = true;
        config.screen.scale_factor = 1.0;
        let mut h = harness(config, Some(writer.clone()));

        h.send(delta(1, 4, 0));
        h.engine.on_tick(Instant::now());
        h.engine.on_tick(Instant::now());

        let Some(EngineEvent::WriteCompleted(done)) = h.engine.events_rx.blocking_recv() else {
            panic!("expected a write completion");
        };
        assert_eq!(done, MirrorCompletion { target: OsPoint { x: 504, y: 400 }, ok: true });
        h.send(EngineEvent::WriteCompleted(done));
        assert_eq!(h.engine.scheduler.last_written(), Some(done.target));
        assert!(!h.engine.scheduler.is_in_flight());

        h.engine.shutdown();
        assert_eq!(*writer.calls.lock().unwrap(), vec![WriterCall::Move(504, 400)]);
    }

    #[test]
    fn system_cursor_hidden_while_cursors_exist() {
        let writer = RecordingWriter::default();
        let mut config = Config::default();
        config.hide_system_cursor = true;
        let mut h = harness(config, Some(writer.clone()));

        h.send(delta(1, 1, 0));
        h.send(delta(1, 1, 0));
        h.send(EngineEvent::Control(ControlCommand::Remove(id(1))));
        h.send(delta(2, 1, 0));
        h.engine.shutdown();

        assert_eq!(
            *writer.calls.lock().unwrap(),
            vec![
                WriterCall::Hidden(true),
                WriterCall::Hidden(false),
                WriterCall::Hidden(true),
                WriterCall::Hidden(false),
            ]
        );
    }

    #[test]
    fn capture_events_reach_the_queue() {
        let mut h = harness(Config::default(), None);
        h.engine.start();
        h.capture.emit(PointerEvent::Motion {
            handle: DeviceHandle(3),
            name: "Mouse".into(),
            dx: 1,
            dy: 1,
        });
        let event = h.engine.events_rx.try_recv().unwrap();
        assert!(matches!(event, EngineEvent::Capture(CaptureEvent::Delta { dx: 1, dy: 1, .. })));
        assert_eq!(h.sink.of_type("settings").len(), 1);
    }

    #[test]
    fn shutdown_stops_everything_once() {
        let path = std::env::temp_dir().join(format!("multicursor-shutdown-{}.toml", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut h = harness(Config::default(), None);
        h.engine.config_path = Some(path.clone());
        h.engine.start();
        h.send(delta(1, 20, 0));

        h.engine.shutdown();
        h.engine.shutdown();
        assert!(h.engine.store.is_empty());
        assert!(h.engine.scheduler.tick(Instant::now(), &h.engine.store).is_none());
        assert_eq!(*h.capture.stops.lock().unwrap(), 1);
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);

        drop(h.engine);
        assert_eq!(*h.capture.stops.lock().unwrap(), 1);
    }
}
