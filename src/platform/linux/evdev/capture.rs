//! Pointer capture via the Linux evdev interface (/dev/input/event*).
//!
//! `LinuxEvdevCapture` implements the `InputCapture` trait. `start()` opens
//! every pointer device, then spawns a background thread with a
//! single-threaded tokio runtime. The runtime reads all devices concurrently
//! via `futures::stream::SelectAll`, folds `REL_X`/`REL_Y` into one delta per
//! `SYN_REPORT`, and rescans `/dev/input` periodically to pick up new mice.
//!
//! Required permissions: the process user must be a member of the `input` group.
//!   sudo usermod -aG input $USER   (then log out and back in)

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use evdev::{EventStream, InputEventKind, RelativeAxisType, Synchronization};
use futures::stream::{self, LocalBoxStream, SelectAll};
use futures::StreamExt;
use tokio::sync::oneshot;

use super::{open_pointers, PointerNode};
use crate::device::DeviceHandle;
use crate::platform::{DeviceChange, InputCapture, PlatformError, PointerEvent};

/// How often `/dev/input` is rescanned for newly attached pointers.
const RESCAN_INTERVAL: Duration = Duration::from_secs(2);

type Callback = Box<dyn Fn(PointerEvent) + Send>;

// ---------------------------------------------------------------------------
// Public struct
// ---------------------------------------------------------------------------

/// Linux pointer capture backend using the evdev input subsystem.
pub struct LinuxEvdevCapture {
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LinuxEvdevCapture {
    pub fn new() -> Self {
        Self {
            stop_tx: None,
            thread: None,
        }
    }
}

impl InputCapture for LinuxEvdevCapture {
    fn start(&mut self, callback: Callback) -> Result<(), PlatformError> {
        // Open devices on the calling thread so permission errors surface
        // immediately rather than dying in the background.
        let pointers = open_pointers()?;
        log::info!("capture: found {} pointer device(s)", pointers.len());
        for node in &pointers {
            log::debug!("capture: monitoring {} ({:?})", node.path.display(), node.name);
        }

        let (stop_tx, stop_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("evdev-capture".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("capture: failed to build tokio runtime: {e}");
                        return;
                    }
                };
                rt.block_on(capture_loop(pointers, callback, stop_rx));
            })?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        Ok(())
    }
}

impl Drop for LinuxEvdevCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------------
// Async event loop
// ---------------------------------------------------------------------------

/// One item from the merged device streams.
enum Tagged {
    Event(DeviceHandle, evdev::InputEvent),
    /// The node returned an error (usually `ENODEV` on unplug); its stream ends.
    Gone(DeviceHandle),
}

/// Wraps a device stream so it yields `Gone` once on error and then ends.
fn tagged(handle: DeviceHandle, events: EventStream) -> LocalBoxStream<'static, Tagged> {
    stream::unfold(Some(events), move |state| async move {
        let mut events = state?;
        match events.next_event().await {
            Ok(ev) => Some((Tagged::Event(handle, ev), Some(events))),
            Err(e) => {
                log::debug!("capture: device {handle} read failed: {e}");
                Some((Tagged::Gone(handle), None))
            }
        }
    })
    .boxed_local()
}

/// Per-device state kept by the loop.
struct Tracked {
    path: PathBuf,
    name: String,
    dx: i32,
    dy: i32,
}

struct Pump {
    streams: SelectAll<LocalBoxStream<'static, Tagged>>,
    tracked: HashMap<DeviceHandle, Tracked>,
    callback: Callback,
}

impl Pump {
    /// Starts reading `node`. Returns false if it could not be streamed.
    fn attach(&mut self, node: PointerNode) -> bool {
        match node.device.into_event_stream() {
            Ok(events) => {
                self.streams.push(tagged(node.handle, events));
                self.tracked.insert(
                    node.handle,
                    Tracked {
                        path: node.path,
                        name: node.name,
                        dx: 0,
                        dy: 0,
                    },
                );
                true
            }
            Err(e) => {
                log::warn!("capture: cannot stream {}: {e}", node.path.display());
                false
            }
        }
    }

    fn on_event(&mut self, handle: DeviceHandle, event: evdev::InputEvent) {
        let Some(device) = self.tracked.get_mut(&handle) else {
            return;
        };
        match event.kind() {
            InputEventKind::RelAxis(RelativeAxisType::REL_X) => {
                device.dx = device.dx.saturating_add(event.value());
            }
            InputEventKind::RelAxis(RelativeAxisType::REL_Y) => {
                device.dy = device.dy.saturating_add(event.value());
            }
            InputEventKind::Synchronization(Synchronization::SYN_REPORT) => {
                let (dx, dy) = (device.dx, device.dy);
                device.dx = 0;
                device.dy = 0;
                if dx != 0 || dy != 0 {
                    (self.callback)(PointerEvent::Motion {
                        handle,
                        name: device.name.clone(),
                        dx,
                        dy,
                    });
                }
            }
            InputEventKind::Synchronization(Synchronization::SYN_DROPPED) => {
                device.dx = 0;
                device.dy = 0;
            }
            _ => {}
        }
    }

    fn on_gone(&mut self, handle: DeviceHandle) {
        if let Some(device) = self.tracked.remove(&handle) {
            log::info!("capture: {} ({}) detached", device.path.display(), device.name);
            (self.callback)(PointerEvent::DeviceChanged {
                handle,
                name: device.name,
                change: DeviceChange::Removed,
            });
        }
    }

    /// Attaches pointers that appeared since the last scan.
    fn rescan(&mut self) {
        let nodes = match open_pointers() {
            Ok(nodes) => nodes,
            Err(e) => {
                log::debug!("capture: rescan failed: {e}");
                return;
            }
        };
        let known: HashSet<DeviceHandle> = self.tracked.keys().copied().collect();
        for node in nodes.into_iter().filter(|n| !known.contains(&n.handle)) {
            let (handle, name) = (node.handle, node.name.clone());
            if self.attach(node) {
                log::info!("capture: device {handle} ({name}) attached");
                (self.callback)(PointerEvent::DeviceChanged {
                    handle,
                    name,
                    change: DeviceChange::Added,
                });
            }
        }
    }
}

/// Reads pointer events from all devices until stopped.
async fn capture_loop(
    pointers: Vec<PointerNode>,
    callback: Callback,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut pump = Pump {
        streams: SelectAll::new(),
        tracked: HashMap::new(),
        callback,
    };
    for node in pointers {
        pump.attach(node);
    }

    let mut rescan = tokio::time::interval(RESCAN_INTERVAL);
    rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    rescan.tick().await;

    log::info!("capture: evdev capture active");

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                log::info!("capture: stop signal received");
                break;
            }
            Some(item) = pump.streams.next(), if !pump.streams.is_empty() => match item {
                Tagged::Event(handle, event) => pump.on_event(handle, event),
                Tagged::Gone(handle) => pump.on_gone(handle),
            },
            _ = rescan.tick() => pump.rescan(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
