//! Input Capture Adapter.
//!
//! Wraps a platform `InputCapture` backend. Raw `PointerEvent`s are filtered
//! on the backend thread (zero-motion deltas never leave it) and forwarded as
//! `CaptureEvent`s through the callback the engine supplies. Handle → id
//! resolution happens on the engine side, where `DeviceIdentities` lives.

use crate::device::{DeviceHandle, DeviceId, DeviceIdentities};
use crate::platform::{DeviceChange, InputCapture, PointerEvent};

/// One processed movement delta, identity already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDelta {
    pub id: DeviceId,
    pub handle: DeviceHandle,
    pub name: String,
    pub dx: i32,
    pub dy: i32,
}

/// What the capture path hands to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Delta {
        handle: DeviceHandle,
        name: String,
        dx: i32,
        dy: i32,
    },
    Changed {
        handle: DeviceHandle,
        name: String,
        change: DeviceChange,
    },
}

impl CaptureEvent {
    /// Converts a backend event, dropping motion with no displacement.
    pub fn from_pointer(event: PointerEvent) -> Option<Self> {
        match event {
            PointerEvent::Motion { dx: 0, dy: 0, .. } => None,
            PointerEvent::Motion {
                handle,
                name,
                dx,
                dy,
            } => Some(Self::Delta {
                handle,
                name,
                dx,
                dy,
            }),
            PointerEvent::DeviceChanged {
                handle,
                name,
                change,
            } => Some(Self::Changed {
                handle,
                name,
                change,
            }),
        }
    }

    /// Attaches the memoized id to a delta.
    pub fn resolve_delta(&self, identities: &mut DeviceIdentities) -> Option<DeviceDelta> {
        match self {
            Self::Delta {
                handle,
                name,
                dx,
                dy,
            } => Some(DeviceDelta {
                id: identities.resolve(*handle),
                handle: *handle,
                name: name.clone(),
                dx: *dx,
                dy: *dy,
            }),
            Self::Changed { .. } => None,
        }
    }
}

/// Lifecycle wrapper around the platform backend.
pub struct CaptureAdapter {
    backend: Box<dyn InputCapture>,
    running: bool,
}

impl CaptureAdapter {
    pub fn new(backend: Box<dyn InputCapture>) -> Self {
        Self {
            backend,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Registers with the OS and starts the pump.
    ///
    /// Returns false when registration is refused; the caller continues with
    /// zero virtual cursors.
    pub fn start(&mut self, sink: impl Fn(CaptureEvent) + Send + 'static) -> bool {
        if self.running {
            return true;
        }

        let callback = Box::new(move |event: PointerEvent| {
            if let Some(event) = CaptureEvent::from_pointer(event) {
                sink(event);
            }
        });

        match self.backend.start(callback) {
            Ok(()) => {
                log::info!("capture: started");
                self.running = true;
                true
            }
            Err(e) => {
                log::warn!("capture: unavailable, continuing without virtual cursors: {e}");
                false
            }
        }
    }

    /// Deregisters and halts the pump. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Err(e) = self.backend.stop() {
            log::warn!("capture: stop failed: {e}");
        }
        self.running = false;
        log::info!("capture: stopped");
    }
}

impl Drop for CaptureAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::PlatformError;
    use std::sync::{Arc, Mutex};

    /// Backend that hands its callback to the test so events can be injected.
    #[derive(Default, Clone)]
    pub(crate) struct ScriptedCapture {
        pub(crate) callback: Arc<Mutex<Option<Box<dyn Fn(PointerEvent) + Send>>>>,
        pub(crate) refuse: bool,
        pub(crate) stops: Arc<Mutex<u32>>,
    }

    impl ScriptedCapture {
        pub(crate) fn emit(&self, event: PointerEvent) {
            if let Some(cb) = self.callback.lock().unwrap().as_ref() {
                cb(event);
            }
        }
    }

    impl InputCapture for ScriptedCapture {
        fn start(
            &mut self,
            callback: Box<dyn Fn(PointerEvent) + Send>,
        ) -> Result<(), PlatformError> {
            if self.refuse {
                return Err(PlatformError::PermissionDenied("scripted refusal".into()));
            }
            *self.callback.lock().unwrap() = Some(callback);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), PlatformError> {
            *self.callback.lock().unwrap() = None;
            *self.stops.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn motion(handle: u64, dx: i32, dy: i32) -> PointerEvent {
        PointerEvent::Motion {
            handle: DeviceHandle(handle),
            name: "Mouse".into(),
            dx,
            dy,
        }
    }

    #[test]
    fn zero_motion_is_suppressed() {
        let backend = ScriptedCapture::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut adapter = CaptureAdapter::new(Box::new(backend.clone()));
        let sink_seen = Arc::clone(&seen);
        assert!(adapter.start(move |e| sink_seen.lock().unwrap().push(e)));

        backend.emit(motion(1, 0, 0));
        backend.emit(motion(1, 2, 0));
        backend.emit(PointerEvent::DeviceChanged {
            handle: DeviceHandle(2),
            name: "Pad".into(),
            change: DeviceChange::Added,
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], CaptureEvent::Delta { dx: 2, dy: 0, .. }));
        assert!(matches!(seen[1], CaptureEvent::Changed { change: DeviceChange::Added, .. }));
    }

    #[test]
    fn refused_registration_returns_false() {
        let backend = ScriptedCapture {
            refuse: true,
            ..Default::default()
        };
        let mut adapter = CaptureAdapter::new(Box::new(backend));
        assert!(!adapter.start(|_| {}));
        assert!(!adapter.is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let backend = ScriptedCapture::default();
        let mut adapter = CaptureAdapter::new(Box::new(backend.clone()));
        adapter.stop();
        assert!(adapter.start(|_| {}));
        adapter.stop();
        adapter.stop();
        drop(adapter);
        assert_eq!(*backend.stops.lock().unwrap(), 1);
    }

    #[test]
    fn resolved_delta_uses_memoized_id() {
        let mut ids = DeviceIdentities::new();
        let event = CaptureEvent::from_pointer(motion(42, 1, -1)).unwrap();
        let first = event.resolve_delta(&mut ids).unwrap();
        let second = event.resolve_delta(&mut ids).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id.as_str(), "device_42");
    }
}
