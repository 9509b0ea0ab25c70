//! Platform abstraction layer.
//!
//! Defines the `InputCapture`, `DeviceEnumerator` and `CursorWriter` traits.
//! Platform-specific implementations live in child modules; the factory
//! functions re-exported here pick the backend for the current target.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
mod unsupported;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
pub use linux::{create_cursor_writer, create_device_enumerator, create_input_capture, detect_screen};
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
pub use unsupported::{
    create_cursor_writer, create_device_enumerator, create_input_capture, detect_screen,
};
#[cfg(target_os = "windows")]
pub use windows::{
    create_cursor_writer, create_device_enumerator, create_input_capture, detect_screen,
};

use crate::device::DeviceHandle;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The OS refused access (missing group membership, privileges, ...).
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The facility does not exist in this session (no display server, no raw input).
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Whether a device appeared or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    Added,
    Removed,
}

/// A single notification delivered by an `InputCapture` backend.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    /// Relative motion reported by one physical device. Unit-less.
    Motion {
        handle: DeviceHandle,
        name: String,
        dx: i32,
        dy: i32,
    },
    /// Best-effort hot-plug notice. Removals are not reliably reported on
    /// every backend; the presence monitor covers the gap.
    DeviceChanged {
        handle: DeviceHandle,
        name: String,
        change: DeviceChange,
    },
}

/// A pointing device found by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedDevice {
    pub handle: DeviceHandle,
    pub name: String,
}

/// Primary screen size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Low-level pointer motion capture.
///
/// `start()` registers with the OS and begins delivering events to `callback`
/// from a background thread. `stop()` deregisters and joins that thread; it
/// must be safe to call on a capture that was never started.
pub trait InputCapture: Send {
    fn start(&mut self, callback: Box<dyn Fn(PointerEvent) + Send>) -> Result<(), PlatformError>;
    fn stop(&mut self) -> Result<(), PlatformError>;
}

/// Lists the currently connected pointing devices.
///
/// Called from a blocking worker; implementations may take their time but must
/// not hold locks shared with the capture path.
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, PlatformError>;
}

/// Places (and optionally hides) the single OS system cursor.
pub trait CursorWriter: Send {
    /// Moves the OS cursor to physical coordinates `(x, y)`.
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), PlatformError>;

    /// Hides or restores the OS cursor. Backends without support accept and ignore.
    fn set_hidden(&mut self, _hidden: bool) -> Result<(), PlatformError> {
        Ok(())
    }
}
