//! Linux platform backend.
//!
//! Capture and enumeration: direct evdev (/dev/input/event*). The process
//! user must be in the `input` group.
//! Cursor writer: X11 core `WarpPointer`, XFixes for hiding. Wayland sessions
//! run without a writer; virtual cursors still work, the system pointer just
//! stays where the compositor puts it.

mod detect;
mod evdev;
mod x11;

use crate::platform::{CursorWriter, DeviceEnumerator, InputCapture, PlatformError};
use detect::{detect_display_server, DisplayServer};
use self::evdev::{EvdevEnumerator, LinuxEvdevCapture};
use self::x11::X11CursorWriter;

pub use detect::detect_screen;

/// Returns the evdev pointer capture backend. Devices are opened in `start()`.
pub fn create_input_capture() -> Result<Box<dyn InputCapture>, PlatformError> {
    Ok(Box::new(LinuxEvdevCapture::new()))
}

pub fn create_device_enumerator() -> Result<Box<dyn DeviceEnumerator>, PlatformError> {
    Ok(Box::new(EvdevEnumerator))
}

/// Returns a writer for the current session, if it allows one.
pub fn create_cursor_writer() -> Result<Box<dyn CursorWriter>, PlatformError> {
    match detect_display_server() {
        Some(DisplayServer::X11) => {
            X11CursorWriter::connect().map(|w| Box::new(w) as Box<dyn CursorWriter>)
        }
        Some(DisplayServer::Wayland) => Err(PlatformError::Unavailable(
            "Wayland compositors do not let clients place the pointer.".into(),
        )),
        None => Err(PlatformError::Unavailable(
            "No display server detected.".into(),
        )),
    }
}
