//! Display server detection for Linux.
//!
//! Capture and enumeration read evdev directly and do not care which display
//! server is running. Placing the system pointer does: X11 allows any client
//! to warp it, Wayland compositors do not. `DISPLAY` next to
//! `WAYLAND_DISPLAY` only means XWayland is running, and warping an XWayland
//! pointer does not move the compositor's cursor.

use std::env;

use x11rb::connection::Connection;

use crate::platform::ScreenSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    /// `WAYLAND_DISPLAY` is set (with or without `DISPLAY`).
    Wayland,
    /// Only `DISPLAY` is set.
    X11,
}

/// Detects the active display server from environment variables.
///
/// Returns `None` outside of any graphical session.
pub fn detect_display_server() -> Option<DisplayServer> {
    let has_wayland = env::var_os("WAYLAND_DISPLAY").is_some_and(|v| !v.is_empty());
    let has_display = env::var_os("DISPLAY").is_some_and(|v| !v.is_empty());
    classify_display(has_wayland, has_display)
}

fn classify_display(has_wayland: bool, has_display: bool) -> Option<DisplayServer> {
    match (has_wayland, has_display) {
        (true, _) => Some(DisplayServer::Wayland),
        (false, true) => Some(DisplayServer::X11),
        (false, false) => None,
    }
}

/// Size of the default X11 screen's root window.
///
/// Wayland offers no client-side way to ask, so `None` there; the caller
/// falls back to the configured or default size.
pub fn detect_screen() -> Option<ScreenSize> {
    if detect_display_server() != Some(DisplayServer::X11) {
        return None;
    }
    let (conn, screen_num) = match x11rb::connect(None) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("detect: cannot connect to X server: {e}");
            return None;
        }
    };
    let screen = conn.setup().roots.get(screen_num)?;
    Some(ScreenSize {
        width: u32::from(screen.width_in_pixels),
        height: u32::from(screen.height_in_pixels),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
