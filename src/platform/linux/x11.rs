//! X11 system cursor writer.
//!
//! Moves the pointer with core `WarpPointer` relative to the root window and
//! hides it with XFixes `HideCursor`. XFixes is optional: without it,
//! `set_hidden` reports `Unavailable` and the cursor stays visible.

use x11rb::connection::Connection;
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{ConnectionExt as _, Window};
use x11rb::rust_connection::RustConnection;

use crate::platform::{CursorWriter, PlatformError};

pub struct X11CursorWriter {
    conn: RustConnection,
    root: Window,
    has_xfixes: bool,
}

fn x11_error(e: impl std::fmt::Display) -> PlatformError {
    PlatformError::Other(format!("X11: {e}"))
}

impl X11CursorWriter {
    pub fn connect() -> Result<Self, PlatformError> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| PlatformError::Unavailable(format!("cannot connect to X server: {e}")))?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|s| s.root)
            .ok_or_else(|| PlatformError::Unavailable(format!("X screen {screen_num} missing")))?;

        // HideCursor needs XFixes 4.0.
        let has_xfixes = match conn.xfixes_query_version(4, 0).map(|c| c.reply()) {
            Ok(Ok(v)) => v.major_version >= 4,
            Ok(Err(e)) => {
                log::warn!("x11: XFixes unavailable: {e}");
                false
            }
            Err(e) => {
                log::warn!("x11: XFixes unavailable: {e}");
                false
            }
        };

        log::info!("x11: cursor writer connected (screen {screen_num}, xfixes: {has_xfixes})");
        Ok(Self {
            conn,
            root,
            has_xfixes,
        })
    }
}

/// X11 coordinates are 16-bit.
fn to_x11_coord(v: i32) -> i16 {
    v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

impl CursorWriter for X11CursorWriter {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), PlatformError> {
        self.conn
            .warp_pointer(
                x11rb::NONE,
                self.root,
                0,
                0,
                0,
                0,
                to_x11_coord(x),
                to_x11_coord(y),
            )
            .map_err(x11_error)?;
        self.conn.flush().map_err(x11_error)?;
        Ok(())
    }

    fn set_hidden(&mut self, hidden: bool) -> Result<(), PlatformError> {
        if !self.has_xfixes {
            return Err(PlatformError::Unavailable("XFixes 4.0 not supported".into()));
        }
        let cookie = if hidden {
            self.conn.xfixes_hide_cursor(self.root)
        } else {
            self.conn.xfixes_show_cursor(self.root)
        };
        cookie.map_err(x11_error)?.check().map_err(x11_error)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
