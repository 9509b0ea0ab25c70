//! Windows system cursor writer: `SetCursorPos`, and blank system cursors
//! for hiding.
//!
//! `ShowCursor` only affects the calling thread's windows, so hiding swaps
//! every standard system cursor for a fully transparent one via
//! `SetSystemCursor`. Restoring reloads the user's scheme with
//! `SPI_SETCURSORS`.

use std::ptr;

use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateCursor, SetCursorPos, SetSystemCursor, SystemParametersInfoW, OCR_APPSTARTING,
    OCR_CROSS, OCR_HAND, OCR_IBEAM, OCR_NO, OCR_NORMAL, OCR_SIZEALL, OCR_SIZENESW, OCR_SIZENS,
    OCR_SIZENWSE, OCR_SIZEWE, OCR_UP, OCR_WAIT, SPI_SETCURSORS,
};

use crate::platform::{CursorWriter, PlatformError};

const SYSTEM_CURSORS: [u32; 13] = [
    OCR_NORMAL,
    OCR_IBEAM,
    OCR_WAIT,
    OCR_CROSS,
    OCR_UP,
    OCR_SIZENWSE,
    OCR_SIZENESW,
    OCR_SIZEWE,
    OCR_SIZENS,
    OCR_SIZEALL,
    OCR_NO,
    OCR_HAND,
    OCR_APPSTARTING,
];

const BLANK_SIZE: i32 = 32;
/// AND mask all ones and XOR mask all zeros: every pixel transparent.
const AND_PLANE: [u8; 128] = [0xFF; 128];
const XOR_PLANE: [u8; 128] = [0x00; 128];

pub struct WindowsCursorWriter;

fn last_error(call: &str) -> PlatformError {
    PlatformError::Other(format!("{call} failed: {}", std::io::Error::last_os_error()))
}

impl CursorWriter for WindowsCursorWriter {
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), PlatformError> {
        if unsafe { SetCursorPos(x, y) } == 0 {
            return Err(last_error("SetCursorPos"));
        }
        Ok(())
    }

    fn set_hidden(&mut self, hidden: bool) -> Result<(), PlatformError> {
        if !hidden {
            if unsafe { SystemParametersInfoW(SPI_SETCURSORS, 0, ptr::null_mut(), 0) } == 0 {
                return Err(last_error("SystemParametersInfoW(SPI_SETCURSORS)"));
            }
            return Ok(());
        }

        let instance = unsafe { GetModuleHandleW(ptr::null()) };
        for id in SYSTEM_CURSORS {
            // SetSystemCursor takes ownership of the handle, so each id gets its own.
            let blank = unsafe {
                CreateCursor(
                    instance,
                    0,
                    0,
                    BLANK_SIZE,
                    BLANK_SIZE,
                    AND_PLANE.as_ptr().cast(),
                    XOR_PLANE.as_ptr().cast(),
                )
            };
            if blank.is_null() {
                return Err(last_error("CreateCursor"));
            }
            if unsafe { SetSystemCursor(blank, id) } == 0 {
                log::debug!("writer: SetSystemCursor({id}) failed");
            }
        }
        Ok(())
    }
}
