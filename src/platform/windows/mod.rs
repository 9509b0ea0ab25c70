//! Windows platform backend: Raw Input capture and enumeration,
//! `SetCursorPos` cursor writer.

mod capture;
mod enumerate;
mod writer;

use std::ptr;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::UI::Input::{GetRawInputDeviceInfoW, RIDI_DEVICENAME};
use windows_sys::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

use capture::WindowsCapture;
use enumerate::RawInputEnumerator;
use writer::WindowsCursorWriter;

use crate::device::UNKNOWN_DEVICE_NAME;
use crate::platform::{CursorWriter, DeviceEnumerator, InputCapture, PlatformError, ScreenSize};

/// Returns a `WindowsCapture` backed by Raw Input.
pub fn create_input_capture() -> Result<Box<dyn InputCapture>, PlatformError> {
    Ok(Box::new(WindowsCapture::new()))
}

pub fn create_device_enumerator() -> Result<Box<dyn DeviceEnumerator>, PlatformError> {
    Ok(Box::new(RawInputEnumerator))
}

pub fn create_cursor_writer() -> Result<Box<dyn CursorWriter>, PlatformError> {
    Ok(Box::new(WindowsCursorWriter))
}

/// Primary monitor size in physical pixels.
pub fn detect_screen() -> Option<ScreenSize> {
    let (w, h) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
    Some(ScreenSize {
        width: u32::try_from(w).ok().filter(|w| *w > 0)?,
        height: u32::try_from(h).ok().filter(|h| *h > 0)?,
    })
}

/// Device interface path of a raw input device, e.g. `\\?\HID#VID_046D&PID_C52B...`.
pub(crate) fn device_name(device: HANDLE) -> String {
    let mut len = 0u32;
    let status =
        unsafe { GetRawInputDeviceInfoW(device, RIDI_DEVICENAME, ptr::null_mut(), &mut len) };
    if status != 0 || len == 0 {
        return UNKNOWN_DEVICE_NAME.to_owned();
    }

    let mut buf = vec![0u16; len as usize];
    let copied =
        unsafe { GetRawInputDeviceInfoW(device, RIDI_DEVICENAME, buf.as_mut_ptr().cast(), &mut len) };
    if copied == u32::MAX || copied == 0 {
        return UNKNOWN_DEVICE_NAME.to_owned();
    }

    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}
