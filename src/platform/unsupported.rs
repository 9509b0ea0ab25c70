//! Fallback for targets without a backend.
//!
//! Capture and enumeration construct fine and fail with `Unavailable` when
//! used, so the engine still starts and renders nothing. There is no writer.

use crate::platform::{
    CursorWriter, DeviceEnumerator, EnumeratedDevice, InputCapture, PlatformError, PointerEvent,
    ScreenSize,
};

fn unavailable() -> PlatformError {
    PlatformError::Unavailable(format!(
        "no pointer backend for {}",
        std::env::consts::OS
    ))
}

struct NoCapture;

impl InputCapture for NoCapture {
    fn start(&mut self, _callback: Box<dyn Fn(PointerEvent) + Send>) -> Result<(), PlatformError> {
        Err(unavailable())
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }
}

struct NoEnumerator;

impl DeviceEnumerator for NoEnumerator {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, PlatformError> {
        Err(unavailable())
    }
}

pub fn create_input_capture() -> Result<Box<dyn InputCapture>, PlatformError> {
    Ok(Box::new(NoCapture))
}

pub fn create_device_enumerator() -> Result<Box<dyn DeviceEnumerator>, PlatformError> {
    Ok(Box::new(NoEnumerator))
}

pub fn create_cursor_writer() -> Result<Box<dyn CursorWriter>, PlatformError> {
    Err(unavailable())
}

pub fn detect_screen() -> Option<ScreenSize> {
    None
}
