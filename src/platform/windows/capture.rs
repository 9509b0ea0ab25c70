//! Windows pointer capture via Raw Input.
//!
//! `WindowsCapture` implements `InputCapture`. `start()` spawns a background
//! thread that creates a message-only window, registers it for mouse raw
//! input (usage page 1, usage 2) with `RIDEV_INPUTSINK | RIDEV_DEVNOTIFY`,
//! and drains its queue with `PeekMessageW` every 16 ms. `stop()` raises a
//! flag and joins the thread; the thread unregisters and destroys its window
//! on the way out.
//!
//! Each `WM_INPUT` carries the source device handle in its header, which is
//! what lets several mice be told apart. Absolute-mode reports (tablets,
//! remote desktop) are skipped. `WM_INPUT_DEVICE_CHANGE` becomes a
//! `DeviceChanged` notice.
//!
//! No special permissions are required.

use std::collections::HashMap;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use windows_sys::Win32::Foundation::{HANDLE, HWND, LPARAM, WPARAM};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::Input::{
    GetRawInputData, RegisterRawInputDevices, HRAWINPUT, RAWINPUT, RAWINPUTDEVICE,
    RAWINPUTHEADER, RIDEV_DEVNOTIFY, RIDEV_INPUTSINK, RIDEV_REMOVE, RID_INPUT, RIM_TYPEMOUSE,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, PeekMessageW,
    RegisterClassW, GIDC_ARRIVAL, GIDC_REMOVAL, HWND_MESSAGE, MSG, PM_REMOVE, WM_INPUT,
    WM_INPUT_DEVICE_CHANGE, WNDCLASSW,
};

use super::device_name;
use crate::device::DeviceHandle;
use crate::platform::{DeviceChange, InputCapture, PlatformError, PointerEvent};

const HID_USAGE_PAGE_GENERIC: u16 = 0x01;
const HID_USAGE_GENERIC_MOUSE: u16 = 0x02;
/// `RAWMOUSE::usFlags` bit for absolute coordinates.
const MOUSE_MOVE_ABSOLUTE: u16 = 0x01;
/// Pump cadence. Raw input queues up between drains, nothing is lost.
const PUMP_INTERVAL: Duration = Duration::from_millis(16);

type Callback = Box<dyn Fn(PointerEvent) + Send>;

// ---------------------------------------------------------------------------
// Public struct
// ---------------------------------------------------------------------------

/// Windows pointer capture backend using Raw Input.
pub struct WindowsCapture {
    /// Raised by `stop()`; the pump checks it between drains.
    stop: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<()>>,
}

impl WindowsCapture {
    pub fn new() -> Self {
        Self {
            stop: None,
            thread: None,
        }
    }
}

impl InputCapture for WindowsCapture {
    fn start(&mut self, callback: Callback) -> Result<(), PlatformError> {
        // The background thread reports whether registration succeeded.
        let (info_tx, info_rx) = mpsc::channel::<Result<(), PlatformError>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("raw-input".into())
            .spawn(move || {
                let hwnd = match create_sink_window() {
                    Ok(hwnd) => hwnd,
                    Err(e) => {
                        let _ = info_tx.send(Err(e));
                        return;
                    }
                };
                if !register_mice(hwnd, RIDEV_INPUTSINK | RIDEV_DEVNOTIFY) {
                    unsafe { DestroyWindow(hwnd) };
                    let _ = info_tx.send(Err(PlatformError::Other(
                        "RegisterRawInputDevices failed".into(),
                    )));
                    return;
                }

                let _ = info_tx.send(Ok(()));
                log::info!("capture: raw input active");

                let mut pump = Pump {
                    names: HashMap::new(),
                    callback,
                };

                while !stop_flag.load(Ordering::Acquire) {
                    pump.drain();
                    thread::sleep(PUMP_INTERVAL);
                }

                log::info!("capture: message pump exited");
                register_mice(ptr::null_mut(), RIDEV_REMOVE);
                unsafe { DestroyWindow(hwnd) };
            })?;

        match info_rx.recv() {
            Ok(Ok(())) => {
                self.stop = Some(stop);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(PlatformError::Other(
                "capture thread exited before reporting registration status".into(),
            )),
        }
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::Release);
        }
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        Ok(())
    }
}

impl Drop for WindowsCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------------
// Window and registration
// ---------------------------------------------------------------------------

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Creates the invisible message-only window raw input is delivered to.
fn create_sink_window() -> Result<HWND, PlatformError> {
    let class_name = wide("MultiCursorRawInputSink");
    unsafe {
        let instance = GetModuleHandleW(ptr::null());
        let class = WNDCLASSW {
            style: 0,
            lpfnWndProc: Some(DefWindowProcW),
            cbClsExtra: 0,
            cbWndExtra: 0,
            hInstance: instance,
            hIcon: ptr::null_mut(),
            hCursor: ptr::null_mut(),
            hbrBackground: ptr::null_mut(),
            lpszMenuName: ptr::null(),
            lpszClassName: class_name.as_ptr(),
        };
        // Fails harmlessly when a previous start already registered the class.
        RegisterClassW(&class);

        let hwnd = CreateWindowExW(
            0,
            class_name.as_ptr(),
            ptr::null(),
            0,
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            ptr::null_mut(),
            instance,
            ptr::null(),
        );
        if hwnd.is_null() {
            return Err(PlatformError::Other(format!(
                "CreateWindowExW failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(hwnd)
    }
}

fn register_mice(hwnd: HWND, flags: u32) -> bool {
    let device = RAWINPUTDEVICE {
        usUsagePage: HID_USAGE_PAGE_GENERIC,
        usUsage: HID_USAGE_GENERIC_MOUSE,
        dwFlags: flags,
        hwndTarget: hwnd,
    };
    unsafe { RegisterRawInputDevices(&device, 1, mem::size_of::<RAWINPUTDEVICE>() as u32) != 0 }
}

fn handle_of(device: HANDLE) -> DeviceHandle {
    DeviceHandle(device as usize as u64)
}

// ---------------------------------------------------------------------------
// Message handling
// ---------------------------------------------------------------------------

struct Pump {
    /// Device name cache; `GetRawInputDeviceInfoW` is too slow per report.
    names: HashMap<DeviceHandle, String>,
    callback: Callback,
}

impl Pump {
    /// Handles every queued message without blocking.
    fn drain(&mut self) {
        unsafe {
            let mut msg: MSG = mem::zeroed();
            while PeekMessageW(&mut msg, ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
                match msg.message {
                    WM_INPUT => self.on_input(msg.lParam),
                    WM_INPUT_DEVICE_CHANGE => self.on_device_change(msg.wParam, msg.lParam),
                    _ => {}
                }
                // WM_INPUT must reach DefWindowProcW to release its buffer.
                DispatchMessageW(&msg);
            }
        }
    }

    fn name_of(&mut self, device: HANDLE) -> String {
        self.names
            .entry(handle_of(device))
            .or_insert_with(|| device_name(device))
            .clone()
    }

    fn on_input(&mut self, lparam: LPARAM) {
        let mut raw: RAWINPUT = unsafe { mem::zeroed() };
        let mut size = mem::size_of::<RAWINPUT>() as u32;
        let read = unsafe {
            GetRawInputData(
                lparam as HRAWINPUT,
                RID_INPUT,
                &mut raw as *mut RAWINPUT as *mut _,
                &mut size,
                mem::size_of::<RAWINPUTHEADER>() as u32,
            )
        };
        if read == u32::MAX || read == 0 || raw.header.dwType != RIM_TYPEMOUSE {
            return;
        }

        let mouse = unsafe { raw.data.mouse };
        if mouse.usFlags & MOUSE_MOVE_ABSOLUTE != 0 {
            return;
        }
        let (dx, dy) = (mouse.lLastX, mouse.lLastY);
        if dx == 0 && dy == 0 {
            return;
        }

        let name = self.name_of(raw.header.hDevice);
        (self.callback)(PointerEvent::Motion {
            handle: handle_of(raw.header.hDevice),
            name,
            dx,
            dy,
        });
    }

    fn on_device_change(&mut self, wparam: WPARAM, lparam: LPARAM) {
        let device = lparam as HANDLE;
        let handle = handle_of(device);
        let change = match wparam as u32 {
            GIDC_ARRIVAL => DeviceChange::Added,
            GIDC_REMOVAL => DeviceChange::Removed,
            _ => return,
        };
        // Names can no longer be queried after removal.
        let name = match change {
            DeviceChange::Added => self.name_of(device),
            DeviceChange::Removed => self.names.remove(&handle).unwrap_or_default(),
        };
        log::debug!("capture: device {handle} {change:?}");
        (self.callback)(PointerEvent::DeviceChanged {
            handle,
            name,
            change,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_produces_idle_state() {
        let capture = WindowsCapture::new();
        assert!(capture.stop.is_none());
        assert!(capture.thread.is_none());
    }

    /// Stopping a capture that was never started must return Ok and not panic.
    #[test]
    fn stop_on_unstarted_capture_is_noop() {
        let mut capture = WindowsCapture::new();
        assert!(capture.stop().is_ok());
    }

    #[test]
    fn wide_strings_are_nul_terminated() {
        assert_eq!(wide("ab"), vec![u16::from(b'a'), u16::from(b'b'), 0]);
    }
}
