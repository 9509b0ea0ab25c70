//! Raw input device list snapshot for the presence monitor.

use std::mem;
use std::ptr;

use windows_sys::Win32::UI::Input::{GetRawInputDeviceList, RAWINPUTDEVICELIST, RIM_TYPEMOUSE};

use super::device_name;
use crate::device::DeviceHandle;
use crate::platform::{DeviceEnumerator, EnumeratedDevice, PlatformError};

pub struct RawInputEnumerator;

impl DeviceEnumerator for RawInputEnumerator {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, PlatformError> {
        let entry_size = mem::size_of::<RAWINPUTDEVICELIST>() as u32;

        let mut count = 0u32;
        if unsafe { GetRawInputDeviceList(ptr::null_mut(), &mut count, entry_size) } == u32::MAX {
            return Err(PlatformError::Other(format!(
                "GetRawInputDeviceList failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        // SAFETY: RAWINPUTDEVICELIST is plain data; all-zero is a valid value.
        let mut list: Vec<RAWINPUTDEVICELIST> = vec![unsafe { mem::zeroed() }; count as usize];
        let stored = unsafe { GetRawInputDeviceList(list.as_mut_ptr(), &mut count, entry_size) };
        if stored == u32::MAX {
            // The list grew between the two calls; the next check will catch up.
            return Err(PlatformError::Other("device list changed during enumeration".into()));
        }
        list.truncate(stored as usize);

        Ok(list
            .into_iter()
            .filter(|d| d.dwType == RIM_TYPEMOUSE)
            .map(|d| EnumeratedDevice {
                handle: DeviceHandle(d.hDevice as usize as u64),
                name: device_name(d.hDevice),
            })
            .collect())
    }
}
