//! Snapshot enumeration of evdev pointers for the presence monitor.

use crate::platform::{DeviceEnumerator, EnumeratedDevice, PlatformError};

use super::open_pointers;

/// Lists pointers by opening `/dev/input/event*`. Each call reopens the
/// nodes, so it is run on a blocking worker.
pub struct EvdevEnumerator;

impl DeviceEnumerator for EvdevEnumerator {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, PlatformError> {
        let devices: Vec<EnumeratedDevice> = open_pointers()?
            .into_iter()
            .map(|node| EnumeratedDevice {
                handle: node.handle,
                name: node.name,
            })
            .collect();
        log::trace!("enumerate: {} pointer(s)", devices.len());
        Ok(devices)
    }
}
