//! evdev pointer devices.
//!
//! A device counts as a pointer when it reports both `REL_X` and `REL_Y`.
//! That admits mice, trackballs and touchpads in relative mode, and keeps
//! keyboards, tablets (absolute axes) and joysticks out. The device handle
//! is the event node number: `/dev/input/event7` is handle 7.

mod capture;
mod enumerate;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use evdev::{Device, RelativeAxisType};

use crate::device::{DeviceHandle, UNKNOWN_DEVICE_NAME};
use crate::platform::PlatformError;

pub use capture::LinuxEvdevCapture;
pub use enumerate::EvdevEnumerator;

const INPUT_DIR: &str = "/dev/input";

/// An opened pointer device.
pub(super) struct PointerNode {
    pub path: PathBuf,
    pub handle: DeviceHandle,
    pub name: String,
    pub device: Device,
}

fn is_pointer(device: &Device) -> bool {
    device.supported_relative_axes().is_some_and(|axes| {
        axes.contains(RelativeAxisType::REL_X) && axes.contains(RelativeAxisType::REL_Y)
    })
}

/// `/dev/input/event12` → 12. `None` for anything that is not an event node.
fn node_number(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("event")?
        .parse()
        .ok()
}

/// Number of event nodes present, readable or not.
fn count_event_nodes() -> io::Result<usize> {
    Ok(fs::read_dir(INPUT_DIR)?
        .filter_map(Result::ok)
        .filter(|entry| node_number(&entry.path()).is_some())
        .count())
}

/// Opens every pointer device currently present.
///
/// `evdev::enumerate()` silently skips nodes it cannot open, so an empty
/// result next to existing event nodes means the user lacks access.
pub(super) fn open_pointers() -> Result<Vec<PointerNode>, PlatformError> {
    let mut opened = 0usize;
    let mut pointers = Vec::new();

    for (path, device) in evdev::enumerate() {
        opened += 1;
        let Some(number) = node_number(&path) else {
            continue;
        };
        if !is_pointer(&device) {
            continue;
        }
        let name = device.name().unwrap_or(UNKNOWN_DEVICE_NAME).to_owned();
        pointers.push(PointerNode {
            path,
            handle: DeviceHandle(number),
            name,
            device,
        });
    }

    if opened == 0 && count_event_nodes().unwrap_or(0) > 0 {
        return Err(PlatformError::PermissionDenied(
            "Cannot open any device in /dev/input/. \
             Ensure this user is in the 'input' group: \
             sudo usermod -aG input $USER (then log out and back in)."
                .into(),
        ));
    }

    Ok(pointers)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_number_parses_event_nodes() {
        assert_eq!(node_number(Path::new("/dev/input/event0")), Some(0));
        assert_eq!(node_number(Path::new("/dev/input/event17")), Some(17));
    }

    #[test]
    fn node_number_rejects_other_nodes() {
        assert_eq!(node_number(Path::new("/dev/input/mice")), None);
        assert_eq!(node_number(Path::new("/dev/input/mouse0")), None);
        assert_eq!(node_number(Path::new("/dev/input/eventX")), None);
    }
}
