//! Device identity and bookkeeping.
//!
//! An OS handle (`DeviceHandle`) is opaque and backend-specific: the evdev
//! node number on Linux, the raw input `HANDLE` on Windows. Everything above
//! the platform layer keys devices by the derived `DeviceId` instead.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::Serialize;

/// Display name used when the OS reports nothing printable.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Opaque OS handle for a physical pointing device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable string identity derived from a `DeviceHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn from_handle(handle: DeviceHandle) -> Self {
        Self(format!("device_{handle}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Process-lifetime memo of handle → id.
///
/// A handle always resolves to the same id, even after the device has been
/// removed and re-plugged under the same handle.
#[derive(Debug, Default)]
pub struct DeviceIdentities {
    ids: HashMap<DeviceHandle, DeviceId>,
}

impl DeviceIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, handle: DeviceHandle) -> DeviceId {
        self.ids
            .entry(handle)
            .or_insert_with(|| DeviceId::from_handle(handle))
            .clone()
    }

    /// Reverse lookup used when enumeration reports a handle as gone.
    pub fn get(&self, handle: DeviceHandle) -> Option<&DeviceId> {
        self.ids.get(&handle)
    }
}

/// Keeps printable ASCII only, collapses whitespace runs and trims.
///
/// Device names arrive as raw OS strings (UTF-16 interface paths, HID product
/// strings) and may carry control bytes or padding.
pub fn sanitize_name(raw: &str) -> String {
    let printable: String = raw
        .chars()
        .filter(|c| (' '..='~').contains(c))
        .collect();
    let collapsed = printable.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        UNKNOWN_DEVICE_NAME.to_owned()
    } else {
        collapsed
    }
}

/// A tracked physical pointing device.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub handle: DeviceHandle,
    pub name: String,
    pub last_seen: Instant,
    pub connected: bool,
}

impl Device {
    pub fn new(id: DeviceId, handle: DeviceHandle, name: &str, now: Instant) -> Self {
        Self {
            id,
            handle,
            name: sanitize_name(name),
            last_seen: now,
            connected: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_derived_from_handle() {
        assert_eq!(DeviceId::from_handle(DeviceHandle(65539)).as_str(), "device_65539");
    }

    #[test]
    fn identities_are_memoized() {
        let mut ids = DeviceIdentities::new();
        let first = ids.resolve(DeviceHandle(7));
        let second = ids.resolve(DeviceHandle(7));
        assert_eq!(first, second);
        assert_ne!(first, ids.resolve(DeviceHandle(8)));
        assert_eq!(ids.get(DeviceHandle(7)), Some(&first));
        assert!(ids.get(DeviceHandle(9)).is_none());
    }

    #[test]
    fn sanitize_strips_control_and_non_ascii() {
        assert_eq!(sanitize_name("Logi\u{0}tech  \tMX\u{e9}\n Master "), "Logitech MX Master");
    }

    #[test]
    fn sanitize_falls_back_when_nothing_printable() {
        assert_eq!(sanitize_name("\u{1}\u{2}\u{e9}"), UNKNOWN_DEVICE_NAME);
        assert_eq!(sanitize_name("   "), UNKNOWN_DEVICE_NAME);
    }
}
