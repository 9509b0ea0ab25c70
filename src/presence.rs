//! Device Presence Monitor.
//!
//! Raw-input capture reports arrivals but not reliably removals. The monitor
//! enumerates connected pointing devices on a slower interval and diffs the
//! result against the previously known set. Enumeration itself runs off the
//! engine thread; the monitor only decides *when* a check may start and
//! interprets the finished result.
//!
//! Failure of an enumeration (error or timeout) is "no change": the known set
//! is retained as-is. A check stays in flight until the worker has actually
//! returned, even after its result was reported as a timeout.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::DisconnectPolicy;
use crate::device::{DeviceHandle, DeviceId, DeviceIdentities};
use crate::platform::{EnumeratedDevice, PlatformError};
use crate::store::CursorStore;

/// Outcome of diffing one enumeration against the known set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub disconnected: Vec<EnumeratedDevice>,
    pub connected: Vec<EnumeratedDevice>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.disconnected.is_empty() && self.connected.is_empty()
    }
}

pub struct PresenceMonitor {
    known: BTreeMap<DeviceHandle, String>,
    /// False until the first successful enumeration filled `known`.
    baseline: bool,
    last_check: Option<Instant>,
    debounce: Duration,
    in_flight: bool,
}

impl PresenceMonitor {
    pub fn new(debounce: Duration) -> Self {
        Self {
            known: BTreeMap::new(),
            baseline: false,
            last_check: None,
            debounce,
            in_flight: false,
        }
    }

    /// Claims the right to start an enumeration at `now`.
    ///
    /// Refused while a previous enumeration is outstanding or when the last
    /// check started less than the debounce window ago.
    pub fn begin_check(&mut self, now: Instant) -> bool {
        if self.in_flight {
            log::trace!("presence: enumeration still outstanding, skipping");
            return false;
        }
        if let Some(last) = self.last_check {
            if now.saturating_duration_since(last) < self.debounce {
                return false;
            }
        }
        self.last_check = Some(now);
        self.in_flight = true;
        true
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// The enumeration worker has returned. A timed-out check stays
    /// outstanding until this is called, so a hung backend never has more
    /// than one blocking call running.
    pub fn finish_check(&mut self) {
        self.in_flight = false;
    }

    /// Consumes an enumeration result. A timeout arrives here as an `Err`.
    ///
    /// Devices present in the first successful result are all reported as
    /// connected; nothing can be disconnected before a baseline exists.
    pub fn reconcile(
        &mut self,
        result: Result<Vec<EnumeratedDevice>, PlatformError>,
    ) -> Reconciliation {
        let current = match result {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("presence: enumeration failed, keeping previous set: {e}");
                return Reconciliation::default();
            }
        };

        let current: BTreeMap<DeviceHandle, String> = current
            .into_iter()
            .map(|d| (d.handle, d.name))
            .collect();

        let outcome = Reconciliation {
            disconnected: diff(&self.known, &current),
            connected: diff(&current, &self.known),
        };

        if !self.baseline {
            log::info!("presence: baseline of {} device(s)", current.len());
            self.baseline = true;
        } else {
            for gone in &outcome.disconnected {
                log::info!("presence: device {} ({}) disconnected", gone.handle, gone.name);
            }
            for new in &outcome.connected {
                log::info!("presence: device {} ({}) connected", new.handle, new.name);
            }
        }

        self.known = current;
        outcome
    }

    /// True once an enumeration has succeeded.
    pub fn has_baseline(&self) -> bool {
        self.baseline
    }

    /// Whether the last successful enumeration listed `handle`.
    pub fn is_known(&self, handle: DeviceHandle) -> bool {
        self.known.contains_key(&handle)
    }

    pub fn known_handles(&self) -> impl Iterator<Item = DeviceHandle> + '_ {
        self.known.keys().copied()
    }
}

/// Entries of `left` whose handle is missing from `right`.
fn diff(
    left: &BTreeMap<DeviceHandle, String>,
    right: &BTreeMap<DeviceHandle, String>,
) -> Vec<EnumeratedDevice> {
    left.iter()
        .filter(|(handle, _)| !right.contains_key(handle))
        .map(|(handle, name)| EnumeratedDevice {
            handle: *handle,
            name: name.clone(),
        })
        .collect()
}

/// Removes the devices a reconciliation reported as gone, per `policy`.
///
/// Returns the ids actually removed from the store, in removal order. With
/// `InvalidateAll`, a single vanished device removes every tracked device.
pub fn apply_disconnects(
    policy: DisconnectPolicy,
    disconnected: &[EnumeratedDevice],
    identities: &DeviceIdentities,
    store: &mut CursorStore,
) -> Vec<DeviceId> {
    if disconnected.is_empty() {
        return Vec::new();
    }

    match policy {
        DisconnectPolicy::InvalidateAll => {
            let removed = store.remove_all();
            log::info!("presence: disconnect invalidated {} tracked device(s)", removed.len());
            removed
        }
        DisconnectPolicy::Precise => disconnected
            .iter()
            .filter_map(|gone| identities.get(gone.handle))
            .filter_map(|id| store.remove(id).map(|device| device.id))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
