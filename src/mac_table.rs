use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::packet::MacAddr;

/// Identifies a connected switch for the lifetime of its session. Assigned
/// by the device (its datapath id) and reported in the features-reply.
pub type DatapathId = u64;

#[derive(Debug, Copy, Clone)]
struct MacEntry {
    port: u32,
    last_seen: u64,
}

/// Per-device MAC-address-to-port learning table.
///
/// Partitioned by datapath id so sessions for different devices do not
/// contend; access for a single device is linearizable through the map's
/// per-entry locking. A later observation always overwrites an earlier one;
/// entries are never aged out, only dropped wholesale when the device
/// disconnects.
#[derive(Debug, Default)]
pub struct MacTable {
    hosts: DashMap<DatapathId, HashMap<MacAddr, MacEntry>>,
    clock: AtomicU64,
}

impl MacTable {
    pub fn new() -> MacTable {
        MacTable::default()
    }

    /// Record that `mac` was seen on `port` of switch `sw`, overwriting any
    /// previous mapping.
    pub fn learn(&self, sw: DatapathId, mac: MacAddr, port: u32) {
        let last_seen = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut hosts = self.hosts.entry(sw).or_default();
        if let Some(prev) = hosts.insert(mac, MacEntry { port, last_seen }) {
            if prev.port != port {
                debug!(dpid = sw, mac = %mac, from = prev.port, to = port, "station moved");
            }
        }
    }

    /// Egress port for `mac` on switch `sw`; `None` means flood.
    pub fn lookup(&self, sw: DatapathId, mac: MacAddr) -> Option<u32> {
        self.hosts.get(&sw)?.get(&mac).map(|entry| entry.port)
    }

    /// Drop every mapping learned for switch `sw`. Called when its session
    /// closes.
    pub fn forget(&self, sw: DatapathId) {
        if let Some((_, hosts)) = self.hosts.remove(&sw) {
            debug!(dpid = sw, entries = hosts.len(), "forgot device");
        }
    }

    /// Logical time at which `mac` was last observed on switch `sw`. Later
    /// observations anywhere in the table get larger values.
    pub fn last_seen(&self, sw: DatapathId, mac: MacAddr) -> Option<u64> {
        self.hosts.get(&sw)?.get(&mac).map(|entry| entry.last_seen)
    }

    /// Number of addresses currently known for switch `sw`.
    pub fn len(&self, sw: DatapathId) -> usize {
        self.hosts.get(&sw).map_or(0, |hosts| hosts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xaa]);
    const B: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xbb]);

    #[test]
    fn later_observation_overwrites() {
        let table = MacTable::new();
        table.learn(1, A, 1);
        table.learn(1, A, 2);
        assert_eq!(table.lookup(1, A), Some(2));
        assert_eq!(table.len(1), 1);
    }

    #[test]
    fn devices_are_isolated() {
        let table = MacTable::new();
        table.learn(1, A, 4);
        assert_eq!(table.lookup(2, A), None);
        assert_eq!(table.lookup(1, A), Some(4));
    }

    #[test]
    fn unknown_address_floods() {
        let table = MacTable::new();
        table.learn(1, A, 1);
        assert_eq!(table.lookup(1, B), None);
    }

    #[test]
    fn forget_clears_device_only() {
        let table = MacTable::new();
        table.learn(1, A, 1);
        table.learn(1, B, 2);
        table.learn(2, A, 3);
        table.forget(1);
        assert_eq!(table.lookup(1, A), None);
        assert_eq!(table.lookup(1, B), None);
        assert_eq!(table.lookup(2, A), Some(3));
    }

    #[test]
    fn relearning_refreshes_last_seen() {
        let table = MacTable::new();
        table.learn(1, A, 1);
        table.learn(1, B, 2);
        let first = table.last_seen(1, A).unwrap();
        table.learn(1, A, 1);
        assert!(table.last_seen(1, A).unwrap() > first);
        assert!(table.last_seen(1, A).unwrap() > table.last_seen(1, B).unwrap());
    }

    #[test]
    fn forget_unknown_device_is_noop() {
        let table = MacTable::new();
        table.forget(9);
        assert_eq!(table.len(9), 0);
    }
}
