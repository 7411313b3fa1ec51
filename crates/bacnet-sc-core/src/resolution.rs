//! VMAC-to-URL address resolution table.
//!
//! Fed by `ADDRESS_RESOLUTION_ACK` frames and result-NAKs for `ADDRESS_RESOLUTION`. Each
//! entry tracks its own freshness timer so stale URL lists get re-resolved instead of
//! being trusted forever.
use crate::ids::{Vmac, MAX_WSURL_LEN};
use crate::time::{LocalDuration, LocalTime, MsTimer};

/// Maximum number of URLs an [`AddressResolutionEntry`] stores for one peer.
pub const MAX_URLS_PER_ENTRY: usize = 4;

/// Default capacity of the resolution table (`MAX_DIRECT_CONNECTIONS`).
pub const MAX_DIRECT_CONNECTIONS: usize = 32;

/// Per-peer resolved route.
#[derive(Debug, Clone)]
pub struct AddressResolutionEntry {
    pub vmac: Vmac,
    pub urls: Vec<String>,
    pub(crate) fresh_timer: MsTimer,
}

impl AddressResolutionEntry {
    fn new(vmac: Vmac) -> Self {
        Self {
            vmac,
            urls: Vec::new(),
            fresh_timer: MsTimer::new(),
        }
    }

    fn is_fresh(&self, now: LocalTime) -> bool {
        self.fresh_timer.is_armed() && !self.fresh_timer.expired(now)
    }
}

/// Split a `payload[i] == b' '` delimited UTF-8 byte buffer into tokens.
fn split_url_list(payload: &[u8]) -> Vec<&[u8]> {
    let mut tokens = Vec::new();
    let mut start = 0usize;

    for i in 0..=payload.len() {
        let at_boundary = i == payload.len() || payload[i] == b' ';
        if at_boundary {
            if i > start {
                tokens.push(&payload[start..i]);
            }
            start = i + 1;
        }
    }

    tokens
}

/// Table of address-resolution entries, one per known VMAC, capacity
/// `MAX_DIRECT_CONNECTIONS`.
#[derive(Debug)]
pub struct AddressResolutionTable {
    entries: Vec<AddressResolutionEntry>,
    capacity: usize,
    freshness_ttl: LocalDuration,
}

impl AddressResolutionTable {
    pub fn new(capacity: usize, freshness_ttl: LocalDuration) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            freshness_ttl,
        }
    }

    /// Return the live (non-expired) entry for `vmac`, if any.
    pub fn get(&self, vmac: Vmac, now: LocalTime) -> Option<&AddressResolutionEntry> {
        self.entries
            .iter()
            .find(|e| e.vmac == vmac && e.is_fresh(now))
    }

    /// Find the entry for `vmac`, or allocate a new one if the table isn't full.
    ///
    /// Invariant: at most one entry per VMAC.
    fn locate_or_allocate(&mut self, vmac: Vmac) -> Option<&mut AddressResolutionEntry> {
        if let Some(idx) = self.entries.iter().position(|e| e.vmac == vmac) {
            return self.entries.get_mut(idx);
        }
        if self.entries.len() >= self.capacity {
            return None;
        }
        self.entries.push(AddressResolutionEntry::new(vmac));
        self.entries.last_mut()
    }

    /// Apply a resolution NAK: clear the peer's routes and reset its freshness timer.
    pub fn apply_nak(&mut self, origin: Vmac, now: LocalTime) {
        if let Some(entry) = self.locate_or_allocate(origin) {
            entry.urls.clear();
            entry.fresh_timer.arm(now, self.freshness_ttl);
        }
    }

    /// Apply an `ADDRESS_RESOLUTION_ACK` payload: parse the URL list, bound each token by
    /// `MAX_WSURL_LEN` and the entry's [`MAX_URLS_PER_ENTRY`] capacity, and reset the
    /// freshness timer.
    pub fn apply_ack(&mut self, origin: Vmac, payload: &[u8], now: LocalTime) {
        let freshness_ttl = self.freshness_ttl;
        let Some(entry) = self.locate_or_allocate(origin) else {
            return;
        };

        entry.urls.clear();
        for token in split_url_list(payload) {
            if entry.urls.len() >= MAX_URLS_PER_ENTRY {
                break;
            }
            if token.is_empty() || token.len() > MAX_WSURL_LEN {
                continue;
            }
            let Ok(url) = std::str::from_utf8(token) else {
                continue;
            };
            entry.urls.push(url.to_string());
        }
        entry.fresh_timer.arm(now, freshness_ttl);
    }

    /// Drop entries whose freshness timer has expired.
    pub fn expire(&mut self, now: LocalTime) {
        self.entries.retain(|e| e.is_fresh(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_url_list_splits_on_space_byte() {
        let payload = b"wss://me:9999/a wss://me:9999/b";
        let tokens: Vec<&str> = split_url_list(payload)
            .into_iter()
            .map(|t| std::str::from_utf8(t).unwrap())
            .collect();
        assert_eq!(tokens, vec!["wss://me:9999/a", "wss://me:9999/b"]);
    }

    #[test]
    fn split_url_list_collapses_repeated_spaces() {
        let payload = b"a  b   c";
        let tokens: Vec<&str> = split_url_list(payload)
            .into_iter()
            .map(|t| std::str::from_utf8(t).unwrap())
            .collect();
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }

    #[test]
    fn ack_populates_entry_and_resets_freshness() {
        let mut table = AddressResolutionTable::new(4, LocalDuration::from_secs(60));
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        let now = LocalTime::from_millis(1_000);

        table.apply_ack(vmac, b"wss://me:9999/a wss://me:9999/b", now);

        let entry = table.get(vmac, now).expect("entry present");
        assert_eq!(entry.urls, vec!["wss://me:9999/a", "wss://me:9999/b"]);
    }

    #[test]
    fn nak_clears_routes_without_removing_entry() {
        let mut table = AddressResolutionTable::new(4, LocalDuration::from_secs(60));
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        let now = LocalTime::from_millis(1_000);

        table.apply_ack(vmac, b"wss://me:9999/a", now);
        table.apply_nak(vmac, now);

        let entry = table.get(vmac, now).expect("entry present");
        assert!(entry.urls.is_empty());
    }

    #[test]
    fn at_most_one_entry_per_vmac() {
        let mut table = AddressResolutionTable::new(4, LocalDuration::from_secs(60));
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        let now = LocalTime::from_millis(0);

        table.apply_ack(vmac, b"wss://a", now);
        table.apply_ack(vmac, b"wss://b", now);

        assert_eq!(table.entries.iter().filter(|e| e.vmac == vmac).count(), 1);
    }

    #[test]
    fn expire_drops_stale_entries() {
        let mut table = AddressResolutionTable::new(4, LocalDuration::from_millis(100));
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        let t0 = LocalTime::from_millis(0);

        table.apply_ack(vmac, b"wss://a", t0);
        assert!(table.get(vmac, LocalTime::from_millis(50)).is_some());

        table.expire(LocalTime::from_millis(200));
        assert!(table.get(vmac, LocalTime::from_millis(200)).is_none());
    }
}
