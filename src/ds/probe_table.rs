//! Open-addressed key index mapping keys to slot positions.
//!
//! Linear probing with tombstones, prime-sized tables, and growth at 0.7
//! load. Keys are shared `Arc<str>` clones of the strings owned by the slot
//! ring, so the index never copies key bytes.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                          ProbeTable                              │
//!   │                                                                  │
//!   │   entries: Vec<ProbeSlot>   (prime length H)                     │
//!   │                                                                  │
//!   │    [0]        [1]        [2]        [3]        [4]    ...        │
//!   │   ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐         │
//!   │   │ Empty  │ │ "A"→2  │ │ Tomb   │ │ "C"→0  │ │ Empty  │         │
//!   │   └────────┘ └────────┘ └────────┘ └────────┘ └────────┘         │
//!   │                                                                  │
//!   │   lookup("C"): start at fnv1a("C") % H, walk right, skip         │
//!   │   tombstones, stop at Empty (miss) or matching key (hit)         │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operations
//!
//! | Operation | Description                                   | Complexity |
//! |-----------|-----------------------------------------------|------------|
//! | `lookup`  | Probe for a key, skipping tombstones          | O(1) avg   |
//! | `insert`  | Install or update, growing at 0.7 load        | O(1) amort |
//! | `erase`   | Convert the entry to a tombstone              | O(1) avg   |
//!
//! ## Notes
//! - Erasure never breaks probe chains: entries become tombstones, not Empty.
//! - Growth re-probes every occupied entry into a `next_prime(2·H)` table;
//!   if the allocation fails the old table is kept and lookups stay correct,
//!   the load bound is simply exceeded until a later insert retries.
//! - Probe walks are bounded by the table length, so a tombstone-saturated
//!   table terminates with a miss instead of spinning.
//! - `debug_validate_invariants()` is available in debug/test builds.

use std::sync::Arc;

use tracing::error;

use crate::LOG_TARGET;

/// FNV-1a over the key bytes, 32-bit state.
fn fnv1a(key: &str) -> u32 {
    let mut h = 2166136261u32;
    for byte in key.as_bytes() {
        h ^= u32::from(*byte);
        h = h.wrapping_mul(16777619);
    }
    h
}

/// Smallest prime `>= n`.
fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    loop {
        let mut prime = true;
        let mut i = 2usize;
        while i * i <= candidate {
            if candidate % i == 0 {
                prime = false;
                break;
            }
            i += 1;
        }
        if prime {
            return candidate;
        }
        candidate += 1;
    }
}

#[derive(Debug, Clone)]
enum ProbeSlot {
    Empty,
    Tombstone,
    Occupied { key: Arc<str>, slot: usize },
}

enum Placement {
    Fresh(usize),
    Existing(usize),
}

/// Open-addressed key→slot index with tombstone deletion.
#[derive(Debug)]
pub struct ProbeTable {
    entries: Vec<ProbeSlot>,
    used: usize,
}

impl ProbeTable {
    /// Creates an index sized for `slot_count` cache slots: the table starts
    /// at `next_prime(2 · slot_count)` entries.
    pub fn new(slot_count: usize) -> Self {
        let len = next_prime(slot_count.saturating_mul(2));
        let mut entries = Vec::with_capacity(len);
        entries.resize_with(len, || ProbeSlot::Empty);
        Self { entries, used: 0 }
    }

    /// Returns the table length (number of probe entries, occupied or not).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of occupied entries.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns `true` if no entry is occupied.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    fn bucket(&self, key: &str) -> usize {
        fnv1a(key) as usize % self.entries.len()
    }

    /// Probes for `key` and returns its slot position, if present.
    pub fn lookup(&self, key: &str) -> Option<usize> {
        let len = self.entries.len();
        let mut idx = self.bucket(key);
        for _ in 0..len {
            match &self.entries[idx] {
                ProbeSlot::Empty => return None,
                ProbeSlot::Occupied { key: k, slot } if k.as_ref() == key => return Some(*slot),
                _ => {}
            }
            idx = (idx + 1) % len;
        }
        None
    }

    /// Installs `key → slot`, growing first when the insert would reach 0.7
    /// load. An existing entry for the same key has its slot overwritten;
    /// `used` grows only on fresh insertion. The key is the `Arc` clone of
    /// the string owned by the slot ring.
    pub fn insert(&mut self, key: Arc<str>, slot: usize) {
        if (self.used + 1) * 10 >= self.entries.len() * 7 {
            self.grow();
        }

        let len = self.entries.len();
        let mut idx = self.bucket(&key);
        let mut tombstone = None;
        let mut placement = None;
        for _ in 0..len {
            match &self.entries[idx] {
                ProbeSlot::Empty => {
                    placement = Some(Placement::Fresh(tombstone.unwrap_or(idx)));
                    break;
                }
                ProbeSlot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(idx);
                    }
                }
                ProbeSlot::Occupied { key: k, .. } => {
                    if k.as_ref() == key.as_ref() {
                        placement = Some(Placement::Existing(idx));
                        break;
                    }
                }
            }
            idx = (idx + 1) % len;
        }

        match placement.or_else(|| tombstone.map(Placement::Fresh)) {
            Some(Placement::Fresh(at)) => {
                self.entries[at] = ProbeSlot::Occupied { key, slot };
                self.used += 1;
            }
            Some(Placement::Existing(at)) => {
                if let ProbeSlot::Occupied { slot: s, .. } = &mut self.entries[at] {
                    *s = slot;
                }
            }
            None => {
                // used <= slot_count < len keeps at least one non-occupied
                // entry in the table at all times.
                debug_assert!(false, "probe table has no free entry");
            }
        }
    }

    /// Erases `key` by converting its entry to a tombstone. Missing keys are
    /// a no-op.
    pub fn erase(&mut self, key: &str) {
        let len = self.entries.len();
        let mut idx = self.bucket(key);
        for _ in 0..len {
            match &self.entries[idx] {
                ProbeSlot::Empty => return,
                ProbeSlot::Occupied { key: k, .. } if k.as_ref() == key => {
                    self.entries[idx] = ProbeSlot::Tombstone;
                    self.used -= 1;
                    return;
                }
                _ => {}
            }
            idx = (idx + 1) % len;
        }
    }

    /// Iterates over occupied `(key, slot)` pairs in table order.
    pub fn iter_occupied(&self) -> impl Iterator<Item = (&Arc<str>, usize)> {
        self.entries.iter().filter_map(|entry| match entry {
            ProbeSlot::Occupied { key, slot } => Some((key, *slot)),
            _ => None,
        })
    }

    /// Grows to a `next_prime(2·H)` table and re-probes every occupied
    /// entry. Allocation failure keeps the old table.
    fn grow(&mut self) {
        let new_len = next_prime(self.entries.len().saturating_mul(2));
        let mut table = Vec::new();
        if table.try_reserve_exact(new_len).is_err() {
            error!(
                target: LOG_TARGET,
                new_len,
                old_len = self.entries.len(),
                "index growth allocation failed; keeping old table"
            );
            return;
        }
        table.resize_with(new_len, || ProbeSlot::Empty);

        let old = std::mem::replace(&mut self.entries, table);
        self.used = 0;
        for entry in old {
            if let ProbeSlot::Occupied { key, slot } = entry {
                let mut idx = fnv1a(&key) as usize % new_len;
                while matches!(self.entries[idx], ProbeSlot::Occupied { .. }) {
                    idx = (idx + 1) % new_len;
                }
                self.entries[idx] = ProbeSlot::Occupied { key, slot };
                self.used += 1;
            }
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        let occupied = self
            .entries
            .iter()
            .filter(|entry| matches!(entry, ProbeSlot::Occupied { .. }))
            .count();
        assert_eq!(self.used, occupied);

        let mut i = 2usize;
        let len = self.entries.len();
        let mut prime = len >= 2;
        while i * i <= len {
            if len % i == 0 {
                prime = false;
                break;
            }
            i += 1;
        }
        assert!(prime, "table length {len} is not prime");

        for entry in &self.entries {
            if let ProbeSlot::Occupied { key, slot } = entry {
                assert_eq!(self.lookup(key), Some(*slot), "entry unreachable by probe");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    mod hashing {
        use super::*;

        #[test]
        fn fnv1a_known_values() {
            // FNV-1a 32-bit reference vectors.
            assert_eq!(fnv1a(""), 2166136261);
            assert_eq!(fnv1a("a"), 0xe40c292c);
            assert_eq!(fnv1a("foobar"), 0xbf9cf968);
        }

        #[test]
        fn next_prime_steps_to_primes() {
            assert_eq!(next_prime(0), 2);
            assert_eq!(next_prime(2), 2);
            assert_eq!(next_prime(4), 5);
            assert_eq!(next_prime(8), 11);
            assert_eq!(next_prime(22), 23);
            assert_eq!(next_prime(24), 29);
        }
    }

    mod basic_operations {
        use super::*;

        #[test]
        fn new_table_is_prime_sized() {
            let table = ProbeTable::new(4);
            assert_eq!(table.len(), 11);
            assert_eq!(table.used(), 0);
            assert!(table.is_empty());
        }

        #[test]
        fn insert_and_lookup() {
            let mut table = ProbeTable::new(4);
            table.insert(key("a"), 0);
            table.insert(key("b"), 1);

            assert_eq!(table.lookup("a"), Some(0));
            assert_eq!(table.lookup("b"), Some(1));
            assert_eq!(table.lookup("c"), None);
            assert_eq!(table.used(), 2);
            table.debug_validate_invariants();
        }

        #[test]
        fn insert_same_key_overwrites_slot() {
            let mut table = ProbeTable::new(4);
            table.insert(key("a"), 0);
            table.insert(key("a"), 3);

            assert_eq!(table.lookup("a"), Some(3));
            assert_eq!(table.used(), 1);
            table.debug_validate_invariants();
        }

        #[test]
        fn erase_leaves_chain_intact() {
            let mut table = ProbeTable::new(4);
            table.insert(key("a"), 0);
            table.insert(key("b"), 1);
            table.insert(key("c"), 2);

            table.erase("b");
            assert_eq!(table.lookup("b"), None);
            assert_eq!(table.used(), 2);

            // Keys probed past the tombstone are still reachable.
            assert_eq!(table.lookup("a"), Some(0));
            assert_eq!(table.lookup("c"), Some(2));
            table.debug_validate_invariants();
        }

        #[test]
        fn erase_missing_key_is_noop() {
            let mut table = ProbeTable::new(4);
            table.insert(key("a"), 0);
            table.erase("zzz");
            assert_eq!(table.used(), 1);
            assert_eq!(table.lookup("a"), Some(0));
        }

        #[test]
        fn tombstone_is_reused_by_insert() {
            let mut table = ProbeTable::new(4);
            table.insert(key("a"), 0);
            table.erase("a");
            table.insert(key("a"), 2);

            assert_eq!(table.lookup("a"), Some(2));
            assert_eq!(table.used(), 1);
            table.debug_validate_invariants();
        }
    }

    mod growth {
        use super::*;

        #[test]
        fn growth_triggers_at_load_bound() {
            // slot_count 2 -> table length 5; the fourth fresh insert is the
            // first to satisfy (used + 1) * 10 >= len * 7.
            let mut table = ProbeTable::new(2);
            assert_eq!(table.len(), 5);

            table.insert(key("k0"), 0);
            table.insert(key("k1"), 1);
            table.insert(key("k2"), 2);
            assert_eq!(table.len(), 5);

            table.insert(key("k3"), 3);
            assert_eq!(table.len(), 11);
            assert_eq!(table.used(), 4);
            table.debug_validate_invariants();
        }

        #[test]
        fn growth_preserves_every_mapping() {
            let mut table = ProbeTable::new(2);
            for i in 0..24usize {
                table.insert(Arc::from(format!("key-{i:02}")), i);
            }

            assert!(table.len() > 11, "expected repeated growth");
            for i in 0..24usize {
                assert_eq!(table.lookup(&format!("key-{i:02}")), Some(i));
            }
            assert_eq!(table.used(), 24);
            table.debug_validate_invariants();
        }

        #[test]
        fn growth_drops_tombstones() {
            let mut table = ProbeTable::new(2);
            table.insert(key("a"), 0);
            table.insert(key("b"), 1);
            table.erase("a");
            table.insert(key("c"), 2);
            table.insert(key("d"), 3);
            // Forces a grow; the migrated table holds only occupied entries.
            table.insert(key("e"), 4);

            assert_eq!(table.lookup("a"), None);
            for (k, slot) in [("b", 1), ("c", 2), ("d", 3), ("e", 4)] {
                assert_eq!(table.lookup(k), Some(slot));
            }
            table.debug_validate_invariants();
        }

        #[test]
        fn lookup_terminates_on_tombstone_churn() {
            // Erase/insert cycles accumulate tombstones without raising
            // `used`; a missing key must still terminate.
            let mut table = ProbeTable::new(2);
            for i in 0..100usize {
                let k = format!("cycle-{i}");
                table.insert(Arc::from(k.as_str()), i % 2);
                table.erase(&k);
            }
            assert_eq!(table.lookup("never-inserted"), None);
            assert_eq!(table.used(), 0);
            table.debug_validate_invariants();
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashMap;

        const KEYS: [&str; 12] = [
            "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
            "juliet", "kilo", "lima",
        ];

        proptest! {
            /// Property: the table agrees with a model map after any
            /// sequence of insert/erase/lookup operations.
            #[cfg_attr(miri, ignore)]
            #[test]
            fn prop_matches_model_map(
                ops in prop::collection::vec((0u8..3, 0usize..12, 0usize..64), 0..200)
            ) {
                let mut table = ProbeTable::new(2);
                let mut model: HashMap<&str, usize> = HashMap::new();

                for (op, key_idx, slot) in ops {
                    let k = KEYS[key_idx];
                    match op % 3 {
                        0 => {
                            table.insert(Arc::from(k), slot);
                            model.insert(k, slot);
                        }
                        1 => {
                            table.erase(k);
                            model.remove(k);
                        }
                        2 => {
                            prop_assert_eq!(table.lookup(k), model.get(k).copied());
                        }
                        _ => unreachable!(),
                    }

                    table.debug_validate_invariants();
                }

                prop_assert_eq!(table.used(), model.len());
                for (k, slot) in &model {
                    prop_assert_eq!(table.lookup(k), Some(*slot));
                }
            }

            /// Property: growth never loses or remaps a key.
            #[cfg_attr(miri, ignore)]
            #[test]
            fn prop_growth_preserves_mapping(count in 1usize..60) {
                let mut table = ProbeTable::new(1);
                for i in 0..count {
                    table.insert(Arc::from(format!("g{i}")), i);
                }
                for i in 0..count {
                    prop_assert_eq!(table.lookup(&format!("g{i}")), Some(i));
                }
                prop_assert_eq!(table.used(), count);
            }
        }
    }
}
