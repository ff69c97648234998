//! Fixed-capacity slot ring swept by a clock hand.
//!
//! Parallel key and cell slots of fixed capacity, plus the hand that names
//! the next slot the victim sweep will examine. Accessed entries carry a
//! reference bit that grants one second chance; pinned entries (pin count
//! above zero) are never chosen by the sweep itself.
//!
//! ## Victim sweep
//!
//! ```text
//!   find_victim()
//!        │
//!        ▼
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │ At the hand, for up to two full passes:                          │
//!   │   slot empty                → take it                            │
//!   │   unpinned and bit clear    → take it                            │
//!   │   otherwise                 → clear bit, advance                 │
//!   └──────────────────────────────────────────────────────────────────┘
//!        │ two passes exhausted (every slot pinned or just cleared)
//!        ▼
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │ Scan for any empty slot; failing that, force the slot the hand   │
//!   │ named at entry and warn. The forced slot may hold a pinned cell; │
//!   │ the caller must detach it rather than drop it.                   │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sweep clears the reference bit of pinned entries too; the pin, not
//! the bit, is what protects them.
//!
//! Occupancy changes go through [`SlotRing::install`] and
//! [`SlotRing::clear_slot`] so that a key and its cell always appear and
//! disappear together. The ring is not self-locking; the cache facade holds
//! the mutex around every call.

use std::sync::Arc;

use tracing::warn;

use crate::cell::ValueCell;
use crate::LOG_TARGET;

#[derive(Debug)]
pub struct SlotRing {
    keys: Vec<Option<Arc<str>>>,
    cells: Vec<Option<Arc<ValueCell>>>,
    hand: usize,
    len: usize,
}

impl SlotRing {
    /// Creates a ring with `capacity` empty slots. Capacity must be at least
    /// one; the builder validates this.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        let mut keys = Vec::with_capacity(capacity);
        keys.resize_with(capacity, || None);
        let mut cells = Vec::with_capacity(capacity);
        cells.resize_with(capacity, || None);
        Self {
            keys,
            cells,
            hand: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the slot the sweep will examine next.
    pub fn hand(&self) -> usize {
        self.hand
    }

    pub fn key(&self, slot: usize) -> Option<&Arc<str>> {
        self.keys.get(slot).and_then(Option::as_ref)
    }

    pub fn cell(&self, slot: usize) -> Option<&Arc<ValueCell>> {
        self.cells.get(slot).and_then(Option::as_ref)
    }

    /// Installs a key and its cell into an empty slot.
    pub fn install(&mut self, slot: usize, key: Arc<str>, cell: Arc<ValueCell>) {
        debug_assert!(self.keys[slot].is_none() && self.cells[slot].is_none());
        self.keys[slot] = Some(key);
        self.cells[slot] = Some(cell);
        self.len += 1;
    }

    /// Empties a slot, returning whatever key and cell occupied it.
    pub fn clear_slot(&mut self, slot: usize) -> (Option<Arc<str>>, Option<Arc<ValueCell>>) {
        let key = self.keys[slot].take();
        let cell = self.cells[slot].take();
        if key.is_some() {
            self.len -= 1;
        }
        (key, cell)
    }

    /// Runs the clock sweep and returns the slot to evict into.
    ///
    /// Two full passes suffice to clear every reference bit and find an
    /// unpinned idle entry. If both passes fail, any empty slot that
    /// appeared during the sweep is reclaimed; as a last resort the slot the
    /// hand named at entry is forced, which can hand the caller a pinned
    /// cell.
    pub fn find_victim(&mut self) -> usize {
        let start_hand = self.hand;
        let limit = self.capacity() * 2;
        let mut attempts = 0;

        while attempts < limit {
            let idx = self.hand;
            let Some(cell) = self.cells[idx].as_ref() else {
                self.advance_hand();
                return idx;
            };

            if cell.pin_count() == 0 && !cell.ref_bit() {
                self.advance_hand();
                return idx;
            }

            // Second chance spent; pinned entries lose the bit as well.
            cell.clear_ref_bit();
            self.advance_hand();
            attempts += 1;
        }

        if let Some(idx) = self.cells.iter().position(Option::is_none) {
            return idx;
        }

        warn!(
            target: LOG_TARGET,
            hand = start_hand,
            "no unpinned victim found; forcing eviction at the starting hand"
        );
        start_hand
    }

    /// Iterates over occupied slots as `(slot, key, cell)`.
    pub fn iter_occupied(&self) -> impl Iterator<Item = (usize, &Arc<str>, &Arc<ValueCell>)> {
        self.keys
            .iter()
            .zip(self.cells.iter())
            .enumerate()
            .filter_map(|(slot, (key, cell))| match (key, cell) {
                (Some(key), Some(cell)) => Some((slot, key, cell)),
                _ => None,
            })
    }

    fn advance_hand(&mut self) {
        self.hand = (self.hand + 1) % self.capacity();
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        assert!(self.hand < self.capacity());
        let occupied = self.keys.iter().filter(|key| key.is_some()).count();
        assert_eq!(self.len, occupied);

        for (slot, (key, cell)) in self.keys.iter().zip(self.cells.iter()).enumerate() {
            assert_eq!(
                key.is_some(),
                cell.is_some(),
                "slot {slot} has a key without a cell or vice versa"
            );
            if let Some(cell) = cell {
                assert_eq!(cell.home_slot(), Some(slot));
            }
        }
    }
}
