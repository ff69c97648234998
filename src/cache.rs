//! Thread-safe cache facade over the slot ring and key index.
//!
//! One `parking_lot::Mutex` guards the whole core; every public operation
//! acquires it on entry and releases it on every exit path, including the
//! allocation-failure path of a miss. Victim search, retirement, admission,
//! index maintenance, and all cell-state changes happen only under the lock.
//!
//! `access` returns a pinned [`ValueHandle`] on both hits and misses;
//! [`release`](ClockCache::release) gives the pin back. A cell evicted while
//! pinned is detached from its slot and survives until its last holder
//! releases it, so handle payloads stay readable across evictions.
//!
//! ## Example Usage
//!
//! ```
//! use clockpin::cache::ClockCache;
//!
//! let cache = ClockCache::try_new(4).unwrap();
//!
//! // Miss admits the value and returns a pinned handle.
//! let a = cache.access("a", &[1, 0, 0, 0]).unwrap();
//! assert_eq!(&*a, &[1, 0, 0, 0]);
//! cache.release(a);
//!
//! // Hit returns the stored bytes; the new value argument is ignored.
//! let again = cache.access("a", &[9, 9, 9, 9]).unwrap();
//! assert_eq!(&*again, &[1, 0, 0, 0]);
//! cache.release(again);
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::builder::CacheBuilder;
use crate::cell::{ValueCell, ValueFree, ValueHandle};
use crate::ds::ProbeTable;
use crate::error::{ConfigError, InvariantError};
use crate::ring::SlotRing;
use crate::LOG_TARGET;

/// Snapshot of cache activity counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Accesses that found their key resident.
    pub hits: u64,
    /// Accesses that had to admit the value.
    pub misses: u64,
    /// Values copied in and installed into a slot.
    pub admissions: u64,
    /// Occupied slots retired to make room.
    pub evictions: u64,
    /// Evictions whose cell was still pinned and had to be detached.
    pub detached_evictions: u64,
}

struct Core {
    ring: SlotRing,
    index: ProbeTable,
    value_free: Arc<ValueFree>,
    stats: CacheStats,
}

impl Core {
    fn lookup_cell(&self, key: &str) -> Option<(usize, Arc<ValueCell>)> {
        let slot = self.index.lookup(key)?;
        self.ring.cell(slot).cloned().map(|cell| (slot, cell))
    }

    /// Retires a slot: the key leaves the index, and the cell is either
    /// dropped (no pins, payload dies here under the lock) or detached to
    /// live on through its holders.
    fn retire(&mut self, slot: usize) {
        let (key, cell) = self.ring.clear_slot(slot);
        if let Some(key) = key {
            self.index.erase(&key);
        }
        if let Some(cell) = cell {
            self.stats.evictions += 1;
            if cell.pin_count() == 0 {
                // Sole reference; the payload is freed right here.
                drop(cell);
            } else {
                cell.detach();
                self.stats.detached_evictions += 1;
            }
        }
    }

    /// Admits a value at a freshly retired slot. The payload copy is the one
    /// allocation that may fail; it happens before any structure is touched,
    /// so failure leaves nothing to roll back.
    fn admit(&mut self, slot: usize, key: &str, value: &[u8]) -> Option<Arc<ValueCell>> {
        let mut payload = Vec::new();
        if payload.try_reserve_exact(value.len()).is_err() {
            error!(
                target: LOG_TARGET,
                key,
                bytes = value.len(),
                "payload allocation failed; value not admitted"
            );
            return None;
        }
        payload.extend_from_slice(value);

        let key: Arc<str> = Arc::from(key);
        let cell = Arc::new(ValueCell::new(
            payload.into_boxed_slice(),
            slot,
            Arc::clone(&self.value_free),
        ));
        self.ring.install(slot, Arc::clone(&key), Arc::clone(&cell));
        self.index.insert(key, slot);
        self.stats.admissions += 1;
        Some(cell)
    }

    fn state_line(&self) -> String {
        let mut slots = String::new();
        for (slot, key, cell) in self.ring.iter_occupied() {
            let _ = write!(
                slots,
                "[{slot}: {key}, ref={}, bit={}] ",
                cell.pin_count(),
                u8::from(cell.ref_bit())
            );
        }
        let line = format!("cache state (hand={}): {}", self.ring.hand(), slots);
        line.trim_end().to_string()
    }
}

/// Fixed-capacity, thread-safe cache with clock eviction and in-use pinning.
///
/// Capacity is fixed at creation; only the internal key index grows. Shared
/// references to the cache can be used from any number of threads.
pub struct ClockCache {
    core: Mutex<Core>,
    capacity: usize,
}

impl ClockCache {
    /// Creates a cache with `capacity` slots and the default value-free
    /// hook. Zero capacity is rejected.
    ///
    /// Use [`CacheBuilder`] to supply a custom value-free hook.
    pub fn try_new(capacity: usize) -> Result<Self, ConfigError> {
        CacheBuilder::new(capacity).try_build()
    }

    pub(crate) fn with_parts(capacity: usize, value_free: Arc<ValueFree>) -> Self {
        Self {
            core: Mutex::new(Core {
                ring: SlotRing::new(capacity),
                index: ProbeTable::new(capacity),
                value_free,
                stats: CacheStats::default(),
            }),
            capacity,
        }
    }

    /// Looks up `key`, admitting `value` on a miss, and returns a pinned
    /// handle to the cached bytes.
    ///
    /// On a hit the stored payload is returned unchanged — `value` is only
    /// consulted when the key is absent. On a miss the clock sweep picks a
    /// victim, the victim is retired, and a copy of `value` is installed.
    /// Returns `None` only when the payload copy cannot be allocated; the
    /// victim is already retired by then, so the cache may end up one slot
    /// emptier.
    ///
    /// Every returned handle must eventually be passed to
    /// [`release`](Self::release).
    pub fn access(&self, key: &str, value: &[u8]) -> Option<ValueHandle> {
        let mut core = self.core.lock();

        if let Some((slot, cell)) = core.lookup_cell(key) {
            cell.acquire();
            cell.set_ref_bit();
            core.stats.hits += 1;
            debug!(target: LOG_TARGET, key, slot, pins = cell.pin_count(), "cache hit");
            trace!(target: LOG_TARGET, "{}", core.state_line());
            return Some(ValueHandle::new(cell));
        }

        core.stats.misses += 1;
        let victim = core.ring.find_victim();
        core.retire(victim);
        let cell = core.admit(victim, key, value)?;
        debug!(target: LOG_TARGET, key, slot = victim, "cache miss; value admitted");
        trace!(target: LOG_TARGET, "{}", core.state_line());
        Some(ValueHandle::new(cell))
    }

    /// Returns the pin held by `handle`.
    ///
    /// If this was the last pin on a cell that has already been evicted, the
    /// payload dies inside the same critical section as the decrement.
    pub fn release(&self, handle: ValueHandle) {
        let guard = self.core.lock();
        let cell = handle.into_cell();
        let remaining = cell.release_pin();
        if remaining == 0 && !cell.is_resident() {
            // Last pin on a detached cell: dropping this reference frees the
            // payload before the lock is given back.
            drop(cell);
        }
        drop(guard);
    }

    /// Returns `true` if `key` is currently resident. Does not touch the
    /// reference bit or the pin count.
    pub fn contains(&self, key: &str) -> bool {
        self.core.lock().index.lookup(key).is_some()
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.core.lock().ring.len()
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a snapshot of the activity counters.
    pub fn stats(&self) -> CacheStats {
        self.core.lock().stats
    }

    /// Formats the occupied slots as `[slot: key, ref=R, bit=B]` together
    /// with the current hand position.
    pub fn state_string(&self) -> String {
        self.core.lock().state_line()
    }

    /// Logs the current cache state.
    pub fn print_state(&self) {
        info!(target: LOG_TARGET, "{}", self.state_string());
    }

    /// Verifies that the slot ring, the key index, and the resident cells
    /// agree with each other.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let core = self.core.lock();

        for (slot, key, cell) in core.ring.iter_occupied() {
            if core.index.lookup(key) != Some(slot) {
                return Err(InvariantError::new(format!(
                    "slot {slot} key {key:?} is not indexed back to its slot"
                )));
            }
            if cell.home_slot() != Some(slot) {
                return Err(InvariantError::new(format!(
                    "cell in slot {slot} believes its home is {:?}",
                    cell.home_slot()
                )));
            }
        }

        let mut indexed = 0usize;
        for (key, slot) in core.index.iter_occupied() {
            indexed += 1;
            match core.ring.key(slot) {
                Some(resident) if resident.as_ref() == key.as_ref() => {}
                other => {
                    return Err(InvariantError::new(format!(
                        "index maps {key:?} to slot {slot}, which holds {other:?}"
                    )));
                }
            }
        }
        if indexed != core.index.used() {
            return Err(InvariantError::new(format!(
                "index used() is {} but {} entries are occupied",
                core.index.used(),
                indexed
            )));
        }
        if indexed != core.ring.len() {
            return Err(InvariantError::new(format!(
                "index holds {} entries but {} slots are occupied",
                indexed,
                core.ring.len()
            )));
        }

        Ok(())
    }
}

impl Drop for ClockCache {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        for (slot, key, cell) in core.ring.iter_occupied() {
            if cell.pin_count() > 0 {
                warn!(
                    target: LOG_TARGET,
                    slot,
                    key = key.as_ref(),
                    pins = cell.pin_count(),
                    "cache dropped while value is still held; payload lives until its holders drop"
                );
            }
        }
    }
}

impl std::fmt::Debug for ClockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
