//! Pinned value cells and the handles that hold them.
//!
//! A [`ValueCell`] owns one cached payload together with its pin count, its
//! reference bit, and the slot it currently occupies. Cells are shared as
//! `Arc<ValueCell>`: the slot ring holds the owning reference, and every
//! [`ValueHandle`] returned by `access` holds one shared reference plus one
//! pin. A cell evicted while pinned is detached from its slot and lives on
//! until the last holder releases it; the payload is handed to the cache's
//! value-free hook exactly once, when the final reference drops.
//!
//! All mutation of cell state happens under the cache mutex. The fields are
//! atomics only so that holders on other threads can read advisory state
//! (pin count, residency) without taking the lock; `Relaxed` ordering is
//! sufficient because the mutex already orders every write.

use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Slot sentinel for a cell that has been evicted but is still pinned.
const DETACHED: usize = usize::MAX;

/// Hook invoked with the payload when a cell dies.
///
/// Supplied at cache construction; called exactly once per payload, while
/// the cache mutex is held. It must not call back into the cache.
pub type ValueFree = dyn Fn(Box<[u8]>) + Send + Sync;

/// Value-free hook that simply drops the payload, returning its memory to
/// the global allocator.
pub fn default_free(payload: Box<[u8]>) {
    drop(payload);
}

/// One cached payload with its pin count, reference bit, and home slot.
pub struct ValueCell {
    /// Payload bytes, copied from the caller at admission. Immutable until
    /// the cell dies, so holders read without synchronization.
    data: Box<[u8]>,
    refcount: AtomicU32,
    slot: AtomicUsize,
    ref_bit: AtomicBool,
    value_free: Arc<ValueFree>,
}

impl ValueCell {
    /// Creates a cell in its admission state: one pin (for the handle about
    /// to be returned), reference bit set, resident at `slot`.
    pub(crate) fn new(data: Box<[u8]>, slot: usize, value_free: Arc<ValueFree>) -> Self {
        Self {
            data,
            refcount: AtomicU32::new(1),
            slot: AtomicUsize::new(slot),
            ref_bit: AtomicBool::new(true),
            value_free,
        }
    }

    /// Returns the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Returns the number of outstanding pins.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    /// Returns `true` while the cell still occupies a slot.
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.slot.load(Ordering::Relaxed) != DETACHED
    }

    /// Returns the slot this cell occupies, or `None` once detached.
    #[inline]
    pub fn home_slot(&self) -> Option<usize> {
        let slot = self.slot.load(Ordering::Relaxed);
        (slot != DETACHED).then_some(slot)
    }

    /// Returns the current reference bit.
    #[inline]
    pub fn ref_bit(&self) -> bool {
        self.ref_bit.load(Ordering::Relaxed)
    }

    pub(crate) fn set_ref_bit(&self) {
        self.ref_bit.store(true, Ordering::Relaxed);
    }

    pub(crate) fn clear_ref_bit(&self) {
        self.ref_bit.store(false, Ordering::Relaxed);
    }

    /// Adds a pin. Called on every hit, under the cache mutex.
    pub(crate) fn acquire(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes a pin and returns the count that remains.
    pub(crate) fn release_pin(&self) -> u32 {
        let prev = self.refcount.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "pin released more often than acquired");
        prev - 1
    }

    /// Severs the cell from its slot. The cell stays alive through the
    /// handles that still pin it.
    pub(crate) fn detach(&self) {
        self.slot.store(DETACHED, Ordering::Relaxed);
    }
}

impl Drop for ValueCell {
    fn drop(&mut self) {
        let payload = mem::take(&mut self.data);
        (self.value_free)(payload);
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell")
            .field("len", &self.data.len())
            .field("pins", &self.pin_count())
            .field("slot", &self.home_slot())
            .field("ref_bit", &self.ref_bit())
            .finish()
    }
}

/// An outstanding pin on a cached value, returned by
/// [`ClockCache::access`](crate::cache::ClockCache::access).
///
/// Each handle corresponds to exactly one pin; pass it back to
/// [`ClockCache::release`](crate::cache::ClockCache::release) when done.
/// Handles are deliberately not cloneable, so a pin can never be released
/// twice. Dropping a handle without releasing it leaks its pin and the cache
/// will warn about the held cell when it is dropped.
///
/// Dereferences to the payload bytes:
///
/// ```
/// use clockpin::cache::ClockCache;
///
/// let cache = ClockCache::try_new(4).unwrap();
/// let handle = cache.access("alpha", &[1, 2, 3]).unwrap();
/// assert_eq!(&*handle, &[1, 2, 3]);
/// cache.release(handle);
/// ```
pub struct ValueHandle {
    cell: Arc<ValueCell>,
}

impl ValueHandle {
    pub(crate) fn new(cell: Arc<ValueCell>) -> Self {
        Self { cell }
    }

    /// Returns the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.cell.payload()
    }

    /// Returns the number of pins currently held on the underlying cell.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.cell.pin_count()
    }

    /// Returns `true` while the underlying cell still occupies a slot.
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.cell.is_resident()
    }

    pub(crate) fn into_cell(self) -> Arc<ValueCell> {
        self.cell
    }
}

impl Deref for ValueHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.payload()
    }
}

impl fmt::Debug for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueHandle")
            .field("cell", &*self.cell)
            .finish()
    }
}
