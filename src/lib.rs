//! clockpin: fixed-capacity, thread-safe cache with clock eviction and
//! in-use pinning.
//!
//! Values are looked up by string key and returned as pinned handles; a held
//! value is never freed out from under its holder, even after it has been
//! evicted from its slot. See `DESIGN.md` for internal architecture.

pub mod builder;
pub mod cache;
pub mod cell;
pub mod ds;
pub mod error;
pub mod prelude;
pub mod ring;

/// Target string for every diagnostic event this crate emits.
pub(crate) const LOG_TARGET: &str = "RefBitClockCache";
