//! Builder for configuring and creating a cache.
//!
//! Capacity is the only required parameter; the value-free hook defaults to
//! [`default_free`], which simply drops each payload.
//!
//! ## Example
//!
//! ```rust
//! use clockpin::builder::CacheBuilder;
//!
//! let cache = CacheBuilder::new(8)
//!     .value_free(|payload| drop(payload))
//!     .try_build()
//!     .unwrap();
//!
//! let handle = cache.access("page:1", b"contents").unwrap();
//! assert_eq!(&*handle, b"contents");
//! cache.release(handle);
//! ```

use std::sync::Arc;

use crate::cache::ClockCache;
use crate::cell::{default_free, ValueFree};
use crate::error::ConfigError;

/// Builder for [`ClockCache`] instances.
pub struct CacheBuilder {
    capacity: usize,
    value_free: Arc<ValueFree>,
}

impl CacheBuilder {
    /// Starts a builder for a cache with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            value_free: Arc::new(default_free),
        }
    }

    /// Replaces the value-free hook. The hook receives each payload exactly
    /// once, when the payload dies; it runs while the cache mutex is held
    /// and must not call back into the cache.
    pub fn value_free<F>(mut self, hook: F) -> Self
    where
        F: Fn(Box<[u8]>) + Send + Sync + 'static,
    {
        self.value_free = Arc::new(hook);
        self
    }

    /// Builds the cache. Zero capacity is a configuration error.
    pub fn try_build(self) -> Result<ClockCache, ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::new("capacity must be greater than zero"));
        }
        Ok(ClockCache::with_parts(self.capacity, self.value_free))
    }
}

impl std::fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builds_with_default_hook() {
        let cache = CacheBuilder::new(2).try_build().unwrap();
        assert_eq!(cache.capacity(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_is_a_config_error() {
        let err = CacheBuilder::new(0).try_build().unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn custom_hook_sees_each_dead_payload() {
        let freed = Arc::new(AtomicUsize::new(0));
        let cache = {
            let freed = freed.clone();
            CacheBuilder::new(1)
                .value_free(move |_| {
                    freed.fetch_add(1, Ordering::SeqCst);
                })
                .try_build()
                .unwrap()
        };

        let a = cache.access("a", &[1]).unwrap();
        cache.release(a);
        // Evicting "a" retires its cell; with no pins the payload dies now.
        let b = cache.access("b", &[2]).unwrap();
        cache.release(b);
        assert_eq!(freed.load(Ordering::SeqCst), 1);

        drop(cache);
        assert_eq!(freed.load(Ordering::SeqCst), 2);
    }
}
