pub use crate::builder::CacheBuilder;
pub use crate::cache::{CacheStats, ClockCache};
pub use crate::cell::{default_free, ValueHandle};
pub use crate::error::{ConfigError, InvariantError};
