//! In-memory query cache for dashboard data.
//!
//! This module is independent of the backend's resources. It:
//! - Keys every query by operation name + serialized parameters
//! - Deduplicates concurrent fetches of the same key
//! - Serves stale data while revalidating in the background
//! - Retries transient failures with exponential backoff
//! - Invalidates by exact key, operation, or parameter value
//! - Evicts entries nobody has observed for a while

mod key;
mod layer;
mod observer;
mod retry;
mod traits;

pub use key::{KeyFilter, QueryKey};
pub use layer::{CacheConfig, QueryCache};
pub use observer::{QueryObserver, QuerySnapshot, QueryState};
pub use retry::RetryPolicy;
pub use traits::{CacheSource, EntryStatus, QueryResult};
