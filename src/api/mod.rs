//! Dashboard API: operations, payload types and the typed clients.

pub mod cached_client;
pub mod client;
pub mod operation;
pub mod types;

pub use cached_client::{query_key, CachedDashboardClient};
pub use client::DashboardClient;
pub use operation::Operation;
