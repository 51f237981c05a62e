//! Data layer of the pulseboard e-commerce analytics dashboard: a typed API
//! client, a deduplicating query cache and a real-time channel that keeps
//! the cache current.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod prefs;
pub mod realtime;

pub use app::Dashboard;
pub use config::Config;
pub use error::{ApiError, ErrorKind};
