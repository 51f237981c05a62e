//! Real-time push channel that keeps the query cache current.

mod client;
mod events;
mod machine;

pub use client::{RealtimeClient, RealtimeOptions};
pub use events::{EventEnvelope, EventKind, Milestone};
pub use machine::{Command, ConnectionMachine, ConnectionState, Lifecycle, ReconnectPolicy};
