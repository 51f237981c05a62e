//! Transport primitives: timeout/cancellation composition and failure
//! classification for single HTTP exchanges.

mod transport;

pub use transport::{decode_body, Connectivity, RequestOptions, Transport, DEFAULT_TIMEOUT};
