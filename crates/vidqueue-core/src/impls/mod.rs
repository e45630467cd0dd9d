//! Impls - concrete adapters for the ports.
//!
//! - **HttpTransferExecutor**: multipart upload over HTTP
//! - **BroadcastEventSink**: queue events over a tokio broadcast channel

pub mod broadcast_sink;
pub mod http_transfer;

pub use self::broadcast_sink::BroadcastEventSink;
pub use self::http_transfer::HttpTransferExecutor;
