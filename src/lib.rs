//! ferrokv - a replicated, WAL-backed key/value store
//!
//! A flat string-to-string store that persists mutations through a
//! write-ahead log before acknowledging them, and that can run as a
//! replication master or slave over a lightweight TCP protocol.

pub mod client;
pub mod config;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod metrics;
pub mod store;
pub mod storage;
pub mod wal;

pub use config::Config;

/// ferrokv version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for ferrokv operations
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
