//! The connection server and its metrics sidecar.

pub mod metrics_handler;
pub mod tcp;

pub use metrics_handler::MetricsServer;
pub use tcp::{TcpServer, TcpServerConfig};
