//! The connection server: a TCP accept loop with per-connection idle
//! timeouts, a semaphore bounding concurrency, and panic isolation per
//! handler task.
//!
//! Framing limitation: each read is treated as one complete command, so
//! one read equals one message. Clients must not pipeline requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::protocol::Parser;
use crate::storage::Orchestrator;

pub struct TcpServerConfig {
    pub address: String,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub idle_timeout: Option<Duration>,
}

/// Accepts client connections and dispatches each line-protocol request to
/// the [`Orchestrator`].
pub struct TcpServer {
    config: TcpServerConfig,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<Metrics>,
    connection_permits: Option<Arc<Semaphore>>,
}

impl TcpServer {
    pub fn new(config: TcpServerConfig, orchestrator: Arc<Orchestrator>, metrics: Arc<Metrics>) -> Self {
        let connection_permits = if config.max_connections == 0 {
            None
        } else {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        };

        Self {
            config,
            orchestrator,
            metrics,
            connection_permits,
        }
    }

    pub async fn serve(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.address).await?;
        info!("ferrokv listening on {}", self.config.address);

        loop {
            let (stream, peer) = listener.accept().await?;

            let permit = match &self.connection_permits {
                Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => continue,
                },
                None => None,
            };

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                server.metrics.connections_total.inc();
                server.metrics.connections_active.inc();

                let handle = tokio::spawn(server.clone().handle_connection(stream, peer));
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("connection from {peer} closed: {e}"),
                    Err(join_err) if join_err.is_panic() => {
                        error!("connection handler for {peer} panicked");
                    }
                    Err(_) => {}
                }

                server.metrics.connections_active.dec();
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        let mut buf = vec![0u8; self.config.max_message_size];

        loop {
            let read_result = match self.config.idle_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
                    Ok(r) => r,
                    Err(_) => {
                        debug!("connection from {peer} hit idle timeout");
                        return Ok(());
                    }
                },
                None => stream.read(&mut buf).await,
            };

            let n = read_result?;
            if n == 0 {
                return Ok(());
            }

            let line = String::from_utf8_lossy(&buf[..n]);
            let response = self.dispatch(&line).await;

            let write = stream.write_all(response.as_bytes());
            match self.config.idle_timeout {
                Some(timeout) => tokio::time::timeout(timeout, write).await.map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "write deadline exceeded")
                })??,
                None => write.await?,
            }
        }
    }

    async fn dispatch(&self, line: &str) -> String {
        let req = match Parser::parse(line) {
            Ok(req) => req,
            Err(e) => {
                self.metrics.parse_errors_total.inc();
                return e.to_string();
            }
        };

        self.metrics
            .requests_total
            .with_label_values(&[req.kind.as_str()])
            .inc();

        match self.orchestrator.handle_request(&req).await {
            Ok(response) => response,
            Err(crate::storage::HandleError::ReadOnly) => {
                self.metrics.admission_rejections_total.inc();
                "slave node is read-only".to_string()
            }
            Err(e) => {
                warn!("request failed: {e}");
                e.to_string()
            }
        }
    }
}
