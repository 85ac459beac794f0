//! A minimal HTTP server exposing `/metrics` and `/health` over raw TCP,
//! hand-parsing the handful of request lines it needs rather than pulling
//! in an HTTP framework for two endpoints.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::metrics::Metrics;

pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: String,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: impl Into<String>) -> Self {
        Self {
            metrics,
            addr: addr.into(),
        }
    }

    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("metrics server listening on {}", self.addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            let metrics = Arc::clone(&self.metrics);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, metrics).await {
                    warn!("metrics connection from {peer} ended with error: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        metrics: Arc<Metrics>,
    ) -> std::io::Result<()> {
        let mut buffer = vec![0u8; 4096];
        let bytes_read = stream.read(&mut buffer).await?;
        if bytes_read == 0 {
            return Ok(());
        }

        let request = String::from_utf8_lossy(&buffer[..bytes_read]);
        let request_line = request.lines().next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (method, path) = (parts.next(), parts.next());

        match (method, path) {
            (Some("GET"), Some("/metrics")) => Self::respond_metrics(&mut stream, &metrics).await,
            (Some("GET"), Some("/health")) => Self::respond_health(&mut stream).await,
            (Some("GET"), Some(_)) => Self::respond(&mut stream, 404, "Not Found", "text/plain", "not found").await,
            _ => Self::respond(&mut stream, 400, "Bad Request", "text/plain", "bad request").await,
        }
    }

    async fn respond_metrics(stream: &mut TcpStream, metrics: &Metrics) -> std::io::Result<()> {
        let body = metrics.render();
        Self::respond(
            stream,
            200,
            "OK",
            "text/plain; version=0.0.4; charset=utf-8",
            &body,
        )
        .await
    }

    async fn respond_health(stream: &mut TcpStream) -> std::io::Result<()> {
        Self::respond(stream, 200, "OK", "application/json", r#"{"status":"healthy"}"#).await
    }

    async fn respond(
        stream: &mut TcpStream,
        status_code: u16,
        status_text: &str,
        content_type: &str,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {status_code} {status_text}\r\n\
             Content-Type: {content_type}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {body}",
            body.len()
        );
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            error!("metrics server write failed: {e}");
        }
        Ok(())
    }
}
