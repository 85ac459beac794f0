//! A minimal client for ferrokv's line protocol: one write, one read, no
//! pipelining.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct Client {
    stream: TcpStream,
    max_message_size: usize,
    timeout: Duration,
}

impl Client {
    pub async fn connect(address: &str, max_message_size: usize, timeout: Duration) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ClientError::Connect {
                address: address.to_string(),
                source,
            })?;
        Ok(Self {
            stream,
            max_message_size,
            timeout,
        })
    }

    /// Send one request line and return the raw response string.
    pub async fn send(&mut self, line: &str) -> Result<String, ClientError> {
        let mut message = line.to_string();
        if !message.ends_with('\n') {
            message.push('\n');
        }

        timeout(self.timeout, self.stream.write_all(message.as_bytes()))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;

        let mut buf = vec![0u8; self.max_message_size];
        let n = timeout(self.timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;

        Ok(String::from_utf8_lossy(&buf[..n]).to_string())
    }
}
