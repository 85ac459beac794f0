//! Wire types for the replication protocol, JSON-encoded over TCP.
//!
//! Field names are pinned to match the source this protocol is modeled
//! on (`Type`, `last_file_name`, `status`, `file_name`, `data`) so a
//! replica and master built from this same codec stay interoperable
//! regardless of which side restarts first.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message of {size} bytes exceeds the {limit}-byte maximum")]
    TooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write `payload` prefixed with its length as a big-endian u32, the
/// framing both replication sides use to delimit JSON messages on the
/// same TCP stream.
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FrameError> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed message, rejecting anything past `max_size`.
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(FrameError::TooLarge { size: len, limit: max_size });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ReadLast,
    ReadAll,
}

impl RequestKind {
    fn as_u8(self) -> u8 {
        match self {
            RequestKind::ReadLast => 0,
            RequestKind::ReadAll => 1,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RequestKind::ReadLast),
            1 => Some(RequestKind::ReadAll),
            _ => None,
        }
    }
}

fn serialize_kind<S: serde::Serializer>(kind: &RequestKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(kind.as_u8())
}

fn deserialize_kind<'de, D: serde::Deserializer<'de>>(d: D) -> Result<RequestKind, D::Error> {
    let v = u8::deserialize(d)?;
    RequestKind::from_u8(v).ok_or_else(|| serde::de::Error::custom(format!("unknown request type {v}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Error,
    NotFound,
}

impl ResponseStatus {
    fn as_u8(self) -> u8 {
        match self {
            ResponseStatus::Ok => 0,
            ResponseStatus::Error => 1,
            ResponseStatus::NotFound => 2,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ResponseStatus::Ok),
            1 => Some(ResponseStatus::Error),
            2 => Some(ResponseStatus::NotFound),
            _ => None,
        }
    }
}

fn serialize_status<S: serde::Serializer>(status: &ResponseStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(status.as_u8())
}

fn deserialize_status<'de, D: serde::Deserializer<'de>>(d: D) -> Result<ResponseStatus, D::Error> {
    let v = u8::deserialize(d)?;
    ResponseStatus::from_u8(v).ok_or_else(|| serde::de::Error::custom(format!("unknown status {v}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "Type", serialize_with = "serialize_kind", deserialize_with = "deserialize_kind")]
    pub kind: RequestKind,
    #[serde(rename = "last_file_name")]
    pub last_file_name: String,
}

impl Request {
    pub fn read_all() -> Self {
        Self {
            kind: RequestKind::ReadAll,
            last_file_name: String::new(),
        }
    }

    pub fn read_last(last_file_name: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::ReadLast,
            last_file_name: last_file_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "status", serialize_with = "serialize_status", deserialize_with = "deserialize_status")]
    pub status: ResponseStatus,
    #[serde(rename = "file_name")]
    pub file_names: Vec<String>,
    #[serde(rename = "data", with = "base64_vec")]
    pub data: Vec<Vec<u8>>,
}

impl Response {
    pub fn ok_one_file(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            file_names: vec![file_name.into()],
            data: vec![data],
        }
    }

    pub fn ok_all_files(file_names: Vec<String>, data: Vec<Vec<u8>>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            file_names,
            data,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: ResponseStatus::NotFound,
            file_names: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            status: ResponseStatus::Error,
            file_names: vec!["error".to_string()],
            data: vec![message.to_string().into_bytes()],
        }
    }
}

/// Go's `encoding/json` marshals `[]byte` fields as base64 strings; this
/// keeps the on-the-wire representation identical for arbitrary segment
/// bytes (which are not guaranteed to be valid UTF-8 text).
mod base64_vec {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = data.iter().map(|b| STANDARD.encode(b)).collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(d)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
