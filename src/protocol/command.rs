//! Request type: the immutable record the parser produces.

/// The three client commands, plus an error sentinel for malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Set,
    Del,
    Invalid,
}

impl RequestKind {
    /// The uppercase command word used on the wire and in WAL segments.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Get => "GET",
            RequestKind::Set => "SET",
            RequestKind::Del => "DEL",
            RequestKind::Invalid => "INVALID",
        }
    }

    /// `true` for commands that mutate the keyspace.
    pub fn is_mutation(&self) -> bool {
        matches!(self, RequestKind::Set | RequestKind::Del)
    }
}

/// An immutable request: a command kind plus its ordered arguments.
///
/// `Set` carries exactly two arguments (key, value); `Get` and `Del` carry
/// exactly one (key); `Invalid` carries none and exists only as an error
/// sentinel. Produced by [`crate::protocol::Parser`], never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub args: Vec<String>,
}

impl Request {
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Get,
            args: vec![key.into()],
        }
    }

    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Set,
            args: vec![key.into(), value.into()],
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Del,
            args: vec![key.into()],
        }
    }

    pub fn key(&self) -> &str {
        &self.args[0]
    }

    pub fn value(&self) -> &str {
        &self.args[1]
    }
}
