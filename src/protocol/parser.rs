//! Pure, stateless, re-entrant parser for the three-command grammar:
//! `GET key`, `DEL key`, `SET key value` (case-insensitive command word).

use super::command::{Request, RequestKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("too few tokens")]
    TooFewTokens,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("set command has two arguments")]
    SetNeedsTwoArgs,
    #[error("empty argument")]
    EmptyArgument,
}

pub struct Parser;

impl Parser {
    /// Parse a single request line. `line` may carry a trailing `\r\n` or
    /// `\n`, which is stripped from the last space-delimited token only.
    pub fn parse(line: &str) -> Result<Request, ParseError> {
        let mut tokens: Vec<&str> = line.split(' ').collect();

        if let Some(last) = tokens.last_mut() {
            let stripped = last
                .strip_suffix("\r\n")
                .or_else(|| last.strip_suffix('\n'))
                .unwrap_or(last);
            if stripped.len() != last.len() {
                if stripped.is_empty() {
                    return Err(ParseError::EmptyArgument);
                }
                *last = stripped;
            }
        }

        if tokens.len() < 2 {
            return Err(ParseError::TooFewTokens);
        }

        match tokens[0].to_ascii_uppercase().as_str() {
            "GET" => Ok(Request {
                kind: RequestKind::Get,
                args: vec![tokens[1].to_string()],
            }),
            "DEL" => Ok(Request {
                kind: RequestKind::Del,
                args: vec![tokens[1].to_string()],
            }),
            "SET" => {
                if tokens.len() < 3 {
                    return Err(ParseError::SetNeedsTwoArgs);
                }
                Ok(Request {
                    kind: RequestKind::Set,
                    args: vec![tokens[1].to_string(), tokens[2].to_string()],
                })
            }
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}
