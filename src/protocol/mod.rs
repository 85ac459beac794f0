//! Client wire protocol: a three-command line grammar.

pub mod command;
pub mod parser;

pub use command::{Request, RequestKind};
pub use parser::{ParseError, Parser};
