//! Errors surfaced by keyspace commands.
//!
//! Every variant renders as the exact error line a Redis client
//! expects, so the server can forward `to_string()` verbatim.

use thiserror::Error;

pub(crate) const WRONGTYPE_MSG: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Returned when a command is used against a key holding the wrong type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

impl std::fmt::Display for WrongType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{WRONGTYPE_MSG}")
    }
}

impl std::error::Error for WrongType {}

/// A recoverable, per-command failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR increment would produce NaN or Infinity")]
    NanOrInfinity,

    #[error("ERR hash value is not an integer")]
    HashNotAnInteger,

    #[error("ERR hash value is not a float")]
    HashNotAFloat,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    #[error("ERR DB index is out of range")]
    InvalidDbIndex,

    #[error("ERR source and destination objects are the same")]
    SameObject,

    #[error("UNBLOCKED client unblocked via CLIENT UNBLOCK")]
    Unblocked,

    #[error("ERR connection killed")]
    Killed,

    #[error("ERR syntax error")]
    Syntax,
}

impl From<WrongType> for CommandError {
    fn from(_: WrongType) -> Self {
        CommandError::WrongType
    }
}
