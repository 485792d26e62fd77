//! Errors raised while framing or interpreting client input.

use thiserror::Error;

/// A malformed frame or an invalid command.
///
/// Framing variants mean the byte stream can't be trusted any more and
/// the connection should be closed. Command variants are ordinary
/// replies; their `Display` text is what follows `ERR ` on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ends mid-frame. Read more and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    #[error("invalid integer encoding")]
    InvalidInteger,

    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    #[error("invalid bulk length: {0} bytes exceeds limit")]
    BulkStringTooLarge(usize),

    #[error("invalid multibulk length: {0} elements exceeds limit")]
    TooManyElements(usize),

    #[error("frame nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("invalid command frame: {0}")]
    InvalidCommandFrame(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("unknown subcommand '{0}'")]
    UnknownSubcommand(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("syntax error")]
    Syntax,

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("value is not a valid float")]
    NotAFloat,

    #[error("value is out of range, must be positive")]
    NotPositive,

    #[error("invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("timeout is not a float or out of range")]
    InvalidTimeout,

    #[error("timeout is negative")]
    NegativeTimeout,

    #[error("increment or decrement would overflow")]
    Overflow,
}

impl ProtocolError {
    /// True for errors in the framing itself, after which the rest of the
    /// input stream is unusable.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidPrefix(_)
                | ProtocolError::InvalidInteger
                | ProtocolError::InvalidFrameLength(_)
                | ProtocolError::BulkStringTooLarge(_)
                | ProtocolError::TooManyElements(_)
                | ProtocolError::NestingTooDeep(_)
        )
    }
}
