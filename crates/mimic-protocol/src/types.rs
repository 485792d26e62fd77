//! RESP2 frame types.

use bytes::Bytes;

/// A single RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Status reply, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// `:42\r\n`.
    Integer(i64),

    /// Binary-safe bulk string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// `*2\r\n...`.
    Array(Vec<Frame>),

    /// Null bulk string, `$-1\r\n`. The usual "no value" reply.
    Null,

    /// Null array, `*-1\r\n`. Sent by EXEC when a watched key changed and
    /// by blocking pops that time out.
    NullArray,
}

impl Frame {
    pub fn ok() -> Frame {
        Frame::Simple("OK".into())
    }

    /// Bulk string when present, null bulk otherwise.
    pub fn optional_bulk(value: Option<Bytes>) -> Frame {
        value.map_or(Frame::Null, Frame::Bulk)
    }

    /// Array of bulk strings.
    pub fn bulk_array(items: impl IntoIterator<Item = Bytes>) -> Frame {
        Frame::Array(items.into_iter().map(Frame::Bulk).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::NullArray)
    }
}
