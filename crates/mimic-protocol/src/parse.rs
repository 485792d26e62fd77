//! Incremental RESP2 parser.
//!
//! Works on whatever the connection has buffered so far. A `Cursor`
//! tracks the position without consuming input, so a frame that is cut
//! off mid-way simply reports `Ok(None)` and the caller retries after the
//! next read. Validation and construction happen in a single pass.
//!
//! [`parse_frame_bytes`] slices bulk payloads out of the source buffer
//! without copying; [`parse_frame`] copies them for callers that only
//! hold a `&[u8]`.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in one array. Keeps a tiny request from
/// declaring an enormous allocation.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum bulk string length (512 MB, same as Redis).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on up-front `Vec` capacity for arrays; the vector still
/// grows past this as elements actually arrive.
const PREALLOC_CAP: usize = 1024;

/// Parses one frame from `buf`, slicing bulk data zero-copy.
///
/// Returns `Ok(Some((frame, consumed)))` for a complete frame, `Ok(None)`
/// when more input is needed, and `Err` for malformed input.
#[inline]
pub fn parse_frame_bytes(buf: &Bytes) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(buf.as_ref());
    finish(try_parse(&mut cursor, Some(buf), 0), &cursor)
}

/// Parses one frame from `buf`, copying bulk data.
#[inline]
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(buf);
    finish(try_parse(&mut cursor, None, 0), &cursor)
}

fn finish(
    result: Result<Frame, ProtocolError>,
    cursor: &Cursor<&[u8]>,
) -> Result<Option<(Frame, usize)>, ProtocolError> {
    match result {
        Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn try_parse(
    cursor: &mut Cursor<&[u8]>,
    src: Option<&Bytes>,
    depth: usize,
) -> Result<Frame, ProtocolError> {
    match read_byte(cursor)? {
        b'+' => Ok(Frame::Simple(read_text(cursor, "simple string")?)),
        b'-' => Ok(Frame::Error(read_text(cursor, "error string")?)),
        b':' => Ok(Frame::Integer(read_integer_line(cursor)?)),
        b'$' => {
            let len = read_integer_line(cursor)?;
            if len == -1 {
                return Ok(Frame::Null);
            }
            if len < 0 {
                return Err(ProtocolError::InvalidFrameLength(len));
            }
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkStringTooLarge(len as usize));
            }
            let len = len as usize;

            // payload plus the trailing \r\n
            if remaining(cursor) < len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            let pos = cursor.position() as usize;
            {
                let buf = cursor.get_ref();
                if buf[pos + len] != b'\r' || buf[pos + len + 1] != b'\n' {
                    return Err(ProtocolError::InvalidFrameLength(len as i64));
                }
            }
            cursor.set_position((pos + len + 2) as u64);

            let data = match src {
                Some(b) => b.slice(pos..pos + len),
                None => Bytes::copy_from_slice(&cursor.get_ref()[pos..pos + len]),
            };
            Ok(Frame::Bulk(data))
        }
        b'*' => {
            let next_depth = depth + 1;
            if next_depth > MAX_NESTING_DEPTH {
                return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
            }
            let count = read_integer_line(cursor)?;
            if count == -1 {
                return Ok(Frame::NullArray);
            }
            if count < 0 {
                return Err(ProtocolError::InvalidFrameLength(count));
            }
            if count as usize > MAX_ARRAY_ELEMENTS {
                return Err(ProtocolError::TooManyElements(count as usize));
            }

            let count = count as usize;
            let mut frames = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                frames.push(try_parse(cursor, src, next_depth)?);
            }
            Ok(Frame::Array(frames))
        }
        other => Err(ProtocolError::InvalidPrefix(other)),
    }
}

fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    if pos >= cursor.get_ref().len() {
        return Err(ProtocolError::Incomplete);
    }
    cursor.set_position((pos + 1) as u64);
    Ok(cursor.get_ref()[pos])
}

/// Returns the bytes up to the next `\r\n` and moves past it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = cursor.position() as usize;
    let end = find_crlf(cursor)?;
    Ok(&cursor.get_ref()[start..end])
}

fn read_text(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<String, ProtocolError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidCommandFrame(format!("invalid utf-8 in {what}")))
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    parse_i64_bytes(line)
}

/// Index of the next `\r` that is followed by `\n`; the cursor ends up
/// just past the `\n`.
fn find_crlf(cursor: &mut Cursor<&[u8]>) -> Result<usize, ProtocolError> {
    let buf = cursor.get_ref();
    let start = cursor.position() as usize;
    if start >= buf.len() {
        return Err(ProtocolError::Incomplete);
    }

    let mut pos = start;
    while let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) {
        let cr = pos + offset;
        if cr + 1 < buf.len() && buf[cr + 1] == b'\n' {
            cursor.set_position((cr + 2) as u64);
            return Ok(cr);
        }
        // bare \r, keep going
        pos = cr + 1;
    }
    Err(ProtocolError::Incomplete)
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    let len = cursor.get_ref().len();
    len.saturating_sub(cursor.position() as usize)
}

/// Parses a decimal i64 straight from bytes.
///
/// Negative values accumulate downwards so `i64::MIN` doesn't overflow.
pub(crate) fn parse_i64_bytes(buf: &[u8]) -> Result<i64, ProtocolError> {
    let (negative, digits) = match buf.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, buf),
        None => return Err(ProtocolError::InvalidInteger),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let digit = (b - b'0') as i64;
        n = n
            .checked_mul(10)
            .and_then(|n| {
                if negative {
                    n.checked_sub(digit)
                } else {
                    n.checked_add(digit)
                }
            })
            .ok_or(ProtocolError::InvalidInteger)?;
    }
    Ok(n)
}
