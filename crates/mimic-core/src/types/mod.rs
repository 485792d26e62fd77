//! Stored value representations.
//!
//! Each variant of [`Value`] maps to a Redis data type. Hashes and sets
//! share the dictionary implementation; a set is a dictionary whose
//! values carry nothing.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::dict::Dict;
use crate::time;

/// The payload of a stored key.
#[derive(Debug, Clone)]
pub enum Value {
    /// Binary-safe string data.
    String(Bytes),

    /// Ordered list of binary-safe elements. `VecDeque` gives O(1)
    /// push/pop at both ends.
    List(VecDeque<Bytes>),

    /// Field → value mapping.
    Hash(Dict<Bytes>),

    /// Unordered collection of unique members.
    Set(Dict<()>),
}

/// The type flag of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    List,
    Hash,
    Set,
}

impl ValueKind {
    /// Name as reported by the TYPE command.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Hash => "hash",
            ValueKind::Set => "set",
        }
    }

    /// Parses a TYPE name, case-insensitively.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        [
            ValueKind::String,
            ValueKind::List,
            ValueKind::Hash,
            ValueKind::Set,
        ]
        .into_iter()
        .find(|kind| kind.as_str().as_bytes().eq_ignore_ascii_case(name))
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Hash(_) => ValueKind::Hash,
            Value::Set(_) => ValueKind::Set,
        }
    }

    /// True for collections that have lost their last element. Such
    /// keys are removed rather than stored empty.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::List(items) => items.is_empty(),
            Value::Hash(map) => map.is_empty(),
            Value::Set(members) => members.is_empty(),
        }
    }
}

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Left,
    Right,
}

/// The record behind one live key.
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// Change-detection token, unique within the owning keyspace.
    pub id: u64,
    pub value: Value,
    pub last_access_ms: u64,
    /// Absolute expiry; [`time::NO_EXPIRY`] or [`time::DELETED`] sentinels.
    pub expires_at_ms: u64,
}

impl StoredValue {
    pub fn new(id: u64, value: Value, expires_at_ms: u64) -> Self {
        Self {
            id,
            value,
            last_access_ms: time::now_ms(),
            expires_at_ms,
        }
    }

    pub fn is_expired(&self) -> bool {
        time::is_expired(self.expires_at_ms)
    }

    pub fn has_expiry(&self) -> bool {
        self.expires_at_ms != time::NO_EXPIRY
    }

    pub fn touch(&mut self) {
        self.last_access_ms = time::now_ms();
    }

    /// Flags the key for lazy reclamation.
    pub fn mark_deleted(&mut self) {
        self.expires_at_ms = time::DELETED;
    }
}

/// Clamps a Redis-style inclusive `[start, stop]` range (negative
/// indices count from the end) to a collection of length `len`.
///
/// Returns `None` when the range selects nothing.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Resolves a possibly negative index against a collection of `len`.
pub fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}
