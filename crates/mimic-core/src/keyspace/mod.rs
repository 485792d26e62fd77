//! The keyspace: one logical database.
//!
//! A `Keyspace` owns a [`Dict`] of key → [`StoredValue`], the counter
//! that hands out object ids, and the [`WaitTable`] of commands blocked
//! on its keys. It has no locking of its own; [`crate::spaces`] wraps
//! each keyspace in a mutex and every method here runs under it.
//!
//! Expired keys are removed lazily on access and by the active cycle in
//! [`crate::expiry`]. Every write re-stamps the touched value with a
//! fresh id, which is what WATCH compares.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::warn;

use crate::dict::Dict;
use crate::error::{CommandError, WrongType};
use crate::glob::GlobPattern;
use crate::time;
use crate::types::{StoredValue, Value, ValueKind};
use crate::wait::WaitTable;

mod hash;
mod list;
mod persist;
mod set;
mod string;

pub use set::SetAlgebra;
pub use string::{SetCondition, SetExpiry, SetOptions, SetOutcome};

/// KEYS on more keys than this logs a warning.
const KEYS_WARN_THRESHOLD: usize = 10_000;

/// Attempts RANDOMKEY makes before giving up on a keyspace that is
/// mostly expired keys.
const RANDOM_KEY_ATTEMPTS: usize = 100;

/// Result of a TTL query, matching Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlResult {
    /// Remaining time, in the unit the caller asked for.
    Remaining(u64),
    /// Key exists but has no expiration set.
    NoExpiry,
    /// Key does not exist.
    NotFound,
}

/// Assigns a fresh id to a value that was just written.
fn stamp(counter: &mut u64, entry: &mut StoredValue) {
    *counter += 1;
    entry.id = *counter;
    entry.touch();
}

/// One logical database.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: Dict<StoredValue>,
    /// Last id handed out. Ids start at 1.
    next_id: u64,
    waiters: WaitTable,
    expired_total: u64,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last object id handed out.
    pub fn last_id(&self) -> u64 {
        self.next_id
    }

    /// Cumulative count of keys reclaimed because they expired.
    pub fn expired_total(&self) -> u64 {
        self.expired_total
    }

    pub fn waiters(&self) -> &WaitTable {
        &self.waiters
    }

    pub fn waiters_mut(&mut self) -> &mut WaitTable {
        &mut self.waiters
    }

    /// The underlying dictionary, for inspection.
    pub fn dict(&self) -> &Dict<StoredValue> {
        &self.entries
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Removes `key` if it has expired. Returns `true` if it was removed.
    fn remove_if_expired(&mut self, key: &[u8]) -> bool {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.is_expired())
            .unwrap_or(false);
        if expired {
            self.entries.remove(key);
            self.expired_total += 1;
        }
        expired
    }

    /// Live entry for reading; refreshes the access time.
    fn live_mut(&mut self, key: &[u8]) -> Option<&mut StoredValue> {
        self.remove_if_expired(key);
        let entry = self.entries.get_mut(key)?;
        entry.touch();
        Some(entry)
    }

    /// Checks whether a key is absent or already of `kind`. Returns
    /// `Ok(true)` if the key is new.
    fn ensure_collection_type(&mut self, key: &[u8], kind: ValueKind) -> Result<bool, WrongType> {
        self.remove_if_expired(key);
        match self.entries.get(key) {
            None => Ok(true),
            Some(e) if e.value.kind() == kind => Ok(false),
            Some(_) => Err(WrongType),
        }
    }

    /// Stores `value` under `key` with a fresh id, replacing anything
    /// there. Wakes waiters if the new value is a list.
    fn insert_value(&mut self, key: Bytes, value: Value, expires_at_ms: u64) {
        let id = self.alloc_id();
        let list_len = match &value {
            Value::List(items) => items.len(),
            _ => 0,
        };
        self.entries
            .store(key.clone(), StoredValue::new(id, value, expires_at_ms));
        if list_len > 0 {
            self.waiters.unblock(&key, list_len);
        }
    }

    /// Drops a collection key whose last element was just removed.
    fn remove_if_empty(&mut self, key: &[u8]) {
        let empty = self
            .entries
            .get(key)
            .is_some_and(|e| e.value.is_empty_collection());
        if empty {
            self.entries.remove(key);
        }
    }

    /// Returns the live entry for `key`, if any.
    pub fn get_entry(&mut self, key: &[u8]) -> Option<&StoredValue> {
        self.live_mut(key).map(|e| &*e)
    }

    /// The change-detection token of `key`, or `None` if absent.
    pub fn object_id(&mut self, key: &[u8]) -> Option<u64> {
        self.remove_if_expired(key);
        self.entries.get(key).map(|e| e.id)
    }

    /// Removes a key. Returns `true` if it existed.
    pub fn del(&mut self, key: &[u8]) -> bool {
        if self.remove_if_expired(key) {
            return false;
        }
        self.entries.remove(key).is_some()
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.remove_if_expired(key);
        self.entries.contains_key(key)
    }

    pub fn value_kind(&mut self, key: &[u8]) -> Option<ValueKind> {
        self.remove_if_expired(key);
        self.entries.get(key).map(|e| e.value.kind())
    }

    /// Sets an absolute expiry in unix ms. A timestamp that has already
    /// passed deletes the key logically. Returns `false` if the key
    /// doesn't exist.
    pub fn expire_at(&mut self, key: &[u8], at_ms: u64) -> bool {
        self.remove_if_expired(key);
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if at_ms <= time::now_ms() {
            entry.mark_deleted();
        } else {
            entry.expires_at_ms = at_ms;
        }
        stamp(&mut self.next_id, entry);
        true
    }

    /// Sets a relative expiry in milliseconds. Non-positive values
    /// delete the key.
    pub fn pexpire(&mut self, key: &[u8], millis: i64) -> bool {
        let at = if millis <= 0 {
            time::DELETED
        } else {
            time::now_ms().saturating_add(millis as u64)
        };
        self.expire_at(key, at)
    }

    /// Remaining TTL in milliseconds.
    pub fn pttl(&mut self, key: &[u8]) -> TtlResult {
        self.remove_if_expired(key);
        match self.entries.get(key) {
            None => TtlResult::NotFound,
            Some(entry) => match time::remaining_ms(entry.expires_at_ms) {
                Some(ms) => TtlResult::Remaining(ms),
                None => TtlResult::NoExpiry,
            },
        }
    }

    /// Remaining TTL in seconds, rounded to the nearest second.
    pub fn ttl(&mut self, key: &[u8]) -> TtlResult {
        match self.pttl(key) {
            TtlResult::Remaining(ms) => TtlResult::Remaining((ms + 500) / 1000),
            other => other,
        }
    }

    /// Removes the expiration. Returns `true` if a timeout was removed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.remove_if_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) if entry.has_expiry() => {
                entry.expires_at_ms = time::NO_EXPIRY;
                stamp(&mut self.next_id, entry);
                true
            }
            _ => false,
        }
    }

    /// Renames `key` to `newkey`, overwriting the destination.
    pub fn rename(&mut self, key: &[u8], newkey: Bytes) -> Result<(), CommandError> {
        self.remove_if_expired(key);
        if !self.entries.contains_key(key) {
            return Err(CommandError::NoSuchKey);
        }
        if key == newkey.as_ref() {
            return Ok(());
        }
        if let Some(entry) = self.entries.remove(key) {
            self.insert_value(newkey, entry.value, entry.expires_at_ms);
        }
        Ok(())
    }

    /// Renames only if `newkey` doesn't exist. Returns `Ok(false)` when
    /// the destination is taken.
    pub fn renamenx(&mut self, key: &[u8], newkey: Bytes) -> Result<bool, CommandError> {
        self.remove_if_expired(key);
        if !self.entries.contains_key(key) {
            return Err(CommandError::NoSuchKey);
        }
        if self.exists(&newkey) {
            return Ok(false);
        }
        self.rename(key, newkey)?;
        Ok(true)
    }

    /// Copies `src` to `dst` within this keyspace. Returns `Ok(false)` if
    /// the source is missing or the destination exists without `replace`.
    pub fn copy(&mut self, src: &[u8], dst: Bytes, replace: bool) -> Result<bool, CommandError> {
        if src == dst.as_ref() {
            return Err(CommandError::SameObject);
        }
        let Some((value, expires_at_ms)) = self.export(src) else {
            return Ok(false);
        };
        Ok(self.import(dst, value, expires_at_ms, replace))
    }

    /// Clones the value and expiry of a live key, for copying elsewhere.
    pub fn export(&mut self, key: &[u8]) -> Option<(Value, u64)> {
        self.live_mut(key)
            .map(|e| (e.value.clone(), e.expires_at_ms))
    }

    /// Removes a live key, handing back its value and expiry.
    pub fn take(&mut self, key: &[u8]) -> Option<(Value, u64)> {
        if self.remove_if_expired(key) {
            return None;
        }
        self.entries
            .remove(key)
            .map(|e| (e.value, e.expires_at_ms))
    }

    /// Adopts a value coming from a copy, move or restore under a fresh
    /// id. Returns `false` without writing if the key exists and
    /// `replace` is not set.
    pub fn import(&mut self, key: Bytes, value: Value, expires_at_ms: u64, replace: bool) -> bool {
        if !replace && self.exists(&key) {
            return false;
        }
        self.insert_value(key, value, expires_at_ms);
        true
    }

    /// All live keys matching a glob pattern. O(n).
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let len = self.entries.len();
        if len > KEYS_WARN_THRESHOLD {
            warn!(key_count = len, "KEYS on large keyspace, consider SCAN instead");
        }
        let compiled = GlobPattern::new(pattern);
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .filter(|(key, _)| compiled.matches(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// One SCAN step. `count` bounds the buckets' worth of entries
    /// visited, not the number returned after filtering.
    pub fn scan_keys(
        &self,
        cursor: u64,
        count: usize,
        pattern: Option<&GlobPattern>,
        kind: Option<ValueKind>,
    ) -> (u64, Vec<Bytes>) {
        self.entries.scan_filter(cursor, count, |key, entry| {
            let keep = !entry.is_expired()
                && pattern.map_or(true, |p| p.matches(key))
                && kind.map_or(true, |k| entry.value.kind() == k);
            keep.then(|| key.clone())
        })
    }

    /// A random live key. Expired keys hit along the way are reclaimed.
    pub fn random_key(&mut self) -> Option<Bytes> {
        for _ in 0..RANDOM_KEY_ATTEMPTS {
            let (key, expired) = {
                let picked = self.entries.pick_random_items(1);
                let (key, entry) = picked.first()?;
                ((*key).clone(), entry.is_expired())
            };
            if !expired {
                return Some(key);
            }
            self.remove_if_expired(&key);
        }
        None
    }

    /// Removes every key. Ids keep counting and waiters stay registered.
    pub fn flush(&mut self) {
        self.entries.clear();
    }

    /// Exchanges the contents of two keyspaces, as SWAPDB does.
    ///
    /// Wait tables stay with their database. Every value in both spaces
    /// is re-stamped from a counter past both old counters, so ids stay
    /// unique and watchers of either database see a change. Waiters on
    /// keys that now hold lists are woken.
    pub fn swap_contents(&mut self, other: &mut Keyspace) {
        std::mem::swap(&mut self.entries, &mut other.entries);
        let counter = self.next_id.max(other.next_id);
        self.next_id = counter;
        other.next_id = counter;
        self.restamp_all();
        other.restamp_all();
        self.wake_list_waiters();
        other.wake_list_waiters();
    }

    fn restamp_all(&mut self) {
        for (_, entry) in self.entries.iter_mut() {
            stamp(&mut self.next_id, entry);
        }
    }

    fn wake_list_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }
        let ready: Vec<(Bytes, usize)> = self
            .waiters
            .waited_keys()
            .filter_map(|key| match self.entries.get(key) {
                Some(StoredValue {
                    value: Value::List(items),
                    ..
                }) => Some((key.clone(), items.len())),
                _ => None,
            })
            .collect();
        for (key, len) in ready {
            self.waiters.unblock(&key, len);
        }
    }

    /// Samples up to `count` random keys (with repetition) and reclaims
    /// the expired ones. Returns how many were removed.
    pub fn expire_sample(&mut self, count: usize) -> usize {
        let expired: Vec<Bytes> = self
            .entries
            .pick_random_items(count)
            .into_iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .iter()
            .filter(|key| self.remove_if_expired(key))
            .count()
    }
}

/// Formats a float the way INCRBYFLOAT and HINCRBYFLOAT reply.
///
/// Shortest representation that round-trips, no exponent, no trailing
/// zeros, and no negative zero.
pub(crate) fn format_float(val: f64) -> String {
    if val == 0.0 {
        return "0".into();
    }
    format!("{val}")
}

fn new_list() -> Value {
    Value::List(VecDeque::new())
}
