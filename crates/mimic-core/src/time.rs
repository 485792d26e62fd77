//! Wall-clock timestamps in unix-epoch milliseconds.
//!
//! Expiry times are absolute so EXPIREAT and snapshots can use them
//! directly. Two sentinels bracket the range: [`NO_EXPIRY`] sits in the
//! far future, [`DELETED`] in the far past.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Expiry value for keys that never expire.
pub const NO_EXPIRY: u64 = u64::MAX;

/// Expiry value marking a key as logically deleted. It reads as
/// expired everywhere and is reclaimed on next access or by the
/// active expiration cycle.
pub const DELETED: u64 = 0;

/// Milliseconds since the unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns true if the given expiry timestamp has passed.
#[inline]
pub fn is_expired(expires_at_ms: u64) -> bool {
    expires_at_ms != NO_EXPIRY && now_ms() >= expires_at_ms
}

/// Converts a relative TTL into an absolute expiry timestamp.
#[inline]
pub fn expiry_from_duration(ttl: Option<Duration>) -> u64 {
    ttl.map(|d| now_ms().saturating_add(d.as_millis() as u64))
        .unwrap_or(NO_EXPIRY)
}

/// Remaining TTL in milliseconds, or None if no expiry.
#[inline]
pub fn remaining_ms(expires_at_ms: u64) -> Option<u64> {
    if expires_at_ms == NO_EXPIRY {
        None
    } else {
        Some(expires_at_ms.saturating_sub(now_ms()))
    }
}
