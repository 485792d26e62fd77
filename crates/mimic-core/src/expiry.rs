//! Active expiration by random sampling.
//!
//! Lazy expiry only reclaims keys that somebody touches. The server
//! calls [`run_expiration_cycle`] on every database a few times per
//! second to sweep up the rest, sampling random keys instead of keeping
//! an index ordered by deadline.

use crate::keyspace::Keyspace;

/// Keys sampled per round.
const SAMPLE_SIZE: usize = 20;

/// Another round runs while at least this fraction of a sample expired.
const EXPIRED_THRESHOLD: f64 = 0.25;

/// Upper bound on rounds per cycle, so one database can't hog its lock.
const MAX_ROUNDS: usize = 3;

/// Runs one cycle against a keyspace and returns how many keys were
/// reclaimed.
///
/// Samples are drawn with repetition, so a round can reclaim fewer keys
/// than it sampled even when everything has expired.
pub fn run_expiration_cycle(ks: &mut Keyspace) -> usize {
    let mut total = 0;
    for _ in 0..MAX_ROUNDS {
        if ks.is_empty() {
            break;
        }
        let removed = ks.expire_sample(SAMPLE_SIZE);
        total += removed;
        if (removed as f64) < SAMPLE_SIZE as f64 * EXPIRED_THRESHOLD {
            break;
        }
    }
    total
}
