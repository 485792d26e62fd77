//! The hash dictionary that backs every database, hash and set.
//!
//! Each bucket holds at most one entry; there is no chaining. A collision
//! on insert doubles the bucket array until the two hashes land in
//! different buckets. The bucket for a hash is its low `bits` bits read
//! in reverse order, so growing splits bucket `i` into `2i` and `2i + 1`
//! and shrinking merges them back. Bucket order is therefore stable
//! across resizes, which is what lets [`Dict::scan`] hand out cursors
//! that survive concurrent growth and shrinking.

use std::hash::Hasher;
use std::mem;

use ahash::AHashSet;
use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::Rng;
use siphasher::sip::SipHasher13;
use tracing::debug;

/// Smallest bucket array the dictionary will ever use.
pub const MIN_BUCKETS: usize = 16;

const MIN_BITS: u32 = MIN_BUCKETS.trailing_zeros();

/// Hashes a key with SipHash-1-3 under a fixed all-zero key.
///
/// The hash is deliberately seedless: bucket placement, scan cursors
/// and persisted layouts are reproducible across processes.
#[inline]
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(key);
    hasher.finish()
}

/// Maps a full hash to a bucket for a table of `1 << bits` buckets.
#[inline]
fn bucket_index(hash: u64, bits: u32) -> usize {
    (hash.reverse_bits() >> (64 - bits)) as usize
}

/// Converts an external scan cursor to the bucket it starts at.
///
/// Cursors produced by a larger table round down to the merged bucket,
/// which may revisit a few entries but never skips any.
#[inline]
fn cursor_to_index(cursor: u64, bits: u32) -> usize {
    (cursor.reverse_bits() >> (64 - bits)) as usize
}

/// Bit-reverse-increments a cursor: the natural index of the bucket the
/// cursor names, plus one, expressed back in reversed bit order. Wraps
/// to 0 past the last bucket.
#[inline]
fn next_cursor(cursor: u64, bits: u32) -> u64 {
    let next = cursor_to_index(cursor, bits) as u64 + 1;
    if next >> bits != 0 {
        0
    } else {
        (next << (64 - bits)).reverse_bits()
    }
}

#[derive(Debug, Clone)]
struct Slot<V> {
    key: Bytes,
    hash: u64,
    value: V,
}

/// A single-entry-per-bucket hash table keyed by binary-safe strings.
#[derive(Clone)]
pub struct Dict<V> {
    buckets: Vec<Option<Box<Slot<V>>>>,
    bits: u32,
    count: usize,
    removals: usize,
}

impl<V> Dict<V> {
    /// Creates an empty dictionary with the minimum bucket count.
    pub fn new() -> Self {
        Self::with_bits(MIN_BITS)
    }

    /// Creates an empty dictionary with at least `count` buckets.
    ///
    /// The count is rounded up to a power of two and never goes below
    /// [`MIN_BUCKETS`].
    pub fn with_buckets(count: usize) -> Self {
        let count = count.max(MIN_BUCKETS).next_power_of_two();
        Self::with_bits(count.trailing_zeros())
    }

    fn with_bits(bits: u32) -> Self {
        Self {
            buckets: empty_buckets(1 << bits),
            bits,
            count: 0,
            removals: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current length of the bucket array. Always a power of two.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Entries removed since the last successful shrink.
    pub fn removals(&self) -> usize {
        self.removals
    }

    /// Restores the removal counter, used when reloading a snapshot.
    pub fn set_removals(&mut self, removals: usize) {
        self.removals = removals;
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let hash = hash_key(key);
        let idx = bucket_index(hash, self.bits);
        match self.buckets[idx].as_deref() {
            Some(slot) if slot.hash == hash && slot.key.as_ref() == key => Some(idx),
            _ => None,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let idx = self.find(key)?;
        self.buckets[idx].as_deref().map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let idx = self.find(key)?;
        self.buckets[idx].as_deref_mut().map(|slot| &mut slot.value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// Inserts or overwrites `key`. Returns the previous value if the key
    /// was already present.
    ///
    /// A collision with a different key doubles the bucket array until
    /// the two hashes separate.
    pub fn store(&mut self, key: Bytes, value: V) -> Option<V> {
        let hash = hash_key(&key);
        loop {
            let idx = bucket_index(hash, self.bits);
            let occupant = self.buckets[idx]
                .as_deref()
                .map(|slot| (slot.hash, slot.key == key));
            match occupant {
                None => {
                    self.buckets[idx] = Some(Box::new(Slot { key, hash, value }));
                    self.count += 1;
                    return None;
                }
                Some((_, true)) => {
                    let slot = self.buckets[idx]
                        .as_deref_mut()
                        .expect("occupied bucket checked above");
                    return Some(mem::replace(&mut slot.value, value));
                }
                Some((other, false)) => {
                    assert_ne!(
                        other, hash,
                        "two distinct keys share the same 64-bit hash; buckets can never separate them"
                    );
                    self.resize(self.bits + 1);
                }
            }
        }
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// Once more than half the bucket count has been removed since the
    /// last shrink, tries to halve the table.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let idx = self.find(key)?;
        let slot = self.buckets[idx].take()?;
        self.count -= 1;
        self.removals += 1;
        if self.removals > self.buckets.len() / 2 {
            self.try_shrink();
        }
        Some(slot.value)
    }

    /// Drops every entry and returns to the minimum size.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Halves the table unless that would put two live entries in the
    /// same bucket, or the table is already at the floor.
    fn try_shrink(&mut self) {
        if self.bits <= MIN_BITS {
            return;
        }
        let blocked = self
            .buckets
            .chunks_exact(2)
            .any(|pair| pair[0].is_some() && pair[1].is_some());
        if blocked {
            return;
        }
        self.resize(self.bits - 1);
        self.removals = 0;
    }

    /// Rebuilds the bucket array at `1 << bits` buckets.
    fn resize(&mut self, bits: u32) {
        let mut buckets = empty_buckets(1 << bits);
        for slot in self.buckets.drain(..).flatten() {
            let idx = bucket_index(slot.hash, bits);
            if buckets[idx].is_some() {
                panic!(
                    "dictionary invariant violated: bucket {idx} already occupied while resizing to {} buckets",
                    1usize << bits
                );
            }
            buckets[idx] = Some(slot);
        }
        debug!(
            from = 1usize << self.bits,
            to = 1usize << bits,
            entries = self.count,
            "dictionary resized"
        );
        self.buckets = buckets;
        self.bits = bits;
    }

    /// Iterates entries in bucket order. Restart by calling again.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.buckets
            .iter()
            .filter_map(|bucket| bucket.as_deref().map(|slot| (&slot.key, &slot.value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Bytes, &mut V)> {
        self.buckets.iter_mut().filter_map(|bucket| {
            bucket
                .as_deref_mut()
                .map(|slot| (&slot.key, &mut slot.value))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Visits buckets starting at `cursor` until `limit` entries have been
    /// collected or the table wraps. Returns the cursor to resume from,
    /// or 0 when the scan is complete.
    ///
    /// Every entry present for the whole duration of a scan is returned
    /// at least once, even if the table grows or shrinks between calls.
    /// Entries may be returned more than once.
    pub fn scan(&self, cursor: u64, limit: usize) -> (u64, Vec<(&Bytes, &V)>) {
        let limit = limit.max(1);
        let mut items = Vec::with_capacity(limit.min(self.count));
        let mut cursor = cursor;
        loop {
            let idx = cursor_to_index(cursor, self.bits);
            if let Some(slot) = self.buckets[idx].as_deref() {
                items.push((&slot.key, &slot.value));
            }
            cursor = next_cursor(cursor, self.bits);
            if cursor == 0 || items.len() >= limit {
                return (cursor, items);
            }
        }
    }

    /// Like [`scan`](Self::scan), but maps each visited entry through `f`
    /// and keeps only the `Some` results. The cursor still advances by
    /// buckets, so a filter that rejects everything can return an empty
    /// batch with a non-zero cursor.
    pub fn scan_filter<T>(
        &self,
        cursor: u64,
        limit: usize,
        mut f: impl FnMut(&Bytes, &V) -> Option<T>,
    ) -> (u64, Vec<T>) {
        let (next, items) = self.scan(cursor, limit);
        let kept = items
            .into_iter()
            .filter_map(|(key, value)| f(key, value))
            .collect();
        (next, kept)
    }

    /// Picks `n` random entries, possibly repeating some.
    ///
    /// A random bucket is chosen and the first occupied bucket at or
    /// after it is taken, so entries after long empty runs are favored.
    pub fn pick_random_items(&self, n: usize) -> Vec<(&Bytes, &V)> {
        if self.count == 0 {
            return Vec::new();
        }
        let mut rng = rand::rng();
        (0..n)
            .map(|_| {
                let idx = self.occupied_from(rng.random_range(0..self.buckets.len()));
                self.entry_at(idx)
            })
            .collect()
    }

    /// Picks up to `n` distinct random entries (at most `len()`).
    pub fn pick_unique_random_items(&self, n: usize) -> Vec<(&Bytes, &V)> {
        let want = n.min(self.count);
        if want == 0 {
            return Vec::new();
        }
        let mut rng = rand::rng();

        // asking for most of the table: shuffle everything instead of
        // hunting for the last few unseen buckets
        if want * 2 >= self.count {
            let mut all: Vec<_> = self.iter().collect();
            all.shuffle(&mut rng);
            all.truncate(want);
            return all;
        }

        let mut seen = AHashSet::with_capacity(want);
        let mut picked = Vec::with_capacity(want);
        while picked.len() < want {
            let idx = self.occupied_from(rng.random_range(0..self.buckets.len()));
            if seen.insert(idx) {
                picked.push(self.entry_at(idx));
            }
        }
        picked
    }

    /// First occupied bucket at or after `start`, wrapping. Requires a
    /// non-empty table.
    fn occupied_from(&self, start: usize) -> usize {
        let len = self.buckets.len();
        (0..len)
            .map(|offset| (start + offset) & (len - 1))
            .find(|&idx| self.buckets[idx].is_some())
            .expect("occupied_from called on an empty dictionary")
    }

    fn entry_at(&self, idx: usize) -> (&Bytes, &V) {
        let slot = self.buckets[idx]
            .as_deref()
            .expect("entry_at called on an empty bucket");
        (&slot.key, &slot.value)
    }
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for Dict<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V> IntoIterator for Dict<V> {
    type Item = (Bytes, V);
    type IntoIter = IntoIter<V>;

    fn into_iter(self) -> IntoIter<V> {
        IntoIter {
            buckets: self.buckets.into_iter(),
        }
    }
}

/// Owning iterator over a dictionary's entries, in bucket order.
pub struct IntoIter<V> {
    buckets: std::vec::IntoIter<Option<Box<Slot<V>>>>,
}

impl<V> Iterator for IntoIter<V> {
    type Item = (Bytes, V);

    fn next(&mut self) -> Option<(Bytes, V)> {
        self.buckets.by_ref().flatten().next().map(|slot| {
            let Slot { key, value, .. } = *slot;
            (key, value)
        })
    }
}

impl<V> FromIterator<(Bytes, V)> for Dict<V> {
    fn from_iter<I: IntoIterator<Item = (Bytes, V)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (key, value) in iter {
            dict.store(key, value);
        }
        dict
    }
}

fn empty_buckets<V>(len: usize) -> Vec<Option<Box<Slot<V>>>> {
    std::iter::repeat_with(|| None).take(len).collect()
}
