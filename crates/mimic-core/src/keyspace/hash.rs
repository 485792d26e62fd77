use super::string::{parse_f64, parse_i64};
use super::*;

impl Keyspace {
    /// Runs `f` against the hash at `key`, if one exists.
    fn with_hash<T>(
        &mut self,
        key: &[u8],
        missing: T,
        f: impl FnOnce(&Dict<Bytes>) -> T,
    ) -> Result<T, WrongType> {
        match self.live_mut(key) {
            None => Ok(missing),
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(f(map)),
                _ => Err(WrongType),
            },
        }
    }

    /// Mutable access to the hash at `key`, creating it when `create` is
    /// set. The entry is re-stamped when `f` reports a change.
    fn write_hash<T>(
        &mut self,
        key: &[u8],
        f: impl FnOnce(&mut Dict<Bytes>) -> (T, bool),
    ) -> Result<T, WrongType> {
        if self.ensure_collection_type(key, ValueKind::Hash)? {
            self.insert_value(
                Bytes::copy_from_slice(key),
                Value::Hash(Dict::new()),
                time::NO_EXPIRY,
            );
        }
        let Some(entry) = self.entries.get_mut(key) else {
            unreachable!("hash inserted or verified above");
        };
        let Value::Hash(ref mut map) = entry.value else {
            unreachable!("type verified by ensure_collection_type");
        };
        let (result, changed) = f(map);
        if changed {
            stamp(&mut self.next_id, entry);
        }
        self.remove_if_empty(key);
        Ok(result)
    }

    /// Sets fields. Returns how many were newly created.
    pub fn hset(&mut self, key: &[u8], pairs: &[(Bytes, Bytes)]) -> Result<usize, WrongType> {
        self.write_hash(key, |map| {
            let added = pairs
                .iter()
                .filter(|(field, value)| map.store(field.clone(), value.clone()).is_none())
                .count();
            (added, !pairs.is_empty())
        })
    }

    /// Sets a field only if it doesn't exist yet.
    pub fn hsetnx(&mut self, key: &[u8], field: Bytes, value: Bytes) -> Result<bool, WrongType> {
        self.write_hash(key, |map| {
            if map.contains_key(&field) {
                (false, false)
            } else {
                map.store(field, value);
                (true, true)
            }
        })
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, WrongType> {
        self.with_hash(key, None, |map| map.get(field).cloned())
    }

    pub fn hmget(&mut self, key: &[u8], fields: &[Bytes]) -> Result<Vec<Option<Bytes>>, WrongType> {
        self.with_hash(key, vec![None; fields.len()], |map| {
            fields.iter().map(|f| map.get(f).cloned()).collect()
        })
    }

    /// Removes fields. Returns how many existed. Drops the key when the
    /// hash empties.
    pub fn hdel(&mut self, key: &[u8], fields: &[Bytes]) -> Result<usize, WrongType> {
        self.remove_if_expired(key);
        if !self.entries.contains_key(key) {
            return Ok(0);
        }
        self.write_hash(key, |map| {
            let removed = fields.iter().filter(|f| map.remove(f).is_some()).count();
            (removed, removed > 0)
        })
    }

    pub fn hexists(&mut self, key: &[u8], field: &[u8]) -> Result<bool, WrongType> {
        self.with_hash(key, false, |map| map.contains_key(field))
    }

    pub fn hlen(&mut self, key: &[u8]) -> Result<usize, WrongType> {
        self.with_hash(key, 0, |map| map.len())
    }

    pub fn hstrlen(&mut self, key: &[u8], field: &[u8]) -> Result<usize, WrongType> {
        self.with_hash(key, 0, |map| map.get(field).map_or(0, |v| v.len()))
    }

    pub fn hkeys(&mut self, key: &[u8]) -> Result<Vec<Bytes>, WrongType> {
        self.with_hash(key, vec![], |map| map.keys().cloned().collect())
    }

    pub fn hvals(&mut self, key: &[u8]) -> Result<Vec<Bytes>, WrongType> {
        self.with_hash(key, vec![], |map| map.values().cloned().collect())
    }

    pub fn hgetall(&mut self, key: &[u8]) -> Result<Vec<(Bytes, Bytes)>, WrongType> {
        self.with_hash(key, vec![], |map| {
            map.iter().map(|(f, v)| (f.clone(), v.clone())).collect()
        })
    }

    /// Adds an integer to a field, treating a missing field as 0.
    pub fn hincrby(&mut self, key: &[u8], field: &[u8], delta: i64) -> Result<i64, CommandError> {
        let current = match self.hget(key, field)? {
            None => 0,
            Some(data) => parse_i64(&data).ok_or(CommandError::HashNotAnInteger)?,
        };
        let updated = current.checked_add(delta).ok_or(CommandError::Overflow)?;
        let field = Bytes::copy_from_slice(field);
        self.write_hash(key, |map| {
            map.store(field, Bytes::from(updated.to_string()));
            ((), true)
        })?;
        Ok(updated)
    }

    /// Adds a float to a field. Returns the stored text.
    pub fn hincrbyfloat(&mut self, key: &[u8], field: &[u8], delta: f64) -> Result<Bytes, CommandError> {
        let current = match self.hget(key, field)? {
            None => 0.0,
            Some(data) => parse_f64(&data).ok_or(CommandError::HashNotAFloat)?,
        };
        let updated = current + delta;
        if !updated.is_finite() {
            return Err(CommandError::NanOrInfinity);
        }
        let text = Bytes::from(format_float(updated));
        let field = Bytes::copy_from_slice(field);
        let stored = text.clone();
        self.write_hash(key, |map| {
            map.store(field, stored);
            ((), true)
        })?;
        Ok(text)
    }

    /// One HSCAN step over the fields of a hash.
    pub fn hscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
        pattern: Option<&GlobPattern>,
    ) -> Result<(u64, Vec<(Bytes, Bytes)>), WrongType> {
        self.with_hash(key, (0, vec![]), |map| {
            map.scan_filter(cursor, count, |field, value| {
                pattern
                    .map_or(true, |p| p.matches(field))
                    .then(|| (field.clone(), value.clone()))
            })
        })
    }

    /// Random fields. A non-negative `count` returns distinct fields, at
    /// most the hash's size; a negative one returns exactly `|count|`
    /// fields, possibly repeated.
    pub fn hrandfield(&mut self, key: &[u8], count: i64) -> Result<Vec<(Bytes, Bytes)>, WrongType> {
        self.with_hash(key, vec![], |map| {
            let picked = if count >= 0 {
                map.pick_unique_random_items(count as usize)
            } else {
                map.pick_random_items(count.unsigned_abs() as usize)
            };
            picked
                .into_iter()
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect()
        })
    }
}
