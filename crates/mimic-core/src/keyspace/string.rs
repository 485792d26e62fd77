use super::*;

/// NX / XX condition on SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    #[default]
    Always,
    /// Only set if the key does not exist (NX).
    IfAbsent,
    /// Only set if the key already exists (XX).
    IfPresent,
}

/// What SET does with the key's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetExpiry {
    /// Drop any existing TTL (plain SET).
    #[default]
    Clear,
    /// KEEPTTL.
    Keep,
    /// Absolute unix-ms deadline, from EX/PX/EXAT/PXAT.
    At(u64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub condition: SetCondition,
    pub expiry: SetExpiry,
    /// Return the old string value (SET ... GET, GETSET).
    pub get: bool,
}

/// Result of a SET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// False when an NX/XX condition blocked the write.
    pub written: bool,
    /// The old value, when `get` was requested and one existed.
    pub previous: Option<Bytes>,
}

pub(super) fn parse_i64(data: &[u8]) -> Option<i64> {
    if data.first() == Some(&b'+') {
        return None;
    }
    std::str::from_utf8(data).ok()?.parse().ok()
}

pub(super) fn parse_f64(data: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(data).ok()?;
    if text.is_empty() || text.trim() != text {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| !v.is_nan())
}

impl Keyspace {
    /// Returns the string at `key`, `Ok(None)` if absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, WrongType> {
        match self.live_mut(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::String(data) => Ok(Some(data.clone())),
                _ => Err(WrongType),
            },
        }
    }

    /// Stores a string, honoring NX/XX, expiry and GET options.
    ///
    /// With `get` set, a non-string old value is a type error and nothing
    /// is written.
    pub fn set(
        &mut self,
        key: Bytes,
        value: Bytes,
        opts: &SetOptions,
    ) -> Result<SetOutcome, WrongType> {
        self.remove_if_expired(&key);
        let existing = self.entries.get(&key);

        let previous = match existing {
            Some(entry) if opts.get => match &entry.value {
                Value::String(data) => Some(data.clone()),
                _ => return Err(WrongType),
            },
            _ => None,
        };

        let allowed = match opts.condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => existing.is_none(),
            SetCondition::IfPresent => existing.is_some(),
        };
        if !allowed {
            return Ok(SetOutcome {
                written: false,
                previous,
            });
        }

        let expires_at_ms = match opts.expiry {
            SetExpiry::Clear => time::NO_EXPIRY,
            SetExpiry::Keep => existing.map_or(time::NO_EXPIRY, |e| e.expires_at_ms),
            SetExpiry::At(at) => at,
        };
        self.insert_value(key, Value::String(value), expires_at_ms);
        Ok(SetOutcome {
            written: true,
            previous,
        })
    }

    /// Returns the string at `key` and deletes it.
    pub fn getdel(&mut self, key: &[u8]) -> Result<Option<Bytes>, WrongType> {
        let value = self.get(key)?;
        if value.is_some() {
            self.entries.remove(key);
        }
        Ok(value)
    }

    /// Values for several keys; wrong-typed keys read as absent.
    pub fn mget(&mut self, keys: &[Bytes]) -> Vec<Option<Bytes>> {
        keys.iter()
            .map(|key| self.get(key).ok().flatten())
            .collect()
    }

    /// Sets several keys at once, clearing their TTLs.
    pub fn mset(&mut self, pairs: Vec<(Bytes, Bytes)>) {
        for (key, value) in pairs {
            self.insert_value(key, Value::String(value), time::NO_EXPIRY);
        }
    }

    /// Overwrites a string in place, keeping its TTL, or creates it.
    fn write_string(&mut self, key: &[u8], data: Bytes) {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = Value::String(data);
                stamp(&mut self.next_id, entry);
            }
            None => {
                self.insert_value(Bytes::copy_from_slice(key), Value::String(data), time::NO_EXPIRY)
            }
        }
    }

    /// Adds `delta` to the integer stored at `key`, treating a missing
    /// key as 0. Returns the new value.
    pub fn incr_by(&mut self, key: &[u8], delta: i64) -> Result<i64, CommandError> {
        self.remove_if_expired(key);
        let current = match self.entries.get(key) {
            None => 0,
            Some(entry) => match &entry.value {
                Value::String(data) => parse_i64(data).ok_or(CommandError::NotAnInteger)?,
                _ => return Err(CommandError::WrongType),
            },
        };
        let updated = current.checked_add(delta).ok_or(CommandError::Overflow)?;
        self.write_string(key, Bytes::from(updated.to_string()));
        Ok(updated)
    }

    /// Adds a float to the number stored at `key`. Returns the new value
    /// formatted as it is stored.
    pub fn incr_by_float(&mut self, key: &[u8], delta: f64) -> Result<Bytes, CommandError> {
        self.remove_if_expired(key);
        let current = match self.entries.get(key) {
            None => 0.0,
            Some(entry) => match &entry.value {
                Value::String(data) => parse_f64(data).ok_or(CommandError::NotAFloat)?,
                _ => return Err(CommandError::WrongType),
            },
        };
        let updated = current + delta;
        if !updated.is_finite() {
            return Err(CommandError::NanOrInfinity);
        }
        let text = Bytes::from(format_float(updated));
        self.write_string(key, text.clone());
        Ok(text)
    }

    /// Appends to a string, creating it if needed. Returns the new length.
    pub fn append(&mut self, key: &[u8], data: &[u8]) -> Result<usize, WrongType> {
        self.remove_if_expired(key);
        let joined = match self.entries.get(key) {
            None => Bytes::copy_from_slice(data),
            Some(entry) => match &entry.value {
                Value::String(existing) => {
                    let mut buf = Vec::with_capacity(existing.len() + data.len());
                    buf.extend_from_slice(existing);
                    buf.extend_from_slice(data);
                    Bytes::from(buf)
                }
                _ => return Err(WrongType),
            },
        };
        let len = joined.len();
        self.write_string(key, joined);
        Ok(len)
    }

    /// Length of the string at `key`, 0 if absent.
    pub fn strlen(&mut self, key: &[u8]) -> Result<usize, WrongType> {
        Ok(self.get(key)?.map_or(0, |data| data.len()))
    }
}
