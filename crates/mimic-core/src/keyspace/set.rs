use super::*;

/// How SINTER, SUNION and SDIFF combine their inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAlgebra {
    Inter,
    Union,
    Diff,
}

impl Keyspace {
    fn with_set<T>(
        &mut self,
        key: &[u8],
        missing: T,
        f: impl FnOnce(&Dict<()>) -> T,
    ) -> Result<T, WrongType> {
        match self.live_mut(key) {
            None => Ok(missing),
            Some(entry) => match &entry.value {
                Value::Set(members) => Ok(f(members)),
                _ => Err(WrongType),
            },
        }
    }

    /// Mutates an existing set. `f` reports whether it changed anything.
    fn write_existing_set<T>(
        &mut self,
        key: &[u8],
        missing: T,
        f: impl FnOnce(&mut Dict<()>) -> (T, bool),
    ) -> Result<T, WrongType> {
        if self.ensure_collection_type(key, ValueKind::Set)? {
            return Ok(missing);
        }
        let Some(entry) = self.entries.get_mut(key) else {
            unreachable!("existence verified by ensure_collection_type");
        };
        let Value::Set(ref mut members) = entry.value else {
            unreachable!("type verified by ensure_collection_type");
        };
        let (result, changed) = f(members);
        if changed {
            stamp(&mut self.next_id, entry);
        }
        self.remove_if_empty(key);
        Ok(result)
    }

    /// Adds members, creating the set if needed. Returns how many were new.
    pub fn sadd(&mut self, key: &[u8], members: &[Bytes]) -> Result<usize, WrongType> {
        if self.ensure_collection_type(key, ValueKind::Set)? && !members.is_empty() {
            self.insert_value(
                Bytes::copy_from_slice(key),
                Value::Set(Dict::new()),
                time::NO_EXPIRY,
            );
        }
        self.write_existing_set(key, 0, |set| {
            let added = members
                .iter()
                .filter(|m| set.store((*m).clone(), ()).is_none())
                .count();
            (added, added > 0)
        })
    }

    /// Removes members. Returns how many were present.
    pub fn srem(&mut self, key: &[u8], members: &[Bytes]) -> Result<usize, WrongType> {
        self.write_existing_set(key, 0, |set| {
            let removed = members.iter().filter(|m| set.remove(m).is_some()).count();
            (removed, removed > 0)
        })
    }

    pub fn smembers(&mut self, key: &[u8]) -> Result<Vec<Bytes>, WrongType> {
        self.with_set(key, vec![], |set| set.keys().cloned().collect())
    }

    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> Result<bool, WrongType> {
        self.with_set(key, false, |set| set.contains_key(member))
    }

    pub fn smismember(&mut self, key: &[u8], members: &[Bytes]) -> Result<Vec<bool>, WrongType> {
        self.with_set(key, vec![false; members.len()], |set| {
            members.iter().map(|m| set.contains_key(m)).collect()
        })
    }

    pub fn scard(&mut self, key: &[u8]) -> Result<usize, WrongType> {
        self.with_set(key, 0, |set| set.len())
    }

    /// Removes and returns up to `count` distinct random members.
    pub fn spop(&mut self, key: &[u8], count: usize) -> Result<Vec<Bytes>, WrongType> {
        self.write_existing_set(key, vec![], |set| {
            let picked: Vec<Bytes> = set
                .pick_unique_random_items(count)
                .into_iter()
                .map(|(m, _)| m.clone())
                .collect();
            for member in &picked {
                set.remove(member);
            }
            let changed = !picked.is_empty();
            (picked, changed)
        })
    }

    /// Random members without removal. Negative counts may repeat.
    pub fn srandmember(&mut self, key: &[u8], count: i64) -> Result<Vec<Bytes>, WrongType> {
        self.with_set(key, vec![], |set| {
            let picked = if count >= 0 {
                set.pick_unique_random_items(count as usize)
            } else {
                set.pick_random_items(count.unsigned_abs() as usize)
            };
            picked.into_iter().map(|(m, _)| m.clone()).collect()
        })
    }

    /// Moves `member` from `src` to `dst`. Both keys are type-checked
    /// before anything changes. Returns `false` if `member` wasn't in
    /// `src`.
    pub fn smove(&mut self, src: &[u8], dst: &[u8], member: &[u8]) -> Result<bool, WrongType> {
        let src_missing = self.ensure_collection_type(src, ValueKind::Set)?;
        self.ensure_collection_type(dst, ValueKind::Set)?;
        if src_missing || !self.sismember(src, member)? {
            return Ok(false);
        }
        if src == dst {
            return Ok(true);
        }
        let member = Bytes::copy_from_slice(member);
        self.srem(src, std::slice::from_ref(&member))?;
        self.sadd(dst, std::slice::from_ref(&member))?;
        Ok(true)
    }

    /// Combines the sets at `keys`. Missing keys count as empty sets; a
    /// key of another type fails the whole call.
    pub fn set_algebra(&mut self, op: SetAlgebra, keys: &[Bytes]) -> Result<Vec<Bytes>, WrongType> {
        let mut inputs: Vec<Vec<Bytes>> = Vec::with_capacity(keys.len());
        for key in keys {
            inputs.push(self.smembers(key)?);
        }
        let Some((first, rest)) = inputs.split_first() else {
            return Ok(vec![]);
        };
        let result = match op {
            SetAlgebra::Union => {
                let acc: Dict<()> = inputs.iter().flatten().map(|m| (m.clone(), ())).collect();
                acc.into_iter().map(|(m, _)| m).collect()
            }
            SetAlgebra::Inter => {
                let others: Vec<Dict<()>> = rest.iter().map(|set| to_dict(set)).collect();
                first
                    .iter()
                    .filter(|m| others.iter().all(|set| set.contains_key(m)))
                    .cloned()
                    .collect()
            }
            SetAlgebra::Diff => {
                let others: Vec<Dict<()>> = rest.iter().map(|set| to_dict(set)).collect();
                first
                    .iter()
                    .filter(|m| !others.iter().any(|set| set.contains_key(m)))
                    .cloned()
                    .collect()
            }
        };
        Ok(result)
    }

    /// One SSCAN step over the members of a set.
    pub fn sscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
        pattern: Option<&GlobPattern>,
    ) -> Result<(u64, Vec<Bytes>), WrongType> {
        self.with_set(key, (0, vec![]), |set| {
            set.scan_filter(cursor, count, |member, _| {
                pattern
                    .map_or(true, |p| p.matches(member))
                    .then(|| member.clone())
            })
        })
    }
}

fn to_dict(members: &[Bytes]) -> Dict<()> {
    members.iter().map(|m| (m.clone(), ())).collect()
}
