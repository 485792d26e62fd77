use super::*;

use crate::types::{normalize_range, resolve_index, End};

impl Keyspace {
    /// Pushes values onto one end of a list, creating it unless
    /// `only_if_exists` is set (LPUSHX/RPUSHX). Returns the new length,
    /// or 0 when the key was missing and not created.
    ///
    /// Waiters blocked on the key are woken, one per pushed element.
    pub fn push(
        &mut self,
        key: &[u8],
        values: &[Bytes],
        end: End,
        only_if_exists: bool,
    ) -> Result<usize, WrongType> {
        let is_new = self.ensure_collection_type(key, ValueKind::List)?;
        if is_new && only_if_exists {
            return Ok(0);
        }
        if is_new {
            self.insert_value(Bytes::copy_from_slice(key), new_list(), time::NO_EXPIRY);
        }

        let Some(entry) = self.entries.get_mut(key) else {
            unreachable!("list inserted or verified above");
        };
        let Value::List(ref mut items) = entry.value else {
            unreachable!("type verified by ensure_collection_type");
        };
        for value in values {
            match end {
                End::Left => items.push_front(value.clone()),
                End::Right => items.push_back(value.clone()),
            }
        }
        let len = items.len();
        stamp(&mut self.next_id, entry);

        self.waiters.unblock(key, values.len());
        Ok(len)
    }

    /// Pops one element. `Ok(None)` if the key doesn't exist.
    pub fn pop(&mut self, key: &[u8], end: End) -> Result<Option<Bytes>, WrongType> {
        Ok(self
            .pop_count(key, end, 1)?
            .and_then(|mut items| items.pop()))
    }

    /// Pops up to `count` elements. `Ok(None)` if the key doesn't exist.
    pub fn pop_count(
        &mut self,
        key: &[u8],
        end: End,
        count: usize,
    ) -> Result<Option<Vec<Bytes>>, WrongType> {
        self.remove_if_expired(key);
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let Value::List(ref mut items) = entry.value else {
            return Err(WrongType);
        };
        let take = count.min(items.len());
        let popped: Vec<Bytes> = match end {
            End::Left => items.drain(..take).collect(),
            End::Right => (0..take).filter_map(|_| items.pop_back()).collect(),
        };
        if !popped.is_empty() {
            stamp(&mut self.next_id, entry);
        }
        self.remove_if_empty(key);
        Ok(Some(popped))
    }

    /// Pops from the first non-empty list among `keys`, as BLPOP/BRPOP
    /// attempt before blocking. A wrong-typed key fails the whole call.
    pub fn pop_first(
        &mut self,
        keys: &[Bytes],
        end: End,
    ) -> Result<Option<(Bytes, Bytes)>, WrongType> {
        for key in keys {
            if let Some(value) = self.pop(key, end)? {
                return Ok(Some((key.clone(), value)));
            }
        }
        Ok(None)
    }

    pub fn llen(&mut self, key: &[u8]) -> Result<usize, WrongType> {
        match self.live_mut(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::List(items) => Ok(items.len()),
                _ => Err(WrongType),
            },
        }
    }

    /// Elements in the inclusive range `[start, stop]`; negative indices
    /// count from the tail.
    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, WrongType> {
        match self.live_mut(key) {
            None => Ok(vec![]),
            Some(entry) => match &entry.value {
                Value::List(items) => Ok(match normalize_range(start, stop, items.len()) {
                    Some((s, e)) => items.range(s..=e).cloned().collect(),
                    None => vec![],
                }),
                _ => Err(WrongType),
            },
        }
    }

    pub fn lindex(&mut self, key: &[u8], index: i64) -> Result<Option<Bytes>, WrongType> {
        match self.live_mut(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::List(items) => {
                    Ok(resolve_index(index, items.len()).and_then(|i| items.get(i).cloned()))
                }
                _ => Err(WrongType),
            },
        }
    }

    pub fn lset(&mut self, key: &[u8], index: i64, value: Bytes) -> Result<(), CommandError> {
        self.remove_if_expired(key);
        let entry = self
            .entries
            .get_mut(key)
            .ok_or(CommandError::NoSuchKey)?;
        let Value::List(ref mut items) = entry.value else {
            return Err(CommandError::WrongType);
        };
        let idx = resolve_index(index, items.len()).ok_or(CommandError::IndexOutOfRange)?;
        items[idx] = value;
        stamp(&mut self.next_id, entry);
        Ok(())
    }

    /// Removes occurrences of `element`: the first `count` from the head
    /// when positive, from the tail when negative, all when zero.
    pub fn lrem(&mut self, key: &[u8], count: i64, element: &[u8]) -> Result<usize, WrongType> {
        self.remove_if_expired(key);
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::List(ref mut items) = entry.value else {
            return Err(WrongType);
        };

        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0;
        if count >= 0 {
            let mut i = 0;
            while i < items.len() && removed < limit {
                if items[i] == element {
                    items.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = items.len();
            while i > 0 && removed < limit {
                i -= 1;
                if items[i] == element {
                    items.remove(i);
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            stamp(&mut self.next_id, entry);
        }
        self.remove_if_empty(key);
        Ok(removed)
    }

    /// Keeps only the inclusive range `[start, stop]`.
    pub fn ltrim(&mut self, key: &[u8], start: i64, stop: i64) -> Result<(), WrongType> {
        self.remove_if_expired(key);
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(());
        };
        let Value::List(ref mut items) = entry.value else {
            return Err(WrongType);
        };
        match normalize_range(start, stop, items.len()) {
            Some((s, e)) => {
                items.truncate(e + 1);
                items.drain(..s);
            }
            None => items.clear(),
        }
        stamp(&mut self.next_id, entry);
        self.remove_if_empty(key);
        Ok(())
    }

    /// Inserts `element` before or after the first `pivot`. Returns the
    /// new length, -1 if the pivot wasn't found, 0 if the key is missing.
    pub fn linsert(
        &mut self,
        key: &[u8],
        before: bool,
        pivot: &[u8],
        element: Bytes,
    ) -> Result<i64, WrongType> {
        self.remove_if_expired(key);
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::List(ref mut items) = entry.value else {
            return Err(WrongType);
        };
        let Some(pos) = items.iter().position(|item| item == pivot) else {
            return Ok(-1);
        };
        items.insert(if before { pos } else { pos + 1 }, element);
        let len = items.len();
        stamp(&mut self.next_id, entry);
        self.waiters.unblock(key, 1);
        Ok(len as i64)
    }

    /// Atomically pops from one list and pushes onto another (LMOVE,
    /// RPOPLPUSH). Both keys are type-checked before anything moves.
    /// Returns the moved element, `Ok(None)` if the source is empty.
    pub fn lmove(
        &mut self,
        src: &[u8],
        dst: &[u8],
        from: End,
        to: End,
    ) -> Result<Option<Bytes>, WrongType> {
        self.remove_if_expired(src);
        match self.entries.get(src) {
            None => return Ok(None),
            Some(entry) if entry.value.kind() != ValueKind::List => return Err(WrongType),
            Some(_) => {}
        }
        self.ensure_collection_type(dst, ValueKind::List)?;

        let Some(value) = self.pop(src, from)? else {
            return Ok(None);
        };
        self.push(dst, std::slice::from_ref(&value), to, false)?;
        Ok(Some(value))
    }
}
