//! Command execution: maps each parsed [`Command`] onto the keyspace
//! API and shapes the reply frame.

use std::fmt::Display;

use bytes::Bytes;
use mimic_core::time;
use mimic_core::{
    blocking_move, blocking_pop, CommandError, End, GlobPattern, SetAlgebra, SetCondition,
    SetExpiry, SetOptions, TtlResult, ValueKind,
};
use mimic_protocol::{Command, ExpireUnit, Frame, ListEnd, ProtocolError, SetExpire, SetOp};

use crate::connection::{unknown_command, Connection};

/// SCAN-family COUNT when the client doesn't give one.
const DEFAULT_SCAN_COUNT: usize = 10;

impl Connection {
    /// Runs one command against the session. Blocking commands park
    /// here until data, timeout, or an interrupt.
    pub(crate) async fn execute(&mut self, cmd: Command) -> Frame {
        match cmd {
            // --- connection ---
            Command::Ping(None) => Frame::Simple("PONG".into()),
            Command::Ping(Some(msg)) | Command::Echo(msg) => Frame::Bulk(msg),
            Command::Select { index } => reply(self.session.select(index), |()| Frame::ok()),
            Command::Quit => Frame::ok(),
            Command::ClientId => Frame::Integer(self.client.id() as i64),
            Command::ClientKill { id } => Frame::Integer(self.ctx.clients.kill(id) as i64),
            Command::ClientUnblock { id, error } => {
                Frame::Integer(self.ctx.clients.unblock(id, error) as i64)
            }

            // --- server ---
            Command::Save => match self.ctx.snapshot_dir.clone() {
                Some(dir) => match self.session.save(&dir) {
                    Ok(_) => Frame::ok(),
                    Err(e) => Frame::Error(format!("ERR snapshot failed: {e}")),
                },
                None => Frame::Error("ERR no snapshot directory configured".into()),
            },
            Command::DbSize => Frame::Integer(self.session.run(|ks| ks.len()) as i64),
            Command::FlushDb => {
                self.session.run(|ks| ks.flush());
                Frame::ok()
            }
            Command::FlushAll => {
                self.session.flush_all();
                Frame::ok()
            }
            Command::SwapDb { a, b } => {
                let dbs = self
                    .session
                    .check_db(a)
                    .and_then(|a| Ok((a, self.session.check_db(b)?)));
                reply(dbs, |(a, b)| {
                    self.session.swap_db(a, b);
                    Frame::ok()
                })
            }

            // --- transactions (only reachable out of place) ---
            Command::Multi => Frame::Error("ERR MULTI calls can not be nested".into()),
            Command::Exec => Frame::Error("ERR EXEC without MULTI".into()),
            Command::Discard => Frame::Error("ERR DISCARD without MULTI".into()),
            Command::Watch { .. } => {
                Frame::Error("ERR WATCH inside MULTI is not allowed".into())
            }
            Command::Unwatch => {
                self.session.unwatch();
                Frame::ok()
            }

            // --- keys ---
            Command::Del { keys } => {
                let removed = self
                    .session
                    .run(|ks| keys.iter().filter(|key| ks.del(key)).count());
                Frame::Integer(removed as i64)
            }
            Command::Exists { keys } => {
                let found = self
                    .session
                    .run(|ks| keys.iter().filter(|key| ks.exists(key)).count());
                Frame::Integer(found as i64)
            }
            Command::Type { key } => {
                let kind = self.session.run(|ks| ks.value_kind(&key));
                Frame::Simple(kind.map_or("none", ValueKind::as_str).into())
            }
            Command::Expire { key, amount, unit } => match expire_deadline(amount, unit) {
                Ok(at) => Frame::Integer(self.session.run(|ks| ks.expire_at(&key, at)) as i64),
                Err(e) => protocol_error(e),
            },
            Command::Ttl { key, millis } => {
                let ttl = self.session.run(|ks| {
                    if millis {
                        ks.pttl(&key)
                    } else {
                        ks.ttl(&key)
                    }
                });
                Frame::Integer(match ttl {
                    TtlResult::Remaining(n) => n as i64,
                    TtlResult::NoExpiry => -1,
                    TtlResult::NotFound => -2,
                })
            }
            Command::Persist { key } => {
                Frame::Integer(self.session.run(|ks| ks.persist(&key)) as i64)
            }
            Command::Rename { key, newkey } => {
                reply(self.session.run(|ks| ks.rename(&key, newkey)), |()| {
                    Frame::ok()
                })
            }
            Command::RenameNx { key, newkey } => {
                reply(self.session.run(|ks| ks.renamenx(&key, newkey)), flag)
            }
            Command::Copy {
                src,
                dst,
                db,
                replace,
            } => {
                let dst_db = match db.map(|index| self.session.check_db(index)).transpose() {
                    Ok(dst_db) => dst_db,
                    Err(e) => return command_error(e),
                };
                reply(self.session.copy_key(&src, dst, dst_db, replace), flag)
            }
            Command::Move { key, db } => {
                let moved = self
                    .session
                    .check_db(db)
                    .and_then(|db| self.session.move_key(&key, db));
                reply(moved, flag)
            }
            Command::Keys { pattern } => Frame::bulk_array(self.session.run(|ks| ks.keys(&pattern))),
            Command::Scan {
                cursor,
                pattern,
                count,
                kind,
            } => {
                let kind = match kind {
                    Some(name) => match ValueKind::from_name(&name) {
                        Some(kind) => Some(kind),
                        None => {
                            return Frame::Error(format!(
                                "ERR unknown type name '{}'",
                                String::from_utf8_lossy(&name)
                            ))
                        }
                    },
                    None => None,
                };
                let pattern = pattern.map(|p| GlobPattern::new(&p));
                let count = count.unwrap_or(DEFAULT_SCAN_COUNT);
                let (next, keys) = self
                    .session
                    .run(|ks| ks.scan_keys(cursor, count, pattern.as_ref(), kind));
                scan_reply(next, keys.into_iter().map(Frame::Bulk).collect())
            }
            Command::RandomKey => Frame::optional_bulk(self.session.run(|ks| ks.random_key())),

            // --- strings ---
            Command::Get { key } => reply(self.session.run(|ks| ks.get(&key)), Frame::optional_bulk),
            Command::Set {
                key,
                value,
                nx,
                xx,
                expire,
                keep_ttl,
                get,
            } => {
                let expiry = match (expire, keep_ttl) {
                    (Some(expire), _) => match set_deadline(expire) {
                        Ok(at) => SetExpiry::At(at),
                        Err(e) => return protocol_error(e),
                    },
                    (None, true) => SetExpiry::Keep,
                    (None, false) => SetExpiry::Clear,
                };
                let condition = if nx {
                    SetCondition::IfAbsent
                } else if xx {
                    SetCondition::IfPresent
                } else {
                    SetCondition::Always
                };
                let opts = SetOptions {
                    condition,
                    expiry,
                    get,
                };
                reply(self.session.run(|ks| ks.set(key, value, &opts)), |outcome| {
                    if get {
                        Frame::optional_bulk(outcome.previous)
                    } else if outcome.written {
                        Frame::ok()
                    } else {
                        Frame::Null
                    }
                })
            }
            Command::SetNx { key, value } => {
                let opts = SetOptions {
                    condition: SetCondition::IfAbsent,
                    ..SetOptions::default()
                };
                reply(self.session.run(|ks| ks.set(key, value, &opts)), |outcome| {
                    flag(outcome.written)
                })
            }
            Command::SetEx { key, millis, value } => {
                let Some(at) = time::now_ms().checked_add(millis) else {
                    return protocol_error(ProtocolError::InvalidExpireTime("setex".into()));
                };
                let opts = SetOptions {
                    expiry: SetExpiry::At(at),
                    ..SetOptions::default()
                };
                reply(self.session.run(|ks| ks.set(key, value, &opts)), |_| Frame::ok())
            }
            Command::GetSet { key, value } => {
                let opts = SetOptions {
                    get: true,
                    ..SetOptions::default()
                };
                reply(self.session.run(|ks| ks.set(key, value, &opts)), |outcome| {
                    Frame::optional_bulk(outcome.previous)
                })
            }
            Command::GetDel { key } => {
                reply(self.session.run(|ks| ks.getdel(&key)), Frame::optional_bulk)
            }
            Command::MGet { keys } => {
                let values = self.session.run(|ks| ks.mget(&keys));
                Frame::Array(values.into_iter().map(Frame::optional_bulk).collect())
            }
            Command::MSet { pairs } => {
                self.session.run(|ks| ks.mset(pairs));
                Frame::ok()
            }
            Command::IncrBy { key, delta } => {
                reply(self.session.run(|ks| ks.incr_by(&key, delta)), Frame::Integer)
            }
            Command::IncrByFloat { key, delta } => {
                reply(self.session.run(|ks| ks.incr_by_float(&key, delta)), Frame::Bulk)
            }
            Command::Append { key, value } => {
                reply(self.session.run(|ks| ks.append(&key, &value)), count)
            }
            Command::StrLen { key } => reply(self.session.run(|ks| ks.strlen(&key)), count),

            // --- lists ---
            Command::Push {
                key,
                values,
                end,
                existing_only,
            } => reply(
                self.session
                    .run(|ks| ks.push(&key, &values, end_of(end), existing_only)),
                count,
            ),
            Command::Pop { key, end, count: None } => {
                reply(self.session.run(|ks| ks.pop(&key, end_of(end))), Frame::optional_bulk)
            }
            Command::Pop {
                key,
                end,
                count: Some(n),
            } => reply(
                self.session.run(|ks| ks.pop_count(&key, end_of(end), n)),
                |popped| popped.map_or(Frame::NullArray, Frame::bulk_array),
            ),
            Command::LLen { key } => reply(self.session.run(|ks| ks.llen(&key)), count),
            Command::LRange { key, start, stop } => reply(
                self.session.run(|ks| ks.lrange(&key, start, stop)),
                Frame::bulk_array,
            ),
            Command::LIndex { key, index } => reply(
                self.session.run(|ks| ks.lindex(&key, index)),
                Frame::optional_bulk,
            ),
            Command::LSet { key, index, value } => {
                reply(self.session.run(|ks| ks.lset(&key, index, value)), |()| {
                    Frame::ok()
                })
            }
            Command::LRem {
                key,
                count: n,
                element,
            } => reply(self.session.run(|ks| ks.lrem(&key, n, &element)), count),
            Command::LTrim { key, start, stop } => {
                reply(self.session.run(|ks| ks.ltrim(&key, start, stop)), |()| {
                    Frame::ok()
                })
            }
            Command::LInsert {
                key,
                before,
                pivot,
                element,
            } => reply(
                self.session
                    .run(|ks| ks.linsert(&key, before, &pivot, element)),
                Frame::Integer,
            ),
            Command::LMove { src, dst, from, to } => reply(
                self.session
                    .run(|ks| ks.lmove(&src, &dst, end_of(from), end_of(to))),
                Frame::optional_bulk,
            ),
            Command::BPop { keys, end, timeout } => {
                let result = {
                    let _blocked = self.client.mark_blocked();
                    blocking_pop(
                        &mut self.session,
                        &keys,
                        end_of(end),
                        Some(timeout),
                        &mut self.interrupts,
                    )
                    .await
                };
                match result {
                    Ok(Some((key, value))) => {
                        Frame::Array(vec![Frame::Bulk(key), Frame::Bulk(value)])
                    }
                    Ok(None) => Frame::NullArray,
                    Err(e) => self.blocking_error(e),
                }
            }
            Command::BLMove {
                src,
                dst,
                from,
                to,
                timeout,
            } => {
                let result = {
                    let _blocked = self.client.mark_blocked();
                    blocking_move(
                        &mut self.session,
                        &src,
                        &dst,
                        end_of(from),
                        end_of(to),
                        Some(timeout),
                        &mut self.interrupts,
                    )
                    .await
                };
                match result {
                    Ok(Some(value)) => Frame::Bulk(value),
                    // inside EXEC the empty case reads like LMOVE
                    Ok(None) if self.session.in_transaction() => Frame::Null,
                    Ok(None) => Frame::NullArray,
                    Err(e) => self.blocking_error(e),
                }
            }

            // --- hashes ---
            Command::HSet { key, pairs, legacy } => {
                reply(self.session.run(|ks| ks.hset(&key, &pairs)), |added| {
                    if legacy {
                        Frame::ok()
                    } else {
                        Frame::Integer(added as i64)
                    }
                })
            }
            Command::HSetNx { key, field, value } => {
                reply(self.session.run(|ks| ks.hsetnx(&key, field, value)), flag)
            }
            Command::HGet { key, field } => reply(
                self.session.run(|ks| ks.hget(&key, &field)),
                Frame::optional_bulk,
            ),
            Command::HMGet { key, fields } => {
                reply(self.session.run(|ks| ks.hmget(&key, &fields)), |values| {
                    Frame::Array(values.into_iter().map(Frame::optional_bulk).collect())
                })
            }
            Command::HDel { key, fields } => {
                reply(self.session.run(|ks| ks.hdel(&key, &fields)), count)
            }
            Command::HExists { key, field } => {
                reply(self.session.run(|ks| ks.hexists(&key, &field)), flag)
            }
            Command::HLen { key } => reply(self.session.run(|ks| ks.hlen(&key)), count),
            Command::HKeys { key } => {
                reply(self.session.run(|ks| ks.hkeys(&key)), Frame::bulk_array)
            }
            Command::HVals { key } => {
                reply(self.session.run(|ks| ks.hvals(&key)), Frame::bulk_array)
            }
            Command::HGetAll { key } => {
                reply(self.session.run(|ks| ks.hgetall(&key)), flatten_pairs)
            }
            Command::HIncrBy { key, field, delta } => reply(
                self.session.run(|ks| ks.hincrby(&key, &field, delta)),
                Frame::Integer,
            ),
            Command::HIncrByFloat { key, field, delta } => reply(
                self.session.run(|ks| ks.hincrbyfloat(&key, &field, delta)),
                Frame::Bulk,
            ),
            Command::HStrLen { key, field } => {
                reply(self.session.run(|ks| ks.hstrlen(&key, &field)), count)
            }
            Command::HScan {
                key,
                cursor,
                pattern,
                count: n,
            } => {
                let pattern = pattern.map(|p| GlobPattern::new(&p));
                let n = n.unwrap_or(DEFAULT_SCAN_COUNT);
                reply(
                    self.session
                        .run(|ks| ks.hscan(&key, cursor, n, pattern.as_ref())),
                    |(next, pairs)| scan_reply(next, flatten(pairs)),
                )
            }
            Command::HRandField {
                key,
                count: None,
                ..
            } => reply(self.session.run(|ks| ks.hrandfield(&key, 1)), |picked| {
                Frame::optional_bulk(picked.into_iter().next().map(|(field, _)| field))
            }),
            Command::HRandField {
                key,
                count: Some(n),
                with_values,
            } => reply(self.session.run(|ks| ks.hrandfield(&key, n)), |picked| {
                if with_values {
                    flatten_pairs(picked)
                } else {
                    Frame::bulk_array(picked.into_iter().map(|(field, _)| field))
                }
            }),

            // --- sets ---
            Command::SAdd { key, members } => {
                reply(self.session.run(|ks| ks.sadd(&key, &members)), count)
            }
            Command::SRem { key, members } => {
                reply(self.session.run(|ks| ks.srem(&key, &members)), count)
            }
            Command::SMembers { key } => {
                reply(self.session.run(|ks| ks.smembers(&key)), Frame::bulk_array)
            }
            Command::SIsMember { key, member } => {
                reply(self.session.run(|ks| ks.sismember(&key, &member)), flag)
            }
            Command::SMIsMember { key, members } => {
                reply(self.session.run(|ks| ks.smismember(&key, &members)), |found| {
                    Frame::Array(found.into_iter().map(flag).collect())
                })
            }
            Command::SCard { key } => reply(self.session.run(|ks| ks.scard(&key)), count),
            Command::SPop { key, count: None } => {
                reply(self.session.run(|ks| ks.spop(&key, 1)), |mut popped| {
                    Frame::optional_bulk(popped.pop())
                })
            }
            Command::SPop {
                key,
                count: Some(n),
            } => reply(self.session.run(|ks| ks.spop(&key, n)), Frame::bulk_array),
            Command::SRandMember { key, count: None } => {
                reply(self.session.run(|ks| ks.srandmember(&key, 1)), |mut picked| {
                    Frame::optional_bulk(picked.pop())
                })
            }
            Command::SRandMember {
                key,
                count: Some(n),
            } => reply(
                self.session.run(|ks| ks.srandmember(&key, n)),
                Frame::bulk_array,
            ),
            Command::SMove { src, dst, member } => {
                reply(self.session.run(|ks| ks.smove(&src, &dst, &member)), flag)
            }
            Command::SetAlgebra { op, keys } => {
                let op = match op {
                    SetOp::Inter => SetAlgebra::Inter,
                    SetOp::Union => SetAlgebra::Union,
                    SetOp::Diff => SetAlgebra::Diff,
                };
                reply(self.session.run(|ks| ks.set_algebra(op, &keys)), Frame::bulk_array)
            }
            Command::SScan {
                key,
                cursor,
                pattern,
                count: n,
            } => {
                let pattern = pattern.map(|p| GlobPattern::new(&p));
                let n = n.unwrap_or(DEFAULT_SCAN_COUNT);
                reply(
                    self.session
                        .run(|ks| ks.sscan(&key, cursor, n, pattern.as_ref())),
                    |(next, members)| {
                        scan_reply(next, members.into_iter().map(Frame::Bulk).collect())
                    },
                )
            }

            Command::Unknown(name) => unknown_command(&name),
        }
    }

    /// A kill closes the connection without a reply; anything else is
    /// an ordinary error reply.
    fn blocking_error(&mut self, e: CommandError) -> Frame {
        if e == CommandError::Killed {
            self.closed = true;
        }
        command_error(e)
    }
}

/// Error replies from the keyspace already carry their prefix.
fn reply<T, E: Display>(result: Result<T, E>, ok: impl FnOnce(T) -> Frame) -> Frame {
    match result {
        Ok(value) => ok(value),
        Err(e) => Frame::Error(e.to_string()),
    }
}

fn command_error(e: CommandError) -> Frame {
    Frame::Error(e.to_string())
}

fn protocol_error(e: ProtocolError) -> Frame {
    Frame::Error(format!("ERR {e}"))
}

fn count(n: usize) -> Frame {
    Frame::Integer(n as i64)
}

fn flag(b: bool) -> Frame {
    Frame::Integer(b as i64)
}

fn end_of(end: ListEnd) -> End {
    match end {
        ListEnd::Left => End::Left,
        ListEnd::Right => End::Right,
    }
}

fn flatten(pairs: Vec<(Bytes, Bytes)>) -> Vec<Frame> {
    pairs
        .into_iter()
        .flat_map(|(k, v)| [Frame::Bulk(k), Frame::Bulk(v)])
        .collect()
}

fn flatten_pairs(pairs: Vec<(Bytes, Bytes)>) -> Frame {
    Frame::Array(flatten(pairs))
}

/// `[cursor, [items...]]`, the cursor as a decimal bulk string.
fn scan_reply(next: u64, items: Vec<Frame>) -> Frame {
    Frame::Array(vec![
        Frame::Bulk(Bytes::from(next.to_string())),
        Frame::Array(items),
    ])
}

/// Absolute unix-ms deadline for an EXPIRE-family command. Deadlines in
/// the past come back as 0, which the keyspace treats as "delete now".
fn expire_deadline(amount: i64, unit: ExpireUnit) -> Result<u64, ProtocolError> {
    let name = match unit {
        ExpireUnit::Seconds => "expire",
        ExpireUnit::Millis => "pexpire",
        ExpireUnit::UnixSeconds => "expireat",
        ExpireUnit::UnixMillis => "pexpireat",
    };
    let invalid = || ProtocolError::InvalidExpireTime(name.into());

    let millis = match unit {
        ExpireUnit::Seconds | ExpireUnit::UnixSeconds => {
            amount.checked_mul(1000).ok_or_else(invalid)?
        }
        ExpireUnit::Millis | ExpireUnit::UnixMillis => amount,
    };
    let at = match unit {
        ExpireUnit::Seconds | ExpireUnit::Millis => i64::try_from(time::now_ms())
            .ok()
            .and_then(|now| now.checked_add(millis))
            .ok_or_else(invalid)?,
        ExpireUnit::UnixSeconds | ExpireUnit::UnixMillis => millis,
    };
    Ok(at.max(0) as u64)
}

/// Absolute unix-ms deadline for SET's EX/PX/EXAT/PXAT.
fn set_deadline(expire: SetExpire) -> Result<u64, ProtocolError> {
    let invalid = || ProtocolError::InvalidExpireTime("set".into());
    let now = time::now_ms();
    let at = match expire {
        SetExpire::Ex(secs) => secs.checked_mul(1000).and_then(|ms| now.checked_add(ms)),
        SetExpire::Px(ms) => now.checked_add(ms),
        SetExpire::ExAt(secs) => secs.checked_mul(1000),
        SetExpire::PxAt(ms) => Some(ms),
    };
    // u64::MAX is the "no expiry" marker
    at.filter(|&at| at < time::NO_EXPIRY).ok_or_else(invalid)
}
