//! Command parsing from RESP2 frames.
//!
//! Converts a parsed [`Frame`] (an array of bulk strings) into a typed
//! [`Command`]. Arity, keyword and number errors are reported here, so
//! the server only ever executes well-formed commands.

use std::time::Duration;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Which end of a list a command works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Left,
    Right,
}

/// Expiration option for SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpire {
    /// EX seconds.
    Ex(u64),
    /// PX milliseconds.
    Px(u64),
    /// EXAT unix-seconds.
    ExAt(u64),
    /// PXAT unix-milliseconds.
    PxAt(u64),
}

/// How the amount of an EXPIRE-family command is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireUnit {
    /// EXPIRE: relative seconds.
    Seconds,
    /// PEXPIRE: relative milliseconds.
    Millis,
    /// EXPIREAT: absolute unix seconds.
    UnixSeconds,
    /// PEXPIREAT: absolute unix milliseconds.
    UnixMillis,
}

/// Set operation for SINTER / SUNION / SDIFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Inter,
    Union,
    Diff,
}

/// A parsed client command, ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // --- connection ---
    /// PING [message].
    Ping(Option<Bytes>),

    /// ECHO message.
    Echo(Bytes),

    /// SELECT index.
    Select { index: i64 },

    /// QUIT. Replies OK and closes the connection.
    Quit,

    /// CLIENT ID.
    ClientId,

    /// CLIENT KILL ID id.
    ClientKill { id: u64 },

    /// CLIENT UNBLOCK id [TIMEOUT | ERROR].
    ClientUnblock { id: u64, error: bool },

    /// SAVE. Writes a snapshot of every database.
    Save,

    DbSize,
    FlushDb,
    FlushAll,

    /// SWAPDB index1 index2.
    SwapDb { a: i64, b: i64 },

    // --- transactions ---
    Multi,
    Exec,
    Discard,
    Watch { keys: Vec<Bytes> },
    Unwatch,

    // --- keys ---
    /// DEL / UNLINK key [key ...].
    Del { keys: Vec<Bytes> },

    /// EXISTS key [key ...]. Duplicates count once per occurrence.
    Exists { keys: Vec<Bytes> },

    Type { key: Bytes },

    /// EXPIRE / PEXPIRE / EXPIREAT / PEXPIREAT key amount.
    Expire {
        key: Bytes,
        amount: i64,
        unit: ExpireUnit,
    },

    /// TTL / PTTL key.
    Ttl { key: Bytes, millis: bool },

    Persist { key: Bytes },

    Rename { key: Bytes, newkey: Bytes },

    RenameNx { key: Bytes, newkey: Bytes },

    /// COPY source destination [DB index] [REPLACE].
    Copy {
        src: Bytes,
        dst: Bytes,
        db: Option<i64>,
        replace: bool,
    },

    /// MOVE key db.
    Move { key: Bytes, db: i64 },

    Keys { pattern: Bytes },

    /// SCAN cursor [MATCH pattern] [COUNT count] [TYPE type].
    Scan {
        cursor: u64,
        pattern: Option<Bytes>,
        count: Option<usize>,
        kind: Option<Bytes>,
    },

    RandomKey,

    // --- strings ---
    Get { key: Bytes },

    /// SET key value [NX | XX] [GET] [EX s | PX ms | EXAT ts | PXAT ts | KEEPTTL].
    Set {
        key: Bytes,
        value: Bytes,
        nx: bool,
        xx: bool,
        expire: Option<SetExpire>,
        keep_ttl: bool,
        get: bool,
    },

    SetNx { key: Bytes, value: Bytes },

    /// SETEX / PSETEX, normalized to milliseconds.
    SetEx {
        key: Bytes,
        millis: u64,
        value: Bytes,
    },

    GetSet { key: Bytes, value: Bytes },

    GetDel { key: Bytes },

    MGet { keys: Vec<Bytes> },

    MSet { pairs: Vec<(Bytes, Bytes)> },

    /// INCR / DECR / INCRBY / DECRBY.
    IncrBy { key: Bytes, delta: i64 },

    IncrByFloat { key: Bytes, delta: f64 },

    Append { key: Bytes, value: Bytes },

    StrLen { key: Bytes },

    // --- lists ---
    /// LPUSH / RPUSH / LPUSHX / RPUSHX.
    Push {
        key: Bytes,
        values: Vec<Bytes>,
        end: ListEnd,
        existing_only: bool,
    },

    /// LPOP / RPOP key [count].
    Pop {
        key: Bytes,
        end: ListEnd,
        count: Option<usize>,
    },

    LLen { key: Bytes },

    LRange { key: Bytes, start: i64, stop: i64 },

    LIndex { key: Bytes, index: i64 },

    LSet { key: Bytes, index: i64, value: Bytes },

    LRem { key: Bytes, count: i64, element: Bytes },

    LTrim { key: Bytes, start: i64, stop: i64 },

    /// LINSERT key BEFORE|AFTER pivot element.
    LInsert {
        key: Bytes,
        before: bool,
        pivot: Bytes,
        element: Bytes,
    },

    /// LMOVE / RPOPLPUSH.
    LMove {
        src: Bytes,
        dst: Bytes,
        from: ListEnd,
        to: ListEnd,
    },

    /// BLPOP / BRPOP key [key ...] timeout. A zero timeout waits forever.
    BPop {
        keys: Vec<Bytes>,
        end: ListEnd,
        timeout: Duration,
    },

    /// BLMOVE / BRPOPLPUSH.
    BLMove {
        src: Bytes,
        dst: Bytes,
        from: ListEnd,
        to: ListEnd,
        timeout: Duration,
    },

    // --- hashes ---
    /// HSET / HMSET. `legacy` is set for HMSET, which replies OK.
    HSet {
        key: Bytes,
        pairs: Vec<(Bytes, Bytes)>,
        legacy: bool,
    },

    HSetNx { key: Bytes, field: Bytes, value: Bytes },

    HGet { key: Bytes, field: Bytes },

    HMGet { key: Bytes, fields: Vec<Bytes> },

    HDel { key: Bytes, fields: Vec<Bytes> },

    HExists { key: Bytes, field: Bytes },

    HLen { key: Bytes },

    HKeys { key: Bytes },

    HVals { key: Bytes },

    HGetAll { key: Bytes },

    HIncrBy { key: Bytes, field: Bytes, delta: i64 },

    HIncrByFloat { key: Bytes, field: Bytes, delta: f64 },

    HStrLen { key: Bytes, field: Bytes },

    HScan {
        key: Bytes,
        cursor: u64,
        pattern: Option<Bytes>,
        count: Option<usize>,
    },

    /// HRANDFIELD key [count [WITHVALUES]].
    HRandField {
        key: Bytes,
        count: Option<i64>,
        with_values: bool,
    },

    // --- sets ---
    SAdd { key: Bytes, members: Vec<Bytes> },

    SRem { key: Bytes, members: Vec<Bytes> },

    SMembers { key: Bytes },

    SIsMember { key: Bytes, member: Bytes },

    SMIsMember { key: Bytes, members: Vec<Bytes> },

    SCard { key: Bytes },

    SPop { key: Bytes, count: Option<usize> },

    SRandMember { key: Bytes, count: Option<i64> },

    SMove { src: Bytes, dst: Bytes, member: Bytes },

    /// SINTER / SUNION / SDIFF key [key ...].
    SetAlgebra { op: SetOp, keys: Vec<Bytes> },

    SScan {
        key: Bytes,
        cursor: u64,
        pattern: Option<Bytes>,
        count: Option<usize>,
    },

    /// A command we don't recognize.
    Unknown(String),
}

impl Command {
    /// Parses a [`Frame`] into a [`Command`].
    ///
    /// Expects an array whose first element is the command name and the
    /// rest its arguments.
    pub fn from_frame(frame: Frame) -> Result<Command, ProtocolError> {
        let frames = match frame {
            Frame::Array(frames) => frames,
            _ => {
                return Err(ProtocolError::InvalidCommandFrame(
                    "expected array frame".into(),
                ));
            }
        };
        let Some((head, args)) = frames.split_first() else {
            return Err(ProtocolError::InvalidCommandFrame(
                "empty command array".into(),
            ));
        };

        let name = extract_string(head)?;
        let name_upper = name.to_ascii_uppercase();

        match name_upper.as_str() {
            "PING" => parse_ping(args),
            "ECHO" => single(args, "echo").map(Command::Echo),
            "SELECT" => {
                exact(args, 1, "select")?;
                Ok(Command::Select {
                    index: parse_int(&args[0])?,
                })
            }
            "QUIT" => no_args(args, "quit", Command::Quit),
            "CLIENT" => parse_client(args),
            "SAVE" => no_args(args, "save", Command::Save),
            "DBSIZE" => no_args(args, "dbsize", Command::DbSize),
            "FLUSHDB" => parse_flush(args, "flushdb", Command::FlushDb),
            "FLUSHALL" => parse_flush(args, "flushall", Command::FlushAll),
            "SWAPDB" => {
                exact(args, 2, "swapdb")?;
                Ok(Command::SwapDb {
                    a: parse_int(&args[0])?,
                    b: parse_int(&args[1])?,
                })
            }

            "MULTI" => no_args(args, "multi", Command::Multi),
            "EXEC" => no_args(args, "exec", Command::Exec),
            "DISCARD" => no_args(args, "discard", Command::Discard),
            "WATCH" => Ok(Command::Watch {
                keys: at_least_one(args, "watch")?,
            }),
            "UNWATCH" => no_args(args, "unwatch", Command::Unwatch),

            "DEL" => Ok(Command::Del {
                keys: at_least_one(args, "del")?,
            }),
            "UNLINK" => Ok(Command::Del {
                keys: at_least_one(args, "unlink")?,
            }),
            "EXISTS" => Ok(Command::Exists {
                keys: at_least_one(args, "exists")?,
            }),
            "TYPE" => single(args, "type").map(|key| Command::Type { key }),
            "EXPIRE" => parse_expire(args, "expire", ExpireUnit::Seconds),
            "PEXPIRE" => parse_expire(args, "pexpire", ExpireUnit::Millis),
            "EXPIREAT" => parse_expire(args, "expireat", ExpireUnit::UnixSeconds),
            "PEXPIREAT" => parse_expire(args, "pexpireat", ExpireUnit::UnixMillis),
            "TTL" => single(args, "ttl").map(|key| Command::Ttl { key, millis: false }),
            "PTTL" => single(args, "pttl").map(|key| Command::Ttl { key, millis: true }),
            "PERSIST" => single(args, "persist").map(|key| Command::Persist { key }),
            "RENAME" => {
                let (key, newkey) = pair(args, "rename")?;
                Ok(Command::Rename { key, newkey })
            }
            "RENAMENX" => {
                let (key, newkey) = pair(args, "renamenx")?;
                Ok(Command::RenameNx { key, newkey })
            }
            "COPY" => parse_copy(args),
            "MOVE" => {
                exact(args, 2, "move")?;
                Ok(Command::Move {
                    key: extract_bytes(&args[0])?,
                    db: parse_int(&args[1])?,
                })
            }
            "KEYS" => single(args, "keys").map(|pattern| Command::Keys { pattern }),
            "SCAN" => parse_scan(args),
            "RANDOMKEY" => no_args(args, "randomkey", Command::RandomKey),

            "GET" => single(args, "get").map(|key| Command::Get { key }),
            "SET" => parse_set(args),
            "SETNX" => {
                let (key, value) = pair(args, "setnx")?;
                Ok(Command::SetNx { key, value })
            }
            "SETEX" => parse_setex(args, "setex", 1000),
            "PSETEX" => parse_setex(args, "psetex", 1),
            "GETSET" => {
                let (key, value) = pair(args, "getset")?;
                Ok(Command::GetSet { key, value })
            }
            "GETDEL" => single(args, "getdel").map(|key| Command::GetDel { key }),
            "MGET" => Ok(Command::MGet {
                keys: at_least_one(args, "mget")?,
            }),
            "MSET" => parse_mset(args),
            "INCR" => single(args, "incr").map(|key| Command::IncrBy { key, delta: 1 }),
            "DECR" => single(args, "decr").map(|key| Command::IncrBy { key, delta: -1 }),
            "INCRBY" => parse_incrby(args, "incrby", false),
            "DECRBY" => parse_incrby(args, "decrby", true),
            "INCRBYFLOAT" => {
                exact(args, 2, "incrbyfloat")?;
                Ok(Command::IncrByFloat {
                    key: extract_bytes(&args[0])?,
                    delta: parse_float(&args[1])?,
                })
            }
            "APPEND" => {
                let (key, value) = pair(args, "append")?;
                Ok(Command::Append { key, value })
            }
            "STRLEN" => single(args, "strlen").map(|key| Command::StrLen { key }),

            "LPUSH" => parse_push(args, "lpush", ListEnd::Left, false),
            "RPUSH" => parse_push(args, "rpush", ListEnd::Right, false),
            "LPUSHX" => parse_push(args, "lpushx", ListEnd::Left, true),
            "RPUSHX" => parse_push(args, "rpushx", ListEnd::Right, true),
            "LPOP" => parse_pop(args, "lpop", ListEnd::Left),
            "RPOP" => parse_pop(args, "rpop", ListEnd::Right),
            "LLEN" => single(args, "llen").map(|key| Command::LLen { key }),
            "LRANGE" => {
                let (key, start, stop) = key_and_range(args, "lrange")?;
                Ok(Command::LRange { key, start, stop })
            }
            "LTRIM" => {
                let (key, start, stop) = key_and_range(args, "ltrim")?;
                Ok(Command::LTrim { key, start, stop })
            }
            "LINDEX" => {
                exact(args, 2, "lindex")?;
                Ok(Command::LIndex {
                    key: extract_bytes(&args[0])?,
                    index: parse_int(&args[1])?,
                })
            }
            "LSET" => {
                exact(args, 3, "lset")?;
                Ok(Command::LSet {
                    key: extract_bytes(&args[0])?,
                    index: parse_int(&args[1])?,
                    value: extract_bytes(&args[2])?,
                })
            }
            "LREM" => {
                exact(args, 3, "lrem")?;
                Ok(Command::LRem {
                    key: extract_bytes(&args[0])?,
                    count: parse_int(&args[1])?,
                    element: extract_bytes(&args[2])?,
                })
            }
            "LINSERT" => parse_linsert(args),
            "LMOVE" => {
                exact(args, 4, "lmove")?;
                Ok(Command::LMove {
                    src: extract_bytes(&args[0])?,
                    dst: extract_bytes(&args[1])?,
                    from: parse_end(&args[2])?,
                    to: parse_end(&args[3])?,
                })
            }
            "RPOPLPUSH" => {
                let (src, dst) = pair(args, "rpoplpush")?;
                Ok(Command::LMove {
                    src,
                    dst,
                    from: ListEnd::Right,
                    to: ListEnd::Left,
                })
            }
            "BLPOP" => parse_bpop(args, "blpop", ListEnd::Left),
            "BRPOP" => parse_bpop(args, "brpop", ListEnd::Right),
            "BLMOVE" => {
                exact(args, 5, "blmove")?;
                Ok(Command::BLMove {
                    src: extract_bytes(&args[0])?,
                    dst: extract_bytes(&args[1])?,
                    from: parse_end(&args[2])?,
                    to: parse_end(&args[3])?,
                    timeout: parse_timeout(&args[4])?,
                })
            }
            "BRPOPLPUSH" => {
                exact(args, 3, "brpoplpush")?;
                Ok(Command::BLMove {
                    src: extract_bytes(&args[0])?,
                    dst: extract_bytes(&args[1])?,
                    from: ListEnd::Right,
                    to: ListEnd::Left,
                    timeout: parse_timeout(&args[2])?,
                })
            }

            "HSET" => parse_hset(args, "hset", false),
            "HMSET" => parse_hset(args, "hmset", true),
            "HSETNX" => {
                exact(args, 3, "hsetnx")?;
                Ok(Command::HSetNx {
                    key: extract_bytes(&args[0])?,
                    field: extract_bytes(&args[1])?,
                    value: extract_bytes(&args[2])?,
                })
            }
            "HGET" => {
                let (key, field) = pair(args, "hget")?;
                Ok(Command::HGet { key, field })
            }
            "HMGET" => {
                let (key, fields) = key_and_many(args, "hmget")?;
                Ok(Command::HMGet { key, fields })
            }
            "HDEL" => {
                let (key, fields) = key_and_many(args, "hdel")?;
                Ok(Command::HDel { key, fields })
            }
            "HEXISTS" => {
                let (key, field) = pair(args, "hexists")?;
                Ok(Command::HExists { key, field })
            }
            "HLEN" => single(args, "hlen").map(|key| Command::HLen { key }),
            "HKEYS" => single(args, "hkeys").map(|key| Command::HKeys { key }),
            "HVALS" => single(args, "hvals").map(|key| Command::HVals { key }),
            "HGETALL" => single(args, "hgetall").map(|key| Command::HGetAll { key }),
            "HINCRBY" => {
                exact(args, 3, "hincrby")?;
                Ok(Command::HIncrBy {
                    key: extract_bytes(&args[0])?,
                    field: extract_bytes(&args[1])?,
                    delta: parse_int(&args[2])?,
                })
            }
            "HINCRBYFLOAT" => {
                exact(args, 3, "hincrbyfloat")?;
                Ok(Command::HIncrByFloat {
                    key: extract_bytes(&args[0])?,
                    field: extract_bytes(&args[1])?,
                    delta: parse_float(&args[2])?,
                })
            }
            "HSTRLEN" => {
                let (key, field) = pair(args, "hstrlen")?;
                Ok(Command::HStrLen { key, field })
            }
            "HSCAN" => {
                let (key, cursor, pattern, count) = parse_key_scan(args, "hscan")?;
                Ok(Command::HScan {
                    key,
                    cursor,
                    pattern,
                    count,
                })
            }
            "HRANDFIELD" => parse_hrandfield(args),

            "SADD" => {
                let (key, members) = key_and_many(args, "sadd")?;
                Ok(Command::SAdd { key, members })
            }
            "SREM" => {
                let (key, members) = key_and_many(args, "srem")?;
                Ok(Command::SRem { key, members })
            }
            "SMEMBERS" => single(args, "smembers").map(|key| Command::SMembers { key }),
            "SISMEMBER" => {
                let (key, member) = pair(args, "sismember")?;
                Ok(Command::SIsMember { key, member })
            }
            "SMISMEMBER" => {
                let (key, members) = key_and_many(args, "smismember")?;
                Ok(Command::SMIsMember { key, members })
            }
            "SCARD" => single(args, "scard").map(|key| Command::SCard { key }),
            "SPOP" => parse_spop(args),
            "SRANDMEMBER" => parse_srandmember(args),
            "SMOVE" => {
                exact(args, 3, "smove")?;
                Ok(Command::SMove {
                    src: extract_bytes(&args[0])?,
                    dst: extract_bytes(&args[1])?,
                    member: extract_bytes(&args[2])?,
                })
            }
            "SINTER" => parse_set_algebra(args, "sinter", SetOp::Inter),
            "SUNION" => parse_set_algebra(args, "sunion", SetOp::Union),
            "SDIFF" => parse_set_algebra(args, "sdiff", SetOp::Diff),
            "SSCAN" => {
                let (key, cursor, pattern, count) = parse_key_scan(args, "sscan")?;
                Ok(Command::SScan {
                    key,
                    cursor,
                    pattern,
                    count,
                })
            }

            _ => Ok(Command::Unknown(name)),
        }
    }

    /// True for commands that may suspend the connection.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Command::BPop { .. } | Command::BLMove { .. })
    }

    /// True for commands that reach a database other than the selected
    /// one. A transaction containing any of these runs under the
    /// cross-database lock.
    pub fn crosses_databases(&self) -> bool {
        matches!(
            self,
            Command::Select { .. }
                | Command::Move { .. }
                | Command::Copy { db: Some(_), .. }
                | Command::SwapDb { .. }
                | Command::FlushAll
        )
    }
}

// ---------------------------------------------------------------------------
// argument helpers
// ---------------------------------------------------------------------------

/// Extracts a UTF-8 string from a Bulk or Simple frame.
fn extract_string(frame: &Frame) -> Result<String, ProtocolError> {
    match frame {
        Frame::Bulk(data) => String::from_utf8(data.to_vec()).map_err(|_| {
            ProtocolError::InvalidCommandFrame("command name is not valid utf-8".into())
        }),
        Frame::Simple(s) => Ok(s.clone()),
        _ => Err(ProtocolError::InvalidCommandFrame(
            "expected bulk or simple string for command name".into(),
        )),
    }
}

/// Extracts raw bytes from a Bulk or Simple frame.
fn extract_bytes(frame: &Frame) -> Result<Bytes, ProtocolError> {
    match frame {
        Frame::Bulk(data) => Ok(data.clone()),
        Frame::Simple(s) => Ok(Bytes::from(s.clone().into_bytes())),
        _ => Err(ProtocolError::InvalidCommandFrame(
            "expected bulk or simple string argument".into(),
        )),
    }
}

fn extract_all(args: &[Frame]) -> Result<Vec<Bytes>, ProtocolError> {
    args.iter().map(extract_bytes).collect()
}

/// Uppercased option keyword, e.g. `ex` -> `EX`.
fn keyword(frame: &Frame) -> Result<String, ProtocolError> {
    let raw = extract_bytes(frame)?;
    Ok(String::from_utf8_lossy(&raw).to_ascii_uppercase())
}

fn parse_int(frame: &Frame) -> Result<i64, ProtocolError> {
    let raw = extract_bytes(frame)?;
    crate::parse::parse_i64_bytes(&raw).map_err(|_| ProtocolError::NotAnInteger)
}

fn parse_uint(frame: &Frame) -> Result<u64, ProtocolError> {
    let n = parse_int(frame)?;
    u64::try_from(n).map_err(|_| ProtocolError::NotPositive)
}

fn parse_float(frame: &Frame) -> Result<f64, ProtocolError> {
    let raw = extract_bytes(frame)?;
    std::str::from_utf8(&raw)
        .ok()
        .filter(|s| !s.is_empty() && s.trim() == *s)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
        .ok_or(ProtocolError::NotAFloat)
}

/// Blocking timeout in (possibly fractional) seconds.
fn parse_timeout(frame: &Frame) -> Result<Duration, ProtocolError> {
    let raw = extract_bytes(frame)?;
    let secs = std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or(ProtocolError::InvalidTimeout)?;
    if secs < 0.0 {
        return Err(ProtocolError::NegativeTimeout);
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ProtocolError::InvalidTimeout)
}

fn parse_end(frame: &Frame) -> Result<ListEnd, ProtocolError> {
    match keyword(frame)?.as_str() {
        "LEFT" => Ok(ListEnd::Left),
        "RIGHT" => Ok(ListEnd::Right),
        _ => Err(ProtocolError::Syntax),
    }
}

fn exact(args: &[Frame], n: usize, cmd: &str) -> Result<(), ProtocolError> {
    if args.len() != n {
        return Err(ProtocolError::WrongArity(cmd.into()));
    }
    Ok(())
}

fn no_args(args: &[Frame], cmd: &str, command: Command) -> Result<Command, ProtocolError> {
    exact(args, 0, cmd)?;
    Ok(command)
}

fn single(args: &[Frame], cmd: &str) -> Result<Bytes, ProtocolError> {
    exact(args, 1, cmd)?;
    extract_bytes(&args[0])
}

fn pair(args: &[Frame], cmd: &str) -> Result<(Bytes, Bytes), ProtocolError> {
    exact(args, 2, cmd)?;
    Ok((extract_bytes(&args[0])?, extract_bytes(&args[1])?))
}

fn at_least_one(args: &[Frame], cmd: &str) -> Result<Vec<Bytes>, ProtocolError> {
    if args.is_empty() {
        return Err(ProtocolError::WrongArity(cmd.into()));
    }
    extract_all(args)
}

/// `key item [item ...]`.
fn key_and_many(args: &[Frame], cmd: &str) -> Result<(Bytes, Vec<Bytes>), ProtocolError> {
    if args.len() < 2 {
        return Err(ProtocolError::WrongArity(cmd.into()));
    }
    Ok((extract_bytes(&args[0])?, extract_all(&args[1..])?))
}

fn key_and_range(args: &[Frame], cmd: &str) -> Result<(Bytes, i64, i64), ProtocolError> {
    exact(args, 3, cmd)?;
    Ok((
        extract_bytes(&args[0])?,
        parse_int(&args[1])?,
        parse_int(&args[2])?,
    ))
}

// ---------------------------------------------------------------------------
// per-command parsers
// ---------------------------------------------------------------------------

fn parse_ping(args: &[Frame]) -> Result<Command, ProtocolError> {
    match args {
        [] => Ok(Command::Ping(None)),
        [msg] => Ok(Command::Ping(Some(extract_bytes(msg)?))),
        _ => Err(ProtocolError::WrongArity("ping".into())),
    }
}

fn parse_client(args: &[Frame]) -> Result<Command, ProtocolError> {
    let Some((sub, rest)) = args.split_first() else {
        return Err(ProtocolError::WrongArity("client".into()));
    };
    match keyword(sub)?.as_str() {
        "ID" => no_args(rest, "client|id", Command::ClientId),
        "KILL" => match rest {
            [filter, id] if keyword(filter)? == "ID" => Ok(Command::ClientKill {
                id: parse_uint(id)?,
            }),
            [_, _] => Err(ProtocolError::Syntax),
            _ => Err(ProtocolError::WrongArity("client|kill".into())),
        },
        "UNBLOCK" => {
            let (id, mode) = match rest {
                [id] => (id, None),
                [id, mode] => (id, Some(keyword(mode)?)),
                _ => return Err(ProtocolError::WrongArity("client|unblock".into())),
            };
            let error = match mode.as_deref() {
                None | Some("TIMEOUT") => false,
                Some("ERROR") => true,
                Some(_) => return Err(ProtocolError::Syntax),
            };
            Ok(Command::ClientUnblock {
                id: parse_uint(id)?,
                error,
            })
        }
        other => Err(ProtocolError::UnknownSubcommand(format!("CLIENT {other}"))),
    }
}

/// FLUSHDB / FLUSHALL take an optional ASYNC|SYNC modifier; both behave
/// the same here.
fn parse_flush(args: &[Frame], cmd: &str, command: Command) -> Result<Command, ProtocolError> {
    match args {
        [] => Ok(command),
        [mode] => match keyword(mode)?.as_str() {
            "ASYNC" | "SYNC" => Ok(command),
            _ => Err(ProtocolError::Syntax),
        },
        _ => Err(ProtocolError::WrongArity(cmd.into())),
    }
}

fn parse_expire(args: &[Frame], cmd: &str, unit: ExpireUnit) -> Result<Command, ProtocolError> {
    exact(args, 2, cmd)?;
    Ok(Command::Expire {
        key: extract_bytes(&args[0])?,
        amount: parse_int(&args[1])?,
        unit,
    })
}

fn parse_copy(args: &[Frame]) -> Result<Command, ProtocolError> {
    if args.len() < 2 {
        return Err(ProtocolError::WrongArity("copy".into()));
    }
    let src = extract_bytes(&args[0])?;
    let dst = extract_bytes(&args[1])?;
    let mut db = None;
    let mut replace = false;

    let mut idx = 2;
    while idx < args.len() {
        match keyword(&args[idx])?.as_str() {
            "REPLACE" => {
                replace = true;
                idx += 1;
            }
            "DB" if idx + 1 < args.len() => {
                db = Some(parse_int(&args[idx + 1])?);
                idx += 2;
            }
            _ => return Err(ProtocolError::Syntax),
        }
    }
    Ok(Command::Copy {
        src,
        dst,
        db,
        replace,
    })
}

/// Shared tail of SCAN/HSCAN/SSCAN: `[MATCH pattern] [COUNT n] [TYPE t]`.
struct ScanOptions {
    pattern: Option<Bytes>,
    count: Option<usize>,
    kind: Option<Bytes>,
}

fn parse_scan_options(args: &[Frame], allow_type: bool) -> Result<ScanOptions, ProtocolError> {
    let mut opts = ScanOptions {
        pattern: None,
        count: None,
        kind: None,
    };
    let mut idx = 0;
    while idx < args.len() {
        let Some(value) = args.get(idx + 1) else {
            return Err(ProtocolError::Syntax);
        };
        match keyword(&args[idx])?.as_str() {
            "MATCH" => opts.pattern = Some(extract_bytes(value)?),
            "COUNT" => {
                let n = parse_int(value)?;
                if n < 1 {
                    return Err(ProtocolError::Syntax);
                }
                opts.count = Some(n as usize);
            }
            "TYPE" if allow_type => opts.kind = Some(extract_bytes(value)?),
            _ => return Err(ProtocolError::Syntax),
        }
        idx += 2;
    }
    Ok(opts)
}

fn parse_cursor(frame: &Frame) -> Result<u64, ProtocolError> {
    let raw = extract_bytes(frame)?;
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(ProtocolError::InvalidCursor)
}

fn parse_scan(args: &[Frame]) -> Result<Command, ProtocolError> {
    let Some((cursor, rest)) = args.split_first() else {
        return Err(ProtocolError::WrongArity("scan".into()));
    };
    let cursor = parse_cursor(cursor)?;
    let opts = parse_scan_options(rest, true)?;
    Ok(Command::Scan {
        cursor,
        pattern: opts.pattern,
        count: opts.count,
        kind: opts.kind,
    })
}

type KeyScan = (Bytes, u64, Option<Bytes>, Option<usize>);

fn parse_key_scan(args: &[Frame], cmd: &str) -> Result<KeyScan, ProtocolError> {
    if args.len() < 2 {
        return Err(ProtocolError::WrongArity(cmd.into()));
    }
    let key = extract_bytes(&args[0])?;
    let cursor = parse_cursor(&args[1])?;
    let opts = parse_scan_options(&args[2..], false)?;
    Ok((key, cursor, opts.pattern, opts.count))
}

fn parse_set(args: &[Frame]) -> Result<Command, ProtocolError> {
    if args.len() < 2 {
        return Err(ProtocolError::WrongArity("set".into()));
    }
    let key = extract_bytes(&args[0])?;
    let value = extract_bytes(&args[1])?;

    let mut nx = false;
    let mut xx = false;
    let mut get = false;
    let mut keep_ttl = false;
    let mut expire = None;

    let mut idx = 2;
    while idx < args.len() {
        let flag = keyword(&args[idx])?;
        idx += 1;
        match flag.as_str() {
            "NX" if !xx => nx = true,
            "XX" if !nx => xx = true,
            "GET" => get = true,
            "KEEPTTL" if expire.is_none() => keep_ttl = true,
            "EX" | "PX" | "EXAT" | "PXAT" if expire.is_none() && !keep_ttl => {
                let Some(arg) = args.get(idx) else {
                    return Err(ProtocolError::Syntax);
                };
                idx += 1;
                let amount = parse_int(arg)?;
                if amount <= 0 {
                    return Err(ProtocolError::InvalidExpireTime("set".into()));
                }
                let amount = amount as u64;
                expire = Some(match flag.as_str() {
                    "EX" => SetExpire::Ex(amount),
                    "PX" => SetExpire::Px(amount),
                    "EXAT" => SetExpire::ExAt(amount),
                    _ => SetExpire::PxAt(amount),
                });
            }
            _ => return Err(ProtocolError::Syntax),
        }
    }

    Ok(Command::Set {
        key,
        value,
        nx,
        xx,
        expire,
        keep_ttl,
        get,
    })
}

/// SETEX/PSETEX; `scale` converts the amount to milliseconds.
fn parse_setex(args: &[Frame], cmd: &str, scale: u64) -> Result<Command, ProtocolError> {
    exact(args, 3, cmd)?;
    let amount = parse_int(&args[1])?;
    let millis = u64::try_from(amount)
        .ok()
        .filter(|&n| n > 0)
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(|| ProtocolError::InvalidExpireTime(cmd.into()))?;
    Ok(Command::SetEx {
        key: extract_bytes(&args[0])?,
        millis,
        value: extract_bytes(&args[2])?,
    })
}

fn parse_mset(args: &[Frame]) -> Result<Command, ProtocolError> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(ProtocolError::WrongArity("mset".into()));
    }
    let pairs = args
        .chunks_exact(2)
        .map(|kv| Ok((extract_bytes(&kv[0])?, extract_bytes(&kv[1])?)))
        .collect::<Result<Vec<_>, ProtocolError>>()?;
    Ok(Command::MSet { pairs })
}

fn parse_incrby(args: &[Frame], cmd: &str, negate: bool) -> Result<Command, ProtocolError> {
    exact(args, 2, cmd)?;
    let amount = parse_int(&args[1])?;
    let delta = if negate {
        amount.checked_neg().ok_or(ProtocolError::Overflow)?
    } else {
        amount
    };
    Ok(Command::IncrBy {
        key: extract_bytes(&args[0])?,
        delta,
    })
}

fn parse_push(
    args: &[Frame],
    cmd: &str,
    end: ListEnd,
    existing_only: bool,
) -> Result<Command, ProtocolError> {
    let (key, values) = key_and_many(args, cmd)?;
    Ok(Command::Push {
        key,
        values,
        end,
        existing_only,
    })
}

fn parse_pop(args: &[Frame], cmd: &str, end: ListEnd) -> Result<Command, ProtocolError> {
    let (key, count) = match args {
        [key] => (extract_bytes(key)?, None),
        [key, count] => (extract_bytes(key)?, Some(parse_uint(count)? as usize)),
        _ => return Err(ProtocolError::WrongArity(cmd.into())),
    };
    Ok(Command::Pop { key, end, count })
}

fn parse_linsert(args: &[Frame]) -> Result<Command, ProtocolError> {
    exact(args, 4, "linsert")?;
    let before = match keyword(&args[1])?.as_str() {
        "BEFORE" => true,
        "AFTER" => false,
        _ => return Err(ProtocolError::Syntax),
    };
    Ok(Command::LInsert {
        key: extract_bytes(&args[0])?,
        before,
        pivot: extract_bytes(&args[2])?,
        element: extract_bytes(&args[3])?,
    })
}

fn parse_bpop(args: &[Frame], cmd: &str, end: ListEnd) -> Result<Command, ProtocolError> {
    let Some((timeout, keys)) = args.split_last() else {
        return Err(ProtocolError::WrongArity(cmd.into()));
    };
    if keys.is_empty() {
        return Err(ProtocolError::WrongArity(cmd.into()));
    }
    Ok(Command::BPop {
        keys: extract_all(keys)?,
        end,
        timeout: parse_timeout(timeout)?,
    })
}

fn parse_hset(args: &[Frame], cmd: &str, legacy: bool) -> Result<Command, ProtocolError> {
    if args.len() < 3 || args.len() % 2 == 0 {
        return Err(ProtocolError::WrongArity(cmd.into()));
    }
    let key = extract_bytes(&args[0])?;
    let pairs = args[1..]
        .chunks_exact(2)
        .map(|fv| Ok((extract_bytes(&fv[0])?, extract_bytes(&fv[1])?)))
        .collect::<Result<Vec<_>, ProtocolError>>()?;
    Ok(Command::HSet { key, pairs, legacy })
}

fn parse_hrandfield(args: &[Frame]) -> Result<Command, ProtocolError> {
    let (key, count, with_values) = match args {
        [key] => (key, None, false),
        [key, count] => (key, Some(parse_int(count)?), false),
        [key, count, flag] => {
            if keyword(flag)? != "WITHVALUES" {
                return Err(ProtocolError::Syntax);
            }
            (key, Some(parse_int(count)?), true)
        }
        _ => return Err(ProtocolError::WrongArity("hrandfield".into())),
    };
    Ok(Command::HRandField {
        key: extract_bytes(key)?,
        count,
        with_values,
    })
}

fn parse_spop(args: &[Frame]) -> Result<Command, ProtocolError> {
    let (key, count) = match args {
        [key] => (extract_bytes(key)?, None),
        [key, count] => (extract_bytes(key)?, Some(parse_uint(count)? as usize)),
        _ => return Err(ProtocolError::WrongArity("spop".into())),
    };
    Ok(Command::SPop { key, count })
}

fn parse_srandmember(args: &[Frame]) -> Result<Command, ProtocolError> {
    let (key, count) = match args {
        [key] => (extract_bytes(key)?, None),
        [key, count] => (extract_bytes(key)?, Some(parse_int(count)?)),
        _ => return Err(ProtocolError::WrongArity("srandmember".into())),
    };
    Ok(Command::SRandMember { key, count })
}

fn parse_set_algebra(args: &[Frame], cmd: &str, op: SetOp) -> Result<Command, ProtocolError> {
    Ok(Command::SetAlgebra {
        op,
        keys: at_least_one(args, cmd)?,
    })
}
