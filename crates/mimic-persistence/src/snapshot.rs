//! Point-in-time snapshot files, one per logical database.
//!
//! Writes go to a `.tmp` file that is renamed over the final path once
//! complete, so a crash mid-write never clobbers the previous snapshot.
//!
//! File layout:
//! ```text
//! [MSNP magic: 4B][version: 1B][db_index: 2B][entry_count: 4B]
//! [removals: 8B][next_id: 8B]
//! [entries...]
//! [footer_crc32: 4B]
//! ```
//!
//! Each entry:
//! ```text
//! [key_len: 4B][key][id: 8B][kind: 1B][last_access_ms: 8B][expires_at_ms: 8B][payload]
//! ```
//! The footer checksum covers the entry bytes only.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::format::{self, CrcReader, FormatError};

const KIND_STRING: u8 = 0;
const KIND_LIST: u8 = 1;
const KIND_HASH: u8 = 2;
const KIND_SET: u8 = 3;

/// Byte offset of `entry_count` in the header.
const COUNT_OFFSET: u64 = 4 + 1 + 2;

/// Database-level metadata stored ahead of the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapHeader {
    pub db_index: u16,
    pub entry_count: u32,
    /// Dictionary removals since its last shrink check.
    pub removals: u64,
    /// The database's object-id counter.
    pub next_id: u64,
}

/// A persisted payload, flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapValue {
    String(Bytes),
    List(Vec<Bytes>),
    Hash(Vec<(Bytes, Bytes)>),
    Set(Vec<Bytes>),
}

/// One key as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapEntry {
    pub key: Bytes,
    pub id: u64,
    pub last_access_ms: u64,
    /// Absolute unix-epoch expiry in ms; `u64::MAX` for none.
    pub expires_at_ms: u64,
    pub value: SnapValue,
}

fn encode_entry(buf: &mut Vec<u8>, entry: &SnapEntry) -> std::io::Result<()> {
    format::write_bytes(buf, &entry.key)?;
    format::write_u64(buf, entry.id)?;
    let kind = match entry.value {
        SnapValue::String(_) => KIND_STRING,
        SnapValue::List(_) => KIND_LIST,
        SnapValue::Hash(_) => KIND_HASH,
        SnapValue::Set(_) => KIND_SET,
    };
    format::write_u8(buf, kind)?;
    format::write_u64(buf, entry.last_access_ms)?;
    format::write_u64(buf, entry.expires_at_ms)?;
    match &entry.value {
        SnapValue::String(data) => format::write_bytes(buf, data)?,
        SnapValue::List(items) | SnapValue::Set(items) => {
            format::write_len(buf, items.len())?;
            for item in items {
                format::write_bytes(buf, item)?;
            }
        }
        SnapValue::Hash(pairs) => {
            format::write_len(buf, pairs.len())?;
            for (field, value) in pairs {
                format::write_bytes(buf, field)?;
                format::write_bytes(buf, value)?;
            }
        }
    }
    Ok(())
}

fn decode_entry(r: &mut impl Read) -> Result<SnapEntry, FormatError> {
    let key = Bytes::from(format::read_bytes(r)?);
    let id = format::read_u64(r)?;
    let kind = format::read_u8(r)?;
    let last_access_ms = format::read_u64(r)?;
    let expires_at_ms = format::read_u64(r)?;
    let value = match kind {
        KIND_STRING => SnapValue::String(Bytes::from(format::read_bytes(r)?)),
        KIND_LIST | KIND_SET => {
            let count = format::read_count(r, if kind == KIND_LIST { "list" } else { "set" })?;
            let mut items = Vec::with_capacity(format::capped_capacity(count));
            for _ in 0..count {
                items.push(Bytes::from(format::read_bytes(r)?));
            }
            if kind == KIND_LIST {
                SnapValue::List(items)
            } else {
                SnapValue::Set(items)
            }
        }
        KIND_HASH => {
            let count = format::read_count(r, "hash")?;
            let mut pairs = Vec::with_capacity(format::capped_capacity(count));
            for _ in 0..count {
                let field = Bytes::from(format::read_bytes(r)?);
                let value = Bytes::from(format::read_bytes(r)?);
                pairs.push((field, value));
            }
            SnapValue::Hash(pairs)
        }
        other => return Err(FormatError::UnknownKind(other)),
    };
    Ok(SnapEntry {
        key,
        id,
        last_access_ms,
        expires_at_ms,
        value,
    })
}

/// Streams entries into a new snapshot file.
///
/// Nothing appears at the final path until [`finish`](Self::finish)
/// succeeds; dropping the writer early removes the temp file.
pub struct SnapshotWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    hasher: crc32fast::Hasher,
    count: u32,
    finished: bool,
}

impl SnapshotWriter {
    /// Creates the temp file and writes the header. `entry_count` in
    /// `header` is ignored; the real count is patched in on finish.
    pub fn create(path: impl Into<PathBuf>, header: SnapHeader) -> Result<Self, FormatError> {
        let final_path = path.into();
        let tmp_path = final_path.with_extension("snap.tmp");

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        format::write_header(&mut writer)?;
        format::write_u16(&mut writer, header.db_index)?;
        format::write_u32(&mut writer, 0)?;
        format::write_u64(&mut writer, header.removals)?;
        format::write_u64(&mut writer, header.next_id)?;

        Ok(Self {
            final_path,
            tmp_path,
            writer,
            hasher: crc32fast::Hasher::new(),
            count: 0,
            finished: false,
        })
    }

    pub fn write_entry(&mut self, entry: &SnapEntry) -> Result<(), FormatError> {
        let mut buf = Vec::new();
        encode_entry(&mut buf, entry)?;
        self.hasher.update(&buf);
        self.writer.write_all(&buf)?;
        self.count = self
            .count
            .checked_add(1)
            .ok_or_else(|| FormatError::InvalidData("too many entries for one snapshot".into()))?;
        Ok(())
    }

    /// Writes the footer, patches the entry count, syncs, and renames
    /// the temp file into place.
    pub fn finish(mut self) -> Result<(), FormatError> {
        let checksum = self.hasher.clone().finalize();
        format::write_u32(&mut self.writer, checksum)?;
        self.writer.flush()?;

        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        format::write_u32(file, self.count)?;
        file.sync_all()?;

        self.finished = true;
        fs::rename(&self.tmp_path, &self.final_path)?;
        debug!(path = %self.final_path.display(), entries = self.count, "snapshot written");
        Ok(())
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Reads a snapshot file entry by entry.
pub struct SnapshotReader {
    reader: CrcReader<BufReader<File>>,
    pub header: SnapHeader,
    read_so_far: u32,
}

impl SnapshotReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);

        format::read_header(&mut reader)?;
        let header = SnapHeader {
            db_index: format::read_u16(&mut reader)?,
            entry_count: format::read_u32(&mut reader)?,
            removals: format::read_u64(&mut reader)?,
            next_id: format::read_u64(&mut reader)?,
        };

        Ok(Self {
            reader: CrcReader::new(reader),
            header,
            read_so_far: 0,
        })
    }

    /// Reads the next entry, or `None` once `entry_count` entries are read.
    pub fn read_entry(&mut self) -> Result<Option<SnapEntry>, FormatError> {
        if self.read_so_far >= self.header.entry_count {
            return Ok(None);
        }
        let entry = decode_entry(&mut self.reader)?;
        self.read_so_far += 1;
        Ok(Some(entry))
    }

    /// Checks the footer CRC. Call after every entry has been read.
    pub fn verify_footer(mut self) -> Result<(), FormatError> {
        let computed = self.reader.checksum();
        let stored = format::read_u32(self.reader.get_mut())?;
        format::verify_crc32(computed, stored)
    }
}

/// Path of the snapshot for database `db_index` inside `dir`.
pub fn snapshot_path(dir: &Path, db_index: u16) -> PathBuf {
    dir.join(format!("db-{db_index}.snap"))
}
