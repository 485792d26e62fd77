//! Conversion between live keyspace state and snapshot records.

use std::path::Path;

use mimic_persistence::{FormatError, SnapEntry, SnapHeader, SnapValue, SnapshotReader, SnapshotWriter};
use tracing::info;

use super::*;

fn value_to_snap(value: &Value) -> SnapValue {
    match value {
        Value::String(data) => SnapValue::String(data.clone()),
        Value::List(items) => SnapValue::List(items.iter().cloned().collect()),
        Value::Hash(map) => SnapValue::Hash(
            map.iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        ),
        Value::Set(members) => SnapValue::Set(members.keys().cloned().collect()),
    }
}

fn snap_to_value(snap: SnapValue) -> Value {
    match snap {
        SnapValue::String(data) => Value::String(data),
        SnapValue::List(items) => Value::List(items.into()),
        SnapValue::Hash(pairs) => Value::Hash(pairs.into_iter().collect()),
        SnapValue::Set(members) => Value::Set(members.into_iter().map(|m| (m, ())).collect()),
    }
}

impl Keyspace {
    /// Writes every live key to a snapshot at `path`. Returns the number
    /// of entries written.
    pub fn to_snapshot(&self, path: &Path, db_index: u16) -> Result<u32, FormatError> {
        let header = SnapHeader {
            db_index,
            entry_count: 0,
            removals: self.entries.removals() as u64,
            next_id: self.next_id,
        };
        let mut writer = SnapshotWriter::create(path, header)?;
        let mut count = 0u32;

        for (key, entry) in self.entries.iter().filter(|(_, e)| !e.is_expired()) {
            writer.write_entry(&SnapEntry {
                key: key.clone(),
                id: entry.id,
                last_access_ms: entry.last_access_ms,
                expires_at_ms: entry.expires_at_ms,
                value: value_to_snap(&entry.value),
            })?;
            count += 1;
        }

        writer.finish()?;
        info!(db = db_index, keys = count, path = %path.display(), "snapshot saved");
        Ok(count)
    }

    /// Rebuilds a keyspace from the snapshot at `path`.
    ///
    /// Every key goes back in through the dictionary's normal insert path,
    /// so bucket placement is recomputed rather than trusted. Records that
    /// expired while the file sat on disk are dropped.
    pub fn load_snapshot(path: &Path) -> Result<Keyspace, FormatError> {
        let mut reader = SnapshotReader::open(path)?;
        let header = reader.header;
        let mut ks = Keyspace::new();
        let mut skipped = 0usize;
        let mut highest_id = 0u64;

        while let Some(record) = reader.read_entry()? {
            highest_id = highest_id.max(record.id);
            if time::is_expired(record.expires_at_ms) {
                skipped += 1;
                continue;
            }
            let value = snap_to_value(record.value);
            if value.is_empty_collection() {
                skipped += 1;
                continue;
            }
            ks.entries.store(
                record.key,
                StoredValue {
                    id: record.id,
                    value,
                    last_access_ms: record.last_access_ms,
                    expires_at_ms: record.expires_at_ms,
                },
            );
        }
        reader.verify_footer()?;

        ks.next_id = header.next_id.max(highest_id);
        ks.entries
            .set_removals(usize::try_from(header.removals).unwrap_or(usize::MAX));
        info!(
            db = header.db_index,
            keys = ks.entries.len(),
            skipped,
            path = %path.display(),
            "snapshot loaded"
        );
        Ok(ks)
    }
}
