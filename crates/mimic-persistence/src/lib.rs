//! mimic-persistence: on-disk layout for database snapshots.
//!
//! One file per logical database. The engine converts its live state
//! to and from the records defined here; this crate only knows bytes.

pub mod format;
pub mod snapshot;

pub use format::FormatError;
pub use snapshot::{snapshot_path, SnapEntry, SnapHeader, SnapValue, SnapshotReader, SnapshotWriter};
