//! Command sessions: one per client connection.
//!
//! A session knows which database its client has selected and is the
//! only way commands reach a [`Keyspace`]. Outside a transaction each
//! call locks the target database for its duration. Between
//! [`Session::acquire_exclusive`] and [`Session::release_exclusive`] the
//! session holds its database's lock itself, and calls against that
//! database run straight on the held guard.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use mimic_persistence::{snapshot_path, FormatError};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use tracing::info;

use crate::error::CommandError;
use crate::keyspace::Keyspace;
use crate::spaces::{db_file_index, ExclusiveGuard, KeyspaceSet};

struct Exclusive {
    db: usize,
    guard: ExclusiveGuard,
    /// Held when the batch may reach other databases.
    cross: Option<ArcMutexGuard<RawMutex, ()>>,
}

/// A key captured by WATCH together with the id it had at the time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchedKey {
    db: usize,
    key: Bytes,
    id: Option<u64>,
}

/// Per-connection handle onto a [`KeyspaceSet`].
pub struct Session {
    id: u64,
    db: usize,
    spaces: Arc<KeyspaceSet>,
    exclusive: Option<Exclusive>,
    watched: Vec<WatchedKey>,
}

impl Session {
    pub(crate) fn new(id: u64, spaces: Arc<KeyspaceSet>) -> Self {
        Self {
            id,
            db: 0,
            spaces,
            exclusive: None,
            watched: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the selected database.
    pub fn db(&self) -> usize {
        self.db
    }

    pub fn spaces(&self) -> &Arc<KeyspaceSet> {
        &self.spaces
    }

    /// Validates a database index coming from a client.
    pub fn check_db(&self, index: i64) -> Result<usize, CommandError> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.spaces.len())
            .ok_or(CommandError::InvalidDbIndex)
    }

    pub fn select(&mut self, index: i64) -> Result<(), CommandError> {
        self.db = self.check_db(index)?;
        Ok(())
    }

    /// True while this session holds exclusive access.
    pub fn in_transaction(&self) -> bool {
        self.exclusive.is_some()
    }

    /// Runs `f` against the selected database.
    pub fn run<T>(&mut self, f: impl FnOnce(&mut Keyspace) -> T) -> T {
        self.run_on(self.db, f)
    }

    /// Runs `f` against database `db`, which must be a valid index.
    pub fn run_on<T>(&mut self, db: usize, f: impl FnOnce(&mut Keyspace) -> T) -> T {
        match self.exclusive.as_mut() {
            Some(ex) if ex.db == db => f(&mut *ex.guard),
            _ => {
                let database = &self.spaces.databases()[db];
                let mut guard = database.lock();
                f(&mut *guard)
            }
        }
    }

    /// Runs `f` with two different databases locked at once.
    ///
    /// Takes the cross-database lock first unless the current
    /// transaction already holds it.
    pub fn run_pair<T>(
        &mut self,
        a: usize,
        b: usize,
        f: impl FnOnce(&mut Keyspace, &mut Keyspace) -> T,
    ) -> T {
        assert_ne!(a, b, "run_pair needs two distinct databases");
        debug_assert!(
            self.exclusive.as_ref().map_or(true, |ex| ex.cross.is_some()),
            "transaction touching two databases without the cross-database lock"
        );
        let spaces = Arc::clone(&self.spaces);
        let holds_cross = self
            .exclusive
            .as_ref()
            .is_some_and(|ex| ex.cross.is_some());
        let _cross = (!holds_cross).then(|| spaces.cross_lock());

        let dbs = spaces.databases();
        match self.exclusive.as_mut() {
            Some(ex) if ex.db == a => {
                let mut other = dbs[b].lock();
                f(&mut *ex.guard, &mut *other)
            }
            Some(ex) if ex.db == b => {
                let mut other = dbs[a].lock();
                f(&mut *other, &mut *ex.guard)
            }
            _ => {
                let mut first = dbs[a].lock();
                let mut second = dbs[b].lock();
                f(&mut *first, &mut *second)
            }
        }
    }

    /// Runs `f` on every database in turn, one lock at a time.
    pub fn run_each(&mut self, mut f: impl FnMut(usize, &mut Keyspace)) {
        for db in 0..self.spaces.len() {
            self.run_on(db, |ks| f(db, ks));
        }
    }

    /// Takes exclusive access to the selected database for a batch.
    ///
    /// With `hold_cross` the cross-database lock is taken first and kept
    /// until release; the batch may then touch other databases safely.
    pub fn acquire_exclusive(&mut self, hold_cross: bool) {
        if self.exclusive.is_some() {
            return;
        }
        let cross = hold_cross.then(|| self.spaces.cross_lock_arc());
        let guard = self.spaces.databases()[self.db].acquire_exclusive(self.id);
        self.exclusive = Some(Exclusive {
            db: self.db,
            guard,
            cross,
        });
    }

    pub fn release_exclusive(&mut self) {
        self.exclusive = None;
    }

    /// Records the current ids of `keys` in the selected database.
    pub fn watch(&mut self, keys: &[Bytes]) {
        for key in keys {
            let id = self.run(|ks| ks.object_id(key));
            self.watched.push(WatchedKey {
                db: self.db,
                key: key.clone(),
                id,
            });
        }
    }

    pub fn unwatch(&mut self) {
        self.watched.clear();
    }

    pub fn is_watching(&self) -> bool {
        !self.watched.is_empty()
    }

    /// True if some watched key lives outside the selected database.
    pub fn watches_other_db(&self) -> bool {
        self.watched.iter().any(|w| w.db != self.db)
    }

    /// Checks every watched key against its current id. A key that was
    /// absent and is still absent counts as unchanged.
    pub fn watches_intact(&mut self) -> bool {
        let watched = std::mem::take(&mut self.watched);
        let intact = watched
            .iter()
            .all(|w| self.run_on(w.db, |ks| ks.object_id(&w.key)) == w.id);
        self.watched = watched;
        intact
    }

    /// MOVE: transfers `key` from the selected database to `dst`.
    /// Returns `false` if the key is missing or already exists there.
    pub fn move_key(&mut self, key: &[u8], dst: usize) -> Result<bool, CommandError> {
        if dst == self.db {
            return Err(CommandError::SameObject);
        }
        let moved = self.run_pair(self.db, dst, |src, target| {
            if !src.exists(key) || target.exists(key) {
                return false;
            }
            match src.take(key) {
                Some((value, expires_at_ms)) => {
                    target.import(Bytes::copy_from_slice(key), value, expires_at_ms, false)
                }
                None => false,
            }
        });
        Ok(moved)
    }

    /// COPY with an optional destination database.
    pub fn copy_key(
        &mut self,
        src: &[u8],
        dst: Bytes,
        dst_db: Option<usize>,
        replace: bool,
    ) -> Result<bool, CommandError> {
        match dst_db {
            None => self.run(|ks| ks.copy(src, dst, replace)),
            Some(db) if db == self.db => self.run(|ks| ks.copy(src, dst, replace)),
            Some(db) => Ok(self.run_pair(self.db, db, |from, to| {
                match from.export(src) {
                    Some((value, expires_at_ms)) => to.import(dst, value, expires_at_ms, replace),
                    None => false,
                }
            })),
        }
    }

    /// SWAPDB.
    pub fn swap_db(&mut self, a: usize, b: usize) {
        if a != b {
            self.run_pair(a, b, |x, y| x.swap_contents(y));
        }
    }

    /// FLUSHALL.
    pub fn flush_all(&mut self) {
        self.run_each(|_, ks| ks.flush());
    }

    /// SAVE. Like [`KeyspaceSet::save`], but runs on the held guard
    /// when called from inside a transaction.
    pub fn save(&mut self, dir: &Path) -> Result<usize, FormatError> {
        std::fs::create_dir_all(dir)?;
        let mut total = 0usize;
        for db in 0..self.spaces.len() {
            let index = db_file_index(db)?;
            let path = snapshot_path(dir, index);
            total += self.run_on(db, |ks| ks.to_snapshot(&path, index))? as usize;
        }
        info!(dir = %dir.display(), keys = total, session = self.id, "SAVE complete");
        Ok(total)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("db", &self.db)
            .field("exclusive", &self.exclusive.as_ref().map(|ex| ex.db))
            .field("watched", &self.watched.len())
            .finish()
    }
}
