//! The numbered databases and the locks around them.
//!
//! Every [`Database`] wraps its [`Keyspace`] in a mutex. Ordinary
//! commands hold it for one call. EXEC takes it once for a whole batch
//! through [`Database::acquire_exclusive`], which records the owning
//! session; the owning [`Session`](crate::session::Session) then runs
//! queued commands against the guard it holds instead of locking again.
//!
//! Anything that needs two databases at once first takes the set-wide
//! cross-database lock, so no two sessions can ever wait on each other's
//! database locks in opposite order.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mimic_persistence::{snapshot_path, FormatError};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, MutexGuard, RawMutex};
use tracing::{debug, info};

use crate::expiry;
use crate::keyspace::Keyspace;
use crate::session::Session;

/// Default number of databases, as in Redis.
pub const DEFAULT_DATABASES: usize = 16;

/// Construction parameters for a [`KeyspaceSet`].
#[derive(Debug, Clone)]
pub struct KeyspaceSetConfig {
    /// Number of logical databases. Must be at least 1.
    pub databases: usize,
}

impl Default for KeyspaceSetConfig {
    fn default() -> Self {
        Self {
            databases: DEFAULT_DATABASES,
        }
    }
}

/// One logical database behind its lock.
#[derive(Debug)]
pub struct Database {
    index: usize,
    state: Arc<Mutex<Keyspace>>,
    /// Session holding exclusive access, 0 when none.
    owner: Arc<AtomicU64>,
}

impl Database {
    fn new(index: usize, keyspace: Keyspace) -> Self {
        Self {
            index,
            state: Arc::new(Mutex::new(keyspace)),
            owner: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Locks the database for a single operation.
    pub fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.state.lock()
    }

    /// Locks the database on behalf of `session` until the returned
    /// guard is dropped.
    pub fn acquire_exclusive(&self, session: u64) -> ExclusiveGuard {
        let guard = self.state.lock_arc();
        self.owner.store(session, Ordering::Release);
        debug!(db = self.index, session, "exclusive access acquired");
        ExclusiveGuard {
            guard,
            owner: Arc::clone(&self.owner),
        }
    }

    /// The session currently holding exclusive access, if any.
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }
}

/// Exclusive access to one database, released on drop.
pub struct ExclusiveGuard {
    guard: ArcMutexGuard<RawMutex, Keyspace>,
    owner: Arc<AtomicU64>,
}

impl std::ops::Deref for ExclusiveGuard {
    type Target = Keyspace;

    fn deref(&self) -> &Keyspace {
        &self.guard
    }
}

impl std::ops::DerefMut for ExclusiveGuard {
    fn deref_mut(&mut self) -> &mut Keyspace {
        &mut self.guard
    }
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        // the mutex itself unlocks right after, when `guard` drops
        self.owner.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for ExclusiveGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveGuard")
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish()
    }
}

/// All databases of one server, plus the cross-database lock.
///
/// Shared as `Arc<KeyspaceSet>`; every connection gets its own
/// [`Session`] from [`KeyspaceSet::session`].
#[derive(Debug)]
pub struct KeyspaceSet {
    dbs: Vec<Database>,
    cross_db: Arc<Mutex<()>>,
    next_session: AtomicU64,
}

impl KeyspaceSet {
    /// Creates empty databases.
    ///
    /// Panics if `config.databases` is zero.
    pub fn new(config: KeyspaceSetConfig) -> Self {
        assert!(config.databases > 0, "database count must be at least 1");
        let dbs = (0..config.databases)
            .map(|i| Database::new(i, Keyspace::new()))
            .collect();
        Self {
            dbs,
            cross_db: Arc::new(Mutex::new(())),
            next_session: AtomicU64::new(1),
        }
    }

    /// Number of databases.
    pub fn len(&self) -> usize {
        self.dbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dbs.is_empty()
    }

    pub fn db(&self, index: usize) -> Option<&Database> {
        self.dbs.get(index)
    }

    pub fn databases(&self) -> &[Database] {
        &self.dbs
    }

    /// Opens a session on database 0 with a fresh session id.
    pub fn session(self: &Arc<Self>) -> Session {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Session::new(id, Arc::clone(self))
    }

    pub(crate) fn cross_lock(&self) -> MutexGuard<'_, ()> {
        self.cross_db.lock()
    }

    pub(crate) fn cross_lock_arc(&self) -> ArcMutexGuard<RawMutex, ()> {
        self.cross_db.lock_arc()
    }

    /// Runs one active-expiry cycle on every database. Returns the
    /// total number of keys reclaimed.
    pub fn run_expiration(&self) -> usize {
        self.dbs
            .iter()
            .map(|db| expiry::run_expiration_cycle(&mut db.lock()))
            .sum()
    }

    /// Writes a snapshot of every database into `dir`. Each database is
    /// locked only while its own file is written.
    pub fn save(&self, dir: &Path) -> Result<usize, FormatError> {
        std::fs::create_dir_all(dir)?;
        let mut total = 0usize;
        for db in &self.dbs {
            let index = db_file_index(db.index)?;
            let path = snapshot_path(dir, index);
            total += db.lock().to_snapshot(&path, index)? as usize;
        }
        info!(dir = %dir.display(), keys = total, "all databases saved");
        Ok(total)
    }

    /// Loads whichever snapshots exist in `dir`, replacing the contents
    /// of the matching databases. Returns the number of keys loaded.
    pub fn load(&self, dir: &Path) -> Result<usize, FormatError> {
        let mut total = 0usize;
        for db in &self.dbs {
            let path = snapshot_path(dir, db_file_index(db.index)?);
            if !path.exists() {
                continue;
            }
            let loaded = Keyspace::load_snapshot(&path)?;
            total += loaded.len();
            *db.lock() = loaded;
        }
        Ok(total)
    }
}

pub(crate) fn db_file_index(index: usize) -> Result<u16, FormatError> {
    u16::try_from(index)
        .map_err(|_| FormatError::InvalidData(format!("database index {index} out of range")))
}
