//! The storage facade: opens the database, configures it for safe multi-process concurrent
//! access, runs migrations, and owns the one connection a process is allowed to hold.
//!
//! Per the concurrency model, a single process (the long-lived server, or a short-lived hook
//! invocation) uses exactly one connection for its lifetime — never a split reader/writer pool.
//! Multiple processes coexist only because WAL mode permits one writer and unlimited readers at
//! the file level, serialized by the busy-wait timeout.

use directories::ProjectDirs;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, StorageError};
use crate::storage::migrations;

#[cfg(feature = "vector-search")]
use crate::search::vector::VectorIndex;

/// Owns the single connection for this process and whatever optional engines came up
/// alongside it.
pub struct Storage {
    conn: Mutex<Connection>,
    /// Threaded through explicitly rather than read from an ambient global — the vector
    /// extension either loaded for this process or it did not, and every caller that cares
    /// reads this flag instead of probing for the table's existence.
    vector_available: std::sync::atomic::AtomicBool,
    #[cfg(feature = "vector-search")]
    vector_index: Mutex<Option<VectorIndex>>,
    db_path: PathBuf,
}

impl Storage {
    /// Apply the fixed PRAGMA sequence. The first two directives (journal mode, busy timeout)
    /// are the only ones the caller cannot safely proceed without; every later one is a tuning
    /// knob. Returns whether WAL mode actually activated — some filesystems (network mounts,
    /// certain container overlays) silently refuse it.
    fn configure_connection(conn: &Connection) -> Result<bool> {
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        let wal_active = journal_mode.eq_ignore_ascii_case("wal");
        if !wal_active {
            tracing::warn!(mode = %journal_mode, "WAL mode did not activate; upgrading synchronous to FULL");
        }

        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = {};
             PRAGMA cache_size = -64000;
             PRAGMA foreign_keys = ON;
             PRAGMA temp_store = MEMORY;
             PRAGMA wal_autocheckpoint = 1000;",
            if wal_active { "NORMAL" } else { "FULL" }
        ))?;

        Ok(wal_active)
    }

    fn default_db_path() -> Result<PathBuf> {
        let proj_dirs =
            ProjectDirs::from("", "", "substrate").ok_or(StorageError::NoDataDir)?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700));
        }

        Ok(data_dir.join("substrate.db"))
    }

    /// Open (creating if absent) the database at `db_path`, or the installation-managed
    /// default when `None`. Runs the PRAGMA sequence, attempts to bring up the vector index,
    /// and applies all outstanding migrations.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => {
                if let Some(parent) = p.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                p
            }
            None => Self::default_db_path()?,
        };

        let is_new = !path.exists();
        let conn = Connection::open(&path)?;

        #[cfg(unix)]
        if is_new {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        let _ = is_new;

        Self::configure_connection(&conn)?;

        #[cfg(feature = "vector-search")]
        let vector_index = match VectorIndex::open_or_create(path.with_extension("usearch")) {
            Ok(index) => Some(index),
            Err(err) => {
                tracing::warn!(error = %err, "vector index unavailable, continuing in keyword-only mode");
                let _ = std::fs::remove_file(path.with_extension("usearch"));
                None
            }
        };
        #[cfg(feature = "vector-search")]
        let vector_available = vector_index.is_some();
        #[cfg(not(feature = "vector-search"))]
        let vector_available = false;

        migrations::apply_migrations(&conn, vector_available)?;

        Ok(Self {
            conn: Mutex::new(conn),
            vector_available: std::sync::atomic::AtomicBool::new(vector_available),
            #[cfg(feature = "vector-search")]
            vector_index: Mutex::new(vector_index),
            db_path: path,
        })
    }

    pub fn vector_available(&self) -> bool {
        self.vector_available.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run every closure under the single process connection, holding the lock only for the
    /// duration of the callback.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        f(&conn)
    }

    #[cfg(feature = "vector-search")]
    pub fn with_vector_index<T>(
        &self,
        f: impl FnOnce(Option<&mut VectorIndex>) -> T,
    ) -> T {
        let mut guard = self.vector_index.lock().expect("vector index mutex poisoned");
        f(guard.as_mut())
    }

    /// Passively checkpoint the WAL file, then drop the connection. Failure to checkpoint is
    /// logged and ignored — it never blocks shutdown.
    pub fn close(self) {
        if let Ok(conn) = self.conn.lock() {
            if let Err(err) = conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);") {
                tracing::warn!(error = %err, "checkpoint on close failed, continuing");
            }
        }
    }

    /// Explicit checkpoint callers invoke at session boundaries to bound WAL file growth.
    pub fn checkpoint(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_a_fresh_database_and_applies_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(Some(dir.path().join("test.db"))).unwrap();
        let version = storage.with_connection(|conn| migrations::current_version(conn)).unwrap();
        assert!(version > 0);
    }

    #[test]
    fn reopening_an_existing_database_does_not_rerun_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let storage = Storage::open(Some(path.clone())).unwrap();
            storage.close();
        }
        let storage = Storage::open(Some(path)).unwrap();
        let count = storage
            .with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
                Ok(n)
            })
            .unwrap();
        assert_eq!(count as usize, migrations::MIGRATIONS.len());
    }
}
