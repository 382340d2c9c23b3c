use anyhow::{Context, Result, anyhow};
use r2d2::{ManageConnection, Pool, PooledConnection};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::db_schema::initialize_schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_SIZE: u32 = 4;

pub struct SqliteConnectionManager {
    path: PathBuf,
    flags: OpenFlags,
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(&self.path, self.flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if !self.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY) {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

/// Pooled handle on a session's embedded state database.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
    read_only: bool,
}

impl Database {
    /// Open (creating if needed) a writable database and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory {}", parent.display())
            })?;
        }

        let db = Self::build(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            false,
        )?;
        db.verify_integrity()?;
        initialize_schema(&db)?;
        Ok(db)
    }

    /// Open an existing database without write access. Returns `None` when the
    /// file has never been created.
    pub fn open_read_only(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let db = Self::build(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            true,
        )?;
        db.verify_integrity()?;
        Ok(Some(db))
    }

    fn build(path: &Path, flags: OpenFlags, read_only: bool) -> Result<Self> {
        let manager = SqliteConnectionManager {
            path: path.to_path_buf(),
            flags,
        };
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .with_context(|| format!("Failed to open state database {}", path.display()))?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            read_only,
        })
    }

    pub fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow!("Failed to get connection for {}: {e}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(anyhow!(
                "State database {} was opened read-only",
                self.path.display()
            ));
        }
        Ok(())
    }

    fn verify_integrity(&self) -> Result<()> {
        let conn = self.get_conn()?;
        let verdict: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .with_context(|| format!("Integrity check failed for {}", self.path.display()))?;
        if verdict != "ok" {
            return Err(anyhow!(
                "State database {} is corrupt: {verdict}",
                self.path.display()
            ));
        }
        Ok(())
    }
}
