//! Database connection management with WAL mode support
//!
//! Wraps a single SQLite connection behind a mutex. Every profile
//! read-modify-write goes through `with_transaction`, so writers to the
//! same profile are serialized by construction.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;

use super::migrations::run_migrations;
use crate::error::Result;
use crate::types::{StorageConfig, StorageMode};

/// Storage engine wrapping SQLite
pub struct Storage {
    config: StorageConfig,
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open or create a database with the given configuration
    pub fn open(config: StorageConfig) -> Result<Self> {
        let conn = Self::create_connection(&config)?;

        run_migrations(&conn)?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (tests, offline CLI runs)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory())
    }

    fn create_connection(config: &StorageConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open_with_flags(&config.db_path, flags)?
        };

        Self::configure_pragmas(&conn, config.storage_mode)?;

        Ok(conn)
    }

    /// Local mode: WAL for performance and crash recovery.
    /// Cloud-safe mode: DELETE journal so the database stays a single file.
    fn configure_pragmas(conn: &Connection, mode: StorageMode) -> Result<()> {
        match mode {
            StorageMode::Local => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=30000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
            StorageMode::CloudSafe => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=DELETE;
                    PRAGMA synchronous=FULL;
                    PRAGMA busy_timeout=30000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
        }
        Ok(())
    }

    /// Execute a function with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a function with a transaction
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.config.storage_mode
    }

    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Check if database is in a cloud-synced folder
    pub fn is_in_cloud_folder(&self) -> bool {
        let path = self.config.db_path.to_lowercase();
        path.contains("dropbox")
            || path.contains("onedrive")
            || path.contains("icloud")
            || path.contains("google drive")
    }

    /// Warning if storage mode doesn't match folder type
    pub fn storage_mode_warning(&self) -> Option<String> {
        if self.is_in_cloud_folder() && self.config.storage_mode == StorageMode::Local {
            Some(format!(
                "Database '{}' appears to be in a cloud-synced folder. \
                WAL mode may cause corruption; set HEARTH_STORAGE_MODE=cloud-safe",
                self.config.db_path
            ))
        } else {
            None
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.db_path(), ":memory:");
        assert_eq!(storage.storage_mode(), StorageMode::Local);
    }

    #[test]
    fn test_open_on_disk_cloud_safe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hearth.db");
        let storage = Storage::open(StorageConfig {
            db_path: path.to_string_lossy().to_string(),
            storage_mode: StorageMode::CloudSafe,
        })
        .unwrap();
        assert_eq!(storage.storage_mode(), StorageMode::CloudSafe);
        assert!(path.exists());
    }

    #[test]
    fn test_cloud_folder_warning() {
        let storage = Storage {
            config: StorageConfig {
                db_path: "/Users/test/Dropbox/hearth.db".to_string(),
                storage_mode: StorageMode::Local,
            },
            conn: Arc::new(Mutex::new(Connection::open_in_memory().unwrap())),
        };
        assert!(storage.storage_mode_warning().is_some());
    }
}
