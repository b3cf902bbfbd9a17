use rusqlite::Connection;
use std::path::Path;
use tokio::task;
use crate::error::{Result, PapergraphError};

const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; \
     PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY;";

/// Database connection wrapper
#[derive(Debug, Clone)]
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Path of the underlying SQLite file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(PapergraphError::Database)?;

        // WAL for concurrent readers during a run; busy_timeout so that workers
        // contending for the write lock wait instead of failing with SQLITE_BUSY
        conn.execute_batch(CONNECTION_PRAGMAS)?;

        Ok(conn)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        task::spawn_blocking(move || {
            let mut conn = db.open_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| PapergraphError::Task(format!("database task failed: {}", e)))?
    }
}

pub mod migrate;
