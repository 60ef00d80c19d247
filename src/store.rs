use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionLogEntry {
    pub timestamp: NaiveDateTime,
    pub detected_heads: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealTimeStats {
    pub current_heads: u32,
    pub last_updated: Option<NaiveDateTime>,
}

/// SQLite-backed head count history.
///
/// Every operation opens its own connection, so the store is cheap to clone
/// and safe to share between the capture thread and request handlers.
#[derive(Debug, Clone)]
pub struct HeadCountStore {
    db_path: PathBuf,
}

impl HeadCountStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Creates the store and makes sure the schema and the stats row exist.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self::new(db_path);
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.db_path)?)
    }

    pub fn init(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detection_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
              detected_heads INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS real_time_stats (
              id INTEGER PRIMARY KEY CHECK (id = 1),
              last_updated DATETIME,
              current_heads INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_detection_logs_timestamp ON detection_logs(timestamp);
            "#,
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO real_time_stats (id, last_updated, current_heads) VALUES (1, ?1, 0)",
            params![now()],
        )?;
        Ok(())
    }

    pub fn log_detection(&self, detected_heads: u32) -> Result<(), StoreError> {
        self.log_detection_at(now(), detected_heads)
    }

    pub fn log_detection_at(
        &self,
        timestamp: NaiveDateTime,
        detected_heads: u32,
    ) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO detection_logs (timestamp, detected_heads) VALUES (?1, ?2)",
            params![timestamp, detected_heads],
        )?;
        Ok(())
    }

    pub fn update_real_time_stats(&self, current_heads: u32) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO real_time_stats (id, last_updated, current_heads) VALUES (1, ?1, ?2)",
            params![now(), current_heads],
        )?;
        Ok(())
    }

    pub fn get_real_time_stats(&self) -> Result<RealTimeStats, StoreError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT current_heads, last_updated FROM real_time_stats WHERE id = 1",
                [],
                |row| {
                    Ok(RealTimeStats {
                        current_heads: row.get::<_, Option<u32>>(0)?.unwrap_or(0),
                        last_updated: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(row.unwrap_or(RealTimeStats {
            current_heads: 0,
            last_updated: None,
        }))
    }

    /// Returns log entries newest first.
    pub fn get_detection_history(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<DetectionLogEntry>, StoreError> {
        let offset = i64::try_from(offset)
            .map_err(|_| StoreError::InvalidPagination(format!("offset {} too large", offset)))?;

        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, detected_heads FROM detection_logs \
             ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], |row| {
            Ok(DetectionLogEntry {
                timestamp: row.get(0)?,
                detected_heads: row.get(1)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn count_detection_logs(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM detection_logs", [], |row| {
            row.get(0)
        })?;
        Ok(count.max(0) as u64)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
