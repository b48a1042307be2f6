use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::error::StorageError;
use super::schema::init_database;
use super::{CounterKey, CounterStore, IncrementOutcome, UsageRecord, USAGE_DB_FILENAME};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COUNT_SQL: &str = r#"
SELECT count
FROM usage_counters
WHERE user_id = ?1 AND period_key = ?2 AND feature = ?3
"#;

const INCREMENT_SQL: &str = r#"
INSERT INTO usage_counters (user_id, period_key, feature, count, created_at, updated_at)
VALUES (?1, ?2, ?3, 1, ?4, ?4)
ON CONFLICT(user_id, period_key, feature) DO UPDATE SET
    count = usage_counters.count + 1,
    updated_at = excluded.updated_at
RETURNING count
"#;

// The conflict branch only fires while the stored count is below the ceiling,
// so the comparison and the write are one statement.
const CONDITIONAL_INCREMENT_SQL: &str = r#"
INSERT INTO usage_counters (user_id, period_key, feature, count, created_at, updated_at)
VALUES (?1, ?2, ?3, 1, ?4, ?4)
ON CONFLICT(user_id, period_key, feature) DO UPDATE SET
    count = usage_counters.count + 1,
    updated_at = excluded.updated_at
WHERE usage_counters.count < ?5
RETURNING count
"#;

/// SQLite-backed counter store.
pub struct SqliteCounterStore {
    data_dir: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteCounterStore {
    pub fn new(data_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(USAGE_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_database(&conn)?;

        debug!(path = %db_path.display(), "opened usage counter database");

        Ok(Self {
            data_dir,
            conn: Mutex::new(conn),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn read_count(conn: &Connection, key: &CounterKey) -> Result<Option<u64>, StorageError> {
        let count = conn
            .query_row(
                SELECT_COUNT_SQL,
                params![key.user_id, key.period_key, key.feature],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(count.map(|value| value as u64))
    }
}

impl CounterStore for SqliteCounterStore {
    fn get(&self, key: &CounterKey) -> Result<Option<u64>, StorageError> {
        let conn = self.lock()?;
        Self::read_count(&conn, key)
    }

    fn increment(&self, key: &CounterKey) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let count = conn.query_row(
            INCREMENT_SQL,
            params![key.user_id, key.period_key, key.feature, now],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count as u64)
    }

    fn conditional_increment(
        &self,
        key: &CounterKey,
        limit: u64,
    ) -> Result<IncrementOutcome, StorageError> {
        let conn = self.lock()?;

        if limit == 0 {
            let current = Self::read_count(&conn, key)?.unwrap_or(0);
            return Ok(IncrementOutcome::Rejected { current });
        }

        let now = Utc::now().to_rfc3339();
        let ceiling = i64::try_from(limit).unwrap_or(i64::MAX);
        let applied = conn
            .query_row(
                CONDITIONAL_INCREMENT_SQL,
                params![key.user_id, key.period_key, key.feature, now, ceiling],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        match applied {
            Some(count) => Ok(IncrementOutcome::Applied(count as u64)),
            None => {
                let current = Self::read_count(&conn, key)?.unwrap_or(0);
                Ok(IncrementOutcome::Rejected { current })
            }
        }
    }

    fn list_user_usage(
        &self,
        user_id: &str,
        period_prefix: &str,
    ) -> Result<Vec<UsageRecord>, StorageError> {
        let conn = self.lock()?;
        let nested = format!("{period_prefix}-%");

        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, period_key, feature, count
            FROM usage_counters
            WHERE user_id = ?1 AND (period_key = ?2 OR period_key LIKE ?3)
            ORDER BY period_key ASC, feature ASC
            "#,
        )?;

        let rows = stmt.query_map(params![user_id, period_prefix, nested], |row| {
            Ok(UsageRecord {
                user_id: row.get(0)?,
                period_key: row.get(1)?,
                feature: row.get(2)?,
                count: row.get::<_, i64>(3)? as u64,
            })
        })?;

        let mut usage = Vec::new();
        for row in rows {
            usage.push(row?);
        }
        Ok(usage)
    }
}
