use rusqlite::Connection;

use super::error::StorageError;

pub const USAGE_COUNTERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS usage_counters (
    user_id TEXT NOT NULL,
    period_key TEXT NOT NULL,
    feature TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, period_key, feature)
);
"#;

pub const USAGE_COUNTERS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_usage_user_period ON usage_counters(user_id, period_key);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(USAGE_COUNTERS_TABLE_SCHEMA)?;
    conn.execute_batch(USAGE_COUNTERS_INDEXES)?;
    Ok(())
}
