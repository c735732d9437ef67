use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use crate::profile::{ProfilePatch, ProfileStore};

/// SQLite-backed profile store. Each `(user_id, field)` pair is its own row,
/// so merging one field can never rewrite another.
pub struct ProfileDatabase {
    conn: Mutex<Connection>,
}

impl ProfileDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open profile database at {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS profile_fields (
                user_id TEXT NOT NULL,
                field TEXT NOT NULL,
                value_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, field)
            )",
            [],
        )?;
        Ok(())
    }

    /// Number of users with at least one stored field.
    pub fn count_profiles(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM profile_fields",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

impl ProfileStore for ProfileDatabase {
    fn get_record(&self, user_id: &str) -> Result<ProfilePatch> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT field, value_json FROM profile_fields WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut record = ProfilePatch::new();
        for (field, raw) in rows {
            let value = serde_json::from_str::<Value>(&raw).with_context(|| {
                format!("Corrupt value for field '{}' of user '{}'", field, user_id)
            })?;
            record.insert(field, value);
        }
        Ok(record)
    }

    fn merge(&self, user_id: &str, patch: ProfilePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (field, value) in &patch {
            if value.is_null() {
                tx.execute(
                    "DELETE FROM profile_fields WHERE user_id = ?1 AND field = ?2",
                    params![user_id, field],
                )?;
                continue;
            }
            tx.execute(
                "INSERT INTO profile_fields (user_id, field, value_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, field) DO UPDATE SET
                    value_json = excluded.value_json,
                    updated_at = excluded.updated_at",
                params![user_id, field, value.to_string(), now],
            )?;
        }
        tx.commit()
            .with_context(|| format!("Failed to commit profile merge for '{}'", user_id))?;

        tracing::debug!(
            "Merged {} field(s) into profile '{}'",
            patch.len(),
            user_id
        );
        Ok(())
    }
}
