use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result, TransactionBehavior};

use crate::error::AppError;
use crate::models::TokenRecord;

pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_db(path: &Path) -> std::result::Result<DbPool, AppError> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
    let pool = Pool::new(manager)?;
    {
        let conn = pool.get()?;
        run_migrations(&conn)?;
    }
    Ok(pool)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            expires_in INTEGER NOT NULL,
            issued_at INTEGER NOT NULL,
            user_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Token record of a logged-in session. Anonymous ids have no row.
pub fn session_token(conn: &Connection, id: &str) -> Result<Option<TokenRecord>> {
    conn.query_row(
        "
        SELECT access_token, refresh_token, expires_in, issued_at, user_id
        FROM sessions
        WHERE id = ?1
        ",
        params![id],
        |row| {
            Ok(TokenRecord {
                access_token: row.get(0)?,
                refresh_token: row.get(1)?,
                expires_in: row.get(2)?,
                issued_at: row.get(3)?,
                user_id: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Drops `previous_id` and stores `record` under the never-used `id`, in one
/// transaction. A plain insert, so an id that was deleted is never written back.
pub fn rotate_session(
    conn: &mut Connection,
    previous_id: &str,
    id: &str,
    record: &TokenRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute("DELETE FROM sessions WHERE id = ?1", params![previous_id])?;
    tx.execute(
        "
        INSERT INTO sessions (id, created_at, access_token, refresh_token, expires_in, issued_at, user_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            id,
            now,
            record.access_token,
            record.refresh_token,
            record.expires_in,
            record.issued_at,
            record.user_id
        ],
    )?;
    tx.commit()
}

pub fn delete_session(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn prune_sessions(conn: &Connection, created_before: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM sessions WHERE created_at < ?1",
        params![created_before],
    )
}

pub fn read_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn write_setting(conn: &Connection, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "
        INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        ",
        params![key, value, now],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_db(&dir.path().join("test.sqlite")).unwrap();
    (dir, pool)
}
