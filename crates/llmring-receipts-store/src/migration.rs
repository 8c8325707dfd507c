//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Timestamps are Unix microseconds. Currency amounts are decimal strings.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Candidate source: conversation aggregates
        CREATE TABLE conversations (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            model_alias TEXT,
            total_input_tokens INTEGER NOT NULL DEFAULT 0,
            total_output_tokens INTEGER NOT NULL DEFAULT 0,
            total_cost TEXT NOT NULL DEFAULT '0',
            created_at INTEGER NOT NULL
        );

        -- Messages: only provider/model metadata is read here
        CREATE TABLE messages (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            provider TEXT,
            model TEXT,
            timestamp INTEGER NOT NULL
        );

        -- Candidate source: individual LLM calls
        CREATE TABLE usage_logs (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            alias TEXT,
            provider TEXT,
            model TEXT,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cost TEXT NOT NULL DEFAULT '0',
            conversation_id TEXT,             -- NULL for standalone calls
            created_at INTEGER NOT NULL
        );

        -- Signed receipts: scalar signed fields plus unsigned metadata
        CREATE TABLE receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_id TEXT NOT NULL UNIQUE,
            owner TEXT NOT NULL,
            receipt_timestamp INTEGER NOT NULL,
            alias TEXT NOT NULL,
            profile TEXT NOT NULL,
            lock_digest TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL,
            completion_tokens INTEGER NOT NULL,
            total_tokens INTEGER NOT NULL,
            input_cost TEXT NOT NULL,
            output_cost TEXT NOT NULL,
            total_cost TEXT NOT NULL,
            signature TEXT NOT NULL,          -- ed25519:<base64url>
            key_id TEXT NOT NULL,             -- fingerprint of the signing key
            receipt_type TEXT NOT NULL,       -- 'single' | 'batch'
            batch_summary TEXT,               -- JSON, unsigned
            description TEXT,
            tags TEXT,                        -- JSON array, unsigned
            stored_at INTEGER NOT NULL
        );

        -- Receipt to record linkage
        CREATE TABLE receipt_logs (
            receipt_id TEXT NOT NULL REFERENCES receipts(receipt_id),
            log_id TEXT NOT NULL,
            log_type TEXT NOT NULL,           -- 'conversation' | 'usage'
            certified_at INTEGER NOT NULL,
            PRIMARY KEY (receipt_id, log_id, log_type)
        );

        -- Indexes for common queries
        CREATE INDEX idx_conversations_owner_created ON conversations(owner, created_at);
        CREATE INDEX idx_messages_conversation ON messages(conversation_id, timestamp);
        CREATE INDEX idx_usage_owner_created ON usage_logs(owner, created_at);
        CREATE INDEX idx_receipts_owner ON receipts(owner, receipt_timestamp);
        CREATE INDEX idx_receipt_logs_log ON receipt_logs(log_id, log_type);
        "#,
    )?;

    Ok(())
}
