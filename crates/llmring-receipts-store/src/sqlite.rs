//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};
use rust_decimal::Decimal;

use llmring_receipts_core::{
    BatchReceipt, CandidateLog, LogId, LogType, OwnerId, Receipt, ReceiptId, ReceiptType,
    Selector, UnsignedReceipt,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::records::{
    paginate, sort_newest_first, Certification, ConversationRecord, LinkPolicy, MessageRecord,
    ReceiptHandle, StoredReceipt, UsageRecord,
};
use crate::traits::Store;

/// Conversation columns plus provider/model of the most recent message.
const CONVERSATION_SELECT: &str = "
    SELECT c.id, c.model_alias, c.total_input_tokens, c.total_output_tokens,
           c.total_cost, c.created_at,
           (SELECT m.provider FROM messages m WHERE m.conversation_id = c.id
             ORDER BY m.timestamp DESC, m.rowid DESC LIMIT 1) AS provider,
           (SELECT m.model FROM messages m WHERE m.conversation_id = c.id
             ORDER BY m.timestamp DESC, m.rowid DESC LIMIT 1) AS model
    FROM conversations c";

const USAGE_SELECT: &str = "
    SELECT u.id, u.alias, u.provider, u.model, u.input_tokens, u.output_tokens,
           u.cost, u.conversation_id, u.created_at
    FROM usage_logs u";

const RECEIPT_SELECT: &str = "
    SELECT receipt_id, receipt_timestamp, alias, profile, lock_digest, provider, model,
           prompt_tokens, completion_tokens, total_tokens,
           input_cost, output_cost, total_cost, signature, key_id,
           receipt_type, batch_summary, description, tags, stored_at
    FROM receipts";

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime. Several stores (or processes) may
/// open the same file; certifications are serialized by SQLite's write lock.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;

        // WAL lets readers proceed while another connection writes.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "opened sqlite store");
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Column conversions
// ─────────────────────────────────────────────────────────────────────────────

fn invalid_column(col: &str, ty: Type, msg: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, ty, format!("{}: {}", col, msg).into())
}

fn micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

fn get_timestamp(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let value: i64 = row.get(col)?;
    from_micros(value).ok_or_else(|| invalid_column(col, Type::Integer, "timestamp out of range"))
}

fn get_u64(row: &Row<'_>, col: &str) -> rusqlite::Result<u64> {
    let value: i64 = row.get(col)?;
    u64::try_from(value).map_err(|_| invalid_column(col, Type::Integer, "negative count"))
}

fn get_decimal(row: &Row<'_>, col: &str) -> rusqlite::Result<Decimal> {
    let value: String = row.get(col)?;
    Decimal::from_str(&value).map_err(|e| invalid_column(col, Type::Text, e))
}

fn get_log_id(row: &Row<'_>, col: &str) -> rusqlite::Result<LogId> {
    let value: String = row.get(col)?;
    LogId::parse(value).map_err(|e| invalid_column(col, Type::Text, e))
}

fn count_param(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{} out of range: {}", field, value)))
}

fn clamp_param(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<CandidateLog> {
    let record = ConversationRecord {
        id: get_log_id(row, "id")?,
        model_alias: row.get("model_alias")?,
        total_input_tokens: get_u64(row, "total_input_tokens")?,
        total_output_tokens: get_u64(row, "total_output_tokens")?,
        total_cost: get_decimal(row, "total_cost")?,
        created_at: get_timestamp(row, "created_at")?,
    };

    let provider: Option<String> = row.get("provider")?;
    let model: Option<String> = row.get("model")?;
    let latest = (provider.is_some() || model.is_some()).then(|| MessageRecord {
        conversation_id: record.id.clone(),
        provider,
        model,
        timestamp: record.created_at,
    });

    Ok(record.to_candidate(latest.as_ref()))
}

fn row_to_usage(row: &Row<'_>) -> rusqlite::Result<CandidateLog> {
    let conversation_id: Option<String> = row.get("conversation_id")?;
    let record = UsageRecord {
        id: get_log_id(row, "id")?,
        alias: row.get("alias")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        input_tokens: get_u64(row, "input_tokens")?,
        output_tokens: get_u64(row, "output_tokens")?,
        cost: get_decimal(row, "cost")?,
        conversation_id: conversation_id.and_then(|id| LogId::parse(id).ok()),
        created_at: get_timestamp(row, "created_at")?,
    };
    Ok(record.to_candidate())
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredReceipt> {
    let unsigned = UnsignedReceipt {
        receipt_id: ReceiptId::new(row.get::<_, String>("receipt_id")?),
        timestamp: get_timestamp(row, "receipt_timestamp")?,
        alias: row.get("alias")?,
        profile: row.get("profile")?,
        lock_digest: row.get("lock_digest")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        prompt_tokens: get_u64(row, "prompt_tokens")?,
        completion_tokens: get_u64(row, "completion_tokens")?,
        total_tokens: get_u64(row, "total_tokens")?,
        input_cost: get_decimal(row, "input_cost")?,
        output_cost: get_decimal(row, "output_cost")?,
        total_cost: get_decimal(row, "total_cost")?,
    };

    let receipt_type: String = row.get("receipt_type")?;
    let receipt_type = ReceiptType::from_str(&receipt_type)
        .map_err(|e| invalid_column("receipt_type", Type::Text, e))?;

    let batch_summary = row
        .get::<_, Option<String>>("batch_summary")?
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| invalid_column("batch_summary", Type::Text, e))?;

    let tags = row
        .get::<_, Option<String>>("tags")?
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| invalid_column("tags", Type::Text, e))?;

    Ok(StoredReceipt {
        receipt: BatchReceipt {
            receipt: Receipt {
                unsigned,
                signature: row.get("signature")?,
            },
            receipt_type,
            batch_summary,
            description: row.get("description")?,
            tags,
        },
        key_id: row.get("key_id")?,
        stored_at: get_timestamp(row, "stored_at")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────────────────

/// WHERE clause and parameters selecting one record kind for a mode.
///
/// `None` when the mode never yields this kind.
fn selection_filter(
    owner: &OwnerId,
    selector: &Selector,
    log_type: LogType,
) -> Option<(String, Vec<Value>)> {
    let alias = match log_type {
        LogType::Conversation => "c",
        LogType::Usage => "u",
    };

    let mut clauses = vec![format!("{alias}.owner = ?")];
    let mut params = vec![Value::Text(owner.as_str().to_string())];

    match selector {
        Selector::ByConversation(id) => {
            if log_type == LogType::Usage {
                return None;
            }
            clauses.push(format!("{alias}.id = ?"));
            params.push(Value::Text(id.as_str().to_string()));
        }
        Selector::ByDateRange { start, end } => {
            clauses.push(format!("{alias}.created_at >= ?"));
            clauses.push(format!("{alias}.created_at <= ?"));
            params.push(Value::Integer(micros(start)));
            params.push(Value::Integer(micros(end)));
        }
        Selector::ByIds(ids) => {
            let placeholders = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("{alias}.id IN ({placeholders})"));
            params.extend(ids.iter().map(|id| Value::Text(id.as_str().to_string())));
        }
        Selector::SinceLastReceipt => {}
    }

    // Calls inside a conversation are covered by the conversation's totals.
    if log_type == LogType::Usage && !selector.bypasses_certified_filter() {
        clauses.push("u.conversation_id IS NULL".to_string());
    }

    if selector.excludes_certified() {
        clauses.push(format!(
            "NOT EXISTS (SELECT 1 FROM receipt_logs rl
                         WHERE rl.log_id = {alias}.id AND rl.log_type = '{}')",
            log_type.as_str()
        ));
    }

    Some((clauses.join(" AND "), params))
}

fn select_in(conn: &Connection, owner: &OwnerId, selector: &Selector) -> Result<Vec<CandidateLog>> {
    let mut candidates = Vec::new();

    if let Some((filter, params)) = selection_filter(owner, selector, LogType::Conversation) {
        let mut stmt = conn.prepare(&format!("{} WHERE {}", CONVERSATION_SELECT, filter))?;
        let rows = stmt.query_map(params_from_iter(params.iter()), row_to_conversation)?;
        for row in rows {
            candidates.push(row?);
        }
    }

    if let Some((filter, params)) = selection_filter(owner, selector, LogType::Usage) {
        let mut stmt = conn.prepare(&format!("{} WHERE {}", USAGE_SELECT, filter))?;
        let rows = stmt.query_map(params_from_iter(params.iter()), row_to_usage)?;
        for row in rows {
            candidates.push(row?);
        }
    }

    sort_newest_first(&mut candidates);
    tracing::debug!(
        owner = %owner,
        mode = selector.name(),
        count = candidates.len(),
        "selected candidates"
    );
    Ok(candidates)
}

fn candidate_by_link(
    conn: &Connection,
    owner: &OwnerId,
    log_id: &str,
    log_type: LogType,
) -> Result<Option<CandidateLog>> {
    let (sql, mapper): (String, fn(&Row<'_>) -> rusqlite::Result<CandidateLog>) = match log_type {
        LogType::Conversation => (
            format!("{} WHERE c.id = ?1 AND c.owner = ?2", CONVERSATION_SELECT),
            row_to_conversation,
        ),
        LogType::Usage => (
            format!("{} WHERE u.id = ?1 AND u.owner = ?2", USAGE_SELECT),
            row_to_usage,
        ),
    };
    Ok(conn
        .query_row(&sql, params![log_id, owner.as_str()], mapper)
        .optional()?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

fn insert_receipt_in(
    conn: &Connection,
    owner: &OwnerId,
    receipt: &BatchReceipt,
    key_id: &str,
) -> Result<ReceiptHandle> {
    let receipt_id = receipt.receipt_id();

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM receipts WHERE receipt_id = ?1",
            params![receipt_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    if existing.is_some() {
        tracing::error!(receipt_id = %receipt_id, "duplicate receipt id");
        return Err(StoreError::DuplicateReceipt(receipt_id.clone()));
    }

    let unsigned = &receipt.receipt.unsigned;
    let batch_summary = receipt
        .batch_summary
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let tags = receipt.tags.as_ref().map(serde_json::to_string).transpose()?;
    let stored_at = Utc::now();

    conn.execute(
        "INSERT INTO receipts (
            receipt_id, owner, receipt_timestamp, alias, profile, lock_digest,
            provider, model, prompt_tokens, completion_tokens, total_tokens,
            input_cost, output_cost, total_cost, signature, key_id,
            receipt_type, batch_summary, description, tags, stored_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21)",
        params![
            receipt_id.as_str(),
            owner.as_str(),
            micros(&unsigned.timestamp),
            unsigned.alias,
            unsigned.profile,
            unsigned.lock_digest,
            unsigned.provider,
            unsigned.model,
            count_param(unsigned.prompt_tokens, "prompt_tokens")?,
            count_param(unsigned.completion_tokens, "completion_tokens")?,
            count_param(unsigned.total_tokens, "total_tokens")?,
            unsigned.input_cost.to_string(),
            unsigned.output_cost.to_string(),
            unsigned.total_cost.to_string(),
            receipt.receipt.signature,
            key_id,
            receipt.receipt_type.as_str(),
            batch_summary,
            receipt.description,
            tags,
            micros(&stored_at),
        ],
    )?;

    Ok(ReceiptHandle {
        receipt_id: receipt_id.clone(),
        key_id: key_id.to_string(),
        stored_at: from_micros(micros(&stored_at)).unwrap_or(stored_at),
    })
}

fn link_in(conn: &Connection, receipt_id: &ReceiptId, logs: &[(LogId, LogType)]) -> Result<u64> {
    let now = micros(&Utc::now());
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO receipt_logs (receipt_id, log_id, log_type, certified_at)
         VALUES (?1, ?2, ?3, ?4)",
    )?;

    let mut inserted = 0u64;
    for (log_id, log_type) in logs {
        inserted += stmt.execute(params![
            receipt_id.as_str(),
            log_id.as_str(),
            log_type.as_str(),
            now
        ])? as u64;
    }
    Ok(inserted)
}

/// The first of `logs` that some receipt already links, if any.
fn first_linked<'a>(
    conn: &Connection,
    logs: &'a [(LogId, LogType)],
) -> Result<Option<&'a (LogId, LogType)>> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM receipt_logs WHERE log_id = ?1 AND log_type = ?2 LIMIT 1")?;
    for entry in logs {
        let (log_id, log_type) = entry;
        if stmt.exists(params![log_id.as_str(), log_type.as_str()])? {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
    Ok(conn
        .query_row(sql, params, |_| Ok(()))
        .optional()?
        .is_some())
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_receipt(
        &self,
        owner: &OwnerId,
        receipt: &BatchReceipt,
        key_id: &str,
    ) -> Result<ReceiptHandle> {
        let owner = owner.clone();
        let receipt = receipt.clone();
        let key_id = key_id.to_string();

        self.run(move |conn| insert_receipt_in(conn, &owner, &receipt, &key_id))
            .await
    }

    async fn record_certification(
        &self,
        owner: &OwnerId,
        receipt: &BatchReceipt,
        key_id: &str,
        logs: &[(LogId, LogType)],
        policy: LinkPolicy,
    ) -> Result<Certification> {
        let owner = owner.clone();
        let receipt = receipt.clone();
        let key_id = key_id.to_string();
        let logs = logs.to_vec();

        self.run(move |conn| {
            // IMMEDIATE takes the write lock up front, so the check below sees
            // every committed link and no other writer can add one before commit.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if policy == LinkPolicy::Exclusive {
                if let Some((log_id, log_type)) = first_linked(&tx, &logs)? {
                    tracing::debug!(
                        receipt_id = %receipt.receipt_id(),
                        log_id = %log_id,
                        "record certified concurrently"
                    );
                    return Err(StoreError::CertificationConflict {
                        log_id: log_id.to_string(),
                        log_type: log_type.as_str().to_string(),
                    });
                }
            }

            let handle = insert_receipt_in(&tx, &owner, &receipt, &key_id)?;
            let linked = link_in(&tx, &handle.receipt_id, &logs)?;
            tx.commit()?;

            tracing::debug!(receipt_id = %handle.receipt_id, linked, "recorded certification");
            Ok(Certification { handle, linked })
        })
        .await
    }

    async fn link_logs(&self, receipt_id: &ReceiptId, logs: &[(LogId, LogType)]) -> Result<u64> {
        let receipt_id = receipt_id.clone();
        let logs = logs.to_vec();

        self.run(move |conn| {
            if !exists(
                conn,
                "SELECT 1 FROM receipts WHERE receipt_id = ?1",
                params![receipt_id.as_str()],
            )? {
                return Err(StoreError::NotFound(format!("receipt {}", receipt_id)));
            }
            let tx = conn.transaction()?;
            let inserted = link_in(&tx, &receipt_id, &logs)?;
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn get_receipt(
        &self,
        id: &ReceiptId,
        owner: &OwnerId,
    ) -> Result<Option<StoredReceipt>> {
        let id = id.clone();
        let owner = owner.clone();

        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("{} WHERE receipt_id = ?1 AND owner = ?2", RECEIPT_SELECT),
                    params![id.as_str(), owner.as_str()],
                    row_to_stored,
                )
                .optional()?)
        })
        .await
    }

    async fn list_receipts(
        &self,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<StoredReceipt>, u64)> {
        let owner = owner.clone();

        self.run(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM receipts WHERE owner = ?1",
                params![owner.as_str()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "{} WHERE owner = ?1 ORDER BY receipt_timestamp DESC, id DESC LIMIT ?2 OFFSET ?3",
                RECEIPT_SELECT
            ))?;
            let receipts = stmt
                .query_map(
                    params![owner.as_str(), clamp_param(limit), clamp_param(offset)],
                    row_to_stored,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((receipts, total.max(0) as u64))
        })
        .await
    }

    async fn logs_for_receipt(
        &self,
        id: &ReceiptId,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<CandidateLog>, u64)> {
        let id = id.clone();
        let owner = owner.clone();

        self.run(move |conn| {
            if !exists(
                conn,
                "SELECT 1 FROM receipts WHERE receipt_id = ?1 AND owner = ?2",
                params![id.as_str(), owner.as_str()],
            )? {
                return Ok((Vec::new(), 0));
            }

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM receipt_logs WHERE receipt_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT log_id, log_type FROM receipt_logs WHERE receipt_id = ?1
                 ORDER BY certified_at, log_type, log_id LIMIT ?2 OFFSET ?3",
            )?;
            let links = stmt
                .query_map(
                    params![id.as_str(), clamp_param(limit), clamp_param(offset)],
                    |row| {
                        let log_id: String = row.get(0)?;
                        let log_type: String = row.get(1)?;
                        let log_type = LogType::from_str(&log_type)
                            .map_err(|e| invalid_column("log_type", Type::Text, e))?;
                        Ok((log_id, log_type))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut logs = Vec::with_capacity(links.len());
            for (log_id, log_type) in links {
                if let Some(candidate) = candidate_by_link(conn, &owner, &log_id, log_type)? {
                    logs.push(candidate);
                }
            }

            Ok((logs, total.max(0) as u64))
        })
        .await
    }

    async fn select_candidates(
        &self,
        owner: &OwnerId,
        selector: &Selector,
    ) -> Result<Vec<CandidateLog>> {
        let owner = owner.clone();
        let selector = selector.clone();

        self.run(move |conn| select_in(conn, &owner, &selector)).await
    }

    async fn uncertified(
        &self,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<CandidateLog>, u64)> {
        let owner = owner.clone();

        self.run(move |conn| {
            let all = select_in(conn, &owner, &Selector::SinceLastReceipt)?;
            Ok((paginate(&all, limit, offset), all.len() as u64))
        })
        .await
    }

    async fn insert_conversation(
        &self,
        owner: &OwnerId,
        record: &ConversationRecord,
    ) -> Result<()> {
        let owner = owner.clone();
        let record = record.clone();

        self.run(move |conn| {
            if exists(
                conn,
                "SELECT 1 FROM conversations WHERE id = ?1",
                params![record.id.as_str()],
            )? {
                return Err(StoreError::DuplicateRecord(record.id.to_string()));
            }

            conn.execute(
                "INSERT INTO conversations (
                    id, owner, model_alias, total_input_tokens, total_output_tokens,
                    total_cost, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.as_str(),
                    owner.as_str(),
                    record.model_alias,
                    count_param(record.total_input_tokens, "total_input_tokens")?,
                    count_param(record.total_output_tokens, "total_output_tokens")?,
                    record.total_cost.to_string(),
                    micros(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_message(&self, owner: &OwnerId, record: &MessageRecord) -> Result<()> {
        let owner = owner.clone();
        let record = record.clone();

        self.run(move |conn| {
            if !exists(
                conn,
                "SELECT 1 FROM conversations WHERE id = ?1 AND owner = ?2",
                params![record.conversation_id.as_str(), owner.as_str()],
            )? {
                return Err(StoreError::NotFound(format!(
                    "conversation {}",
                    record.conversation_id
                )));
            }

            conn.execute(
                "INSERT INTO messages (conversation_id, provider, model, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.conversation_id.as_str(),
                    record.provider,
                    record.model,
                    micros(&record.timestamp),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_usage_log(&self, owner: &OwnerId, record: &UsageRecord) -> Result<()> {
        let owner = owner.clone();
        let record = record.clone();

        self.run(move |conn| {
            if exists(
                conn,
                "SELECT 1 FROM usage_logs WHERE id = ?1",
                params![record.id.as_str()],
            )? {
                return Err(StoreError::DuplicateRecord(record.id.to_string()));
            }

            conn.execute(
                "INSERT INTO usage_logs (
                    id, owner, alias, provider, model, input_tokens, output_tokens,
                    cost, conversation_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.as_str(),
                    owner.as_str(),
                    record.alias,
                    record.provider,
                    record.model,
                    count_param(record.input_tokens, "input_tokens")?,
                    count_param(record.output_tokens, "output_tokens")?,
                    record.cost.to_string(),
                    record.conversation_id.as_ref().map(|id| id.as_str()),
                    micros(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }
}
