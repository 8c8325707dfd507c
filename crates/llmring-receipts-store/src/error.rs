//! Error types for the store module.

use llmring_receipts_core::ReceiptId;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON column encoding/decoding error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A record referenced by an insert does not exist for this owner.
    #[error("not found: {0}")]
    NotFound(String),

    /// A receipt with this ID already exists (under any owner).
    ///
    /// IDs carry 64 random bits, so this indicates a generation bug.
    #[error("duplicate receipt id: {0}")]
    DuplicateReceipt(ReceiptId),

    /// A conversation or usage log with this ID already exists.
    #[error("duplicate record id: {0}")]
    DuplicateRecord(String),

    /// An exclusive certification found one of its records already linked
    /// to a receipt by a concurrent writer. Selecting again resolves it.
    #[error("record already certified: {log_type} {log_id}")]
    CertificationConflict { log_id: String, log_type: String },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
