//! Error types for the receipt service.

use llmring_receipts_core::{CoreError, ReceiptId, ValidationError};
use llmring_receipts_store::StoreError;
use thiserror::Error;

/// Errors that can occur during receipt service operations.
///
/// Verification is absent on purpose: it always answers with a `bool`.
#[derive(Debug, Error)]
pub enum ReceiptError {
    /// Malformed or contradictory certification request.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The selection matched no records.
    #[error("no logs found matching the selection criteria")]
    NoMatch,

    /// The key file or inline key material could not be read or parsed.
    #[error("key load error: {0}")]
    KeyLoad(String),

    /// No signing key is available.
    #[error("signing error: {0}")]
    Signing(String),

    /// A receipt with this ID already exists.
    #[error("duplicate receipt id: {0}")]
    DuplicateReceipt(ReceiptId),

    /// An imported receipt failed signature verification.
    #[error("invalid signature on receipt {0}")]
    InvalidSignature(ReceiptId),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the core primitives.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ReceiptError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateReceipt(id) => ReceiptError::DuplicateReceipt(id),
            other => ReceiptError::Store(other),
        }
    }
}

/// Result type for receipt service operations.
pub type Result<T> = std::result::Result<T, ReceiptError>;
