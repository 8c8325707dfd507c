//! Error types for the receipts core.

use thiserror::Error;

/// Errors raised while producing canonical bytes.
///
/// Every variant describes a value that has no single, platform-independent
/// JSON rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonicalizationError {
    #[error("non-finite number cannot be canonicalized")]
    NonFiniteNumber,

    #[error("integer {0} is outside the exactly representable range")]
    UnsafeInteger(String),

    #[error("decimal {0} does not round-trip through its JSON number form")]
    InexactDecimal(String),

    #[error("timestamp {0} is finer than a microsecond")]
    SubMicrosecondTimestamp(String),
}

/// Core errors that can occur while building, signing, or decoding receipts.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("{field} must not be negative")]
    NegativeAmount { field: &'static str },

    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown receipt type: {0}")]
    UnknownReceiptType(String),

    #[error("cannot build a receipt from an empty selection")]
    EmptySelection,
}

/// Errors in the shape of a certification request.
///
/// These are client errors: the request is malformed or contradictory and
/// retrying it unchanged cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(
        "must specify one of: conversation_id, date range, log_ids, or since_last_receipt"
    )]
    NoCriteria,

    #[error("only one selection criterion may be given, got: {}", .0.join(", "))]
    MultipleCriteria(Vec<&'static str>),

    #[error("date range requires both start_date and end_date")]
    IncompleteDateRange,

    #[error("start_date is after end_date")]
    InvertedDateRange,

    #[error("log_ids must not be empty")]
    EmptyIdList,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
