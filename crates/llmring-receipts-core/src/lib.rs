//! # LLMRing Receipts Core
//!
//! Pure primitives for certifying LLM usage: receipts, canonicalization,
//! signing, verification and aggregation.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over signed data structures.
//!
//! ## Key Types
//!
//! - [`UnsignedReceipt`] - The payload that gets signed
//! - [`Receipt`] - A payload plus its `ed25519:` signature
//! - [`BatchReceipt`] - A receipt plus unsigned audit metadata
//! - [`CandidateLog`] - A conversation or usage record eligible for certification
//! - [`Selector`] - One of the four certification modes
//!
//! ## Canonicalization
//!
//! Signed bytes are RFC 8785 canonical JSON. See [`canonical`] module.

pub mod aggregate;
pub mod candidate;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod receipt;
pub mod request;
pub mod types;
pub mod validation;

pub use aggregate::{
    aggregate, build_receipt, build_unsigned, preview, BatchReceiptSummary, Bucket, CostSplit,
    PreviewSummary,
};
pub use candidate::{CandidateLog, ConversationCandidate, UsageCandidate};
pub use canonical::{canonicalize, canonicalize_value, receipt_fields, signing_bytes};
pub use crypto::{Keypair, PublicKey, Signature};
pub use error::{CanonicalizationError, CoreError, ValidationError};
pub use receipt::{BatchReceipt, Receipt, ReceiptBuilder, ReceiptType, UnsignedReceipt};
pub use request::{CertificationRequest, Selector};
pub use types::{LogId, LogType, OwnerId, ReceiptId};
pub use validation::{verify_batch_receipt, verify_json, verify_receipt};
