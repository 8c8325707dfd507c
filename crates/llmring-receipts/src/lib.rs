//! # LLMRing Receipts
//!
//! Signed, verifiable receipts for LLM usage.
//!
//! ## Overview
//!
//! The service certifies recorded LLM usage by issuing Ed25519-signed
//! receipts over token and cost totals:
//!
//! - **Certification**: select conversations and usage logs by one of four
//!   modes, aggregate them, sign one receipt, and link it to every record
//! - **Issuance**: sign a receipt for a single call as it happens
//! - **Verification**: check any receipt against the service's public key
//!
//! ## Key Concepts
//!
//! - **Receipt**: Immutable. Its signature covers the canonical JSON of the
//!   scalar token/cost fields, never the batch metadata.
//! - **At-most-once**: date-range and since-last-receipt certification never
//!   certify a record twice; explicit ID lists may.
//! - **Owner**: every lookup is scoped; other owners' receipts are invisible.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use llmring_receipts::{ReceiptService, ReceiptsConfig};
//! use llmring_receipts::core::{CertificationRequest, OwnerId};
//! use llmring_receipts::store::SqliteStore;
//!
//! async fn example() {
//!     let config = ReceiptsConfig::from_env().unwrap();
//!     let store = SqliteStore::open("receipts.db").unwrap();
//!     let service = ReceiptService::from_config(store, config).unwrap();
//!
//!     let owner = OwnerId::new("key_123");
//!     let certified = service
//!         .generate(&owner, &CertificationRequest::since_last_receipt())
//!         .await
//!         .unwrap();
//!
//!     assert!(service.verify_batch(&certified.receipt));
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `llmring_receipts::core` - Receipts, canonicalization, signing, aggregation
//! - `llmring_receipts::store` - Storage abstraction and SQLite

pub mod config;
pub mod error;
pub mod keys;
pub mod service;

// Re-export component crates
pub use llmring_receipts_core as core;
pub use llmring_receipts_store as store;

// Re-export main types for convenience
pub use config::ReceiptsConfig;
pub use error::{ReceiptError, Result};
pub use keys::{KeyManager, PublicKeyMaterial};
pub use service::{CallCost, CallMetadata, Certified, Page, ReceiptService};

// Re-export commonly used core types
pub use llmring_receipts_core::{
    BatchReceipt, BatchReceiptSummary, CandidateLog, CertificationRequest, Keypair, OwnerId,
    PreviewSummary, PublicKey, Receipt, ReceiptId, ReceiptType, UnsignedReceipt,
};
