//! # LLMRing Receipts Store
//!
//! Storage abstraction for LLM usage receipts. Provides a trait-based
//! interface over candidate records, signed receipts and the links between
//! them, with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`StoredReceipt`] - A receipt with the key ID that signed it
//!
//! ## Usage
//!
//! ```rust,no_run
//! use llmring_receipts_store::{SqliteStore, Store};
//! use llmring_receipts_core::{OwnerId, Selector};
//!
//! async fn example() {
//!     let store = SqliteStore::open("receipts.db").unwrap();
//!
//!     let owner = OwnerId::new("key_123");
//!     let pending = store
//!         .select_candidates(&owner, &Selector::SinceLastReceipt)
//!         .await
//!         .unwrap();
//!     println!("{} records awaiting certification", pending.len());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **At-most-once**: date-range and since-last-receipt selection exclude
//!   records already linked to a receipt
//! - **Atomic certification**: a receipt and its links commit together
//! - **Owner scoping**: reads never return another owner's rows

pub mod error;
pub mod memory;
pub mod migration;
pub mod records;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use records::{
    link_keys, Certification, ConversationRecord, LinkPolicy, MessageRecord, ReceiptHandle,
    StoredReceipt, UsageRecord,
};
pub use sqlite::SqliteStore;
pub use traits::Store;
