//! Store trait: the abstract interface for receipt persistence.
//!
//! This trait allows the service to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use llmring_receipts_core::{
    BatchReceipt, CandidateLog, LogId, LogType, OwnerId, ReceiptId, Selector,
};

use crate::error::Result;
use crate::records::{
    Certification, ConversationRecord, LinkPolicy, MessageRecord, ReceiptHandle, StoredReceipt,
    UsageRecord,
};

/// The Store trait: async interface for receipt persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Owner scoping**: every read takes an owner. Another owner's receipt is
///   simply absent (`None` or empty), never an authorization error.
/// - **Unique receipt IDs**: inserting an existing `receipt_id` fails with
///   `DuplicateReceipt`, whichever owner holds it.
/// - **Idempotent links**: link inserts ignore rows that already exist, so an
///   interrupted certification can be retried with the same request.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Receipt Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a signed receipt.
    async fn insert_receipt(
        &self,
        owner: &OwnerId,
        receipt: &BatchReceipt,
        key_id: &str,
    ) -> Result<ReceiptHandle>;

    /// Insert a receipt and link it to the records it certifies, in one
    /// write transaction.
    ///
    /// Under [`LinkPolicy::Exclusive`] the transaction fails with
    /// `CertificationConflict`, and writes nothing, if any record is already
    /// linked. This holds across every handle on the same database.
    async fn record_certification(
        &self,
        owner: &OwnerId,
        receipt: &BatchReceipt,
        key_id: &str,
        logs: &[(LogId, LogType)],
        policy: LinkPolicy,
    ) -> Result<Certification>;

    /// Link an existing receipt to records. Returns the number of new rows.
    async fn link_logs(&self, receipt_id: &ReceiptId, logs: &[(LogId, LogType)]) -> Result<u64>;

    /// Get a receipt by ID, if it belongs to `owner`.
    async fn get_receipt(&self, id: &ReceiptId, owner: &OwnerId)
        -> Result<Option<StoredReceipt>>;

    /// List an owner's receipts, newest first, with the total count.
    async fn list_receipts(
        &self,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<StoredReceipt>, u64)>;

    /// The records a receipt certifies, with the total count.
    ///
    /// Empty if the receipt does not exist or belongs to another owner.
    async fn logs_for_receipt(
        &self,
        id: &ReceiptId,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<CandidateLog>, u64)>;

    // ─────────────────────────────────────────────────────────────────────────
    // Selection
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve a selection mode to candidate records, newest first.
    ///
    /// `ByDateRange` and `SinceLastReceipt` exclude records linked to any
    /// receipt; `ByIds` does not.
    async fn select_candidates(
        &self,
        owner: &OwnerId,
        selector: &Selector,
    ) -> Result<Vec<CandidateLog>>;

    /// Records never linked to any receipt, with the total count.
    async fn uncertified(
        &self,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<CandidateLog>, u64)>;

    // ─────────────────────────────────────────────────────────────────────────
    // Candidate Source Ingestion
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a conversation aggregate.
    async fn insert_conversation(&self, owner: &OwnerId, record: &ConversationRecord)
        -> Result<()>;

    /// Record a message in one of `owner`'s conversations.
    async fn insert_message(&self, owner: &OwnerId, record: &MessageRecord) -> Result<()>;

    /// Record a usage log row.
    async fn insert_usage_log(&self, owner: &OwnerId, record: &UsageRecord) -> Result<()>;
}
