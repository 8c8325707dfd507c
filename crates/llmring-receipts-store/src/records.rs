//! Stored shapes: candidate source rows, receipts with provenance, and
//! certification links.
//!
//! Source rows keep their metadata optional as it was recorded. Placeholders
//! are substituted only when a row becomes a [`CandidateLog`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use llmring_receipts_core::candidate::{or_placeholder, DEFAULT_ALIAS, UNKNOWN_METADATA};
use llmring_receipts_core::receipt::truncate_to_micros;
use llmring_receipts_core::{
    BatchReceipt, CandidateLog, ConversationCandidate, LogId, LogType, ReceiptId, Selector,
    UsageCandidate,
};

/// A conversation with materialized totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: LogId,
    pub model_alias: Option<String>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A message within a conversation. Only its provider/model metadata matters
/// for certification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub conversation_id: LogId,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One LLM call. Rows with a `conversation_id` are covered by their
/// conversation's totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: LogId,
    pub alias: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    pub conversation_id: Option<LogId>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(id: LogId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            model_alias: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: Decimal::ZERO,
            created_at: truncate_to_micros(created_at),
        }
    }

    /// Combine with the conversation's most recent message, if any.
    pub fn to_candidate(&self, latest: Option<&MessageRecord>) -> CandidateLog {
        CandidateLog::Conversation(ConversationCandidate {
            id: self.id.clone(),
            alias: or_placeholder(self.model_alias.clone(), DEFAULT_ALIAS),
            provider: or_placeholder(latest.and_then(|m| m.provider.clone()), UNKNOWN_METADATA),
            model: or_placeholder(latest.and_then(|m| m.model.clone()), UNKNOWN_METADATA),
            input_tokens: self.total_input_tokens,
            output_tokens: self.total_output_tokens,
            cost: self.total_cost,
            created_at: self.created_at,
        })
    }
}

impl UsageRecord {
    pub fn new(id: LogId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            alias: None,
            provider: None,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            conversation_id: None,
            created_at: truncate_to_micros(created_at),
        }
    }

    pub fn to_candidate(&self) -> CandidateLog {
        CandidateLog::Usage(UsageCandidate {
            id: self.id.clone(),
            alias: or_placeholder(self.alias.clone(), DEFAULT_ALIAS),
            provider: or_placeholder(self.provider.clone(), UNKNOWN_METADATA),
            model: or_placeholder(self.model.clone(), UNKNOWN_METADATA),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost: self.cost,
            created_at: self.created_at,
        })
    }
}

/// Where a stored receipt lives and which key signed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHandle {
    pub receipt_id: ReceiptId,
    pub key_id: String,
    pub stored_at: DateTime<Utc>,
}

/// A receipt as loaded from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReceipt {
    pub receipt: BatchReceipt,
    pub key_id: String,
    pub stored_at: DateTime<Utc>,
}

impl StoredReceipt {
    pub fn handle(&self) -> ReceiptHandle {
        ReceiptHandle {
            receipt_id: self.receipt.receipt_id().clone(),
            key_id: self.key_id.clone(),
            stored_at: self.stored_at,
        }
    }
}

/// Outcome of persisting a receipt together with its links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certification {
    pub handle: ReceiptHandle,
    /// Link rows actually inserted; existing links are ignored.
    pub linked: u64,
}

/// How a certification treats records that some receipt already links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPolicy {
    /// Refuse with `CertificationConflict` if any record is already linked.
    /// Checked in the same write transaction that inserts the links.
    Exclusive,
    /// Link regardless; existing links are left alone.
    Shared,
}

impl LinkPolicy {
    pub fn for_selector(selector: &Selector) -> Self {
        if selector.excludes_certified() {
            LinkPolicy::Exclusive
        } else {
            LinkPolicy::Shared
        }
    }
}

/// Newest first. Ties keep their relative order.
pub(crate) fn sort_newest_first(candidates: &mut [CandidateLog]) {
    candidates.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

/// A `(log_id, log_type)` pair for each candidate.
pub fn link_keys(candidates: &[CandidateLog]) -> Vec<(LogId, LogType)> {
    candidates
        .iter()
        .map(|c| (c.id().clone(), c.log_type()))
        .collect()
}

/// Slice a fully materialized list into one page.
pub(crate) fn paginate<T: Clone>(items: &[T], limit: u64, offset: u64) -> Vec<T> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(items.len());
    let take = usize::try_from(limit).unwrap_or(usize::MAX);
    items[start..].iter().take(take).cloned().collect()
}
