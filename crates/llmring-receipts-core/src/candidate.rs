//! Candidate records: the usage the certification protocol can cover.
//!
//! The store normalizes conversation aggregates and conversation-less usage
//! rows into [`CandidateLog`], so aggregation matches on the kind instead of
//! probing optional columns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{LogId, LogType};

/// Provider/model placeholder when a record carries no metadata.
pub const UNKNOWN_METADATA: &str = "unknown";

/// Alias placeholder when a record was made without an alias.
pub const DEFAULT_ALIAS: &str = "default";

/// A conversation with its token and cost totals already materialized.
///
/// `provider` and `model` come from the conversation's most recent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationCandidate {
    pub id: LogId,
    pub alias: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A single usage log row that does not belong to any conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCandidate {
    pub id: LogId,
    pub alias: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A record eligible for certification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CandidateLog {
    Conversation(ConversationCandidate),
    Usage(UsageCandidate),
}

impl CandidateLog {
    pub fn log_type(&self) -> LogType {
        match self {
            CandidateLog::Conversation(_) => LogType::Conversation,
            CandidateLog::Usage(_) => LogType::Usage,
        }
    }

    pub fn id(&self) -> &LogId {
        match self {
            CandidateLog::Conversation(c) => &c.id,
            CandidateLog::Usage(u) => &u.id,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            CandidateLog::Conversation(c) => &c.alias,
            CandidateLog::Usage(u) => &u.alias,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            CandidateLog::Conversation(c) => &c.provider,
            CandidateLog::Usage(u) => &u.provider,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            CandidateLog::Conversation(c) => &c.model,
            CandidateLog::Usage(u) => &u.model,
        }
    }

    pub fn input_tokens(&self) -> u64 {
        match self {
            CandidateLog::Conversation(c) => c.input_tokens,
            CandidateLog::Usage(u) => u.input_tokens,
        }
    }

    pub fn output_tokens(&self) -> u64 {
        match self {
            CandidateLog::Conversation(c) => c.output_tokens,
            CandidateLog::Usage(u) => u.output_tokens,
        }
    }

    /// Input plus output tokens, or `None` on overflow.
    pub fn tokens(&self) -> Option<u64> {
        self.input_tokens().checked_add(self.output_tokens())
    }

    pub fn cost(&self) -> Decimal {
        match self {
            CandidateLog::Conversation(c) => c.cost,
            CandidateLog::Usage(u) => u.cost,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            CandidateLog::Conversation(c) => c.created_at,
            CandidateLog::Usage(u) => u.created_at,
        }
    }
}

impl From<ConversationCandidate> for CandidateLog {
    fn from(c: ConversationCandidate) -> Self {
        CandidateLog::Conversation(c)
    }
}

impl From<UsageCandidate> for CandidateLog {
    fn from(u: UsageCandidate) -> Self {
        CandidateLog::Usage(u)
    }
}

/// Substitute a placeholder for missing or blank metadata.
pub fn or_placeholder(value: Option<String>, placeholder: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => placeholder.to_string(),
    }
}
