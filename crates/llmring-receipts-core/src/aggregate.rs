//! Aggregation of candidate records into summaries and receipts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::candidate::CandidateLog;
use crate::crypto::Keypair;
use crate::error::CoreError;
use crate::receipt::{BatchReceipt, ReceiptBuilder, ReceiptType, UnsignedReceipt};
use crate::types::{LogId, LogType};

/// Placeholder provider and alias on multi-record receipts.
pub const BATCH_PLACEHOLDER: &str = "batch";

/// Decimal places kept when estimating a cost split.
pub const COST_SPLIT_SCALE: u32 = 12;

/// Per-model or per-alias totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub calls: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub tokens: u64,
}

impl Bucket {
    fn record(&mut self, tokens: u64, cost: Decimal) -> Result<(), CoreError> {
        self.calls = self.calls.checked_add(1).ok_or(CoreError::Overflow("calls"))?;
        self.tokens = self
            .tokens
            .checked_add(tokens)
            .ok_or(CoreError::Overflow("tokens"))?;
        self.cost = self.cost.checked_add(cost).ok_or(CoreError::Overflow("cost"))?;
        Ok(())
    }
}

/// Audit summary attached to every certification receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceiptSummary {
    pub total_conversations: u64,
    pub total_calls: u64,
    pub total_tokens: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost: Decimal,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub by_model: BTreeMap<String, Bucket>,
    pub by_alias: BTreeMap<String, Bucket>,
    pub conversation_ids: Vec<LogId>,
    pub log_ids: Vec<LogId>,
}

/// Read-only projection of what a certification would cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSummary {
    pub total_logs: u64,
    pub total_conversations: u64,
    pub total_tokens: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost: Decimal,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub by_model: BTreeMap<String, Bucket>,
    pub by_alias: BTreeMap<String, Bucket>,
    /// `None` when nothing matched.
    pub receipt_type: Option<ReceiptType>,
}

impl PreviewSummary {
    pub fn is_empty(&self) -> bool {
        self.total_logs == 0
    }
}

/// Summarize candidates: token and cost totals, buckets, date range, IDs.
pub fn aggregate(candidates: &[CandidateLog]) -> Result<BatchReceiptSummary, CoreError> {
    let mut total_tokens: u64 = 0;
    let mut total_cost = Decimal::ZERO;
    let mut by_model: BTreeMap<String, Bucket> = BTreeMap::new();
    let mut by_alias: BTreeMap<String, Bucket> = BTreeMap::new();
    let mut conversation_ids = Vec::new();
    let mut log_ids = Vec::new();
    let mut start_date: Option<DateTime<Utc>> = None;
    let mut end_date: Option<DateTime<Utc>> = None;

    for log in candidates {
        let tokens = log.tokens().ok_or(CoreError::Overflow("tokens"))?;
        let cost = log.cost();

        total_tokens = total_tokens
            .checked_add(tokens)
            .ok_or(CoreError::Overflow("total_tokens"))?;
        total_cost = total_cost
            .checked_add(cost)
            .ok_or(CoreError::Overflow("total_cost"))?;

        by_model
            .entry(log.model().to_string())
            .or_default()
            .record(tokens, cost)?;
        by_alias
            .entry(log.alias().to_string())
            .or_default()
            .record(tokens, cost)?;

        match log.log_type() {
            LogType::Conversation => conversation_ids.push(log.id().clone()),
            LogType::Usage => log_ids.push(log.id().clone()),
        }

        let ts = log.created_at();
        start_date = Some(start_date.map_or(ts, |s| s.min(ts)));
        end_date = Some(end_date.map_or(ts, |e| e.max(ts)));
    }

    Ok(BatchReceiptSummary {
        total_conversations: conversation_ids.len() as u64,
        total_calls: candidates.len() as u64,
        total_tokens,
        total_cost,
        start_date,
        end_date,
        by_model,
        by_alias,
        conversation_ids,
        log_ids,
    })
}

/// Project candidates into a preview. An empty selection is an empty preview.
pub fn preview(candidates: &[CandidateLog]) -> Result<PreviewSummary, CoreError> {
    let summary = aggregate(candidates)?;
    Ok(PreviewSummary {
        total_logs: summary.total_calls,
        total_conversations: summary.total_conversations,
        total_tokens: summary.total_tokens,
        total_cost: summary.total_cost,
        start_date: summary.start_date,
        end_date: summary.end_date,
        by_model: summary.by_model,
        by_alias: summary.by_alias,
        receipt_type: if candidates.is_empty() {
            None
        } else {
            Some(ReceiptType::for_count(candidates.len()))
        },
    })
}

/// An input/output split of a cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostSplit {
    pub input: Decimal,
    pub output: Decimal,
}

impl CostSplit {
    /// Estimate a split when only the aggregate is known: 25% input, 75%
    /// output. This is an approximation, not accounting.
    ///
    /// `output` is computed as `total - input`, so the parts always sum back
    /// to `total` exactly.
    pub fn estimate(total: Decimal) -> Self {
        let input = (total * Decimal::new(25, 2)).round_dp(COST_SPLIT_SCALE);
        Self {
            input,
            output: total - input,
        }
    }

    pub fn total(&self) -> Decimal {
        self.input + self.output
    }
}

/// Build the signed payload for a set of candidates.
///
/// A single candidate lends its alias, provider and model to the receipt. For
/// several, those fields are placeholders and the per-call detail lives only
/// in the batch summary and the certification links.
pub fn build_unsigned(
    candidates: &[CandidateLog],
    summary: &BatchReceiptSummary,
    profile: &str,
) -> Result<UnsignedReceipt, CoreError> {
    let (prompt, completion) = candidates.iter().try_fold((0u64, 0u64), |(p, c), log| {
        Ok::<_, CoreError>((
            p.checked_add(log.input_tokens())
                .ok_or(CoreError::Overflow("prompt_tokens"))?,
            c.checked_add(log.output_tokens())
                .ok_or(CoreError::Overflow("completion_tokens"))?,
        ))
    })?;

    let builder = match candidates {
        [] => return Err(CoreError::EmptySelection),
        [only] => ReceiptBuilder::new(only.alias(), only.provider(), only.model()),
        many => ReceiptBuilder::new(
            BATCH_PLACEHOLDER,
            BATCH_PLACEHOLDER,
            format!("batch:{} calls", many.len()),
        ),
    };

    let split = CostSplit::estimate(summary.total_cost);

    builder
        .profile(profile)
        .tokens(prompt, completion)
        .costs(split.input, split.output)
        .build()
}

/// Aggregate, build and sign a certification receipt.
pub fn build_receipt(
    candidates: &[CandidateLog],
    description: Option<String>,
    tags: Option<Vec<String>>,
    profile: &str,
    keypair: &Keypair,
) -> Result<BatchReceipt, CoreError> {
    let summary = aggregate(candidates)?;
    let receipt = build_unsigned(candidates, &summary, profile)?.sign(keypair)?;

    Ok(BatchReceipt {
        receipt,
        receipt_type: ReceiptType::for_count(candidates.len()),
        batch_summary: Some(summary),
        description,
        tags,
    })
}
