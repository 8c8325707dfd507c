//! Receipts: signed certifications of token and cost totals.
//!
//! An [`UnsignedReceipt`] is the payload that gets canonicalized and signed.
//! A [`Receipt`] adds the signature. A [`BatchReceipt`] adds metadata that is
//! deliberately outside the signed bytes, so it can be edited or redacted
//! without invalidating the signature over the totals.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aggregate::BatchReceiptSummary;
use crate::canonical::signing_bytes;
use crate::crypto::Keypair;
use crate::error::CoreError;
use crate::types::ReceiptId;

/// Profile used when the caller names none.
pub const DEFAULT_PROFILE: &str = "default";

/// The canonical pre-signature payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedReceipt {
    pub receipt_id: ReceiptId,
    pub timestamp: DateTime<Utc>,
    pub alias: String,
    pub profile: String,
    pub lock_digest: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub input_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub output_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost: Decimal,
}

impl UnsignedReceipt {
    /// Canonicalize and sign.
    pub fn sign(self, keypair: &Keypair) -> Result<Receipt, CoreError> {
        let message = signing_bytes(&self)?;
        let signature = keypair.sign(&message);
        Ok(Receipt {
            unsigned: self,
            signature: signature.to_prefixed(),
        })
    }
}

/// A signed receipt.
///
/// The signature is kept in its wire form (`ed25519:<base64url>`) so receipts
/// from untrusted sources round-trip unchanged and verification can reject a
/// malformed signature instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(flatten)]
    pub unsigned: UnsignedReceipt,
    pub signature: String,
}

impl Receipt {
    pub fn receipt_id(&self) -> &ReceiptId {
        &self.unsigned.receipt_id
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn total_tokens(&self) -> u64 {
        self.unsigned.total_tokens
    }

    pub fn total_cost(&self) -> Decimal {
        self.unsigned.total_cost
    }
}

/// Whether a receipt covers one record or several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptType {
    #[default]
    Single,
    Batch,
}

impl ReceiptType {
    /// `Single` iff exactly one record is covered.
    pub fn for_count(count: usize) -> Self {
        if count == 1 {
            ReceiptType::Single
        } else {
            ReceiptType::Batch
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptType::Single => "single",
            ReceiptType::Batch => "batch",
        }
    }
}

impl fmt::Display for ReceiptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReceiptType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(ReceiptType::Single),
            "batch" => Ok(ReceiptType::Batch),
            other => Err(CoreError::UnknownReceiptType(other.to_string())),
        }
    }
}

/// A receipt plus unsigned batch metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    #[serde(flatten)]
    pub receipt: Receipt,
    #[serde(default)]
    pub receipt_type: ReceiptType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_summary: Option<BatchReceiptSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl BatchReceipt {
    /// Wrap a plain receipt with no batch metadata.
    pub fn single(receipt: Receipt) -> Self {
        Self {
            receipt,
            receipt_type: ReceiptType::Single,
            batch_summary: None,
            description: None,
            tags: None,
        }
    }

    pub fn receipt_id(&self) -> &ReceiptId {
        self.receipt.receipt_id()
    }
}

/// Drop sub-microsecond precision.
///
/// Canonical timestamps carry at most six fractional digits, and the store
/// keeps microseconds, so anything finer would not survive a round trip.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = ts.nanosecond();
    ts.with_nanosecond(nanos - nanos % 1_000).unwrap_or(ts)
}

/// Builder for unsigned receipts.
///
/// Totals are always derived here: `total_tokens = prompt + completion` and
/// `total_cost = input + output`. Callers cannot set them directly.
pub struct ReceiptBuilder {
    receipt_id: Option<ReceiptId>,
    timestamp: Option<DateTime<Utc>>,
    alias: String,
    profile: String,
    lock_digest: String,
    provider: String,
    model: String,
    prompt_tokens: u64,
    completion_tokens: u64,
    input_cost: Decimal,
    output_cost: Decimal,
}

impl ReceiptBuilder {
    /// Start building a receipt.
    pub fn new(
        alias: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            receipt_id: None,
            timestamp: None,
            alias: alias.into(),
            profile: DEFAULT_PROFILE.to_string(),
            lock_digest: String::new(),
            provider: provider.into(),
            model: model.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            input_cost: Decimal::ZERO,
            output_cost: Decimal::ZERO,
        }
    }

    /// Use a fixed receipt ID instead of generating one.
    pub fn receipt_id(mut self, id: ReceiptId) -> Self {
        self.receipt_id = Some(id);
        self
    }

    /// Set the timestamp (defaults to now).
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn lock_digest(mut self, digest: impl Into<String>) -> Self {
        self.lock_digest = digest.into();
        self
    }

    /// Set prompt and completion token counts.
    pub fn tokens(mut self, prompt: u64, completion: u64) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self
    }

    /// Set input and output costs.
    pub fn costs(mut self, input: Decimal, output: Decimal) -> Self {
        self.input_cost = input;
        self.output_cost = output;
        self
    }

    /// Validate amounts and derive totals.
    pub fn build(self) -> Result<UnsignedReceipt, CoreError> {
        if self.input_cost < Decimal::ZERO {
            return Err(CoreError::NegativeAmount { field: "input_cost" });
        }
        if self.output_cost < Decimal::ZERO {
            return Err(CoreError::NegativeAmount { field: "output_cost" });
        }

        let total_tokens = self
            .prompt_tokens
            .checked_add(self.completion_tokens)
            .ok_or(CoreError::Overflow("total_tokens"))?;
        let total_cost = self
            .input_cost
            .checked_add(self.output_cost)
            .ok_or(CoreError::Overflow("total_cost"))?;

        Ok(UnsignedReceipt {
            receipt_id: self.receipt_id.unwrap_or_else(ReceiptId::generate),
            timestamp: truncate_to_micros(self.timestamp.unwrap_or_else(Utc::now)),
            alias: self.alias,
            profile: self.profile,
            lock_digest: self.lock_digest,
            provider: self.provider,
            model: self.model,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens,
            input_cost: self.input_cost,
            output_cost: self.output_cost,
            total_cost,
        })
    }

    /// Build and sign the receipt.
    pub fn sign(self, keypair: &Keypair) -> Result<Receipt, CoreError> {
        self.build()?.sign(keypair)
    }
}
