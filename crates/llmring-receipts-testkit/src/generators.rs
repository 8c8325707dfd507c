//! Proptest generators for property-based testing.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use llmring_receipts_core::{
    CandidateLog, ConversationCandidate, CoreError, Keypair, LogId, ReceiptBuilder, ReceiptId,
    UnsignedReceipt, UsageCandidate,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a receipt ID in the issued `rcpt_<hex16>` form.
pub fn receipt_id() -> impl Strategy<Value = ReceiptId> {
    any::<[u8; 8]>().prop_map(|bytes| ReceiptId::new(format!("rcpt_{}", hex::encode(bytes))))
}

/// A UTC instant between 2020 and 2030 with microsecond precision.
pub fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800i64..1_893_456_000i64, 0u32..1_000_000u32).prop_filter_map(
        "representable instant",
        |(secs, micros)| Utc.timestamp_opt(secs, micros * 1_000).single(),
    )
}

/// A currency amount below half a unit with up to six decimal places.
pub fn cost() -> impl Strategy<Value = Decimal> {
    (0i64..500_000i64).prop_map(|micros| Decimal::new(micros, 6))
}

/// A token count.
pub fn tokens() -> impl Strategy<Value = u64> {
    0u64..=2_000_000u64
}

/// A free-text field, including non-ASCII and characters that need escaping.
pub fn text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9-]{0,23}".prop_map(String::from),
        any::<String>(),
    ]
}

/// Parameters for generating an unsigned receipt.
#[derive(Debug, Clone)]
pub struct ReceiptParams {
    pub seed: [u8; 32],
    pub receipt_id: ReceiptId,
    pub timestamp: DateTime<Utc>,
    pub alias: String,
    pub profile: String,
    pub lock_digest: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
}

impl ReceiptParams {
    pub fn keypair(&self) -> Keypair {
        Keypair::from_seed(&self.seed)
    }
}

impl Arbitrary for ReceiptParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            receipt_id(),
            timestamp(),
            (text(), text(), text()),
            (text(), text()),
            (tokens(), tokens()),
            (cost(), cost()),
        )
            .prop_map(
                |(seed, receipt_id, timestamp, (alias, profile, lock_digest), (provider, model), (p, c), (i, o))| {
                    ReceiptParams {
                        seed,
                        receipt_id,
                        timestamp,
                        alias,
                        profile,
                        lock_digest,
                        provider,
                        model,
                        prompt_tokens: p,
                        completion_tokens: c,
                        input_cost: i,
                        output_cost: o,
                    }
                },
            )
            .boxed()
    }
}

/// Build the unsigned receipt described by `params`.
pub fn unsigned_from_params(params: &ReceiptParams) -> Result<UnsignedReceipt, CoreError> {
    ReceiptBuilder::new(&params.alias, &params.provider, &params.model)
        .receipt_id(params.receipt_id.clone())
        .timestamp(params.timestamp)
        .profile(&params.profile)
        .lock_digest(&params.lock_digest)
        .tokens(params.prompt_tokens, params.completion_tokens)
        .costs(params.input_cost, params.output_cost)
        .build()
}

/// One candidate record with the given identifier.
pub fn candidate(id: String) -> impl Strategy<Value = CandidateLog> {
    (
        any::<bool>(),
        prop::sample::select(vec!["gpt-4o", "gpt-4o-mini", "claude-3-haiku"]),
        prop::sample::select(vec!["fast", "deep", "default"]),
        (tokens(), tokens()),
        cost(),
        timestamp(),
    )
        .prop_map(move |(is_conversation, model, alias, (input, output), cost, created_at)| {
            let id = LogId::parse(id.clone()).expect("generated ids are non-blank");
            if is_conversation {
                CandidateLog::Conversation(ConversationCandidate {
                    id,
                    alias: alias.to_string(),
                    provider: "openai".to_string(),
                    model: model.to_string(),
                    input_tokens: input,
                    output_tokens: output,
                    cost,
                    created_at,
                })
            } else {
                CandidateLog::Usage(UsageCandidate {
                    id,
                    alias: alias.to_string(),
                    provider: "openai".to_string(),
                    model: model.to_string(),
                    input_tokens: input,
                    output_tokens: output,
                    cost,
                    created_at,
                })
            }
        })
}

/// Between `min` and `max` candidates with distinct identifiers.
pub fn candidates(min: usize, max: usize) -> impl Strategy<Value = Vec<CandidateLog>> {
    (min..=max).prop_flat_map(|n| {
        (0..n)
            .map(|i| candidate(format!("log-{:04}", i)))
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmring_receipts_core::{
        aggregate, build_receipt, canonicalize, receipt_fields, signing_bytes, verify_receipt,
    };
    use serde_json::{Map, Value};

    proptest! {
        #[test]
        fn test_canonical_bytes_ignore_field_order(
            params: ReceiptParams,
            order in Just((0..13usize).collect::<Vec<_>>()).prop_shuffle(),
        ) {
            let unsigned = unsigned_from_params(&params).unwrap();
            let fields = receipt_fields(&unsigned).unwrap();
            let entries: Vec<(&String, &Value)> = fields.iter().collect();

            let mut shuffled = Map::new();
            for i in order {
                let (key, value) = entries[i];
                shuffled.insert(key.clone(), value.clone());
            }

            prop_assert_eq!(canonicalize(&fields).unwrap(), canonicalize(&shuffled).unwrap());
        }

        #[test]
        fn test_sign_verify_roundtrip(params: ReceiptParams) {
            let keypair = params.keypair();
            let receipt = unsigned_from_params(&params).unwrap().sign(&keypair).unwrap();
            prop_assert!(verify_receipt(&receipt, &keypair.public_key()));
        }

        #[test]
        fn test_signing_is_deterministic(params: ReceiptParams) {
            let keypair = params.keypair();
            let a = unsigned_from_params(&params).unwrap().sign(&keypair).unwrap();
            let b = unsigned_from_params(&params).unwrap().sign(&keypair).unwrap();
            prop_assert_eq!(a.signature, b.signature);
        }

        #[test]
        fn test_tampered_cost_fails(params: ReceiptParams) {
            let keypair = params.keypair();
            let mut receipt = unsigned_from_params(&params).unwrap().sign(&keypair).unwrap();
            receipt.unsigned.total_cost += Decimal::new(1, 6);
            prop_assert!(!verify_receipt(&receipt, &keypair.public_key()));
        }

        #[test]
        fn test_tampered_model_fails(params: ReceiptParams, other in text()) {
            prop_assume!(other != params.model);
            let keypair = params.keypair();
            let mut receipt = unsigned_from_params(&params).unwrap().sign(&keypair).unwrap();
            receipt.unsigned.model = other;
            prop_assert!(!verify_receipt(&receipt, &keypair.public_key()));
        }

        #[test]
        fn test_wrong_key_fails(params: ReceiptParams, other in keypair()) {
            prop_assume!(other.public_key() != params.keypair().public_key());
            let receipt = unsigned_from_params(&params).unwrap().sign(&params.keypair()).unwrap();
            prop_assert!(!verify_receipt(&receipt, &other.public_key()));
        }

        #[test]
        fn test_totals_are_sums(params: ReceiptParams) {
            let unsigned = unsigned_from_params(&params).unwrap();
            prop_assert_eq!(unsigned.total_tokens, unsigned.prompt_tokens + unsigned.completion_tokens);
            prop_assert_eq!(unsigned.total_cost, unsigned.input_cost + unsigned.output_cost);
            prop_assert!(signing_bytes(&unsigned).is_ok());
        }

        #[test]
        fn test_certification_receipt_invariants(logs in candidates(1, 12), seed in any::<[u8; 32]>()) {
            let keypair = Keypair::from_seed(&seed);
            let receipt = build_receipt(&logs, None, None, "default", &keypair).unwrap();
            let unsigned = &receipt.receipt.unsigned;
            let summary = receipt.batch_summary.as_ref().unwrap();

            prop_assert_eq!(unsigned.total_tokens, unsigned.prompt_tokens + unsigned.completion_tokens);
            prop_assert_eq!(unsigned.total_cost, unsigned.input_cost + unsigned.output_cost);
            prop_assert_eq!(unsigned.total_cost, summary.total_cost);
            prop_assert_eq!(unsigned.total_tokens, summary.total_tokens);
            prop_assert_eq!(summary.by_model.values().map(|b| b.calls).sum::<u64>(), logs.len() as u64);
            prop_assert_eq!(summary.by_alias.values().map(|b| b.calls).sum::<u64>(), logs.len() as u64);
            prop_assert_eq!(
                summary.conversation_ids.len() + summary.log_ids.len(),
                logs.len()
            );
            prop_assert!(verify_receipt(&receipt.receipt, &keypair.public_key()));
        }

        #[test]
        fn test_aggregate_ignores_order(
            logs in candidates(1, 12).prop_flat_map(|logs| {
                let shuffled = Just(logs.clone()).prop_shuffle();
                (Just(logs), shuffled)
            })
        ) {
            let (original, shuffled) = logs;
            let a = aggregate(&original).unwrap();
            let b = aggregate(&shuffled).unwrap();

            prop_assert_eq!(a.total_tokens, b.total_tokens);
            prop_assert_eq!(a.total_cost, b.total_cost);
            prop_assert_eq!(a.start_date, b.start_date);
            prop_assert_eq!(a.end_date, b.end_date);
            prop_assert_eq!(a.by_model, b.by_model);
            prop_assert_eq!(a.by_alias, b.by_alias);
        }
    }
}
