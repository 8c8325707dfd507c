//! Golden test vectors for deterministic verification.
//!
//! Each vector pins the exact canonical JSON a receipt must produce. Any
//! other verifier of these receipts has to reproduce the same bytes, so the
//! expected strings are written out in full rather than computed.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use llmring_receipts_core::{
    signing_bytes, CoreError, Keypair, Receipt, ReceiptBuilder, ReceiptId, UnsignedReceipt,
};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Seed for deterministic key generation.
    pub seed: [u8; 32],
    pub receipt_id: &'static str,
    /// RFC 3339 timestamp.
    pub timestamp: &'static str,
    pub alias: &'static str,
    pub profile: &'static str,
    pub lock_digest: &'static str,
    pub provider: &'static str,
    pub model: &'static str,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Decimal string.
    pub input_cost: &'static str,
    /// Decimal string.
    pub output_cost: &'static str,
    /// Exact signed bytes, as UTF-8.
    pub expected_canonical: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "single call",
            seed: [0x01; 32],
            receipt_id: "rcpt_0000000000000001",
            timestamp: "2025-01-15T12:00:00Z",
            alias: "fast",
            profile: "default",
            lock_digest: "",
            provider: "openai",
            model: "gpt-4o",
            prompt_tokens: 20,
            completion_tokens: 15,
            input_cost: "0.002",
            output_cost: "0.0015",
            expected_canonical: r#"{"alias":"fast","completion_tokens":15,"input_cost":0.002,"lock_digest":"","model":"gpt-4o","output_cost":0.0015,"profile":"default","prompt_tokens":20,"provider":"openai","receipt_id":"rcpt_0000000000000001","timestamp":"2025-01-15T12:00:00+00:00","total_cost":0.0035,"total_tokens":35}"#,
        },
        GoldenVector {
            name: "zero usage, microseconds, non-ASCII alias",
            seed: [0x02; 32],
            receipt_id: "rcpt_00000000000000ff",
            timestamp: "2025-06-30T23:59:59.123456Z",
            alias: "résumé",
            profile: "eval",
            lock_digest: "sha256:9f86d081",
            provider: "anthropic",
            model: "claude-3-5-sonnet",
            prompt_tokens: 0,
            completion_tokens: 0,
            input_cost: "0",
            output_cost: "0",
            expected_canonical: r#"{"alias":"résumé","completion_tokens":0,"input_cost":0,"lock_digest":"sha256:9f86d081","model":"claude-3-5-sonnet","output_cost":0,"profile":"eval","prompt_tokens":0,"provider":"anthropic","receipt_id":"rcpt_00000000000000ff","timestamp":"2025-06-30T23:59:59.123456+00:00","total_cost":0,"total_tokens":0}"#,
        },
        GoldenVector {
            name: "batch placeholder",
            seed: [0x03; 32],
            receipt_id: "rcpt_0123456789abcdef",
            timestamp: "2025-03-01T00:00:00.5Z",
            alias: "batch",
            profile: "default",
            lock_digest: "",
            provider: "batch",
            model: "batch:3 calls",
            prompt_tokens: 60,
            completion_tokens: 30,
            input_cost: "0.0015",
            output_cost: "0.0045",
            expected_canonical: r#"{"alias":"batch","completion_tokens":30,"input_cost":0.0015,"lock_digest":"","model":"batch:3 calls","output_cost":0.0045,"profile":"default","prompt_tokens":60,"provider":"batch","receipt_id":"rcpt_0123456789abcdef","timestamp":"2025-03-01T00:00:00.500000+00:00","total_cost":0.006,"total_tokens":90}"#,
        },
        GoldenVector {
            name: "escapes and largest safe total",
            seed: [0x04; 32],
            receipt_id: "rcpt_ffffffffffffffff",
            timestamp: "1999-12-31T23:59:59.000001Z",
            alias: "tab\there \"quoted\"",
            profile: "default",
            lock_digest: "",
            provider: "p",
            model: "m\u{1f}",
            prompt_tokens: 4_503_599_627_370_495,
            completion_tokens: 4_503_599_627_370_496,
            input_cost: "12",
            output_cost: "0.5",
            expected_canonical: r#"{"alias":"tab\there \"quoted\"","completion_tokens":4503599627370496,"input_cost":12,"lock_digest":"","model":"m\u001f","output_cost":0.5,"profile":"default","prompt_tokens":4503599627370495,"provider":"p","receipt_id":"rcpt_ffffffffffffffff","timestamp":"1999-12-31T23:59:59.000001+00:00","total_cost":12.5,"total_tokens":9007199254740991}"#,
        },
    ]
}

/// Build the unsigned receipt described by a vector.
pub fn unsigned_from_vector(vector: &GoldenVector) -> Result<UnsignedReceipt, CoreError> {
    let timestamp = DateTime::parse_from_rfc3339(vector.timestamp)
        .expect("vector timestamps are valid RFC 3339")
        .with_timezone(&Utc);
    let cost = |s: &str| Decimal::from_str(s).expect("vector costs are valid decimals");

    ReceiptBuilder::new(vector.alias, vector.provider, vector.model)
        .receipt_id(ReceiptId::new(vector.receipt_id))
        .timestamp(timestamp)
        .profile(vector.profile)
        .lock_digest(vector.lock_digest)
        .tokens(vector.prompt_tokens, vector.completion_tokens)
        .costs(cost(vector.input_cost), cost(vector.output_cost))
        .build()
}

/// Build and sign the receipt described by a vector with its seeded key.
pub fn signed_from_vector(vector: &GoldenVector) -> Result<Receipt, CoreError> {
    unsigned_from_vector(vector)?.sign(&Keypair::from_seed(&vector.seed))
}

/// Check every vector's canonical bytes against the expected string.
///
/// Returns `(name, matches, actual)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let actual = unsigned_from_vector(v)
                .and_then(|u| signing_bytes(&u).map_err(CoreError::from))
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_else(|e| format!("error: {}", e));
            (v.name.to_string(), actual == v.expected_canonical, actual)
        })
        .collect()
}

/// Export the vectors with their public keys and signatures as JSON, for
/// checking other verifiers against this one.
pub fn vectors_json() -> Result<Value, CoreError> {
    all_vectors()
        .iter()
        .map(|v| {
            let keypair = Keypair::from_seed(&v.seed);
            let receipt = signed_from_vector(v)?;
            Ok(json!({
                "name": v.name,
                "seed_hex": hex::encode(v.seed),
                "public_key": keypair.public_key().to_base64url(),
                "key_id": keypair.public_key().key_id(),
                "canonical": v.expected_canonical,
                "signature": receipt.signature,
            }))
        })
        .collect::<Result<Vec<_>, CoreError>>()
        .map(Value::Array)
}
