//! Canonical JSON encoding for deterministic signing.
//!
//! This module implements RFC 8785 JSON Canonicalization Scheme (JCS):
//! - Object keys sorted by their UTF-16 code units
//! - No insignificant whitespace
//! - Numbers in the ECMAScript shortest round-trip form
//! - Strings escaped with the minimal JSON escape set
//!
//! The signed bytes of a receipt are never stored. They are recomputed from the
//! current field values on every verification, so this encoding is FROZEN:
//! changing it invalidates every receipt ever issued.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use std::str::FromStr;

use crate::error::CanonicalizationError;
use crate::receipt::UnsignedReceipt;

/// Largest integer an IEEE-754 double represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// Field names of the signed receipt payload.
mod keys {
    pub const RECEIPT_ID: &str = "receipt_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const ALIAS: &str = "alias";
    pub const PROFILE: &str = "profile";
    pub const LOCK_DIGEST: &str = "lock_digest";
    pub const PROVIDER: &str = "provider";
    pub const MODEL: &str = "model";
    pub const PROMPT_TOKENS: &str = "prompt_tokens";
    pub const COMPLETION_TOKENS: &str = "completion_tokens";
    pub const TOTAL_TOKENS: &str = "total_tokens";
    pub const INPUT_COST: &str = "input_cost";
    pub const OUTPUT_COST: &str = "output_cost";
    pub const TOTAL_COST: &str = "total_cost";
}

/// Canonicalize a field mapping.
///
/// Insertion order of `fields` is irrelevant to the output.
pub fn canonicalize(fields: &Map<String, Value>) -> Result<Vec<u8>, CanonicalizationError> {
    let mut buf = String::new();
    write_object(&mut buf, fields)?;
    Ok(buf.into_bytes())
}

/// Canonicalize an arbitrary JSON value.
pub fn canonicalize_value(value: &Value) -> Result<Vec<u8>, CanonicalizationError> {
    let mut buf = String::new();
    write_value(&mut buf, value)?;
    Ok(buf.into_bytes())
}

/// Build the signed field map of an unsigned receipt.
///
/// Only the scalar payload fields appear here. Batch metadata (`receipt_type`,
/// `batch_summary`, `description`, `tags`) and the signature itself are never
/// part of the signed bytes.
pub fn receipt_fields(
    receipt: &UnsignedReceipt,
) -> Result<Map<String, Value>, CanonicalizationError> {
    // The rendered form stops at microseconds; anything finer would be
    // dropped from the signed bytes but kept in the receipt.
    if receipt.timestamp.timestamp_subsec_nanos() % 1_000 != 0 {
        return Err(CanonicalizationError::SubMicrosecondTimestamp(
            receipt.timestamp.to_rfc3339(),
        ));
    }

    let mut fields = Map::new();

    fields.insert(keys::RECEIPT_ID.into(), Value::String(receipt.receipt_id.to_string()));
    fields.insert(keys::TIMESTAMP.into(), Value::String(format_timestamp(&receipt.timestamp)));
    fields.insert(keys::ALIAS.into(), Value::String(receipt.alias.clone()));
    fields.insert(keys::PROFILE.into(), Value::String(receipt.profile.clone()));
    fields.insert(keys::LOCK_DIGEST.into(), Value::String(receipt.lock_digest.clone()));
    fields.insert(keys::PROVIDER.into(), Value::String(receipt.provider.clone()));
    fields.insert(keys::MODEL.into(), Value::String(receipt.model.clone()));

    fields.insert(keys::PROMPT_TOKENS.into(), token_number(receipt.prompt_tokens)?);
    fields.insert(keys::COMPLETION_TOKENS.into(), token_number(receipt.completion_tokens)?);
    fields.insert(keys::TOTAL_TOKENS.into(), token_number(receipt.total_tokens)?);

    fields.insert(keys::INPUT_COST.into(), decimal_number(&receipt.input_cost)?);
    fields.insert(keys::OUTPUT_COST.into(), decimal_number(&receipt.output_cost)?);
    fields.insert(keys::TOTAL_COST.into(), decimal_number(&receipt.total_cost)?);

    Ok(fields)
}

/// The exact bytes an Ed25519 signature covers for this receipt.
pub fn signing_bytes(receipt: &UnsignedReceipt) -> Result<Vec<u8>, CanonicalizationError> {
    canonicalize(&receipt_fields(receipt)?)
}

/// Render a timestamp as ISO-8601 UTC with an explicit `+00:00` offset.
///
/// Microseconds are printed only when non-zero.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    if ts.timestamp_subsec_micros() == 0 {
        ts.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
    } else {
        ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
    }
}

/// Convert a decimal currency amount into a JSON number.
///
/// Fails if the shortest binary64 rendering does not parse back to the same
/// decimal value.
pub fn decimal_number(value: &Decimal) -> Result<Value, CanonicalizationError> {
    let inexact = || CanonicalizationError::InexactDecimal(value.to_string());

    let float = value.to_f64().ok_or_else(inexact)?;
    if !float.is_finite() {
        return Err(CanonicalizationError::NonFiniteNumber);
    }

    // Rust's Display for f64 is the shortest round-trip form, never exponential.
    let back = Decimal::from_str(&format!("{}", float)).map_err(|_| inexact())?;
    if back.normalize() != value.normalize() {
        return Err(inexact());
    }

    Number::from_f64(float)
        .map(Value::Number)
        .ok_or(CanonicalizationError::NonFiniteNumber)
}

fn token_number(value: u64) -> Result<Value, CanonicalizationError> {
    if value > MAX_SAFE_INTEGER {
        return Err(CanonicalizationError::UnsafeInteger(value.to_string()));
    }
    Ok(Value::Number(value.into()))
}

/// Recursively write a JSON value.
fn write_value(buf: &mut String, value: &Value) -> Result<(), CanonicalizationError> {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(buf, n)?,
        Value::String(s) => write_string(buf, s),
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_value(buf, item)?;
            }
            buf.push(']');
        }
        Value::Object(map) => write_object(buf, map)?,
    }
    Ok(())
}

/// Write an object with members sorted by UTF-16 code units of their names.
fn write_object(buf: &mut String, map: &Map<String, Value>) -> Result<(), CanonicalizationError> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.encode_utf16().cmp(b.0.encode_utf16()));

    buf.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        write_string(buf, key);
        buf.push(':');
        write_value(buf, value)?;
    }
    buf.push('}');
    Ok(())
}

fn write_number(buf: &mut String, n: &Number) -> Result<(), CanonicalizationError> {
    if let Some(u) = n.as_u64() {
        if u > MAX_SAFE_INTEGER {
            return Err(CanonicalizationError::UnsafeInteger(u.to_string()));
        }
        buf.push_str(&u.to_string());
        return Ok(());
    }

    if let Some(i) = n.as_i64() {
        if i.unsigned_abs() > MAX_SAFE_INTEGER {
            return Err(CanonicalizationError::UnsafeInteger(i.to_string()));
        }
        buf.push_str(&i.to_string());
        return Ok(());
    }

    match n.as_f64() {
        Some(f) => write_f64(buf, f),
        None => Err(CanonicalizationError::NonFiniteNumber),
    }
}

/// Write a double using the ECMAScript Number::toString algorithm.
fn write_f64(buf: &mut String, value: f64) -> Result<(), CanonicalizationError> {
    if !value.is_finite() {
        return Err(CanonicalizationError::NonFiniteNumber);
    }
    // Covers negative zero as well.
    if value == 0.0 {
        buf.push('0');
        return Ok(());
    }
    if value < 0.0 {
        buf.push('-');
    }

    // `{:e}` yields the shortest round-trip digits: "d[.ddd]e<exp>".
    let sci = format!("{:e}", value.abs());
    let (mantissa, exponent) = sci
        .split_once('e')
        .ok_or(CanonicalizationError::NonFiniteNumber)?;
    let exponent: i32 = exponent
        .parse()
        .map_err(|_| CanonicalizationError::NonFiniteNumber)?;
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let k = digits.len() as i32;
    let n = exponent + 1;

    if k <= n && n <= 21 {
        buf.push_str(&digits);
        buf.extend(std::iter::repeat('0').take((n - k) as usize));
    } else if 0 < n && n <= 21 {
        let (int_part, frac_part) = digits.split_at(n as usize);
        buf.push_str(int_part);
        buf.push('.');
        buf.push_str(frac_part);
    } else if -6 < n && n <= 0 {
        buf.push_str("0.");
        buf.extend(std::iter::repeat('0').take((-n) as usize));
        buf.push_str(&digits);
    } else {
        let (first, rest) = digits.split_at(1);
        buf.push_str(first);
        if !rest.is_empty() {
            buf.push('.');
            buf.push_str(rest);
        }
        buf.push('e');
        buf.push(if n - 1 < 0 { '-' } else { '+' });
        buf.push_str(&(n - 1).abs().to_string());
    }
    Ok(())
}

fn write_string(buf: &mut String, s: &str) {
    buf.push('"');
    for c in s.chars() {
        match c {
            '"' => buf.push_str("\\\""),
            '\\' => buf.push_str("\\\\"),
            '\u{08}' => buf.push_str("\\b"),
            '\u{0c}' => buf.push_str("\\f"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\t' => buf.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                buf.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => buf.push(c),
        }
    }
    buf.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn canon(value: Value) -> String {
        String::from_utf8(canonicalize_value(&value).unwrap()).unwrap()
    }

    fn number(f: f64) -> String {
        let mut buf = String::new();
        write_f64(&mut buf, f).unwrap();
        buf
    }

    #[test]
    fn test_key_ordering_independent_of_insertion() {
        let mut a = Map::new();
        a.insert("b".into(), json!(1));
        a.insert("a".into(), json!(2));
        a.insert("c".into(), json!(3));

        let mut b = Map::new();
        b.insert("c".into(), json!(3));
        b.insert("a".into(), json!(2));
        b.insert("b".into(), json!(1));

        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
        assert_eq!(canonicalize(&a).unwrap(), br#"{"a":2,"b":1,"c":3}"#.to_vec());
    }

    #[test]
    fn test_keys_sorted_by_utf16_not_utf8() {
        // U+1F600 is a surrogate pair (D83D DE00) and sorts before U+E000
        // in UTF-16, although its UTF-8 encoding sorts after.
        let out = canon(json!({"\u{e000}": 1, "\u{1f600}": 2}));
        assert_eq!(out, "{\"\u{1f600}\":2,\"\u{e000}\":1}");
    }

    #[test]
    fn test_rfc8785_number_vector() {
        let value = json!({
            "numbers": [333333333.33333329, 1E30, 4.50, 2e-3, 0.000000000000000000000000001]
        });
        assert_eq!(
            canon(value),
            r#"{"numbers":[333333333.3333333,1e+30,4.5,0.002,1e-27]}"#
        );
    }

    #[test]
    fn test_rfc8785_string_vector() {
        let value = json!("\u{20ac}$\u{000f}\nA'B\"\\\\\"/");
        assert_eq!(canon(value), "\"\u{20ac}$\\u000f\\nA'B\\\"\\\\\\\\\\\"/\"");
    }

    #[test]
    fn test_number_formatting_edges() {
        assert_eq!(number(0.0), "0");
        assert_eq!(number(-0.0), "0");
        assert_eq!(number(1.0), "1");
        assert_eq!(number(-1.5), "-1.5");
        assert_eq!(number(1e21), "1e+21");
        assert_eq!(number(1e20), "100000000000000000000");
        assert_eq!(number(1e-6), "0.000001");
        assert_eq!(number(1e-7), "1e-7");
        assert_eq!(number(5e-324), "5e-324");
        assert_eq!(number(1.7976931348623157e308), "1.7976931348623157e+308");
        assert_eq!(number(0.0035), "0.0035");
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut buf = String::new();
        assert_eq!(
            write_f64(&mut buf, f64::NAN),
            Err(CanonicalizationError::NonFiniteNumber)
        );
        assert_eq!(
            write_f64(&mut buf, f64::INFINITY),
            Err(CanonicalizationError::NonFiniteNumber)
        );
    }

    #[test]
    fn test_unsafe_integer_rejected() {
        let value = json!({ "n": MAX_SAFE_INTEGER + 1 });
        assert!(matches!(
            canonicalize_value(&value),
            Err(CanonicalizationError::UnsafeInteger(_))
        ));
        assert_eq!(canon(json!(MAX_SAFE_INTEGER)), "9007199254740991");
        assert_eq!(canon(json!(-42)), "-42");
    }

    #[test]
    fn test_no_whitespace_and_literals() {
        assert_eq!(
            canon(json!({"z": [true, false, null], "a": {"y": "x"}})),
            r#"{"a":{"y":"x"},"z":[true,false,null]}"#
        );
    }

    #[test]
    fn test_decimal_number_exact() {
        let d = Decimal::from_str("0.0035").unwrap();
        assert_eq!(decimal_number(&d).unwrap(), json!(0.0035));

        let whole = Decimal::from_str("5.000").unwrap();
        assert_eq!(canon(decimal_number(&whole).unwrap()), "5");
    }

    #[test]
    fn test_decimal_number_inexact_rejected() {
        let d = Decimal::from_str("0.1234567890123456789").unwrap();
        assert!(matches!(
            decimal_number(&d),
            Err(CanonicalizationError::InexactDecimal(_))
        ));
    }

    #[test]
    fn test_format_timestamp() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2025-01-15T12:30:00+00:00");

        let with_micros = ts + chrono::Duration::microseconds(1500);
        assert_eq!(format_timestamp(&with_micros), "2025-01-15T12:30:00.001500+00:00");
    }

    #[test]
    fn test_sub_microsecond_timestamp_rejected() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 12, 30, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_900);
        let unsigned = UnsignedReceipt {
            receipt_id: crate::types::ReceiptId::new("rcpt_0000000000000001"),
            timestamp: ts,
            alias: "fast".into(),
            profile: "default".into(),
            lock_digest: String::new(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            input_cost: rust_decimal::Decimal::ZERO,
            output_cost: rust_decimal::Decimal::ZERO,
            total_cost: rust_decimal::Decimal::ZERO,
        };
        assert!(matches!(
            signing_bytes(&unsigned),
            Err(CanonicalizationError::SubMicrosecondTimestamp(_))
        ));
    }
}
