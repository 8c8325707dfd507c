//! Receipt verification.
//!
//! Verification never fails loudly. Callers include unauthenticated public
//! endpoints, so every decode or verify failure collapses to `false`.

use serde_json::Value;

use crate::canonical::signing_bytes;
use crate::crypto::{PublicKey, Signature};
use crate::error::CoreError;
use crate::receipt::{BatchReceipt, Receipt};

/// Verify a receipt's signature against a public key.
///
/// The signed bytes are recomputed from the receipt's current field values.
pub fn verify_receipt(receipt: &Receipt, public_key: &PublicKey) -> bool {
    check_signature(receipt, public_key).is_ok()
}

/// Verify a batch receipt. Batch metadata is outside the signed bytes.
pub fn verify_batch_receipt(receipt: &BatchReceipt, public_key: &PublicKey) -> bool {
    verify_receipt(&receipt.receipt, public_key)
}

/// Verify an arbitrary JSON document claiming to be a receipt.
///
/// Unknown members (including batch-only fields) are ignored; a missing or
/// mistyped signed field yields `false`.
pub fn verify_json(document: &Value, public_key: &PublicKey) -> bool {
    match serde_json::from_value::<Receipt>(document.clone()) {
        Ok(receipt) => verify_receipt(&receipt, public_key),
        Err(_) => false,
    }
}

/// Signature check with the failure reason kept, for logging.
pub fn check_signature(receipt: &Receipt, public_key: &PublicKey) -> Result<(), CoreError> {
    let signature = Signature::parse_prefixed(&receipt.signature)?;
    let message = signing_bytes(&receipt.unsigned)?;
    public_key.verify(&message, &signature)
}
