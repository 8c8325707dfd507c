//! Cryptographic primitives for receipt signing.
//!
//! Wraps Ed25519 signing with strong types and the receipt wire encodings:
//! keys and signatures travel as base64url without padding, and signatures
//! carry an `ed25519:` algorithm prefix.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CoreError;

/// Algorithm prefix on every encoded signature.
pub const SIGNATURE_PREFIX: &str = "ed25519:";

/// Length of a key fingerprint in hex characters.
pub const KEY_ID_LEN: usize = 16;

/// Encode bytes as base64url without padding.
pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, tolerating trailing `=` padding.
pub fn b64url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s.trim().trim_end_matches('='))
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = b64url_decode(s).ok()?;
    bytes.try_into().ok()
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as base64url without padding.
    pub fn to_base64url(&self) -> String {
        b64url_encode(&self.0)
    }

    /// Parse from base64url, checking the bytes are a valid curve point.
    pub fn from_base64url(s: &str) -> Result<Self, CoreError> {
        let bytes = decode_fixed::<32>(s).ok_or(CoreError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Short deterministic fingerprint: the first 16 hex characters of
    /// SHA-256 over the base64url encoding of the key.
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.to_base64url().as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(KEY_ID_LEN);
        id
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;

        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::MalformedSignature("verification failed".into()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.key_id())
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Encode as `ed25519:<base64url>`.
    pub fn to_prefixed(&self) -> String {
        format!("{}{}", SIGNATURE_PREFIX, b64url_encode(&self.0))
    }

    /// Parse an `ed25519:<base64url>` string.
    pub fn parse_prefixed(s: &str) -> Result<Self, CoreError> {
        let encoded = s
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or_else(|| CoreError::MalformedSignature("missing ed25519: prefix".into()))?;
        decode_fixed::<64>(encoded)
            .map(Self)
            .ok_or_else(|| CoreError::MalformedSignature("expected 64 base64url bytes".into()))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &hex::encode(self.0)[..16])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prefixed())
    }
}

/// A keypair for signing receipts.
///
/// This wraps ed25519-dalek's SigningKey. Signing is deterministic and takes
/// `&self`, so one keypair may be shared across concurrent requests.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Parse a base64url private seed.
    pub fn from_base64url(s: &str) -> Result<Self, CoreError> {
        let seed = decode_fixed::<32>(s).ok_or(CoreError::InvalidPrivateKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature(sig.to_bytes())
    }

    /// Get the raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The seed as base64url, for persisting to a key file.
    pub fn seed_base64url(&self) -> String {
        b64url_encode(&self.seed())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = Keypair::generate();
        let message = b"hello world";
        let signature = keypair.sign(message);

        keypair
            .public_key()
            .verify(message, &signature)
            .expect("valid signature should verify");

        let tampered = b"hello worlD";
        assert!(keypair.public_key().verify(tampered, &signature).is_err());
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let seed = [0x42u8; 32];
        let kp1 = Keypair::from_seed(&seed);
        let kp2 = Keypair::from_seed(&seed);
        assert_eq!(kp1.public_key(), kp2.public_key());
        assert_eq!(kp1.sign(b"msg"), kp2.sign(b"msg"));
    }

    #[test]
    fn test_signature_prefixed_roundtrip() {
        let keypair = Keypair::from_seed(&[7u8; 32]);
        let sig = keypair.sign(b"payload");
        let encoded = sig.to_prefixed();

        assert!(encoded.starts_with(SIGNATURE_PREFIX));
        assert!(!encoded.contains('='));
        assert_eq!(Signature::parse_prefixed(&encoded).unwrap(), sig);
    }

    #[test]
    fn test_signature_parse_rejects_garbage() {
        assert!(Signature::parse_prefixed("rsa:AAAA").is_err());
        assert!(Signature::parse_prefixed("ed25519:").is_err());
        assert!(Signature::parse_prefixed("ed25519:!!!not-base64!!!").is_err());
        assert!(Signature::parse_prefixed("ed25519:AAAA").is_err());
    }

    #[test]
    fn test_key_id_is_16_hex_chars() {
        let pk = Keypair::from_seed(&[1u8; 32]).public_key();
        let id = pk.key_id();
        assert_eq!(id.len(), KEY_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, pk.key_id());

        let expected = hex::encode(Sha256::digest(pk.to_base64url().as_bytes()));
        assert_eq!(id, &expected[..16]);
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let pk = Keypair::generate().public_key();
        let recovered = PublicKey::from_base64url(&pk.to_base64url()).unwrap();
        assert_eq!(pk, recovered);
    }

    #[test]
    fn test_keypair_base64_roundtrip() {
        let kp = Keypair::generate();
        let recovered = Keypair::from_base64url(&kp.seed_base64url()).unwrap();
        assert_eq!(kp.public_key(), recovered.public_key());
        assert!(Keypair::from_base64url("short").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = Keypair::from_seed(&[9u8; 32]);
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&kp.seed_base64url()));
        assert!(debug.contains(&kp.public_key().key_id()));
    }
}
