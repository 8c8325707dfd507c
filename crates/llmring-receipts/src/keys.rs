//! Signing key management.
//!
//! A [`KeyManager`] is built once at startup and handed to the service. It
//! holds either a full keypair or, for verify-only deployments, just the
//! public key.
//!
//! Key files hold two base64url lines: the private seed, then the public key.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use llmring_receipts_core::validation::check_signature;
use llmring_receipts_core::{Keypair, PublicKey, Receipt, UnsignedReceipt};

use crate::config::ReceiptsConfig;
use crate::error::{ReceiptError, Result};

/// Public key plus its fingerprint, for rendering by an outer layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicKeyMaterial {
    pub key_id: String,
    pub public_key: PublicKey,
    pub public_key_b64: String,
}

/// Holds the service's signing identity.
#[derive(Debug)]
pub struct KeyManager {
    keypair: Option<Keypair>,
    public_key: PublicKey,
    key_id: String,
}

impl KeyManager {
    /// Wrap an existing keypair.
    pub fn from_keypair(keypair: Keypair) -> Self {
        let public_key = keypair.public_key();
        Self {
            key_id: public_key.key_id(),
            keypair: Some(keypair),
            public_key,
        }
    }

    /// A manager that can verify but never sign.
    pub fn verify_only(public_key: PublicKey) -> Self {
        Self {
            key_id: public_key.key_id(),
            keypair: None,
            public_key,
        }
    }

    /// Load the keypair at `path`, or generate one.
    ///
    /// A generated keypair is written to `path` with owner-only permissions.
    /// Without a path the keypair lives only as long as the process, and
    /// receipts it signed become unverifiable after a restart.
    pub fn load_or_generate(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            let manager = Self::from_keypair(Keypair::generate());
            tracing::warn!(key_id = %manager.key_id, "using ephemeral signing key");
            return Ok(manager);
        };

        if path.exists() {
            let manager = Self::read_key_file(path)?;
            tracing::debug!(key_id = %manager.key_id, path = %path.display(), "loaded signing key");
            return Ok(manager);
        }

        let keypair = Keypair::generate();
        write_key_file(path, &keypair)?;
        let manager = Self::from_keypair(keypair);
        tracing::info!(key_id = %manager.key_id, path = %path.display(), "generated signing key");
        Ok(manager)
    }

    /// Build from base64url key material.
    ///
    /// With a private seed, a given public key must match it. A public key
    /// alone gives a verify-only manager.
    pub fn from_base64(private: Option<&str>, public: Option<&str>) -> Result<Self> {
        let public = public
            .map(PublicKey::from_base64url)
            .transpose()
            .map_err(|e| ReceiptError::KeyLoad(format!("public key: {}", e)))?;

        match (private, public) {
            (Some(private), public) => {
                let keypair = Keypair::from_base64url(private)
                    .map_err(|e| ReceiptError::KeyLoad(format!("private key: {}", e)))?;
                if public.is_some_and(|p| p != keypair.public_key()) {
                    return Err(ReceiptError::KeyLoad(
                        "public key does not match private key".into(),
                    ));
                }
                Ok(Self::from_keypair(keypair))
            }
            (None, Some(public)) => Ok(Self::verify_only(public)),
            (None, None) => Err(ReceiptError::KeyLoad("no key material provided".into())),
        }
    }

    /// Resolve the key source from configuration.
    ///
    /// Inline key material wins over `key_path`.
    pub fn from_config(config: &ReceiptsConfig) -> Result<Self> {
        if config.private_key_b64.is_some() || config.public_key_b64.is_some() {
            return Self::from_base64(
                config.private_key_b64.as_deref(),
                config.public_key_b64.as_deref(),
            );
        }
        Self::load_or_generate(config.key_path.as_deref())
    }

    fn read_key_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ReceiptError::KeyLoad(format!("{}: {}", path.display(), e)))?;

        let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
        let (Some(private), Some(public), None) = (lines.next(), lines.next(), lines.next()) else {
            return Err(ReceiptError::KeyLoad(format!(
                "{}: expected two lines (private key, public key)",
                path.display()
            )));
        };

        Self::from_base64(Some(private), Some(public))
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Fingerprint of the public key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn can_sign(&self) -> bool {
        self.keypair.is_some()
    }

    /// The signing keypair, or `Signing` if this manager is verify-only.
    pub fn keypair(&self) -> Result<&Keypair> {
        self.keypair
            .as_ref()
            .ok_or_else(|| ReceiptError::Signing("no private key configured".into()))
    }

    /// Sign an unsigned receipt.
    pub fn sign(&self, unsigned: UnsignedReceipt) -> Result<Receipt> {
        Ok(unsigned.sign(self.keypair()?)?)
    }

    /// Check a receipt against this manager's public key.
    pub fn verify(&self, receipt: &Receipt) -> bool {
        match check_signature(receipt, &self.public_key) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(receipt_id = %receipt.receipt_id(), error = %e, "verification failed");
                false
            }
        }
    }

    pub fn public_key_material(&self) -> PublicKeyMaterial {
        PublicKeyMaterial {
            key_id: self.key_id.clone(),
            public_key: self.public_key,
            public_key_b64: self.public_key.to_base64url(),
        }
    }
}

fn write_key_file(path: &Path, keypair: &Keypair) -> Result<()> {
    let io_err = |e: std::io::Error| ReceiptError::KeyLoad(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_err)?;
    writeln!(file, "{}", keypair.seed_base64url()).map_err(io_err)?;
    writeln!(file, "{}", keypair.public_key().to_base64url()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}
