//! Service configuration.

use std::fmt;
use std::path::PathBuf;

use llmring_receipts_core::receipt::DEFAULT_PROFILE;

use crate::error::{ReceiptError, Result};

pub const ENV_KEY_PATH: &str = "LLMRING_RECEIPTS_KEY_PATH";
pub const ENV_PRIVATE_KEY: &str = "LLMRING_RECEIPTS_PRIVATE_KEY_B64";
pub const ENV_PUBLIC_KEY: &str = "LLMRING_RECEIPTS_PUBLIC_KEY_B64";
pub const ENV_PAGE_LIMIT: &str = "LLMRING_RECEIPTS_PAGE_LIMIT";

/// Configuration for the receipt service.
#[derive(Clone)]
pub struct ReceiptsConfig {
    /// Persisted keypair file. Generated on first use when missing.
    pub key_path: Option<PathBuf>,
    /// Inline base64url private seed. Takes precedence over `key_path`.
    pub private_key_b64: Option<String>,
    /// Inline base64url public key. Alone, it yields a verify-only service.
    pub public_key_b64: Option<String>,
    /// Page size when the caller gives none.
    pub default_page_limit: u64,
    /// Upper bound on any requested page size.
    pub max_page_limit: u64,
    /// Profile written into receipts built by certification.
    pub default_profile: String,
}

impl Default for ReceiptsConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            private_key_b64: None,
            public_key_b64: None,
            default_page_limit: 100,
            max_page_limit: 1000,
            default_profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

impl ReceiptsConfig {
    /// Read configuration from `LLMRING_RECEIPTS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self {
            key_path: non_empty(ENV_KEY_PATH).map(PathBuf::from),
            private_key_b64: non_empty(ENV_PRIVATE_KEY),
            public_key_b64: non_empty(ENV_PUBLIC_KEY),
            ..Self::default()
        };

        if let Some(raw) = non_empty(ENV_PAGE_LIMIT) {
            let limit: u64 = raw.trim().parse().map_err(|_| {
                ReceiptError::Config(format!("{} must be a positive integer, got {:?}", ENV_PAGE_LIMIT, raw))
            })?;
            if limit == 0 {
                return Err(ReceiptError::Config(format!("{} must be at least 1", ENV_PAGE_LIMIT)));
            }
            config.default_page_limit = limit.min(config.max_page_limit);
        }

        Ok(config)
    }

    /// Effective page size for a request.
    pub fn page_limit(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_page_limit)
            .clamp(1, self.max_page_limit.max(1))
    }
}

impl fmt::Debug for ReceiptsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiptsConfig")
            .field("key_path", &self.key_path)
            .field("private_key_b64", &self.private_key_b64.as_ref().map(|_| "<redacted>"))
            .field("public_key_b64", &self.public_key_b64)
            .field("default_page_limit", &self.default_page_limit)
            .field("max_page_limit", &self.max_page_limit)
            .field("default_profile", &self.default_profile)
            .finish()
    }
}
