//! The receipt service: certification, issuance, verification and lookups.
//!
//! The service brings together the key manager and a store. It is the only
//! component that decides *whether* to certify; the store decides *which*
//! records a mode selects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use llmring_receipts_core::aggregate::CostSplit;
use llmring_receipts_core::{
    build_receipt, preview, verify_json, BatchReceipt, CandidateLog, CertificationRequest,
    OwnerId, PreviewSummary, Receipt, ReceiptBuilder, ReceiptId, UnsignedReceipt,
};
use llmring_receipts_store::{
    link_keys, LinkPolicy, ReceiptHandle, Store, StoreError, StoredReceipt,
};

use crate::config::ReceiptsConfig;
use crate::error::{ReceiptError, Result};
use crate::keys::{KeyManager, PublicKeyMaterial};

/// Selections retried after another writer certified some of their records.
const CERTIFY_ATTEMPTS: u32 = 5;

/// Outcome of a certification.
#[derive(Debug, Clone)]
pub struct Certified {
    pub receipt: BatchReceipt,
    pub handle: ReceiptHandle,
    /// Number of records the receipt covers.
    pub certified_count: u64,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// How a call's cost is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallCost {
    /// Exact input and output costs.
    Split { input: Decimal, output: Decimal },
    /// Only the aggregate is known; it is split 25/75 input/output.
    Total(Decimal),
}

impl CallCost {
    fn split(self) -> (Decimal, Decimal) {
        match self {
            CallCost::Split { input, output } => (input, output),
            CallCost::Total(total) => {
                let split = CostSplit::estimate(total);
                (split.input, split.output)
            }
        }
    }
}

/// Metadata for issuing a receipt covering one LLM call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub alias: String,
    pub profile: Option<String>,
    pub lock_digest: Option<String>,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: CallCost,
}

/// The receipt service.
///
/// Safe to share across tasks. Certifications that must not overlap (those
/// whose selection excludes already-certified records) are serialized per
/// owner.
pub struct ReceiptService<S: Store> {
    keys: KeyManager,
    store: Arc<S>,
    config: ReceiptsConfig,
    owner_locks: Mutex<HashMap<OwnerId, Arc<AsyncMutex<()>>>>,
}

impl<S: Store> ReceiptService<S> {
    pub fn new(keys: KeyManager, store: S, config: ReceiptsConfig) -> Self {
        Self {
            keys,
            store: Arc::new(store),
            config,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build the key manager from `config`, then the service.
    pub fn from_config(store: S, config: ReceiptsConfig) -> Result<Self> {
        let keys = KeyManager::from_config(&config)?;
        Ok(Self::new(keys, store, config))
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReceiptsConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Certification
    // ─────────────────────────────────────────────────────────────────────────

    /// Certify the records a request selects under one signed receipt.
    ///
    /// Fails with `Validation` for a malformed request and `NoMatch` when
    /// nothing is selected.
    ///
    /// Date-range and since-last-receipt certifications never link a record
    /// twice. Within this service they are serialized per owner; across
    /// services sharing a database the store refuses a stale selection and
    /// the selection is taken again.
    pub async fn generate(
        &self,
        owner: &OwnerId,
        request: &CertificationRequest,
    ) -> Result<Certified> {
        let selector = request.selector()?;
        let keypair = self.keys.keypair()?;
        let policy = LinkPolicy::for_selector(&selector);

        // Held from selection until the links commit.
        let _guard = if policy == LinkPolicy::Exclusive {
            Some(self.lock_owner(owner).await)
        } else {
            None
        };

        let mut attempt = 1;
        loop {
            let candidates = self.store.select_candidates(owner, &selector).await?;
            if candidates.is_empty() {
                tracing::debug!(owner = %owner, mode = selector.name(), "nothing to certify");
                return Err(ReceiptError::NoMatch);
            }

            let receipt = build_receipt(
                &candidates,
                request.description.clone(),
                request.tags.clone(),
                &self.config.default_profile,
                keypair,
            )?;

            let recorded = self
                .store
                .record_certification(
                    owner,
                    &receipt,
                    self.keys.key_id(),
                    &link_keys(&candidates),
                    policy,
                )
                .await;

            let certification = match recorded {
                Ok(certification) => certification,
                Err(e @ StoreError::CertificationConflict { .. })
                    if attempt < CERTIFY_ATTEMPTS =>
                {
                    tracing::debug!(owner = %owner, attempt, error = %e, "selecting again");
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            tracing::info!(
                owner = %owner,
                receipt_id = %receipt.receipt_id(),
                mode = selector.name(),
                receipt_type = %receipt.receipt_type,
                records = candidates.len(),
                linked = certification.linked,
                "issued certification receipt"
            );

            return Ok(Certified {
                receipt,
                handle: certification.handle,
                certified_count: candidates.len() as u64,
            });
        }
    }

    /// What `generate` would certify, without signing or storing anything.
    ///
    /// An empty selection yields an empty preview.
    pub async fn preview(
        &self,
        owner: &OwnerId,
        request: &CertificationRequest,
    ) -> Result<PreviewSummary> {
        let selector = request.selector()?;
        let candidates = self.store.select_candidates(owner, &selector).await?;
        Ok(preview(&candidates)?)
    }

    async fn lock_owner(&self, owner: &OwnerId) -> OwnedMutexGuard<()> {
        let lock = {
            // The map only holds Arcs, so a poisoned guard is still consistent.
            let mut locks = self
                .owner_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(owner.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Issuance
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign a receipt without storing it.
    pub fn issue(&self, unsigned: UnsignedReceipt) -> Result<Receipt> {
        self.keys.sign(unsigned)
    }

    /// Build, sign and store a receipt for one LLM call.
    pub async fn issue_for_call(
        &self,
        owner: &OwnerId,
        call: &CallMetadata,
    ) -> Result<(Receipt, ReceiptHandle)> {
        let (input_cost, output_cost) = call.cost.split();

        let mut builder = ReceiptBuilder::new(&call.alias, &call.provider, &call.model)
            .profile(call.profile.as_deref().unwrap_or(&self.config.default_profile))
            .tokens(call.prompt_tokens, call.completion_tokens)
            .costs(input_cost, output_cost);
        if let Some(digest) = &call.lock_digest {
            builder = builder.lock_digest(digest);
        }

        let receipt = self.keys.sign(builder.build()?)?;
        let handle = self
            .store
            .insert_receipt(owner, &BatchReceipt::single(receipt.clone()), self.keys.key_id())
            .await?;

        tracing::info!(
            owner = %owner,
            receipt_id = %handle.receipt_id,
            model = %call.model,
            "issued call receipt"
        );
        Ok((receipt, handle))
    }

    /// Store a receipt signed elsewhere, after checking it against this
    /// service's public key.
    pub async fn import(&self, owner: &OwnerId, receipt: &BatchReceipt) -> Result<ReceiptHandle> {
        if !self.keys.verify(&receipt.receipt) {
            tracing::warn!(
                owner = %owner,
                receipt_id = %receipt.receipt_id(),
                "rejected import with invalid signature"
            );
            return Err(ReceiptError::InvalidSignature(receipt.receipt_id().clone()));
        }

        Ok(self
            .store
            .insert_receipt(owner, receipt, self.keys.key_id())
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Check a receipt's signature. Never fails; any problem is `false`.
    pub fn verify(&self, receipt: &Receipt) -> bool {
        self.keys.verify(receipt)
    }

    /// Check a batch receipt. Batch metadata does not affect the result.
    pub fn verify_batch(&self, receipt: &BatchReceipt) -> bool {
        self.keys.verify(&receipt.receipt)
    }

    /// Check a receipt given as raw JSON.
    pub fn verify_json(&self, document: &Value) -> bool {
        verify_json(document, &self.keys.public_key())
    }

    pub fn public_key_material(&self) -> PublicKeyMaterial {
        self.keys.public_key_material()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// A receipt by ID; `None` if absent or owned by someone else.
    pub async fn get(&self, id: &ReceiptId, owner: &OwnerId) -> Result<Option<StoredReceipt>> {
        Ok(self.store.get_receipt(id, owner).await?)
    }

    /// An owner's receipts, newest first.
    pub async fn list(
        &self,
        owner: &OwnerId,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Page<StoredReceipt>> {
        let limit = self.config.page_limit(limit);
        let (items, total) = self.store.list_receipts(owner, limit, offset).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// The records a receipt certifies.
    pub async fn logs_for(
        &self,
        id: &ReceiptId,
        owner: &OwnerId,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Page<CandidateLog>> {
        let limit = self.config.page_limit(limit);
        let (items, total) = self.store.logs_for_receipt(id, owner, limit, offset).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Records never linked to any receipt, newest first.
    pub async fn uncertified(
        &self,
        owner: &OwnerId,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Page<CandidateLog>> {
        let limit = self.config.page_limit(limit);
        let (items, total) = self.store.uncertified(owner, limit, offset).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }
}
