//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a service over an in-memory
//! store with a deterministic key, and helpers to seed candidate records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use llmring_receipts::{KeyManager, ReceiptService, ReceiptsConfig};
use llmring_receipts_core::{Keypair, LogId, OwnerId, PublicKey};
use llmring_receipts_store::{
    ConversationRecord, MemoryStore, MessageRecord, Result as StoreResult, Store, UsageRecord,
};

/// Start of the fixture clock: 2025-01-01T00:00:00Z.
pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_689_600, 0)
        .single()
        .unwrap_or_default()
}

/// `minutes` after [`base_time`].
pub fn at_minute(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

/// A service over a memory store, signing with a known keypair.
pub struct TestFixture {
    pub keypair: Keypair,
    pub owner: OwnerId,
    pub service: ReceiptService<MemoryStore>,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self::from_keypair(Keypair::generate())
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self::from_keypair(Keypair::from_seed(&seed))
    }

    fn from_keypair(keypair: Keypair) -> Self {
        let service = ReceiptService::new(
            KeyManager::from_keypair(keypair.clone()),
            MemoryStore::new(),
            ReceiptsConfig::default(),
        );
        Self {
            keypair,
            owner: OwnerId::new("owner-test"),
            service,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn store(&self) -> &MemoryStore {
        self.service.store()
    }

    /// Record a standalone usage log for the fixture owner.
    pub async fn add_usage(
        &self,
        id: &str,
        minute: i64,
        model: &str,
        alias: &str,
        tokens: (u64, u64),
        cost: Decimal,
    ) -> StoreResult<UsageRecord> {
        let record = UsageRecord {
            alias: Some(alias.to_string()),
            provider: Some(provider_for(model).to_string()),
            model: Some(model.to_string()),
            input_tokens: tokens.0,
            output_tokens: tokens.1,
            cost,
            ..UsageRecord::new(log_id(id)?, at_minute(minute))
        };
        self.store().insert_usage_log(&self.owner, &record).await?;
        Ok(record)
    }

    /// Record a conversation with one message carrying `model`.
    pub async fn add_conversation(
        &self,
        id: &str,
        minute: i64,
        model: &str,
        tokens: (u64, u64),
        cost: Decimal,
    ) -> StoreResult<ConversationRecord> {
        let record = ConversationRecord {
            model_alias: Some("chat".to_string()),
            total_input_tokens: tokens.0,
            total_output_tokens: tokens.1,
            total_cost: cost,
            ..ConversationRecord::new(log_id(id)?, at_minute(minute))
        };
        self.store().insert_conversation(&self.owner, &record).await?;
        self.store()
            .insert_message(
                &self.owner,
                &MessageRecord {
                    conversation_id: record.id.clone(),
                    provider: Some(provider_for(model).to_string()),
                    model: Some(model.to_string()),
                    timestamp: at_minute(minute),
                },
            )
            .await?;
        Ok(record)
    }

    /// Seed `count` usage logs one minute apart, each costing `0.001`.
    pub async fn seed_usage(&self, count: usize) -> StoreResult<Vec<UsageRecord>> {
        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            let model = if i % 2 == 0 { "gpt-4o-mini" } else { "claude-3-haiku" };
            records.push(
                self.add_usage(
                    &format!("usage-{:04}", i),
                    i as i64,
                    model,
                    "fast",
                    (100, 40),
                    Decimal::new(1, 3),
                )
                .await?,
            );
        }
        Ok(records)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn log_id(id: &str) -> StoreResult<LogId> {
    LogId::parse(id).map_err(|e| llmring_receipts_store::StoreError::InvalidData(e.to_string()))
}

fn provider_for(model: &str) -> &'static str {
    if model.starts_with("claude") {
        "anthropic"
    } else {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmring_receipts::ReceiptType;
    use llmring_receipts_core::{CertificationRequest, LogType};

    #[tokio::test]
    async fn test_seeded_fixture_certifies() {
        let fixture = TestFixture::with_seed([0x33; 32]);
        fixture.seed_usage(5).await.unwrap();
        fixture
            .add_conversation("conv-1", 10, "claude-3-haiku", (400, 100), Decimal::new(5, 2))
            .await
            .unwrap();

        let certified = fixture
            .service
            .generate(&fixture.owner, &CertificationRequest::since_last_receipt())
            .await
            .unwrap();
        assert_eq!(certified.certified_count, 6);
        assert_eq!(certified.receipt.receipt_type, ReceiptType::Batch);

        let logs = fixture
            .service
            .logs_for(certified.receipt.receipt_id(), &fixture.owner, None, 0)
            .await
            .unwrap();
        assert_eq!(
            logs.items
                .iter()
                .filter(|c| c.log_type() == LogType::Conversation)
                .count(),
            1
        );
    }

    #[test]
    fn test_deterministic_fixtures_share_keys() {
        let a = TestFixture::with_seed([0x01; 32]);
        let b = TestFixture::with_seed([0x01; 32]);
        let c = TestFixture::with_seed([0x02; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_clock() {
        assert_eq!(base_time().to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(at_minute(90) - base_time(), Duration::minutes(90));
    }
}
