//! End-to-end certification tests against the SQLite store.
//!
//! These exercise the full path: candidate ingestion, selection, aggregation,
//! signing, persistence, linking and verification.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use llmring_receipts::core::LogId;
use llmring_receipts::store::{ConversationRecord, MessageRecord, SqliteStore, Store, UsageRecord};
use llmring_receipts::{
    CallCost, CallMetadata, CertificationRequest, KeyManager, Keypair, OwnerId, ReceiptError,
    ReceiptService, ReceiptType, ReceiptsConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

fn service() -> ReceiptService<SqliteStore> {
    init_tracing();
    ReceiptService::new(
        KeyManager::from_keypair(Keypair::from_seed(&[0x5a; 32])),
        SqliteStore::open_memory().unwrap(),
        ReceiptsConfig::default(),
    )
}

async fn add_usage(
    service: &ReceiptService<SqliteStore>,
    owner: &OwnerId,
    id: &str,
    when: DateTime<Utc>,
    model: &str,
    alias: &str,
    tokens: (u64, u64),
    cost: &str,
) {
    let record = UsageRecord {
        alias: Some(alias.into()),
        provider: Some("openai".into()),
        model: Some(model.into()),
        input_tokens: tokens.0,
        output_tokens: tokens.1,
        cost: dec(cost),
        ..UsageRecord::new(LogId::parse(id).unwrap(), when)
    };
    service.store().insert_usage_log(owner, &record).await.unwrap();
}

#[tokio::test]
async fn single_candidate_certification() -> anyhow::Result<()> {
    let service = service();
    let owner = OwnerId::new("alice");
    add_usage(&service, &owner, "u1", at(1, 9), "gpt-4o", "fast", (20, 15), "0.0035").await;

    let certified = service
        .generate(&owner, &CertificationRequest::log_ids(["u1"]))
        .await?;
    let receipt = &certified.receipt;
    let unsigned = &receipt.receipt.unsigned;

    assert_eq!(certified.certified_count, 1);
    assert_eq!(receipt.receipt_type, ReceiptType::Single);
    assert_eq!(unsigned.provider, "openai");
    assert_eq!(unsigned.model, "gpt-4o");
    assert_eq!(unsigned.total_tokens, 35);
    assert_eq!(unsigned.total_cost, dec("0.0035"));
    assert_eq!(unsigned.input_cost + unsigned.output_cost, unsigned.total_cost);

    assert!(service.verify_batch(receipt));
    let stranger = KeyManager::from_keypair(Keypair::generate());
    assert!(!stranger.verify(&receipt.receipt));

    Ok(())
}

#[tokio::test]
async fn exact_call_costs_are_kept() -> anyhow::Result<()> {
    let service = service();
    let owner = OwnerId::new("alice");
    let call = CallMetadata {
        alias: "fast".into(),
        profile: None,
        lock_digest: None,
        provider: "openai".into(),
        model: "gpt-4o".into(),
        prompt_tokens: 20,
        completion_tokens: 15,
        cost: CallCost::Split {
            input: dec("0.002"),
            output: dec("0.0015"),
        },
    };

    let (receipt, handle) = service.issue_for_call(&owner, &call).await?;
    assert_eq!(receipt.unsigned.total_tokens, 35);
    assert_eq!(receipt.unsigned.total_cost, dec("0.0035"));
    assert!(service.verify(&receipt));

    let listed = service.list(&owner, None, 0).await?;
    assert_eq!(listed.total, 1);
    assert_eq!(listed.items[0].handle(), handle);
    Ok(())
}

#[tokio::test]
async fn batch_summary_buckets() -> anyhow::Result<()> {
    let service = service();
    let owner = OwnerId::new("alice");
    add_usage(&service, &owner, "u1", at(1, 9), "gpt-4o", "fast", (10, 5), "0.001").await;
    add_usage(&service, &owner, "u2", at(1, 10), "gpt-4o", "deep", (20, 10), "0.002").await;
    add_usage(&service, &owner, "u3", at(1, 11), "claude-3", "deep", (30, 15), "0.003").await;

    let certified = service
        .generate(
            &owner,
            &CertificationRequest::since_last_receipt()
                .with_description("march usage")
                .with_tags(["audit"]),
        )
        .await?;
    let receipt = &certified.receipt;
    let summary = receipt.batch_summary.as_ref().expect("batch summary");

    assert_eq!(receipt.receipt_type, ReceiptType::Batch);
    assert_eq!(receipt.receipt.unsigned.model, "batch:3 calls");
    assert_eq!(summary.total_calls, 3);
    assert_eq!(summary.total_tokens, 90);
    assert_eq!(summary.total_cost, dec("0.006"));
    assert_eq!(summary.by_model.values().map(|b| b.calls).sum::<u64>(), 3);
    assert_eq!(summary.by_alias.values().map(|b| b.calls).sum::<u64>(), 3);
    assert_eq!(summary.by_alias["deep"].tokens, 75);
    assert_eq!(summary.start_date, Some(at(1, 9)));
    assert_eq!(summary.end_date, Some(at(1, 11)));
    assert_eq!(receipt.receipt.unsigned.total_cost, summary.total_cost);

    let stored = service
        .get(receipt.receipt_id(), &owner)
        .await?
        .expect("stored receipt");
    assert_eq!(stored.receipt.description.as_deref(), Some("march usage"));
    assert_eq!(stored.receipt.tags, Some(vec!["audit".to_string()]));
    assert!(service.verify_batch(&stored.receipt));
    Ok(())
}

#[tokio::test]
async fn since_last_receipt_certifies_at_most_once() -> anyhow::Result<()> {
    let service = service();
    let owner = OwnerId::new("alice");
    for (i, id) in ["u1", "u2", "u3"].iter().enumerate() {
        add_usage(&service, &owner, id, at(2, i as u32), "gpt-4o", "fast", (1, 1), "0.01").await;
    }

    let first = service
        .generate(&owner, &CertificationRequest::since_last_receipt())
        .await?;
    assert_eq!(first.certified_count, 3);

    let second = service
        .generate(&owner, &CertificationRequest::since_last_receipt())
        .await;
    assert!(matches!(second, Err(ReceiptError::NoMatch)));

    let range = CertificationRequest::date_range(at(1, 0), at(3, 0));
    assert!(matches!(
        service.generate(&owner, &range).await,
        Err(ReceiptError::NoMatch)
    ));
    assert!(service.preview(&owner, &range).await?.is_empty());

    add_usage(&service, &owner, "u4", at(2, 12), "gpt-4o", "fast", (1, 1), "0.01").await;
    let third = service.generate(&owner, &range).await?;
    assert_eq!(third.certified_count, 1);
    assert_eq!(third.receipt.receipt_type, ReceiptType::Single);
    Ok(())
}

#[tokio::test]
async fn explicit_ids_may_recertify() -> anyhow::Result<()> {
    let service = service();
    let owner = OwnerId::new("alice");
    add_usage(&service, &owner, "u1", at(1, 9), "gpt-4o", "fast", (1, 1), "0.01").await;

    let first = service
        .generate(&owner, &CertificationRequest::log_ids(["u1"]))
        .await?;
    let second = service
        .generate(&owner, &CertificationRequest::log_ids(["u1"]))
        .await?;
    assert_ne!(first.receipt.receipt_id(), second.receipt.receipt_id());

    for certified in [&first, &second] {
        let logs = service
            .logs_for(certified.receipt.receipt_id(), &owner, None, 0)
            .await?;
        assert_eq!(logs.total, 1);
        assert_eq!(logs.items[0].id().as_str(), "u1");
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_since_last_receipt_does_not_double_certify() -> anyhow::Result<()> {
    let service = Arc::new(service());
    let owner = OwnerId::new("alice");
    for i in 0..20 {
        add_usage(
            &service,
            &owner,
            &format!("u{}", i),
            at(4, i % 24),
            "gpt-4o",
            "fast",
            (1, 1),
            "0.01",
        )
        .await;
    }

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let owner = owner.clone();
            tokio::spawn(async move {
                service
                    .generate(&owner, &CertificationRequest::since_last_receipt())
                    .await
            })
        })
        .collect();

    let mut certified = 0;
    for task in tasks {
        match task.await? {
            Ok(result) => certified += result.certified_count,
            Err(ReceiptError::NoMatch) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(certified, 20);
    assert_eq!(service.uncertified(&owner, None, 0).await?.total, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn services_sharing_a_database_do_not_double_certify() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("receipts.db");
    let worker = || -> anyhow::Result<ReceiptService<SqliteStore>> {
        Ok(ReceiptService::new(
            KeyManager::from_keypair(Keypair::from_seed(&[0x5a; 32])),
            SqliteStore::open(&path)?,
            ReceiptsConfig::default(),
        ))
    };
    let (a, b) = (worker()?, worker()?);
    let owner = OwnerId::new("alice");

    for round in 0..50u32 {
        for i in 0..5u32 {
            let id = format!("r{round}-u{i}");
            add_usage(&a, &owner, &id, at(5, i), "gpt-4o", "fast", (1, 1), "0.01").await;
        }

        let request = CertificationRequest::since_last_receipt();
        let (ra, rb) = tokio::join!(a.generate(&owner, &request), b.generate(&owner, &request));

        let mut certified = 0;
        for result in [ra, rb] {
            match result {
                Ok(c) => certified += c.certified_count,
                Err(ReceiptError::NoMatch) => {}
                Err(other) => return Err(anyhow::anyhow!("round {round}: {other}")),
            }
        }
        assert_eq!(certified, 5, "round {round}");
    }

    assert_eq!(b.uncertified(&owner, None, 0).await?.total, 0);
    let mut covered = 0;
    let mut offset = 0;
    loop {
        let page = a.list(&owner, None, offset).await?;
        for stored in &page.items {
            covered += b.logs_for(stored.receipt.receipt_id(), &owner, None, 0).await?.total;
        }
        offset += page.items.len() as u64;
        if page.items.is_empty() || offset >= page.total {
            break;
        }
    }
    assert_eq!(covered, 250);
    Ok(())
}

#[tokio::test]
async fn receipts_are_owner_scoped() -> anyhow::Result<()> {
    let service = service();
    let alice = OwnerId::new("alice");
    let bob = OwnerId::new("bob");
    add_usage(&service, &alice, "a1", at(1, 9), "gpt-4o", "fast", (1, 1), "0.01").await;
    add_usage(&service, &bob, "b1", at(1, 9), "gpt-4o", "fast", (1, 1), "0.01").await;

    let certified = service
        .generate(&bob, &CertificationRequest::since_last_receipt())
        .await?;
    let id = certified.receipt.receipt_id();

    assert!(service.get(id, &alice).await?.is_none());
    assert_eq!(service.logs_for(id, &alice, None, 0).await?.total, 0);
    assert_eq!(service.list(&alice, None, 0).await?.total, 0);

    assert!(matches!(
        service
            .generate(&alice, &CertificationRequest::log_ids(["b1"]))
            .await,
        Err(ReceiptError::NoMatch)
    ));
    assert_eq!(service.uncertified(&alice, None, 0).await?.total, 1);
    Ok(())
}

#[tokio::test]
async fn conversation_certification() -> anyhow::Result<()> {
    let service = service();
    let owner = OwnerId::new("alice");
    let store = service.store();

    let conversation = ConversationRecord {
        model_alias: Some("chat".into()),
        total_input_tokens: 300,
        total_output_tokens: 120,
        total_cost: dec("0.042"),
        ..ConversationRecord::new(LogId::parse("conv-1")?, at(5, 8))
    };
    store.insert_conversation(&owner, &conversation).await?;
    store
        .insert_message(
            &owner,
            &MessageRecord {
                conversation_id: conversation.id.clone(),
                provider: Some("anthropic".into()),
                model: Some("claude-3-5-sonnet".into()),
                timestamp: at(5, 9),
            },
        )
        .await?;

    let preview = service
        .preview(&owner, &CertificationRequest::conversation("conv-1"))
        .await?;
    assert_eq!(preview.total_conversations, 1);
    assert_eq!(preview.total_tokens, 420);
    assert_eq!(preview.receipt_type, Some(ReceiptType::Single));

    let certified = service
        .generate(&owner, &CertificationRequest::conversation("conv-1"))
        .await?;
    let unsigned = &certified.receipt.receipt.unsigned;
    assert_eq!(unsigned.alias, "chat");
    assert_eq!(unsigned.provider, "anthropic");
    assert_eq!(unsigned.model, "claude-3-5-sonnet");
    assert_eq!(unsigned.prompt_tokens, 300);
    assert_eq!(unsigned.completion_tokens, 120);
    assert_eq!(unsigned.total_cost, dec("0.042"));

    let summary = certified.receipt.batch_summary.as_ref().expect("summary");
    assert_eq!(summary.conversation_ids, vec![conversation.id.clone()]);
    assert!(summary.log_ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn verification_ignores_batch_metadata_but_not_totals() -> anyhow::Result<()> {
    let service = service();
    let owner = OwnerId::new("alice");
    add_usage(&service, &owner, "u1", at(1, 9), "gpt-4o", "fast", (5, 5), "0.01").await;
    add_usage(&service, &owner, "u2", at(1, 10), "gpt-4o", "fast", (5, 5), "0.02").await;

    let certified = service
        .generate(&owner, &CertificationRequest::since_last_receipt())
        .await?;

    let mut edited = certified.receipt.clone();
    edited.description = Some("redacted".into());
    edited.tags = None;
    edited.batch_summary = None;
    assert!(service.verify_batch(&edited));

    let mut document = serde_json::to_value(&certified.receipt)?;
    assert!(service.verify_json(&document));
    document["total_cost"] = serde_json::json!(0.5);
    assert!(!service.verify_json(&document));
    Ok(())
}

#[tokio::test]
async fn key_file_survives_restart() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ReceiptsConfig {
        key_path: Some(dir.path().join("receipts.key")),
        ..Default::default()
    };
    let db = dir.path().join("receipts.db");
    let owner = OwnerId::new("alice");

    let receipt = {
        let service = ReceiptService::from_config(SqliteStore::open(&db)?, config.clone())?;
        add_usage(&service, &owner, "u1", at(1, 9), "gpt-4o", "fast", (1, 1), "0.01").await;
        service
            .generate(&owner, &CertificationRequest::since_last_receipt())
            .await?
            .receipt
    };

    let service = ReceiptService::from_config(SqliteStore::open(&db)?, config)?;
    let stored = service
        .get(receipt.receipt_id(), &owner)
        .await?
        .expect("persisted receipt");
    assert!(service.verify_batch(&stored.receipt));
    assert_eq!(stored.key_id, service.public_key_material().key_id);
    Ok(())
}
