//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use llmring_receipts_core::receipt::truncate_to_micros;
use llmring_receipts_core::{
    BatchReceipt, CandidateLog, LogId, LogType, OwnerId, ReceiptId, Selector,
};

use crate::error::{Result, StoreError};
use crate::records::{
    paginate, sort_newest_first, Certification, ConversationRecord, LinkPolicy, MessageRecord,
    ReceiptHandle, StoredReceipt, UsageRecord,
};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    conversations: HashMap<LogId, Owned<ConversationRecord>>,

    /// In insertion order; later entries win timestamp ties.
    messages: Vec<MessageRecord>,

    usage_logs: HashMap<LogId, Owned<UsageRecord>>,

    receipts: HashMap<ReceiptId, ReceiptEntry>,

    /// Link rows: (receipt_id, log_id, log_type) -> certified_at.
    links: BTreeMap<(ReceiptId, LogId, LogType), DateTime<Utc>>,

    /// Every (log_id, log_type) linked to at least one receipt.
    certified: HashSet<(LogId, LogType)>,

    /// Insertion counter, breaks timestamp ties when listing receipts.
    next_seq: u64,
}

struct Owned<T> {
    owner: OwnerId,
    record: T,
}

struct ReceiptEntry {
    owner: OwnerId,
    seq: u64,
    stored: StoredReceipt,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn latest_message(&self, conversation_id: &LogId) -> Option<&MessageRecord> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| &m.conversation_id == conversation_id)
            .max_by_key(|(i, m)| (m.timestamp, *i))
            .map(|(_, m)| m)
    }

    fn conversation_candidate(&self, record: &ConversationRecord) -> CandidateLog {
        record.to_candidate(self.latest_message(&record.id))
    }

    fn is_certified(&self, id: &LogId, log_type: LogType) -> bool {
        self.certified.contains(&(id.clone(), log_type))
    }

    fn matches(
        &self,
        selector: &Selector,
        id: &LogId,
        log_type: LogType,
        created_at: DateTime<Utc>,
    ) -> bool {
        let selected = match selector {
            Selector::ByConversation(target) => {
                log_type == LogType::Conversation && id == target
            }
            Selector::ByDateRange { start, end } => {
                created_at >= truncate_to_micros(*start) && created_at <= truncate_to_micros(*end)
            }
            Selector::ByIds(ids) => ids.contains(id),
            Selector::SinceLastReceipt => true,
        };
        selected && !(selector.excludes_certified() && self.is_certified(id, log_type))
    }

    fn select(&self, owner: &OwnerId, selector: &Selector) -> Vec<CandidateLog> {
        let mut candidates: Vec<CandidateLog> = self
            .conversations
            .values()
            .filter(|c| &c.owner == owner)
            .filter(|c| {
                self.matches(selector, &c.record.id, LogType::Conversation, c.record.created_at)
            })
            .map(|c| self.conversation_candidate(&c.record))
            .collect();

        if !matches!(selector, Selector::ByConversation(_)) {
            candidates.extend(
                self.usage_logs
                    .values()
                    .filter(|u| &u.owner == owner)
                    .filter(|u| {
                        selector.bypasses_certified_filter() || u.record.conversation_id.is_none()
                    })
                    .filter(|u| {
                        self.matches(selector, &u.record.id, LogType::Usage, u.record.created_at)
                    })
                    .map(|u| u.record.to_candidate()),
            );
        }

        sort_newest_first(&mut candidates);
        candidates
    }

    fn candidate(&self, owner: &OwnerId, id: &LogId, log_type: LogType) -> Option<CandidateLog> {
        match log_type {
            LogType::Conversation => self
                .conversations
                .get(id)
                .filter(|c| &c.owner == owner)
                .map(|c| self.conversation_candidate(&c.record)),
            LogType::Usage => self
                .usage_logs
                .get(id)
                .filter(|u| &u.owner == owner)
                .map(|u| u.record.to_candidate()),
        }
    }

    fn insert_receipt(
        &mut self,
        owner: &OwnerId,
        receipt: &BatchReceipt,
        key_id: &str,
    ) -> Result<ReceiptHandle> {
        let receipt_id = receipt.receipt_id().clone();
        if self.receipts.contains_key(&receipt_id) {
            tracing::error!(receipt_id = %receipt_id, "duplicate receipt id");
            return Err(StoreError::DuplicateReceipt(receipt_id));
        }

        let stored = StoredReceipt {
            receipt: receipt.clone(),
            key_id: key_id.to_string(),
            stored_at: truncate_to_micros(Utc::now()),
        };
        let handle = stored.handle();

        self.next_seq += 1;
        self.receipts.insert(
            receipt_id,
            ReceiptEntry {
                owner: owner.clone(),
                seq: self.next_seq,
                stored,
            },
        );
        Ok(handle)
    }

    fn link(&mut self, receipt_id: &ReceiptId, logs: &[(LogId, LogType)]) -> u64 {
        let now = truncate_to_micros(Utc::now());
        let mut inserted = 0;
        for (log_id, log_type) in logs {
            let key = (receipt_id.clone(), log_id.clone(), *log_type);
            if self.links.contains_key(&key) {
                continue;
            }
            self.links.insert(key, now);
            self.certified.insert((log_id.clone(), *log_type));
            inserted += 1;
        }
        inserted
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_receipt(
        &self,
        owner: &OwnerId,
        receipt: &BatchReceipt,
        key_id: &str,
    ) -> Result<ReceiptHandle> {
        self.write()?.insert_receipt(owner, receipt, key_id)
    }

    async fn record_certification(
        &self,
        owner: &OwnerId,
        receipt: &BatchReceipt,
        key_id: &str,
        logs: &[(LogId, LogType)],
        policy: LinkPolicy,
    ) -> Result<Certification> {
        let mut inner = self.write()?;

        if policy == LinkPolicy::Exclusive {
            if let Some((log_id, log_type)) = logs
                .iter()
                .find(|(log_id, log_type)| inner.certified.contains(&(log_id.clone(), *log_type)))
            {
                return Err(StoreError::CertificationConflict {
                    log_id: log_id.to_string(),
                    log_type: log_type.as_str().to_string(),
                });
            }
        }

        let handle = inner.insert_receipt(owner, receipt, key_id)?;
        let linked = inner.link(&handle.receipt_id, logs);

        tracing::debug!(receipt_id = %handle.receipt_id, linked, "recorded certification");
        Ok(Certification { handle, linked })
    }

    async fn link_logs(&self, receipt_id: &ReceiptId, logs: &[(LogId, LogType)]) -> Result<u64> {
        let mut inner = self.write()?;
        if !inner.receipts.contains_key(receipt_id) {
            return Err(StoreError::NotFound(format!("receipt {}", receipt_id)));
        }
        Ok(inner.link(receipt_id, logs))
    }

    async fn get_receipt(
        &self,
        id: &ReceiptId,
        owner: &OwnerId,
    ) -> Result<Option<StoredReceipt>> {
        let inner = self.read()?;
        Ok(inner
            .receipts
            .get(id)
            .filter(|entry| &entry.owner == owner)
            .map(|entry| entry.stored.clone()))
    }

    async fn list_receipts(
        &self,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<StoredReceipt>, u64)> {
        let inner = self.read()?;
        let mut entries: Vec<&ReceiptEntry> = inner
            .receipts
            .values()
            .filter(|entry| &entry.owner == owner)
            .collect();
        entries.sort_by(|a, b| {
            let key = |e: &ReceiptEntry| (e.stored.receipt.receipt.unsigned.timestamp, e.seq);
            key(b).cmp(&key(a))
        });

        let all: Vec<StoredReceipt> = entries.into_iter().map(|e| e.stored.clone()).collect();
        Ok((paginate(&all, limit, offset), all.len() as u64))
    }

    async fn logs_for_receipt(
        &self,
        id: &ReceiptId,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<CandidateLog>, u64)> {
        let inner = self.read()?;
        if !inner
            .receipts
            .get(id)
            .is_some_and(|entry| &entry.owner == owner)
        {
            return Ok((Vec::new(), 0));
        }

        let mut links: Vec<(DateTime<Utc>, LogType, &LogId)> = inner
            .links
            .iter()
            .filter(|((receipt_id, _, _), _)| receipt_id == id)
            .map(|((_, log_id, log_type), certified_at)| (*certified_at, *log_type, log_id))
            .collect();
        links.sort();

        let total = links.len() as u64;
        let logs = paginate(&links, limit, offset)
            .into_iter()
            .filter_map(|(_, log_type, log_id)| inner.candidate(owner, log_id, log_type))
            .collect();

        Ok((logs, total))
    }

    async fn select_candidates(
        &self,
        owner: &OwnerId,
        selector: &Selector,
    ) -> Result<Vec<CandidateLog>> {
        let candidates = self.read()?.select(owner, selector);
        tracing::debug!(
            owner = %owner,
            mode = selector.name(),
            count = candidates.len(),
            "selected candidates"
        );
        Ok(candidates)
    }

    async fn uncertified(
        &self,
        owner: &OwnerId,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<CandidateLog>, u64)> {
        let all = self.read()?.select(owner, &Selector::SinceLastReceipt);
        Ok((paginate(&all, limit, offset), all.len() as u64))
    }

    async fn insert_conversation(
        &self,
        owner: &OwnerId,
        record: &ConversationRecord,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if inner.conversations.contains_key(&record.id) {
            return Err(StoreError::DuplicateRecord(record.id.to_string()));
        }
        let record = ConversationRecord {
            created_at: truncate_to_micros(record.created_at),
            ..record.clone()
        };
        inner.conversations.insert(
            record.id.clone(),
            Owned {
                owner: owner.clone(),
                record,
            },
        );
        Ok(())
    }

    async fn insert_message(&self, owner: &OwnerId, record: &MessageRecord) -> Result<()> {
        let mut inner = self.write()?;
        let owned = inner
            .conversations
            .get(&record.conversation_id)
            .is_some_and(|c| &c.owner == owner);
        if !owned {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                record.conversation_id
            )));
        }
        inner.messages.push(MessageRecord {
            timestamp: truncate_to_micros(record.timestamp),
            ..record.clone()
        });
        Ok(())
    }

    async fn insert_usage_log(&self, owner: &OwnerId, record: &UsageRecord) -> Result<()> {
        let mut inner = self.write()?;
        if inner.usage_logs.contains_key(&record.id) {
            return Err(StoreError::DuplicateRecord(record.id.to_string()));
        }
        let record = UsageRecord {
            created_at: truncate_to_micros(record.created_at),
            ..record.clone()
        };
        inner.usage_logs.insert(
            record.id.clone(),
            Owned {
                owner: owner.clone(),
                record,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::link_keys;
    use chrono::TimeZone;
    use llmring_receipts_core::{build_receipt, Keypair};
    use rust_decimal::Decimal;

    fn log_id(id: &str) -> LogId {
        LogId::parse(id).unwrap()
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 9, 30, 0).unwrap()
    }

    fn usage(id: &str, day: u32) -> UsageRecord {
        UsageRecord {
            input_tokens: 10,
            output_tokens: 5,
            cost: Decimal::new(1, 3),
            ..UsageRecord::new(log_id(id), ts(day))
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let alice = OwnerId::new("alice");
        for (id, day) in [("u1", 1), ("u2", 2), ("u3", 3)] {
            store.insert_usage_log(&alice, &usage(id, day)).await.unwrap();
        }
        store
            .insert_conversation(&alice, &ConversationRecord::new(log_id("c1"), ts(2)))
            .await
            .unwrap();
        store
            .insert_usage_log(
                &alice,
                &UsageRecord {
                    conversation_id: Some(log_id("c1")),
                    ..usage("u-in-c1", 2)
                },
            )
            .await
            .unwrap();
        store
    }

    fn certify(candidates: &[CandidateLog]) -> BatchReceipt {
        build_receipt(candidates, None, None, "default", &Keypair::from_seed(&[9; 32])).unwrap()
    }

    #[tokio::test]
    async fn test_since_last_receipt_skips_linked_and_attached() {
        let store = seeded().await;
        let alice = OwnerId::new("alice");

        let found = store
            .select_candidates(&alice, &Selector::SinceLastReceipt)
            .await
            .unwrap();
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|c| c.id().as_str() != "u-in-c1"));

        let receipt = certify(&found[..1]);
        store
            .record_certification(
                &alice,
                &receipt,
                "kid",
                &link_keys(&found[..1]),
                LinkPolicy::Exclusive,
            )
            .await
            .unwrap();

        let (_, total) = store.uncertified(&alice, 10, 0).await.unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_by_ids_includes_attached_usage() {
        let store = seeded().await;
        let found = store
            .select_candidates(
                &OwnerId::new("alice"),
                &Selector::ByIds(vec![log_id("u-in-c1"), log_id("c1")]),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_by_conversation_returns_only_conversation() {
        let store = seeded().await;
        let found = store
            .select_candidates(
                &OwnerId::new("alice"),
                &Selector::ByConversation(log_id("c1")),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].log_type(), LogType::Conversation);
    }

    #[tokio::test]
    async fn test_owner_isolation() {
        let store = seeded().await;
        let bob = OwnerId::new("bob");
        assert!(store
            .select_candidates(&bob, &Selector::SinceLastReceipt)
            .await
            .unwrap()
            .is_empty());

        let alice = OwnerId::new("alice");
        let found = store
            .select_candidates(&alice, &Selector::SinceLastReceipt)
            .await
            .unwrap();
        let receipt = certify(&found);
        store
            .record_certification(
                &alice,
                &receipt,
                "kid",
                &link_keys(&found),
                LinkPolicy::Exclusive,
            )
            .await
            .unwrap();

        assert!(store.get_receipt(receipt.receipt_id(), &bob).await.unwrap().is_none());
        let (receipts, total) = store.list_receipts(&bob, 10, 0).await.unwrap();
        assert!(receipts.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_duplicate_receipt_rejected() {
        let store = seeded().await;
        let alice = OwnerId::new("alice");
        let found = store
            .select_candidates(&alice, &Selector::ByIds(vec![log_id("u1")]))
            .await
            .unwrap();
        let receipt = certify(&found);
        store.insert_receipt(&alice, &receipt, "kid").await.unwrap();
        assert!(matches!(
            store.insert_receipt(&alice, &receipt, "kid").await,
            Err(StoreError::DuplicateReceipt(_))
        ));
    }

    #[tokio::test]
    async fn test_logs_for_receipt_pages() {
        let store = seeded().await;
        let alice = OwnerId::new("alice");
        let found = store
            .select_candidates(&alice, &Selector::SinceLastReceipt)
            .await
            .unwrap();
        let receipt = certify(&found);
        store
            .record_certification(
                &alice,
                &receipt,
                "kid",
                &link_keys(&found),
                LinkPolicy::Exclusive,
            )
            .await
            .unwrap();

        let (first, total) = store
            .logs_for_receipt(receipt.receipt_id(), &alice, 2, 0)
            .await
            .unwrap();
        let (second, _) = store
            .logs_for_receipt(receipt.receipt_id(), &alice, 2, 2)
            .await
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|a| second.iter().all(|b| a.id() != b.id())));
    }

    #[tokio::test]
    async fn test_exclusive_certification_conflicts_on_linked_record() {
        let store = seeded().await;
        let alice = OwnerId::new("alice");
        let found = store
            .select_candidates(&alice, &Selector::SinceLastReceipt)
            .await
            .unwrap();

        let first = certify(&found[..2]);
        store
            .record_certification(
                &alice,
                &first,
                "kid",
                &link_keys(&found[..2]),
                LinkPolicy::Exclusive,
            )
            .await
            .unwrap();

        // A second writer still holding the stale selection.
        let second = certify(&found);
        let result = store
            .record_certification(&alice, &second, "kid", &link_keys(&found), LinkPolicy::Exclusive)
            .await;
        assert!(matches!(result, Err(StoreError::CertificationConflict { .. })));
        assert!(store.get_receipt(second.receipt_id(), &alice).await.unwrap().is_none());

        let (_, total) = store.uncertified(&alice, 10, 0).await.unwrap();
        assert_eq!(total, 2);

        let again = certify(&found);
        let shared = store
            .record_certification(&alice, &again, "kid", &link_keys(&found), LinkPolicy::Shared)
            .await
            .unwrap();
        assert_eq!(shared.linked, 4);
    }
}
