//! Action ingestion
//!
//! Pulls a domain's action log from the ledger and stores it with gapless ids
//! and a verified hash chain. Records are keyed by hash, so re-running over an
//! overlapping range is a no-op.

use std::sync::Arc;
use tracing::{debug, info};

use crate::db::schemas::ActionDoc;
use crate::domain::{hash_payload, DomainDescriptor};
use crate::ledger::LedgerClient;
use crate::store::MirrorStore;
use crate::types::{Hash32, MirrorError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub last_action_id: Option<u64>,
}

pub struct Ingestor {
    store: Arc<dyn MirrorStore>,
    ledger: Arc<dyn LedgerClient>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn MirrorStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    pub async fn ingest(&self, domain: &DomainDescriptor, address: &str) -> Result<IngestReport> {
        let kind = domain.kind;
        let last = self.store.last_action(kind).await?;
        let from = last.as_ref().map(|a| a.action_hash);
        let fetched = self.ledger.fetch_actions(address, from.as_ref()).await?;

        let mut report = IngestReport {
            fetched: fetched.len(),
            inserted: 0,
            last_action_id: last.as_ref().map(|a| a.action_id),
        };
        let mut next_id = last.as_ref().map(|a| a.action_id + 1).unwrap_or(0);
        let mut previous = from.unwrap_or_else(Hash32::genesis);

        for entry in fetched {
            let computed = hash_payload(&entry.payload);
            if computed != entry.hash {
                return Err(MirrorError::ChainBroken(format!(
                    "{} ledger hash {} does not match payload hash {}",
                    kind, entry.hash, computed
                )));
            }

            if let Some(existing) = self.store.action_by_hash(kind, &entry.hash).await? {
                debug!(domain = %kind, action_id = existing.action_id, "Action already stored");
                if existing.action_id + 1 > next_id {
                    next_id = existing.action_id + 1;
                }
                previous = existing.action_hash;
                continue;
            }

            let action = (domain.decode)(&entry.payload)?;
            let doc = ActionDoc::new(kind, next_id, entry.hash, previous, entry.payload, action);
            if self.store.insert_action(doc).await? {
                report.inserted += 1;
            }
            report.last_action_id = Some(next_id);
            previous = entry.hash;
            next_id += 1;
        }

        if report.inserted > 0 {
            info!(
                domain = %kind,
                inserted = report.inserted,
                last_action_id = ?report.last_action_id,
                "Ingested actions"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{committee, CommitteeAction, DomainKind};
    use crate::ledger::{LedgerAction, LedgerEvent, LedgerState, MemoryLedger};
    use crate::store::MemoryStore;
    use crate::sync::Reducer;
    use async_trait::async_trait;

    fn create(n: usize) -> Vec<String> {
        CommitteeAction::Create {
            threshold: 1,
            members: (0..n).map(|i| format!("pk{}", i)).collect(),
            ipfs_hash: String::new(),
        }
        .encode()
    }

    #[tokio::test]
    async fn test_chain_links_and_ids() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let h0 = ledger.push_action("c", create(1));
        let h1 = ledger.push_action("c", create(2));
        let ingestor = Ingestor::new(store.clone(), ledger.clone());

        let report = ingestor.ingest(&committee::COMMITTEE, "c").await.unwrap();
        assert_eq!(report.inserted, 2);

        let stored = store.actions_from(DomainKind::Committee, 0, 10).await.unwrap();
        assert_eq!(stored[0].previous_action_hash, Hash32::genesis());
        assert_eq!(stored[0].action_hash, h0);
        assert_eq!(stored[1].previous_action_hash, h0);
        assert_eq!(stored[1].action_hash, h1);
        assert_eq!(stored[1].action_id, 1);
    }

    /// Ledger that ignores the cursor and always returns its whole log
    struct OverlappingLedger(MemoryLedger);

    #[async_trait]
    impl LedgerClient for OverlappingLedger {
        async fn fetch_actions(&self, a: &str, _: Option<&Hash32>) -> Result<Vec<LedgerAction>> {
            self.0.fetch_actions(a, None).await
        }
        async fn fetch_events(
            &self,
            a: &str,
            f: Option<u64>,
            t: Option<u64>,
        ) -> Result<Vec<LedgerEvent>> {
            self.0.fetch_events(a, f, t).await
        }
        async fn fetch_state(&self, a: &str) -> Result<LedgerState> {
            self.0.fetch_state(a).await
        }
        async fn fetch_nonce(&self, a: &str) -> Result<u64> {
            self.0.fetch_nonce(a).await
        }
        async fn submit_transaction(&self, p: &[u8], s: &str) -> Result<String> {
            self.0.submit_transaction(p, s).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_range_is_noop() {
        let inner = MemoryLedger::new();
        inner.push_action("c", create(1));
        inner.push_action("c", create(2));
        let ledger = Arc::new(OverlappingLedger(inner));
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), ledger.clone());

        ingestor.ingest(&committee::COMMITTEE, "c").await.unwrap();
        ledger.0.push_action("c", create(3));
        let second = ingestor.ingest(&committee::COMMITTEE, "c").await.unwrap();
        assert_eq!(second.fetched, 3);
        assert_eq!(second.inserted, 1);
        assert_eq!(second.last_action_id, Some(2));
        assert_eq!(store.count_actions(DomainKind::Committee).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_undecodable_payload_aborts_cycle() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        ledger.push_action("c", vec!["9".to_string()]);
        let err = Ingestor::new(store.clone(), ledger)
            .ingest(&committee::COMMITTEE, "c")
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Decode(_)));
        assert_eq!(store.count_actions(DomainKind::Committee).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_committee_is_stored_and_skipped() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let zero_threshold = CommitteeAction::Create {
            threshold: 0,
            members: vec!["pk0".to_string()],
            ipfs_hash: String::new(),
        };
        ledger.push_action("c", zero_threshold.encode());
        ledger.push_action("c", create(2));

        let report = Ingestor::new(store.clone(), ledger)
            .ingest(&committee::COMMITTEE, "c")
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);

        let reduced = Reducer::new(store.clone(), 10)
            .reduce(&committee::COMMITTEE)
            .await
            .unwrap();
        assert_eq!(reduced.noops, 1);
        assert_eq!(reduced.reduced_through, Some(1));
        let committees = store.list_entities(DomainKind::Committee, false).await.unwrap();
        assert_eq!(committees.len(), 1);
        assert_eq!(committees[0].key, "1");
    }
}
