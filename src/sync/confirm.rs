//! Confirmation tracking
//!
//! Reads the domain's confirmation events and advances the watermark to the
//! highest locally known action the ledger has folded. A confirmation for an
//! action we have not ingested yet is a wait condition: the tracker stops at
//! that event and picks it up again on the next cycle.

use std::sync::Arc;
use tracing::{debug, info};

use crate::db::schemas::CursorName;
use crate::domain::DomainDescriptor;
use crate::ledger::{LedgerClient, LedgerState};
use crate::store::MirrorStore;
use crate::types::{Hash32, MirrorError, Result};

#[derive(Debug, Clone, Default)]
pub struct ConfirmReport {
    pub events: usize,
    pub watermark: Option<u64>,
    pub activated_actions: u64,
    /// Confirmation we could not resolve locally yet
    pub deferred: Option<Hash32>,
    /// Ledger state fetched during this pass, reused by the mirror step
    pub state: LedgerState,
}

pub struct ConfirmationTracker {
    store: Arc<dyn MirrorStore>,
    ledger: Arc<dyn LedgerClient>,
}

impl ConfirmationTracker {
    pub fn new(store: Arc<dyn MirrorStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    pub async fn confirm(&self, domain: &DomainDescriptor, address: &str) -> Result<ConfirmReport> {
        let kind = domain.kind;
        let mut report = ConfirmReport {
            watermark: self.store.cursor(kind, CursorName::Watermark).await?,
            ..Default::default()
        };

        let from_height = self
            .store
            .cursor(kind, CursorName::EventHeight)
            .await?
            .map(|h| h + 1);
        let events = self.ledger.fetch_events(address, from_height, None).await?;

        for event in &events {
            if let Some(hash) = (domain.decode_confirmation)(event) {
                match self.resolve(domain, &hash).await {
                    Ok(action_id) => {
                        report.watermark =
                            Some(self.store.advance_cursor(kind, CursorName::Watermark, action_id).await?);
                    }
                    Err(MirrorError::NotYetCaughtUp { action_hash, .. }) => {
                        debug!(
                            domain = %kind,
                            height = event.height,
                            action_hash = %action_hash,
                            "Confirmation ahead of local actions, deferring"
                        );
                        report.deferred = Some(action_hash);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            self.store
                .advance_cursor(kind, CursorName::EventHeight, event.height)
                .await?;
            report.events += 1;
        }

        report.state = self.ledger.fetch_state(address).await?;
        if let Some(hash) = report.state.hash_field(domain.action_state_field) {
            if let Some(action) = self.store.action_by_hash(kind, &hash).await? {
                report.watermark = Some(
                    self.store
                        .advance_cursor(kind, CursorName::Watermark, action.action_id)
                        .await?,
                );
            }
        }

        if let Some(watermark) = report.watermark {
            report.activated_actions = self.store.activate_through(kind, watermark).await?;
        }

        if report.activated_actions > 0 {
            info!(
                domain = %kind,
                watermark = ?report.watermark,
                actions = report.activated_actions,
                "Advanced confirmation watermark"
            );
        }
        Ok(report)
    }

    async fn resolve(&self, domain: &DomainDescriptor, hash: &Hash32) -> Result<u64> {
        self.store
            .action_by_hash(domain.kind, hash)
            .await?
            .map(|a| a.action_id)
            .ok_or(MirrorError::NotYetCaughtUp {
                domain: domain.kind,
                action_hash: *hash,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{committee, CommitteeAction, DomainKind};
    use crate::ledger::MemoryLedger;
    use crate::store::MemoryStore;
    use crate::sync::{Ingestor, Reducer};

    fn create(tag: &str) -> Vec<String> {
        CommitteeAction::Create {
            threshold: 1,
            members: vec![tag.to_string()],
            ipfs_hash: String::new(),
        }
        .encode()
    }

    async fn sync(store: &Arc<MemoryStore>, ledger: &Arc<MemoryLedger>) {
        Ingestor::new(store.clone(), ledger.clone())
            .ingest(&committee::COMMITTEE, "c")
            .await
            .unwrap();
        Reducer::new(store.clone(), 100)
            .reduce(&committee::COMMITTEE)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_watermark_activates_prefix() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let h0 = ledger.push_action("c", create("a"));
        let h1 = ledger.push_action("c", create("b"));
        ledger.push_action("c", create("c"));
        ledger.confirm("c", &h0);
        ledger.confirm("c", &h1);
        sync(&store, &ledger).await;

        let tracker = ConfirmationTracker::new(store.clone(), ledger.clone());
        let report = tracker.confirm(&committee::COMMITTEE, "c").await.unwrap();
        assert_eq!(report.watermark, Some(1));
        assert_eq!(report.activated_actions, 2);
        assert!(report.deferred.is_none());

        let actions = store.actions_from(DomainKind::Committee, 0, 10).await.unwrap();
        let active: Vec<bool> = actions.iter().map(|a| a.active).collect();
        assert_eq!(active, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_unknown_hash_defers_without_advancing() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let h0 = ledger.push_action("c", create("a"));
        sync(&store, &ledger).await;
        ledger.confirm("c", &h0);
        let h1 = ledger.push_action("c", create("b"));
        ledger.confirm("c", &h1);

        let tracker = ConfirmationTracker::new(store.clone(), ledger.clone());
        let report = tracker.confirm(&committee::COMMITTEE, "c").await.unwrap();
        assert_eq!(report.watermark, Some(0));
        assert_eq!(report.deferred, Some(h1));
        assert_eq!(report.events, 1);

        // Once the ingestor catches up the deferred event is replayed
        sync(&store, &ledger).await;
        let report = tracker.confirm(&committee::COMMITTEE, "c").await.unwrap();
        assert_eq!(report.watermark, Some(1));
        assert!(report.deferred.is_none());
    }

    #[tokio::test]
    async fn test_watermark_seeded_from_state() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        ledger.push_action("c", create("a"));
        let h1 = ledger.push_action("c", create("b"));
        ledger.set_state("c", vec![Hash32::ZERO.to_hex(), h1.to_hex()]);
        sync(&store, &ledger).await;

        let report = ConfirmationTracker::new(store.clone(), ledger)
            .confirm(&committee::COMMITTEE, "c")
            .await
            .unwrap();
        assert_eq!(report.events, 0);
        assert_eq!(report.watermark, Some(1));
    }
}
