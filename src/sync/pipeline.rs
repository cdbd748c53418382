//! Per-domain sync pipeline
//!
//! One cycle runs ingest, reduce, confirm, settle and mirror in that order. Each
//! domain gets its own task; a cycle always completes before the next tick
//! of the same domain is taken.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{
    build_mirror, ConfirmReport, ConfirmationTracker, IngestReport, Ingestor, ReduceReport,
    Reducer, SettleReport,
};
use crate::domain::DomainDescriptor;
use crate::ledger::LedgerClient;
use crate::merkle::MirrorRegistry;
use crate::store::MirrorStore;
use crate::types::{Hash32, Result};

/// Outcome of one full cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub ingest: IngestReport,
    pub reduce: ReduceReport,
    pub confirm: ConfirmReport,
    pub settle: SettleReport,
    pub root: Hash32,
    /// None when the ledger exposes no root to compare against
    pub root_matches: Option<bool>,
}

pub struct Pipeline {
    descriptor: &'static DomainDescriptor,
    address: String,
    store: Arc<dyn MirrorStore>,
    registry: Arc<MirrorRegistry>,
    ingestor: Ingestor,
    reducer: Reducer,
    tracker: ConfirmationTracker,
}

impl Pipeline {
    pub fn new(
        descriptor: &'static DomainDescriptor,
        address: impl Into<String>,
        store: Arc<dyn MirrorStore>,
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<MirrorRegistry>,
        reduce_batch: usize,
    ) -> Self {
        Self {
            descriptor,
            address: address.into(),
            ingestor: Ingestor::new(store.clone(), ledger.clone()),
            reducer: Reducer::new(store.clone(), reduce_batch),
            tracker: ConfirmationTracker::new(store.clone(), ledger),
            store,
            registry,
        }
    }

    pub fn descriptor(&self) -> &'static DomainDescriptor {
        self.descriptor
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let domain = self.descriptor;
        let ingest = self.ingestor.ingest(domain, &self.address).await?;
        let reduce = self.reducer.reduce(domain).await?;
        let confirm = self.tracker.confirm(domain, &self.address).await?;
        let settle = self.reducer.settle(domain).await?;

        let mirror = self
            .registry
            .publish(build_mirror(self.store.as_ref(), domain).await?);
        let root = mirror.root();

        let root_matches = match confirm.state.hash_field(domain.root_field) {
            None => None,
            Some(ledger_root) if ledger_root == root => {
                debug!(domain = %domain.kind, root = %root, "Mirror root matches ledger");
                Some(true)
            }
            Some(ledger_root) => {
                // Only a real divergence when we have confirmed exactly what the ledger rolled up
                if self.caught_up_to_ledger(&confirm).await? {
                    warn!(
                        domain = %domain.kind,
                        local = %root,
                        ledger = %ledger_root,
                        watermark = ?confirm.watermark,
                        "Mirror root does not match ledger"
                    );
                } else {
                    debug!(
                        domain = %domain.kind,
                        watermark = ?confirm.watermark,
                        "Mirror ahead of or behind ledger state, root not comparable"
                    );
                }
                Some(false)
            }
        };

        Ok(CycleReport {
            ingest,
            reduce,
            confirm,
            settle,
            root,
            root_matches,
        })
    }

    async fn caught_up_to_ledger(&self, confirm: &ConfirmReport) -> Result<bool> {
        let Some(hash) = confirm.state.hash_field(self.descriptor.action_state_field) else {
            return Ok(false);
        };
        let local = self.store.action_by_hash(self.descriptor.kind, &hash).await?;
        Ok(local.map(|a| Some(a.action_id)) == Some(confirm.watermark))
    }
}

/// Run a pipeline on a fixed interval until the task is aborted
pub fn spawn_pipeline_task(
    pipeline: Arc<Pipeline>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let domain = pipeline.descriptor().kind;
        info!(domain = %domain, interval_secs = interval.as_secs(), "Starting sync pipeline");
        let mut interval_timer = tokio::time::interval(interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval_timer.tick().await;
            match pipeline.run_cycle().await {
                Ok(report) => debug!(
                    domain = %domain,
                    inserted = report.ingest.inserted,
                    folded = report.reduce.folded,
                    watermark = ?report.confirm.watermark,
                    settled = report.settle.settled,
                    root = %report.root,
                    "Sync cycle complete"
                ),
                Err(e) => error!(domain = %domain, error = %e, "Sync cycle failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{dkg, KeyAction};
    use crate::ledger::MemoryLedger;
    use crate::store::MemoryStore;

    fn pipeline(ledger: Arc<MemoryLedger>, registry: Arc<MirrorRegistry>) -> Pipeline {
        Pipeline::new(
            &dkg::DKG,
            "dkg",
            Arc::new(MemoryStore::new()),
            ledger,
            registry,
            10,
        )
    }

    #[tokio::test]
    async fn test_cycle_publishes_mirror() {
        let ledger = Arc::new(MemoryLedger::new());
        let registry = Arc::new(MirrorRegistry::new());
        let generate = KeyAction::Generate {
            committee_id: 0,
            key_id: 0,
        };
        let h0 = ledger.push_action("dkg", generate.encode());
        ledger.confirm("dkg", &h0);

        let report = pipeline(ledger, registry.clone()).run_cycle().await.unwrap();
        assert_eq!(report.ingest.inserted, 1);
        assert_eq!(report.confirm.watermark, Some(0));
        assert_eq!(report.root_matches, None);

        let published = registry.get(dkg::DKG.kind).unwrap();
        assert_eq!(published.root(), report.root);
        assert_eq!(published.occupied(), 1);
    }

    #[tokio::test]
    async fn test_ledger_failure_aborts_cycle() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.fail_next(1);
        let err = pipeline(ledger, Arc::new(MirrorRegistry::new()))
            .run_cycle()
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_pending_action_leaves_root_on_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let registry = Arc::new(MirrorRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let h0 = ledger.push_action("dkg", KeyAction::Generate { committee_id: 0, key_id: 0 }.encode());
        ledger.confirm("dkg", &h0);
        let pipeline = Pipeline::new(&dkg::DKG, "dkg", store.clone(), ledger.clone(), registry, 10);
        let confirmed_root = pipeline.run_cycle().await.unwrap().root;
        ledger.set_state("dkg", vec![confirmed_root.to_hex(), h0.to_hex()]);

        ledger.push_action(
            "dkg",
            KeyAction::FinalizeRound1 { committee_id: 0, key_id: 0 }.encode(),
        );
        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.reduce.folded, 1);
        assert_eq!(report.confirm.watermark, Some(0));
        assert_eq!(report.root, confirmed_root);
        assert_eq!(report.root_matches, Some(true));

        let key = store.get_entity(dkg::DKG.kind, "0").await.unwrap().unwrap();
        assert_ne!(key.confirmed.as_ref(), Some(&key.body));
    }
}
