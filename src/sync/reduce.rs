//! State reduction
//!
//! Folds stored actions into canonical entities in action-id order. Each
//! entity carries two states: the head, with every stored action folded, and
//! the confirmed snapshot, folded only through the ledger watermark. The
//! mirror commits confirmed snapshots, so pending actions never move its root
//! away from the ledger's.
//!
//! Progress is a pair of persisted cursors holding the last action id folded
//! into each state. Entities remember the last action folded into them, so
//! replaying a batch after a crash skips what was already applied.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::schemas::{ActionDoc, AggregateDoc, CursorName, EntityDoc};
use crate::domain::{DomainDescriptor, Entity, FoldContext};
use crate::store::MirrorStore;
use crate::types::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReduceReport {
    pub folded: usize,
    pub noops: usize,
    pub reduced_through: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettleReport {
    pub settled: usize,
    pub noops: usize,
    pub settled_through: Option<u64>,
    pub aggregates: usize,
}

/// Apply one action. Results that would not fit the domain's tree are
/// treated like any other rejected transition.
fn fold(
    domain: &DomainDescriptor,
    current: Option<&Entity>,
    record: &ActionDoc,
) -> Option<Entity> {
    let ctx = FoldContext {
        action_id: record.action_id,
    };
    let next = (domain.transition)(current, &record.action, &ctx)?;
    if let Some(outside) = next.placements().iter().find(|p| !domain.shape.holds(p)) {
        warn!(
            domain = %domain.kind,
            action_id = record.action_id,
            level1 = outside.level1,
            level2 = ?outside.level2,
            "Action result falls outside the tree, ignoring"
        );
        return None;
    }
    Some(next)
}

pub struct Reducer {
    store: Arc<dyn MirrorStore>,
    batch_size: usize,
}

impl Reducer {
    pub fn new(store: Arc<dyn MirrorStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Fold every stored action into entity heads
    pub async fn reduce(&self, domain: &DomainDescriptor) -> Result<ReduceReport> {
        let kind = domain.kind;
        let mut report = ReduceReport {
            reduced_through: self.store.cursor(kind, CursorName::Reduced).await?,
            ..Default::default()
        };
        let mut from = report.reduced_through.map(|c| c + 1).unwrap_or(0);

        loop {
            let batch = self.store.actions_from(kind, from, self.batch_size).await?;
            let Some(last) = batch.last().map(|a| a.action_id) else {
                break;
            };

            for record in &batch {
                let action_id = record.action_id;
                let Some(key) = (domain.entity_key)(&record.action, action_id) else {
                    warn!(domain = %kind, action_id, "Action has no entity key, skipping");
                    report.noops += 1;
                    continue;
                };

                let current = self.store.get_entity(kind, &key).await?;
                if current.as_ref().is_some_and(|c| c.last_action_id >= action_id) {
                    continue;
                }

                let Some(body) = fold(domain, current.as_ref().map(|c| &c.body), record) else {
                    debug!(domain = %kind, action_id, key = %key, "Transition is a no-op");
                    report.noops += 1;
                    continue;
                };

                let entity = match current {
                    Some(mut existing) => {
                        existing.body = body;
                        existing.last_action_id = action_id;
                        existing
                    }
                    None => EntityDoc::new(kind, key, body, action_id),
                };
                self.store.upsert_entity(entity).await?;
                report.folded += 1;
            }

            let stored = self
                .store
                .advance_cursor(kind, CursorName::Reduced, last)
                .await?;
            report.reduced_through = Some(stored);
            from = last + 1;
            if batch.len() < self.batch_size {
                break;
            }
        }

        if report.folded > 0 {
            info!(
                domain = %kind,
                folded = report.folded,
                noops = report.noops,
                reduced_through = ?report.reduced_through,
                "Reduced actions"
            );
        }
        Ok(report)
    }

    /// Fold confirmed actions into the confirmed snapshots, up to the lower
    /// of the watermark and the reduced cursor, then recompute aggregates
    pub async fn settle(&self, domain: &DomainDescriptor) -> Result<SettleReport> {
        let kind = domain.kind;
        let mut report = SettleReport {
            settled_through: self.store.cursor(kind, CursorName::Settled).await?,
            ..Default::default()
        };
        let watermark = self.store.cursor(kind, CursorName::Watermark).await?;
        let reduced = self.store.cursor(kind, CursorName::Reduced).await?;
        let through = match (watermark, reduced) {
            (Some(w), Some(r)) => Some(w.min(r)),
            _ => None,
        };

        if let Some(through) = through {
            let mut from = report.settled_through.map(|c| c + 1).unwrap_or(0);
            while from <= through {
                let limit = self.batch_size.min((through - from + 1) as usize);
                let batch = self.store.actions_from(kind, from, limit).await?;
                let Some(last) = batch.last().map(|a| a.action_id) else {
                    break;
                };

                for record in &batch {
                    self.settle_one(domain, record, &mut report).await?;
                }

                let stored = self
                    .store
                    .advance_cursor(kind, CursorName::Settled, last)
                    .await?;
                report.settled_through = Some(stored);
                from = last + 1;
            }
        }

        report.aggregates = self.recompute_aggregates(domain).await?;

        if report.settled > 0 {
            info!(
                domain = %kind,
                settled = report.settled,
                noops = report.noops,
                settled_through = ?report.settled_through,
                "Settled confirmed actions"
            );
        }
        Ok(report)
    }

    async fn settle_one(
        &self,
        domain: &DomainDescriptor,
        record: &ActionDoc,
        report: &mut SettleReport,
    ) -> Result<()> {
        let kind = domain.kind;
        let action_id = record.action_id;
        let Some(key) = (domain.entity_key)(&record.action, action_id) else {
            report.noops += 1;
            return Ok(());
        };
        // A key with no head was never created, so no prefix can create it
        let Some(mut entity) = self.store.get_entity(kind, &key).await? else {
            report.noops += 1;
            return Ok(());
        };
        if entity.confirmed_action_id.is_some_and(|c| c >= action_id) {
            return Ok(());
        }

        match fold(domain, entity.confirmed.as_ref(), record) {
            Some(body) => {
                entity.set_confirmed(body, action_id);
                self.store.upsert_entity(entity).await?;
                report.settled += 1;
            }
            None => report.noops += 1,
        }
        Ok(())
    }

    /// Full aggregation over every confirmed snapshot of the domain
    async fn recompute_aggregates(&self, domain: &DomainDescriptor) -> Result<usize> {
        let entities = self.store.list_entities(domain.kind, true).await?;
        let mut totals: BTreeMap<(&'static str, u64), u64> = BTreeMap::new();
        for share in entities
            .iter()
            .filter_map(|e| e.confirmed.as_ref().and_then(Entity::aggregate))
        {
            *totals.entry((share.name, share.parent)).or_default() += share.amount;
        }
        let docs: Vec<AggregateDoc> = totals
            .into_iter()
            .map(|((name, parent), value)| AggregateDoc::new(domain.kind, name, parent, value))
            .collect();
        let count = docs.len();
        self.store.replace_aggregates(domain.kind, docs).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{dkg, ContributionAction, DomainKind, Entity, KeyAction, KeyStatus};
    use crate::ledger::MemoryLedger;
    use crate::store::MemoryStore;
    use crate::sync::Ingestor;

    async fn seeded(payloads: Vec<Vec<String>>, domain: &DomainDescriptor) -> Arc<MemoryStore> {
        let ledger = Arc::new(MemoryLedger::new());
        for p in payloads {
            ledger.push_action("addr", p);
        }
        let store = Arc::new(MemoryStore::new());
        Ingestor::new(store.clone(), ledger)
            .ingest(domain, "addr")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = seeded(
            vec![
                KeyAction::Generate { committee_id: 0, key_id: 0 }.encode(),
                KeyAction::FinalizeRound1 { committee_id: 0, key_id: 0 }.encode(),
            ],
            &dkg::DKG,
        )
        .await;
        let reducer = Reducer::new(store.clone(), 1);
        let first = reducer.reduce(&dkg::DKG).await.unwrap();
        assert_eq!(first.folded, 2);
        assert_eq!(first.reduced_through, Some(1));
        let second = reducer.reduce(&dkg::DKG).await.unwrap();
        assert_eq!(second.folded, 0);

        let key = store.get_entity(DomainKind::Dkg, "0").await.unwrap().unwrap();
        let Entity::Key(k) = key.body else { panic!() };
        assert_eq!(k.status, KeyStatus::Round2Contribution);
        assert_eq!(key.first_action_id, 0);
        assert_eq!(key.last_action_id, 1);
    }

    #[tokio::test]
    async fn test_contribution_counts_aggregate() {
        let contribute = |member_id| {
            ContributionAction::Contribute {
                committee_id: 0,
                key_id: 1,
                member_id,
                data: vec!["c".into()],
            }
            .encode()
        };
        let store = seeded(vec![contribute(0), contribute(1), contribute(1)], &dkg::ROUND1).await;
        let reducer = Reducer::new(store.clone(), 10);
        reducer.reduce(&dkg::ROUND1).await.unwrap();
        store
            .advance_cursor(DomainKind::Round1, CursorName::Watermark, 2)
            .await
            .unwrap();
        reducer.settle(&dkg::ROUND1).await.unwrap();

        let counts = store.aggregates(DomainKind::Round1, "contributions").await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].parent, 1);
        assert_eq!(counts[0].value, 2);
    }

    #[tokio::test]
    async fn test_pending_update_keeps_confirmed_snapshot() {
        let store = seeded(
            vec![
                KeyAction::Generate { committee_id: 0, key_id: 0 }.encode(),
                KeyAction::FinalizeRound1 { committee_id: 0, key_id: 0 }.encode(),
            ],
            &dkg::DKG,
        )
        .await;
        store.advance_cursor(DomainKind::Dkg, CursorName::Watermark, 0).await.unwrap();
        let reducer = Reducer::new(store.clone(), 10);
        reducer.reduce(&dkg::DKG).await.unwrap();
        let settled = reducer.settle(&dkg::DKG).await.unwrap();
        assert_eq!(settled.settled, 1);
        assert_eq!(settled.settled_through, Some(0));

        let key = store.get_entity(DomainKind::Dkg, "0").await.unwrap().unwrap();
        assert!(key.active);
        let Entity::Key(head) = &key.body else { panic!() };
        assert_eq!(head.status, KeyStatus::Round2Contribution);
        let Some(Entity::Key(confirmed)) = &key.confirmed else { panic!() };
        assert_eq!(confirmed.status, KeyStatus::Round1Contribution);
        assert_eq!(key.confirmed_action_id, Some(0));

        // Nothing new is confirmed, so settling again changes nothing
        assert_eq!(reducer.settle(&dkg::DKG).await.unwrap().settled, 0);

        store.advance_cursor(DomainKind::Dkg, CursorName::Watermark, 1).await.unwrap();
        let settled = reducer.settle(&dkg::DKG).await.unwrap();
        assert_eq!(settled.settled, 1);
        let key = store.get_entity(DomainKind::Dkg, "0").await.unwrap().unwrap();
        assert_eq!(key.confirmed.as_ref(), Some(&key.body));
    }

    #[tokio::test]
    async fn test_settle_waits_for_reduction() {
        let store = seeded(
            vec![KeyAction::Generate { committee_id: 0, key_id: 0 }.encode()],
            &dkg::DKG,
        )
        .await;
        store.advance_cursor(DomainKind::Dkg, CursorName::Watermark, 0).await.unwrap();
        let reducer = Reducer::new(store.clone(), 10);
        let early = reducer.settle(&dkg::DKG).await.unwrap();
        assert_eq!(early.settled_through, None);

        reducer.reduce(&dkg::DKG).await.unwrap();
        let settled = reducer.settle(&dkg::DKG).await.unwrap();
        assert_eq!(settled.settled_through, Some(0));
        assert_eq!(store.list_entities(DomainKind::Dkg, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_result_outside_tree_is_a_noop() {
        let store = seeded(
            vec![
                KeyAction::Generate { committee_id: 1024, key_id: 0 }.encode(),
                KeyAction::Generate { committee_id: 1023, key_id: 31 }.encode(),
            ],
            &dkg::DKG,
        )
        .await;
        let report = Reducer::new(store.clone(), 10).reduce(&dkg::DKG).await.unwrap();
        assert_eq!(report.folded, 1);
        assert_eq!(report.noops, 1);
        assert_eq!(report.reduced_through, Some(1));

        let keys = store.list_entities(DomainKind::Dkg, false).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key, (1023 * dkg::KEYS_PER_COMMITTEE + 31).to_string());
    }
}
