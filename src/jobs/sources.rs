//! Work discovery for the scheduler
//!
//! Each source offers at most one ready unit of work per tick. Sources only
//! read the store; a unit stays on offer until the ledger confirms it, so a
//! failed job is naturally retried on a later tick.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::JobType;
use crate::db::schemas::{CursorName, EntityDoc};
use crate::domain::{DomainKind, Entity, KeyStatus, RequestStatus, KEYS_PER_COMMITTEE};
use crate::store::MirrorStore;
use crate::types::Result;

/// A unit of work a source considers ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub job_type: JobType,
    pub unique_id: u64,
}

#[async_trait]
pub trait WorkSource: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn next_ready(&self) -> Result<Option<Candidate>>;
}

/// Actions ingested beyond the confirmation watermark
pub struct PendingRollup {
    store: Arc<dyn MirrorStore>,
    domain: DomainKind,
}

impl PendingRollup {
    pub fn new(store: Arc<dyn MirrorStore>, domain: DomainKind) -> Self {
        Self { store, domain }
    }
}

#[async_trait]
impl WorkSource for PendingRollup {
    fn job_type(&self) -> JobType {
        JobType::rollup_for(self.domain)
    }

    async fn next_ready(&self) -> Result<Option<Candidate>> {
        let first_pending = self
            .store
            .cursor(self.domain, CursorName::Watermark)
            .await?
            .map(|w| w + 1)
            .unwrap_or(0);
        let stored = self.store.count_actions(self.domain).await?;
        Ok((stored > first_pending).then_some(Candidate {
            job_type: self.job_type(),
            unique_id: first_pending,
        }))
    }
}

/// Committee threshold and size by committee id, confirmed committees only
pub(crate) async fn committees(store: &dyn MirrorStore) -> Result<HashMap<u64, (u32, u64)>> {
    Ok(store
        .list_entities(DomainKind::Committee, true)
        .await?
        .into_iter()
        .filter_map(|doc| match doc.confirmed {
            Some(Entity::Committee(c)) => Some((c.committee_id, (c.threshold, c.size()))),
            _ => None,
        })
        .collect())
}

/// Confirmed entity count per level-1 parent
fn count_by<F>(docs: &[EntityDoc], parent: F) -> HashMap<u64, u64>
where
    F: Fn(&Entity) -> Option<u64>,
{
    let mut counts = HashMap::new();
    for id in docs.iter().filter_map(|d| d.confirmed.as_ref().and_then(|e| parent(e))) {
        *counts.entry(id).or_default() += 1;
    }
    counts
}

/// Key whose round contributions arrived from every committee member
pub struct FinalizeRound {
    store: Arc<dyn MirrorStore>,
    round: DomainKind,
}

impl FinalizeRound {
    /// `round` is [`DomainKind::Round1`] or [`DomainKind::Round2`]
    pub fn new(store: Arc<dyn MirrorStore>, round: DomainKind) -> Self {
        Self { store, round }
    }

    fn awaiting(&self) -> KeyStatus {
        match self.round {
            DomainKind::Round2 => KeyStatus::Round2Contribution,
            _ => KeyStatus::Round1Contribution,
        }
    }
}

#[async_trait]
impl WorkSource for FinalizeRound {
    fn job_type(&self) -> JobType {
        match self.round {
            DomainKind::Round2 => JobType::FinalizeRound2,
            _ => JobType::FinalizeRound1,
        }
    }

    async fn next_ready(&self) -> Result<Option<Candidate>> {
        let committees = committees(self.store.as_ref()).await?;
        let contributions = self.store.list_entities(self.round, true).await?;
        let counts = count_by(&contributions, |e| match e {
            Entity::Round1(c) | Entity::Round2(c) => Some(c.key_index),
            _ => None,
        });

        let awaiting = self.awaiting();
        let ready = self
            .store
            .list_entities(DomainKind::Dkg, true)
            .await?
            .into_iter()
            .filter_map(|doc| match doc.confirmed {
                Some(Entity::Key(k)) if k.status == awaiting => Some(k),
                _ => None,
            })
            .filter(|k| {
                let size = committees.get(&k.committee_id).map(|c| c.1);
                size.is_some_and(|n| counts.get(&k.key_index).copied().unwrap_or(0) >= n)
            })
            .map(|k| k.key_index)
            .min();

        Ok(ready.map(|key_index| Candidate {
            job_type: self.job_type(),
            unique_id: key_index,
        }))
    }
}

/// Initialized request with responses from at least a threshold of members
pub struct FinalizeResponse {
    store: Arc<dyn MirrorStore>,
}

impl FinalizeResponse {
    pub fn new(store: Arc<dyn MirrorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorkSource for FinalizeResponse {
    fn job_type(&self) -> JobType {
        JobType::FinalizeResponse
    }

    async fn next_ready(&self) -> Result<Option<Candidate>> {
        let committees = committees(self.store.as_ref()).await?;
        let responses = self.store.list_entities(DomainKind::Response, true).await?;
        let counts = count_by(&responses, |e| match e {
            Entity::Response(r) => Some(r.request_id),
            _ => None,
        });

        let ready = self
            .store
            .list_entities(DomainKind::Request, true)
            .await?
            .into_iter()
            .filter_map(|doc| match doc.confirmed {
                Some(Entity::Request(r)) if r.status == RequestStatus::Initialized => Some(r),
                _ => None,
            })
            .filter(|r| {
                let committee_id = r.key_index / KEYS_PER_COMMITTEE;
                let threshold = committees.get(&committee_id).map(|c| c.0 as u64);
                threshold.is_some_and(|t| counts.get(&r.request_id).copied().unwrap_or(0) >= t)
            })
            .map(|r| r.request_id)
            .min();

        Ok(ready.map(|request_id| Candidate {
            job_type: JobType::FinalizeResponse,
            unique_id: request_id,
        }))
    }
}

/// Every source that applies to the enabled domains
pub fn sources_for(
    store: Arc<dyn MirrorStore>,
    domains: &[DomainKind],
) -> Vec<Arc<dyn WorkSource>> {
    let enabled = |d: DomainKind| domains.contains(&d);
    let mut sources: Vec<Arc<dyn WorkSource>> = domains
        .iter()
        .map(|d| Arc::new(PendingRollup::new(store.clone(), *d)) as Arc<dyn WorkSource>)
        .collect();

    for round in [DomainKind::Round1, DomainKind::Round2] {
        if enabled(DomainKind::Committee) && enabled(DomainKind::Dkg) && enabled(round) {
            sources.push(Arc::new(FinalizeRound::new(store.clone(), round)));
        }
    }
    if enabled(DomainKind::Committee) && enabled(DomainKind::Request) && enabled(DomainKind::Response)
    {
        sources.push(Arc::new(FinalizeResponse::new(store)));
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Committee, Contribution, Key, Request, ResponseShare};
    use crate::store::MemoryStore;

    async fn put(store: &MemoryStore, domain: DomainKind, key: &str, body: Entity) {
        let mut doc = EntityDoc::new(domain, key.to_string(), body.clone(), 0);
        doc.set_confirmed(body, 0);
        store.upsert_entity(doc).await.unwrap();
    }

    async fn put_unconfirmed(store: &MemoryStore, domain: DomainKind, key: &str, body: Entity) {
        let doc = EntityDoc::new(domain, key.to_string(), body, 1);
        store.upsert_entity(doc).await.unwrap();
    }

    async fn committee(store: &MemoryStore, threshold: u32, size: usize) {
        let body = Entity::Committee(Committee {
            committee_id: 0,
            threshold,
            members: (0..size).map(|i| format!("pk{}", i)).collect(),
            ipfs_hash: String::new(),
        });
        put(store, DomainKind::Committee, "0", body).await;
    }

    fn contribution(member_id: u64) -> Entity {
        Entity::Round1(Contribution {
            committee_id: 0,
            key_id: 3,
            key_index: 3,
            member_id,
            data: vec!["x".into()],
        })
    }

    #[tokio::test]
    async fn test_finalize_round_waits_for_every_member() {
        let store = Arc::new(MemoryStore::new());
        committee(&store, 2, 2).await;
        let key = Key {
            committee_id: 0,
            key_id: 3,
            key_index: 3,
            round1_finalized: false,
            round2_finalized: false,
            deprecated: false,
            status: KeyStatus::Round1Contribution,
        };
        put(&store, DomainKind::Dkg, "3", Entity::Key(key)).await;
        put(&store, DomainKind::Round1, "3:0", contribution(0)).await;

        let source = FinalizeRound::new(store.clone(), DomainKind::Round1);
        assert_eq!(source.next_ready().await.unwrap(), None);

        // A contribution the ledger has not confirmed does not count
        put_unconfirmed(&store, DomainKind::Round1, "3:1", contribution(1)).await;
        assert_eq!(source.next_ready().await.unwrap(), None);

        put(&store, DomainKind::Round1, "3:1", contribution(1)).await;
        let ready = source.next_ready().await.unwrap().unwrap();
        assert_eq!(ready.job_type, JobType::FinalizeRound1);
        assert_eq!(ready.unique_id, 3);

        // Round 2 is not ready for a key still collecting round 1
        let round2 = FinalizeRound::new(store, DomainKind::Round2);
        assert_eq!(round2.next_ready().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_finalize_response_uses_threshold() {
        let store = Arc::new(MemoryStore::new());
        committee(&store, 2, 3).await;
        let request = Request {
            request_id: 9,
            key_index: 1,
            requester: "r".into(),
            deadline: 100,
            result: None,
            aborted: false,
            status: RequestStatus::Initialized,
        };
        put(&store, DomainKind::Request, "9", Entity::Request(request)).await;
        for member_id in 0..2 {
            let share = Entity::Response(ResponseShare {
                request_id: 9,
                member_id,
                data: vec!["d".into()],
            });
            put(&store, DomainKind::Response, &format!("9:{}", member_id), share).await;
        }

        let ready = FinalizeResponse::new(store).next_ready().await.unwrap();
        assert_eq!(ready.map(|c| c.unique_id), Some(9));
    }

    #[tokio::test]
    async fn test_sources_follow_enabled_domains() {
        let store: Arc<dyn MirrorStore> = Arc::new(MemoryStore::new());
        let only_committee = sources_for(store.clone(), &[DomainKind::Committee]);
        assert_eq!(only_committee.len(), 1);
        assert_eq!(only_committee[0].job_type(), JobType::CommitteeRollup);

        let dkg = sources_for(
            store,
            &[DomainKind::Committee, DomainKind::Dkg, DomainKind::Round1],
        );
        assert!(dkg.iter().any(|s| s.job_type() == JobType::FinalizeRound1));
        assert!(!dkg.iter().any(|s| s.job_type() == JobType::FinalizeRound2));
    }
}
