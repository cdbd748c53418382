//! In-memory store for tests and dev mode

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{check_append, MirrorStore};
use crate::db::schemas::{ActionDoc, AggregateDoc, CursorName, EntityDoc};
use crate::domain::DomainKind;
use crate::types::{Hash32, Result};

#[derive(Debug, Default)]
struct ActionLog {
    /// Index = action id
    actions: Vec<ActionDoc>,
    by_hash: HashMap<Hash32, usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    actions: RwLock<HashMap<DomainKind, ActionLog>>,
    entities: RwLock<HashMap<DomainKind, BTreeMap<String, EntityDoc>>>,
    cursors: DashMap<(DomainKind, CursorName), u64>,
    aggregates: RwLock<HashMap<DomainKind, Vec<AggregateDoc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn last_action(&self, domain: DomainKind) -> Result<Option<ActionDoc>> {
        let logs = self.actions.read().await;
        Ok(logs.get(&domain).and_then(|log| log.actions.last().cloned()))
    }

    async fn action_by_hash(&self, domain: DomainKind, hash: &Hash32) -> Result<Option<ActionDoc>> {
        let logs = self.actions.read().await;
        Ok(logs.get(&domain).and_then(|log| {
            log.by_hash
                .get(hash)
                .and_then(|&i| log.actions.get(i).cloned())
        }))
    }

    async fn insert_action(&self, action: ActionDoc) -> Result<bool> {
        let mut logs = self.actions.write().await;
        let log = logs.entry(action.domain).or_default();
        if log.by_hash.contains_key(&action.action_hash) {
            return Ok(false);
        }
        check_append(log.actions.last(), &action)?;
        log.by_hash.insert(action.action_hash, log.actions.len());
        log.actions.push(action);
        Ok(true)
    }

    async fn actions_from(
        &self,
        domain: DomainKind,
        from: u64,
        limit: usize,
    ) -> Result<Vec<ActionDoc>> {
        let logs = self.actions.read().await;
        Ok(logs
            .get(&domain)
            .map(|log| {
                log.actions
                    .iter()
                    .skip(from as usize)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_actions(&self, domain: DomainKind) -> Result<u64> {
        let logs = self.actions.read().await;
        Ok(logs.get(&domain).map(|log| log.actions.len() as u64).unwrap_or(0))
    }

    async fn activate_through(&self, domain: DomainKind, watermark: u64) -> Result<u64> {
        let mut logs = self.actions.write().await;
        let mut flipped = 0;
        if let Some(log) = logs.get_mut(&domain) {
            for action in log
                .actions
                .iter_mut()
                .take_while(|a| a.action_id <= watermark)
                .filter(|a| !a.active)
            {
                action.active = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn get_entity(&self, domain: DomainKind, key: &str) -> Result<Option<EntityDoc>> {
        let entities = self.entities.read().await;
        Ok(entities.get(&domain).and_then(|m| m.get(key).cloned()))
    }

    async fn upsert_entity(&self, entity: EntityDoc) -> Result<()> {
        let mut entities = self.entities.write().await;
        entities
            .entry(entity.domain)
            .or_default()
            .insert(entity.key.clone(), entity);
        Ok(())
    }

    async fn list_entities(
        &self,
        domain: DomainKind,
        active_only: bool,
    ) -> Result<Vec<EntityDoc>> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&domain)
            .map(|m| {
                m.values()
                    .filter(|e| !active_only || e.active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn cursor(&self, domain: DomainKind, name: CursorName) -> Result<Option<u64>> {
        Ok(self.cursors.get(&(domain, name)).map(|v| *v))
    }

    async fn advance_cursor(
        &self,
        domain: DomainKind,
        name: CursorName,
        value: u64,
    ) -> Result<u64> {
        let mut entry = self.cursors.entry((domain, name)).or_insert(value);
        if value > *entry {
            *entry = value;
        }
        Ok(*entry)
    }

    async fn replace_aggregates(
        &self,
        domain: DomainKind,
        aggregates: Vec<AggregateDoc>,
    ) -> Result<()> {
        self.aggregates.write().await.insert(domain, aggregates);
        Ok(())
    }

    async fn aggregates(&self, domain: DomainKind, name: &str) -> Result<Vec<AggregateDoc>> {
        let aggregates = self.aggregates.read().await;
        let mut matching: Vec<AggregateDoc> = aggregates
            .get(&domain)
            .map(|all| all.iter().filter(|a| a.name == name).cloned().collect())
            .unwrap_or_default();
        matching.sort_by_key(|a| a.parent);
        Ok(matching)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, CommitteeAction};
    use crate::types::MirrorError;

    fn action(id: u64, seed: &str) -> ActionDoc {
        linked(id, seed, Hash32::genesis())
    }

    fn linked(id: u64, seed: &str, previous: Hash32) -> ActionDoc {
        let hash = Hash32::digest(&[seed.as_bytes()]);
        ActionDoc::new(
            DomainKind::Committee,
            id,
            hash,
            previous,
            vec![seed.to_string()],
            Action::Committee(CommitteeAction::Create {
                threshold: 1,
                members: vec!["m".into()],
                ipfs_hash: String::new(),
            }),
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_hash() {
        let store = MemoryStore::new();
        assert!(store.insert_action(action(0, "a")).await.unwrap());
        assert!(!store.insert_action(action(0, "a")).await.unwrap());
        assert_eq!(store.count_actions(DomainKind::Committee).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_gap() {
        let store = MemoryStore::new();
        let err = store.insert_action(action(1, "a")).await.unwrap_err();
        assert!(matches!(err, MirrorError::ChainBroken(_)));
    }

    #[tokio::test]
    async fn test_insert_rejects_broken_link() {
        let store = MemoryStore::new();
        let first = action(0, "a");
        let head = first.action_hash;
        store.insert_action(first).await.unwrap();

        let err = store
            .insert_action(linked(1, "b", Hash32::digest(&[b"elsewhere"])))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ChainBroken(_)));
        assert!(store.insert_action(linked(1, "b", head)).await.unwrap());
    }

    #[tokio::test]
    async fn test_cursor_never_moves_back() {
        let store = MemoryStore::new();
        let d = DomainKind::Dkg;
        assert_eq!(store.cursor(d, CursorName::Watermark).await.unwrap(), None);
        assert_eq!(store.advance_cursor(d, CursorName::Watermark, 5).await.unwrap(), 5);
        assert_eq!(store.advance_cursor(d, CursorName::Watermark, 3).await.unwrap(), 5);
        assert_eq!(store.cursor(d, CursorName::Reduced).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_activate_prefix() {
        let store = MemoryStore::new();
        let mut previous = Hash32::genesis();
        for (i, seed) in ["a", "b", "c"].iter().enumerate() {
            let doc = linked(i as u64, seed, previous);
            previous = doc.action_hash;
            store.insert_action(doc).await.unwrap();
        }
        assert_eq!(store.activate_through(DomainKind::Committee, 1).await.unwrap(), 2);
        assert_eq!(store.activate_through(DomainKind::Committee, 1).await.unwrap(), 0);
        let all = store.actions_from(DomainKind::Committee, 0, 10).await.unwrap();
        let active: Vec<bool> = all.iter().map(|a| a.active).collect();
        assert_eq!(active, vec![true, true, false]);
    }
}
