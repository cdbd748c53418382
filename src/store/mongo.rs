//! MongoDB-backed store

use async_trait::async_trait;
use bson::{doc, DateTime};

use super::{check_append, MirrorStore};
use crate::db::schemas::{
    ActionDoc, AggregateDoc, CursorDoc, CursorName, EntityDoc, ACTION_COLLECTION,
    AGGREGATE_COLLECTION, CURSOR_COLLECTION, ENTITY_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::domain::DomainKind;
use crate::types::{Hash32, MirrorError, Result};

/// BSON has no unsigned 64-bit type; ids and heights are stored as i64
fn as_i64(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| MirrorError::Database(format!("value {} exceeds i64 range", value)))
}

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    actions: MongoCollection<ActionDoc>,
    entities: MongoCollection<EntityDoc>,
    cursors: MongoCollection<CursorDoc>,
    aggregates: MongoCollection<AggregateDoc>,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = MongoClient::new(uri, db_name).await?;
        Ok(Self {
            actions: client.collection(ACTION_COLLECTION).await?,
            entities: client.collection(ENTITY_COLLECTION).await?,
            cursors: client.collection(CURSOR_COLLECTION).await?,
            aggregates: client.collection(AGGREGATE_COLLECTION).await?,
            client,
        })
    }
}

#[async_trait]
impl MirrorStore for MongoStore {
    async fn last_action(&self, domain: DomainKind) -> Result<Option<ActionDoc>> {
        let mut found = self
            .actions
            .find_sorted(
                doc! { "domain": domain.as_str() },
                doc! { "action_id": -1 },
                Some(1),
            )
            .await?;
        Ok(found.pop())
    }

    async fn action_by_hash(&self, domain: DomainKind, hash: &Hash32) -> Result<Option<ActionDoc>> {
        self.actions
            .find_one(doc! { "_id": ActionDoc::id_for(domain, hash) })
            .await
    }

    async fn insert_action(&self, action: ActionDoc) -> Result<bool> {
        if self.action_by_hash(action.domain, &action.action_hash).await?.is_some() {
            return Ok(false);
        }
        let head = self.last_action(action.domain).await?;
        check_append(head.as_ref(), &action)?;
        // A racing writer that claimed the same id trips the unique
        // (domain, action_id) index
        let filter = doc! { "_id": action._id.as_str() };
        self.actions.insert_if_absent(filter, action).await
    }

    async fn actions_from(
        &self,
        domain: DomainKind,
        from: u64,
        limit: usize,
    ) -> Result<Vec<ActionDoc>> {
        self.actions
            .find_sorted(
                doc! { "domain": domain.as_str(), "action_id": { "$gte": as_i64(from)? } },
                doc! { "action_id": 1 },
                Some(limit as i64),
            )
            .await
    }

    async fn count_actions(&self, domain: DomainKind) -> Result<u64> {
        self.actions.count(doc! { "domain": domain.as_str() }).await
    }

    async fn activate_through(&self, domain: DomainKind, watermark: u64) -> Result<u64> {
        self.actions
            .update_many(
                doc! {
                    "domain": domain.as_str(),
                    "action_id": { "$lte": as_i64(watermark)? },
                    "active": false,
                },
                doc! { "$set": { "active": true, "metadata.updated_at": DateTime::now() } },
            )
            .await
    }

    async fn get_entity(&self, domain: DomainKind, key: &str) -> Result<Option<EntityDoc>> {
        self.entities
            .find_one(doc! { "_id": EntityDoc::id_for(domain, key) })
            .await
    }

    async fn upsert_entity(&self, entity: EntityDoc) -> Result<()> {
        let filter = doc! { "_id": entity._id.as_str() };
        self.entities.replace_upsert(filter, entity).await
    }

    async fn list_entities(
        &self,
        domain: DomainKind,
        active_only: bool,
    ) -> Result<Vec<EntityDoc>> {
        let mut filter = doc! { "domain": domain.as_str() };
        if active_only {
            filter.insert("active", true);
        }
        self.entities
            .find_sorted(filter, doc! { "key": 1 }, None)
            .await
    }

    async fn cursor(&self, domain: DomainKind, name: CursorName) -> Result<Option<u64>> {
        Ok(self
            .cursors
            .find_one(doc! { "_id": CursorDoc::id_for(domain, name) })
            .await?
            .map(|c| c.value))
    }

    async fn advance_cursor(
        &self,
        domain: DomainKind,
        name: CursorName,
        value: u64,
    ) -> Result<u64> {
        let id = CursorDoc::id_for(domain, name);
        self.cursors
            .update_one(
                doc! { "_id": id.as_str() },
                doc! {
                    "$max": { "value": as_i64(value)? },
                    "$set": { "metadata.updated_at": DateTime::now() },
                    "$setOnInsert": {
                        "domain": domain.as_str(),
                        "name": name.to_string(),
                        "metadata.created_at": DateTime::now(),
                    },
                },
                true,
            )
            .await?;
        self.cursor(domain, name)
            .await?
            .ok_or_else(|| MirrorError::Database(format!("cursor {} vanished after upsert", id)))
    }

    async fn replace_aggregates(
        &self,
        domain: DomainKind,
        aggregates: Vec<AggregateDoc>,
    ) -> Result<()> {
        self.aggregates
            .delete_many(doc! { "domain": domain.as_str() })
            .await?;
        self.aggregates.insert_many(aggregates).await
    }

    async fn aggregates(&self, domain: DomainKind, name: &str) -> Result<Vec<AggregateDoc>> {
        self.aggregates
            .find_sorted(
                doc! { "domain": domain.as_str(), "name": name },
                doc! { "parent": 1 },
                None,
            )
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }
}
