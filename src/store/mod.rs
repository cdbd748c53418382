//! Persistence seam for the sync engine
//!
//! The store is the single source of truth. Every write is keyed by an
//! immutable action hash or a recomputed natural key, and cursors only move
//! forward, so concurrent or repeated writers converge.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;

use crate::db::schemas::{ActionDoc, AggregateDoc, CursorName, EntityDoc};
use crate::domain::DomainKind;
use crate::types::{Hash32, MirrorError, Result};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Highest-id action stored for the domain
    async fn last_action(&self, domain: DomainKind) -> Result<Option<ActionDoc>>;

    async fn action_by_hash(&self, domain: DomainKind, hash: &Hash32) -> Result<Option<ActionDoc>>;

    /// Insert unless the hash is already stored. Returns true when inserted.
    /// A new action must take the next id and link to the current head.
    async fn insert_action(&self, action: ActionDoc) -> Result<bool>;

    /// Actions with `action_id >= from`, ascending, at most `limit`
    async fn actions_from(
        &self,
        domain: DomainKind,
        from: u64,
        limit: usize,
    ) -> Result<Vec<ActionDoc>>;

    async fn count_actions(&self, domain: DomainKind) -> Result<u64>;

    /// Mark every action with `action_id <= watermark` active; returns how many flipped
    async fn activate_through(&self, domain: DomainKind, watermark: u64) -> Result<u64>;

    async fn get_entity(&self, domain: DomainKind, key: &str) -> Result<Option<EntityDoc>>;

    /// Replace by natural key
    async fn upsert_entity(&self, entity: EntityDoc) -> Result<()>;

    /// Entities sorted by key
    async fn list_entities(&self, domain: DomainKind, active_only: bool)
        -> Result<Vec<EntityDoc>>;

    async fn cursor(&self, domain: DomainKind, name: CursorName) -> Result<Option<u64>>;

    /// Move a cursor forward to `value`; never moves it back. Returns the stored value.
    async fn advance_cursor(&self, domain: DomainKind, name: CursorName, value: u64)
        -> Result<u64>;

    /// Drop and rewrite all aggregates of the domain
    async fn replace_aggregates(
        &self,
        domain: DomainKind,
        aggregates: Vec<AggregateDoc>,
    ) -> Result<()>;

    /// Aggregates of one name, sorted by parent
    async fn aggregates(&self, domain: DomainKind, name: &str) -> Result<Vec<AggregateDoc>>;

    /// Liveness check used by the health endpoint
    async fn ping(&self) -> Result<()>;
}

/// Check that `action` extends the log whose head is `head`
pub(crate) fn check_append(head: Option<&ActionDoc>, action: &ActionDoc) -> Result<()> {
    let (next_id, previous) = match head {
        Some(head) => (head.action_id + 1, head.action_hash),
        None => (0, Hash32::genesis()),
    };
    if action.action_id != next_id {
        return Err(MirrorError::ChainBroken(format!(
            "{} action id {} would leave a gap, expected {}",
            action.domain, action.action_id, next_id
        )));
    }
    if action.previous_action_hash != previous {
        return Err(MirrorError::ChainBroken(format!(
            "{} action {} links to {}, head is {}",
            action.domain, action.action_id, action.previous_action_hash, previous
        )));
    }
    Ok(())
}
