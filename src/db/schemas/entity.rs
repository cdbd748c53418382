//! Canonical entity document

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::domain::{DomainKind, Entity};

pub const ENTITY_COLLECTION: &str = "entities";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EntityDoc {
    /// `{domain}:{key}`
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub domain: DomainKind,

    /// Natural key within the domain
    pub key: String,

    /// Head state: every stored action folded, confirmed or not
    pub body: Entity,

    /// State folded only through the confirmed watermark. This is what the
    /// ledger has committed to and what the mirror is built from.
    #[serde(default)]
    pub confirmed: Option<Entity>,

    /// Last action folded into `confirmed`
    #[serde(default)]
    pub confirmed_action_id: Option<u64>,

    /// True once `confirmed` is set
    #[serde(default)]
    pub active: bool,

    pub first_action_id: u64,

    /// Last action folded into `body`
    pub last_action_id: u64,
}

impl EntityDoc {
    pub fn id_for(domain: DomainKind, key: &str) -> String {
        format!("{}:{}", domain, key)
    }

    pub fn new(domain: DomainKind, key: String, body: Entity, action_id: u64) -> Self {
        Self {
            _id: Self::id_for(domain, &key),
            metadata: Metadata::default(),
            domain,
            key,
            body,
            confirmed: None,
            confirmed_action_id: None,
            active: false,
            first_action_id: action_id,
            last_action_id: action_id,
        }
    }

    pub fn set_confirmed(&mut self, body: Entity, action_id: u64) {
        self.confirmed = Some(body);
        self.confirmed_action_id = Some(action_id);
        self.active = true;
    }
}

impl IntoIndexes for EntityDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "domain": 1, "key": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("domain_key_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "domain": 1, "active": 1, "key": 1 },
                Some(
                    IndexOptions::builder()
                        .name("domain_active_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for EntityDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
