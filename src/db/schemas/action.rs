//! Action log document

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::domain::{Action, DomainKind};
use crate::types::Hash32;

pub const ACTION_COLLECTION: &str = "actions";

/// One ingested ledger action. Written once by the ingestor, only `active`
/// ever changes afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActionDoc {
    /// `{domain}:{action_hash}`
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub domain: DomainKind,

    /// Gapless per-domain sequence number starting at 0
    pub action_id: u64,

    pub action_hash: Hash32,

    pub previous_action_hash: Hash32,

    pub raw_payload: Vec<String>,

    /// Payload decoded once at ingestion
    pub action: Action,

    /// Set once the ledger confirms this action
    #[serde(default)]
    pub active: bool,
}

impl ActionDoc {
    pub fn id_for(domain: DomainKind, action_hash: &Hash32) -> String {
        format!("{}:{}", domain, action_hash)
    }

    pub fn new(
        domain: DomainKind,
        action_id: u64,
        action_hash: Hash32,
        previous_action_hash: Hash32,
        raw_payload: Vec<String>,
        action: Action,
    ) -> Self {
        Self {
            _id: Self::id_for(domain, &action_hash),
            metadata: Metadata::default(),
            domain,
            action_id,
            action_hash,
            previous_action_hash,
            raw_payload,
            action,
            active: false,
        }
    }
}

impl IntoIndexes for ActionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "domain": 1, "action_hash": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("domain_hash_unique".to_string())
                        .build(),
                ),
            ),
            // Also rejects a second action claiming an already-assigned id
            (
                doc! { "domain": 1, "action_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("domain_action_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "domain": 1, "active": 1 },
                Some(
                    IndexOptions::builder()
                        .name("domain_active_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ActionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
