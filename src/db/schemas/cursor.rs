//! Per-domain progress cursors and derived aggregates

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::domain::DomainKind;

pub const CURSOR_COLLECTION: &str = "cursors";
pub const AGGREGATE_COLLECTION: &str = "aggregates";

/// Monotonic progress markers kept per domain
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CursorName {
    /// Last action id folded by the reducer
    Reduced,
    /// Highest ledger-confirmed action id
    Watermark,
    /// Last action id folded into confirmed entity snapshots
    Settled,
    /// Last confirmation event height consumed
    EventHeight,
}

impl fmt::Display for CursorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reduced => "reduced",
            Self::Watermark => "watermark",
            Self::Settled => "settled",
            Self::EventHeight => "event_height",
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CursorDoc {
    /// `{domain}:{name}`
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub domain: DomainKind,

    pub name: CursorName,

    pub value: u64,
}

impl CursorDoc {
    pub fn id_for(domain: DomainKind, name: CursorName) -> String {
        format!("{}:{}", domain, name)
    }
}

impl IntoIndexes for CursorDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![]
    }
}

impl MutMetadata for CursorDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// A derived value grouped by parent id, recomputed wholesale each cycle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AggregateDoc {
    /// `{domain}:{name}:{parent}`
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub domain: DomainKind,

    pub name: String,

    pub parent: u64,

    pub value: u64,
}

impl AggregateDoc {
    pub fn new(domain: DomainKind, name: &str, parent: u64, value: u64) -> Self {
        Self {
            _id: format!("{}:{}:{}", domain, name, parent),
            metadata: Metadata::default(),
            domain,
            name: name.to_string(),
            parent,
            value,
        }
    }
}

impl IntoIndexes for AggregateDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "domain": 1, "name": 1, "parent": 1 },
            Some(
                IndexOptions::builder()
                    .name("domain_name_parent_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for AggregateDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
