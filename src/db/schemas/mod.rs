//! Database schemas: actions, entities, cursors and aggregates

mod action;
mod cursor;
mod entity;
mod metadata;

pub use action::{ActionDoc, ACTION_COLLECTION};
pub use cursor::{AggregateDoc, CursorDoc, CursorName, AGGREGATE_COLLECTION, CURSOR_COLLECTION};
pub use entity::{EntityDoc, ENTITY_COLLECTION};
pub use metadata::Metadata;
