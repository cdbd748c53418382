//! Generic sync engine: ingest -> reduce -> confirm -> settle -> mirror
//!
//! All stages are parameterized by a [`DomainDescriptor`](crate::domain::DomainDescriptor);
//! no stage knows any domain's schema.

pub mod confirm;
pub mod ingest;
pub mod mirror;
pub mod pipeline;
pub mod reduce;

pub use confirm::{ConfirmReport, ConfirmationTracker};
pub use ingest::{IngestReport, Ingestor};
pub use mirror::build_mirror;
pub use pipeline::{spawn_pipeline_task, CycleReport, Pipeline};
pub use reduce::{ReduceReport, Reducer, SettleReport};
