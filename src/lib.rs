//! ledger-mirror - off-chain mirror of hash-chained ledger action logs
//!
//! Keeps a deterministic replica of each domain's on-chain state so the
//! rollups that commit it can be proven and submitted.
//!
//! ## Services
//!
//! - **Sync**: per-domain ingest -> reduce -> confirm -> mirror cycle
//! - **Merkle**: two-level commitment trees and witness lookup
//! - **Jobs**: dependency-aware rollup scheduler, queues and workers
//! - **Prover**: hand-off to the proving service and ledger submission
//! - **Server**: read-only HTTP surface (health, entities, witnesses)

pub mod config;
pub mod db;
pub mod domain;
pub mod jobs;
pub mod ledger;
pub mod logging;
pub mod merkle;
pub mod nats;
pub mod prover;
pub mod routes;
pub mod server;
pub mod setup;
pub mod store;
pub mod sync;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Hash32, MirrorError, Result};
