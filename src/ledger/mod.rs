//! Ledger client
//!
//! The ledger is the source of truth: it orders each domain's action log,
//! emits confirmation events and holds the committed state field vector. The
//! rest of the crate only talks to it through [`LedgerClient`].

pub mod http;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Hash32, Result};

pub use http::HttpLedgerClient;
pub use memory::MemoryLedger;
pub use retry::{RetryPolicy, RetryingLedger};

/// One entry of a domain's action log as the ledger returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAction {
    pub hash: Hash32,
    pub payload: Vec<String>,
}

/// Event emitted by a domain contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub height: u64,
    pub kind: String,
    #[serde(default)]
    pub data: Vec<String>,
}

/// Committed on-chain field vector of a domain contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub fields: Vec<String>,
}

impl LedgerState {
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Field parsed as a digest, None when absent or not a digest
    pub fn hash_field(&self, index: usize) -> Option<Hash32> {
        self.field(index).and_then(|raw| raw.parse().ok())
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Actions strictly after `from_action_hash`, in ledger order; the whole
    /// log when `from_action_hash` is None
    async fn fetch_actions(
        &self,
        address: &str,
        from_action_hash: Option<&Hash32>,
    ) -> Result<Vec<LedgerAction>>;

    /// Events with `from_height <= height <= to_height`, ascending
    async fn fetch_events(
        &self,
        address: &str,
        from_height: Option<u64>,
        to_height: Option<u64>,
    ) -> Result<Vec<LedgerEvent>>;

    async fn fetch_state(&self, address: &str) -> Result<LedgerState>;

    async fn fetch_nonce(&self, address: &str) -> Result<u64>;

    /// Returns the transaction hash
    async fn submit_transaction(&self, proof: &[u8], sender: &str) -> Result<String>;
}
