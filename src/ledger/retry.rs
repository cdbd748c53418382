//! Bounded retry for ledger calls

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{LedgerAction, LedgerClient, LedgerEvent, LedgerState};
use crate::types::{Hash32, Result};

/// Bounded attempts with a doubling delay between them
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient ledger error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// [`LedgerClient`] decorator applying a [`RetryPolicy`] to every read.
/// Submissions are never retried.
pub struct RetryingLedger {
    inner: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
}

impl RetryingLedger {
    pub fn new(inner: Arc<dyn LedgerClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LedgerClient for RetryingLedger {
    async fn fetch_actions(
        &self,
        address: &str,
        from_action_hash: Option<&Hash32>,
    ) -> Result<Vec<LedgerAction>> {
        self.policy
            .run("fetch_actions", move || self.inner.fetch_actions(address, from_action_hash))
            .await
    }

    async fn fetch_events(
        &self,
        address: &str,
        from_height: Option<u64>,
        to_height: Option<u64>,
    ) -> Result<Vec<LedgerEvent>> {
        self.policy
            .run("fetch_events", move || {
                self.inner.fetch_events(address, from_height, to_height)
            })
            .await
    }

    async fn fetch_state(&self, address: &str) -> Result<LedgerState> {
        self.policy
            .run("fetch_state", move || self.inner.fetch_state(address))
            .await
    }

    async fn fetch_nonce(&self, address: &str) -> Result<u64> {
        self.policy
            .run("fetch_nonce", move || self.inner.fetch_nonce(address))
            .await
    }

    async fn submit_transaction(&self, proof: &[u8], sender: &str) -> Result<String> {
        self.inner.submit_transaction(proof, sender).await
    }
}
