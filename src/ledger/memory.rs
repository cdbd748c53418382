//! Scriptable in-process ledger
//!
//! Backs dev mode and the test suite. Accounts are created on first use.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{LedgerAction, LedgerClient, LedgerEvent, LedgerState};
use crate::domain::{hash_payload, ROLLUP_EVENT};
use crate::types::{Hash32, MirrorError, Result};

#[derive(Debug, Default, Clone)]
struct Account {
    actions: Vec<LedgerAction>,
    events: Vec<LedgerEvent>,
    state: LedgerState,
    nonce: u64,
}

/// A transaction accepted by [`MemoryLedger::submit_transaction`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub tx_hash: String,
    pub sender: String,
    pub proof: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: DashMap<String, Account>,
    submissions: Mutex<Vec<SubmittedTransaction>>,
    /// Number of upcoming reads that fail with a transient error
    failures: AtomicU32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action; returns its hash
    pub fn push_action(&self, address: &str, payload: Vec<String>) -> Hash32 {
        let hash = hash_payload(&payload);
        self.accounts
            .entry(address.to_string())
            .or_default()
            .actions
            .push(LedgerAction { hash, payload });
        hash
    }

    /// Append an event at the next height; returns the height
    pub fn push_event(&self, address: &str, kind: &str, data: Vec<String>) -> u64 {
        let mut account = self.accounts.entry(address.to_string()).or_default();
        let height = account.events.last().map(|e| e.height + 1).unwrap_or(1);
        account.events.push(LedgerEvent {
            height,
            kind: kind.to_string(),
            data,
        });
        height
    }

    /// Emit a rollup confirmation referencing `action_hash`
    pub fn confirm(&self, address: &str, action_hash: &Hash32) -> u64 {
        self.push_event(address, ROLLUP_EVENT, vec![action_hash.to_hex()])
    }

    pub fn set_state(&self, address: &str, fields: Vec<String>) {
        self.accounts.entry(address.to_string()).or_default().state = LedgerState { fields };
    }

    pub fn set_nonce(&self, address: &str, nonce: u64) {
        self.accounts.entry(address.to_string()).or_default().nonce = nonce;
    }

    /// Make the next `count` reads fail with [`MirrorError::Ledger`]
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<SubmittedTransaction> {
        self.submissions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn check_failure(&self) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MirrorError::Ledger("injected ledger failure".to_string()));
        }
        Ok(())
    }

    fn account(&self, address: &str) -> Account {
        self.accounts
            .get(address)
            .map(|a| a.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn fetch_actions(
        &self,
        address: &str,
        from_action_hash: Option<&Hash32>,
    ) -> Result<Vec<LedgerAction>> {
        self.check_failure()?;
        let actions = self.account(address).actions;
        let start = match from_action_hash {
            None => 0,
            Some(from) => match actions.iter().position(|a| &a.hash == from) {
                Some(i) => i + 1,
                None => {
                    return Err(MirrorError::ChainBroken(format!(
                        "ledger does not know action {}",
                        from
                    )))
                }
            },
        };
        Ok(actions[start..].to_vec())
    }

    async fn fetch_events(
        &self,
        address: &str,
        from_height: Option<u64>,
        to_height: Option<u64>,
    ) -> Result<Vec<LedgerEvent>> {
        self.check_failure()?;
        let from = from_height.unwrap_or(0);
        let to = to_height.unwrap_or(u64::MAX);
        Ok(self
            .account(address)
            .events
            .into_iter()
            .filter(|e| e.height >= from && e.height <= to)
            .collect())
    }

    async fn fetch_state(&self, address: &str) -> Result<LedgerState> {
        self.check_failure()?;
        Ok(self.account(address).state)
    }

    async fn fetch_nonce(&self, address: &str) -> Result<u64> {
        self.check_failure()?;
        Ok(self.account(address).nonce)
    }

    async fn submit_transaction(&self, proof: &[u8], sender: &str) -> Result<String> {
        let tx_hash = Hash32::digest(&[sender.as_bytes(), proof]).to_hex();
        self.accounts.entry(sender.to_string()).or_default().nonce += 1;
        let mut submissions = self
            .submissions
            .lock()
            .map_err(|_| MirrorError::Internal("submission log poisoned".to_string()))?;
        submissions.push(SubmittedTransaction {
            tx_hash: tx_hash.clone(),
            sender: sender.to_string(),
            proof: proof.to_vec(),
        });
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_after_cursor() {
        let ledger = MemoryLedger::new();
        let a = ledger.push_action("acc", vec!["0".into()]);
        let b = ledger.push_action("acc", vec!["1".into()]);
        assert_eq!(ledger.fetch_actions("acc", None).await.unwrap().len(), 2);
        let after_a = ledger.fetch_actions("acc", Some(&a)).await.unwrap();
        assert_eq!(after_a.len(), 1);
        assert_eq!(after_a[0].hash, b);
        assert!(ledger.fetch_actions("acc", Some(&b)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_event_height_window() {
        let ledger = MemoryLedger::new();
        for _ in 0..4 {
            ledger.push_event("acc", "rollup", vec![]);
        }
        let window = ledger.fetch_events("acc", Some(2), Some(3)).await.unwrap();
        let heights: Vec<u64> = window.iter().map(|e| e.height).collect();
        assert_eq!(heights, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let ledger = MemoryLedger::new();
        ledger.fail_next(1);
        let err = ledger.fetch_state("acc").await.unwrap_err();
        assert!(err.is_transient());
        tokio_test::assert_ok!(ledger.fetch_state("acc").await);
    }

    #[tokio::test]
    async fn test_submission_bumps_nonce() {
        let ledger = MemoryLedger::new();
        ledger.submit_transaction(b"proof", "B62qSender").await.unwrap();
        assert_eq!(ledger.fetch_nonce("B62qSender").await.unwrap(), 1);
        assert_eq!(ledger.submissions().len(), 1);
    }
}
