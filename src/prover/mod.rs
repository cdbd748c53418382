//! Proof submission
//!
//! Proof construction is an external service. The processor hands it a
//! [`RollupInput`] carrying the pending records with their witnesses; the
//! returned proof is submitted to the ledger as a transaction.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::{Action, DomainKind};
use crate::jobs::JobType;
use crate::ledger::LedgerClient;
use crate::merkle::MirrorWitness;
use crate::types::{Hash32, MirrorError, Result};

/// One pending action with the witness for the slot it writes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupAction {
    pub action_id: u64,
    pub action_hash: Hash32,
    pub payload: Vec<String>,
    pub action: Action,
    pub witness: Option<MirrorWitness>,
}

/// Records a finalize job proves, read from the source domain's mirror
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeInput {
    pub source: DomainKind,
    pub source_root: Hash32,
    /// Natural id of the finalized unit (key index or request id)
    pub unit_id: u64,
    /// Slot in the target domain the finalization updates
    pub target_witness: MirrorWitness,
    pub members: Vec<MirrorWitness>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupInput {
    pub job_id: String,
    pub job_type: JobType,
    pub domain: DomainKind,
    pub address: String,
    pub previous_root: Hash32,
    pub previous_action_hash: Hash32,
    pub actions: Vec<RollupAction>,
    pub finalize: Option<FinalizeInput>,
    pub sender: String,
    pub nonce: u64,
}

#[async_trait]
pub trait ProofSubmitter: Send + Sync {
    /// Prove and submit; returns the ledger transaction hash
    async fn submit(&self, input: &RollupInput) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ProveResponse {
    /// Base64-encoded proof bytes
    proof: String,
}

/// Prover reachable over HTTP, submitting through the ledger client
pub struct RemoteProver {
    client: reqwest::Client,
    prove_url: String,
    ledger: Arc<dyn LedgerClient>,
}

impl RemoteProver {
    pub fn new(prover_url: &str, timeout: Duration, ledger: Arc<dyn LedgerClient>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ledger-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MirrorError::Config(format!("Failed to build prover client: {}", e)))?;
        Ok(Self {
            client,
            prove_url: format!("{}/prove", prover_url.trim_end_matches('/')),
            ledger,
        })
    }

    async fn prove(&self, input: &RollupInput) -> Result<Vec<u8>> {
        debug!(job_id = %input.job_id, url = %self.prove_url, "Requesting proof");
        let response = self
            .client
            .post(&self.prove_url)
            .json(input)
            .send()
            .await
            .map_err(|e| MirrorError::ProofSubmission(format!("Prover unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::ProofSubmission(format!(
                "Prover returned {}: {}",
                status, body
            )));
        }

        let body: ProveResponse = response
            .json()
            .await
            .map_err(|e| MirrorError::ProofSubmission(format!("Invalid prover response: {}", e)))?;
        decode_proof(&body.proof)
    }
}

fn decode_proof(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| MirrorError::ProofSubmission(format!("Proof is not base64: {}", e)))
}

#[async_trait]
impl ProofSubmitter for RemoteProver {
    async fn submit(&self, input: &RollupInput) -> Result<String> {
        let proof = self.prove(input).await?;
        let tx_hash = self
            .ledger
            .submit_transaction(&proof, &input.sender)
            .await
            .map_err(|e| MirrorError::ProofSubmission(format!("Submission rejected: {}", e)))?;
        info!(
            job_id = %input.job_id,
            domain = %input.domain,
            tx_hash = %tx_hash,
            "Submitted rollup transaction"
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prove_response_decoding() {
        let body: ProveResponse = serde_json::from_str(r#"{"proof":"AQID"}"#).unwrap();
        assert_eq!(decode_proof(&body.proof).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            decode_proof("not base64!"),
            Err(MirrorError::ProofSubmission(_))
        ));
    }

    #[test]
    fn test_prove_url_join() {
        let ledger = Arc::new(crate::ledger::MemoryLedger::new());
        let prover = RemoteProver::new("http://prover:9000/", Duration::from_secs(1), ledger).unwrap();
        assert_eq!(prover.prove_url, "http://prover:9000/prove");
    }
}
