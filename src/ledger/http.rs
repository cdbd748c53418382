//! JSON-over-HTTP ledger client
//!
//! Speaks to a ledger archive/gateway:
//!
//! - `GET  {base}/accounts/{address}/actions?fromActionHash=`
//! - `GET  {base}/accounts/{address}/events?fromHeight=&toHeight=`
//! - `GET  {base}/accounts/{address}/state`
//! - `GET  {base}/accounts/{address}/nonce`
//! - `POST {base}/transactions`

use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{LedgerAction, LedgerClient, LedgerEvent, LedgerState};
use crate::types::{Hash32, MirrorError, Result};

#[derive(Deserialize)]
struct ActionsResponse {
    actions: Vec<LedgerAction>,
}

#[derive(Deserialize)]
struct EventsResponse {
    events: Vec<LedgerEvent>,
}

#[derive(Deserialize)]
struct NonceResponse {
    nonce: u64,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    proof: String,
    sender: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    tx_hash: String,
}

pub struct HttpLedgerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ledger-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn account_url(&self, address: &str, resource: &str) -> String {
        format!("{}/accounts/{}/{}", self.base_url, address, resource)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!(url = %url, "Ledger GET");
        let response = self.client.get(url).query(query).send().await?;
        Self::decode(url, response).await
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::Ledger(format!(
                "HTTP {} from {}: {}",
                status, url, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| MirrorError::Decode(format!("invalid ledger response from {}: {}", url, e)))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn fetch_actions(
        &self,
        address: &str,
        from_action_hash: Option<&Hash32>,
    ) -> Result<Vec<LedgerAction>> {
        let mut query = Vec::new();
        if let Some(hash) = from_action_hash {
            query.push(("fromActionHash", hash.to_hex()));
        }
        let response: ActionsResponse = self
            .get_json(&self.account_url(address, "actions"), &query)
            .await?;
        Ok(response.actions)
    }

    async fn fetch_events(
        &self,
        address: &str,
        from_height: Option<u64>,
        to_height: Option<u64>,
    ) -> Result<Vec<LedgerEvent>> {
        let mut query = Vec::new();
        if let Some(from) = from_height {
            query.push(("fromHeight", from.to_string()));
        }
        if let Some(to) = to_height {
            query.push(("toHeight", to.to_string()));
        }
        let response: EventsResponse = self
            .get_json(&self.account_url(address, "events"), &query)
            .await?;
        Ok(response.events)
    }

    async fn fetch_state(&self, address: &str) -> Result<LedgerState> {
        self.get_json(&self.account_url(address, "state"), &[]).await
    }

    async fn fetch_nonce(&self, address: &str) -> Result<u64> {
        let response: NonceResponse = self
            .get_json(&self.account_url(address, "nonce"), &[])
            .await?;
        Ok(response.nonce)
    }

    async fn submit_transaction(&self, proof: &[u8], sender: &str) -> Result<String> {
        let url = format!("{}/transactions", self.base_url);
        let body = SubmitRequest {
            proof: base64::engine::general_purpose::STANDARD.encode(proof),
            sender,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MirrorError::ProofSubmission(format!("submit failed: {}", e)))?;
        let submitted: SubmitResponse = Self::decode(&url, response).await?;
        Ok(submitted.tx_hash)
    }
}
