//! Health check endpoint
//!
//! Liveness plus a summary of what the process is mirroring: per-domain root
//! and watermark of the last completed rebuild, and the scheduler's last
//! observed queue depths. Returns 200 whenever the process is running;
//! `status` is `degraded` when the store does not answer a ping.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::domain::DomainKind;
use crate::jobs::JobQueueName;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// `online` or `degraded`
    pub status: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub build_timestamp: &'static str,
    pub uptime: u64,
    pub timestamp: String,
    pub mode: &'static str,
    pub store_connected: bool,
    pub domains: Vec<DomainHealth>,
    pub queues: Vec<QueueDepth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainHealth {
    pub domain: DomainKind,
    pub root: String,
    pub watermark: Option<u64>,
    pub occupied: usize,
    pub built_at: String,
}

#[derive(Serialize)]
pub struct QueueDepth {
    pub queue: JobQueueName,
    pub depth: u64,
}

async fn build_health_response(state: &AppState) -> HealthResponse {
    let ping = state.store.ping().await;

    let domains = state
        .registry
        .domains()
        .into_iter()
        .filter_map(|d| state.registry.get(d))
        .map(|mirror| DomainHealth {
            domain: mirror.domain(),
            root: mirror.root().to_hex(),
            watermark: mirror.watermark(),
            occupied: mirror.occupied(),
            built_at: mirror.built_at().to_rfc3339(),
        })
        .collect();

    let queues = state
        .metrics
        .depths()
        .into_iter()
        .map(|(queue, depth)| QueueDepth { queue, depth })
        .collect();

    HealthResponse {
        healthy: true,
        status: if ping.is_ok() { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_SHORT"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        store_connected: ping.is_ok(),
        domains,
        queues,
        error: ping.err().map(|e| e.to_string()),
    }
}

pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = build_health_response(state).await;
    json_response(StatusCode::OK, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::jobs::SchedulerMetrics;
    use crate::merkle::MirrorRegistry;
    use crate::store::MemoryStore;
    use clap::Parser;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_reports_store_and_mode() {
        let state = AppState::new(
            Args::parse_from(["ledger-mirror", "--dev-mode"]),
            Arc::new(MemoryStore::new()),
            Arc::new(MirrorRegistry::new()),
            Arc::new(SchedulerMetrics::new()),
        );
        let response = health_check(&state).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["healthy"], true);
        assert_eq!(body["status"], "online");
        assert_eq!(body["storeConnected"], true);
        assert_eq!(body["mode"], "development");
        assert!(body["domains"].as_array().unwrap().is_empty());
        assert!(body.get("error").is_none());
    }
}
