//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Every route is a GET;
//! handlers only read the store and the last published mirrors.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::jobs::SchedulerMetrics;
use crate::merkle::MirrorRegistry;
use crate::routes;
use crate::store::MirrorStore;
use crate::types::{MirrorError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn MirrorStore>,
    /// Last completed rebuild per domain
    pub registry: Arc<MirrorRegistry>,
    pub metrics: Arc<SchedulerMetrics>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        store: Arc<dyn MirrorStore>,
        registry: Arc<MirrorRegistry>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            args,
            store,
            registry,
            metrics,
            started_at: Instant::now(),
        }
    }
}

pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| MirrorError::Config(format!("Failed to bind {}: {}", state.args.listen, e)))?;

    info!("ledger-mirror listening on {}", state.args.listen);
    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory fallbacks allowed");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();
    debug!("{} {} from {}", req.method(), path, addr);

    if req.method() != Method::GET {
        return Ok(routes::error_response(&MirrorError::NotFound(format!(
            "{} {}",
            req.method(),
            path
        ))));
    }

    Ok(route(&state, &path).await)
}

/// Dispatch a GET by path
pub async fn route(state: &AppState, path: &str) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["health"] | ["healthz"] => routes::health_check(state).await,
        ["entities", domain] => routes::list_entities(state, domain).await,
        ["entities", domain, key] => routes::get_entity(state, domain, key).await,
        ["witness", domain, level1] => routes::get_witness(state, domain, level1, None),
        ["witness", domain, level1, level2] => {
            routes::get_witness(state, domain, level1, Some(level2))
        }
        _ => routes::error_response(&MirrorError::NotFound(format!("route {}", path))),
    }
}
