//! Connection setup shared by both binaries
//!
//! Outside dev mode a backing service that cannot be reached is fatal; in
//! dev mode each one falls back to its in-process counterpart.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::ledger::{HttpLedgerClient, LedgerClient, MemoryLedger, RetryingLedger};
use crate::nats::NatsClient;
use crate::store::{MemoryStore, MirrorStore, MongoStore};
use crate::types::{MirrorError, Result};

/// MongoDB store, or the in-memory store in dev mode when MongoDB is down
pub async fn connect_store(args: &Args) -> Result<Arc<dyn MirrorStore>> {
    match MongoStore::connect(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Ok(Arc::new(store))
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
            Ok(Arc::new(MemoryStore::new()))
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            Err(e)
        }
    }
}

/// Ledger client wrapped in the configured retry policy
pub fn connect_ledger(args: &Args) -> Result<Arc<dyn LedgerClient>> {
    let inner: Arc<dyn LedgerClient> = match &args.ledger_url {
        Some(url) => Arc::new(HttpLedgerClient::new(url.clone(), args.ledger_timeout())?),
        None if args.dev_mode => {
            warn!("LEDGER_URL not set (dev mode, using in-memory ledger)");
            Arc::new(MemoryLedger::new())
        }
        None => return Err(MirrorError::Config("LEDGER_URL is required".to_string())),
    };
    Ok(Arc::new(RetryingLedger::new(inner, args.retry_policy())))
}

/// NATS connection; None in dev mode when the broker is unreachable
pub async fn connect_nats(args: &Args, name: &str) -> Result<Option<NatsClient>> {
    match NatsClient::new(&args.nats, name).await {
        Ok(client) => {
            info!("NATS connected successfully");
            Ok(Some(client))
        }
        Err(e) if args.dev_mode => {
            warn!("NATS connection failed (dev mode, continuing without): {}", e);
            Ok(None)
        }
        Err(e) => {
            error!("NATS connection failed: {}", e);
            Err(e)
        }
    }
}
