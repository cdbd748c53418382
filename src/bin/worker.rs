//! ledger-mirror worker - consumes rollup jobs from NATS
//!
//! Run one or more alongside the ledger-mirror service. Each process holds a
//! durable consumer per queue with at most one job in flight.
//!
//! Usage:
//!   ledger-mirror-worker --nats-url nats://localhost:4222 --prover-url http://prover:9000
//!
//! Environment variables are the same as for ledger-mirror; SUBMITTER_ADDRESS
//! and PROVER_URL are required here.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use ledger_mirror::{
    config::Args,
    jobs::{spawn_nats_workers, JobProcessor},
    logging::init_tracing,
    prover::RemoteProver,
    setup,
    types::MirrorError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format);

    if let Err(e) = args.validate_worker() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let worker_id = uuid::Uuid::new_v4();
    let prover_url = args
        .prover_url
        .clone()
        .ok_or_else(|| MirrorError::Config("PROVER_URL is required".to_string()))?;
    let sender = args
        .submitter_address
        .clone()
        .ok_or_else(|| MirrorError::Config("SUBMITTER_ADDRESS is required".to_string()))?;

    info!(
        "Starting ledger-mirror worker {} (NATS: {}, prover: {})",
        worker_id, args.nats.nats_url, prover_url
    );

    let store = setup::connect_store(&args).await?;
    let ledger = setup::connect_ledger(&args)?;
    let nats = setup::connect_nats(&args, &format!("ledger-mirror-worker-{}", worker_id))
        .await?
        .ok_or_else(|| MirrorError::Nats("the worker needs a NATS broker".to_string()))?;

    let submitter = Arc::new(RemoteProver::new(&prover_url, args.prover_timeout(), ledger.clone())?);
    let processor = Arc::new(JobProcessor::new(
        store,
        ledger,
        submitter,
        args.domains.enabled(),
        sender,
        args.rollup_batch_size,
    ));

    let handles = spawn_nats_workers(
        nats.jetstream(),
        processor,
        args.nats.ack_wait(),
        args.nats.dedupe_window(),
    );
    info!("Worker {} consuming {} queues", worker_id, handles.len());

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    for handle in handles {
        handle.abort();
    }

    info!("Worker shutting down");
    Ok(())
}
