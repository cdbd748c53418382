//! ledger-mirror - sync pipelines, rollup scheduler and read surface

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use ledger_mirror::{
    config::Args,
    jobs::{
        sources_for, spawn_local_workers, spawn_scheduler_task, JobProcessor, JobQueue,
        MemoryJobQueue, NatsJobQueue, Scheduler, SchedulerMetrics,
    },
    logging::init_tracing,
    merkle::MirrorRegistry,
    prover::RemoteProver,
    server, setup,
    sync::{spawn_pipeline_task, Pipeline},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let addresses = args.domains.enabled();
    let kinds = args.domains.kinds();

    info!("======================================");
    info!("  ledger-mirror {}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Ledger: {}", args.ledger_url.as_deref().unwrap_or("in-memory"));
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB: {}/{}", args.mongodb_uri, args.mongodb_db);
    info!("Domains: {} enabled", kinds.len());
    for domain in &kinds {
        info!("  {}: {}", domain, addresses[domain]);
    }
    info!(
        "Sync every {}s, scheduler every {}s",
        args.sync_interval_secs, args.scheduler_interval_secs
    );
    info!("======================================");

    let store = setup::connect_store(&args).await?;
    let ledger = setup::connect_ledger(&args)?;
    let registry = Arc::new(MirrorRegistry::new());
    let metrics = Arc::new(SchedulerMetrics::new());

    if kinds.is_empty() {
        warn!("No domain addresses configured, nothing to mirror");
    }
    for domain in &kinds {
        let pipeline = Arc::new(Pipeline::new(
            domain.descriptor(),
            addresses[domain].clone(),
            store.clone(),
            ledger.clone(),
            registry.clone(),
            args.reduce_batch_size,
        ));
        spawn_pipeline_task(pipeline, args.sync_interval());
    }

    let nats = setup::connect_nats(&args, "ledger-mirror").await?;
    let queue: Arc<dyn JobQueue> = match nats {
        Some(nats) => {
            Arc::new(NatsJobQueue::new(nats.jetstream(), args.nats.dedupe_window()).await?)
        }
        None => {
            let queue = Arc::new(MemoryJobQueue::new(args.nats.dedupe_window()));
            match (&args.prover_url, &args.submitter_address) {
                (Some(prover_url), Some(sender)) => {
                    let submitter = Arc::new(RemoteProver::new(
                        prover_url,
                        args.prover_timeout(),
                        ledger.clone(),
                    )?);
                    let processor = Arc::new(JobProcessor::new(
                        store.clone(),
                        ledger.clone(),
                        submitter,
                        addresses.clone(),
                        sender.clone(),
                        args.rollup_batch_size,
                    ));
                    spawn_local_workers(queue.clone(), processor);
                    info!("Local job workers started");
                }
                _ => warn!("PROVER_URL or SUBMITTER_ADDRESS not set, jobs will queue but not run"),
            }
            queue
        }
    };

    let scheduler = Arc::new(Scheduler::new(
        queue,
        sources_for(store.clone(), &kinds),
        metrics.clone(),
    ));
    spawn_scheduler_task(scheduler, args.scheduler_interval());

    let state = Arc::new(server::AppState::new(args, store, registry, metrics));
    tokio::select! {
        result = server::run(state) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("ledger-mirror shutting down");
    Ok(())
}
