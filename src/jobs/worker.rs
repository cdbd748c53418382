//! Job workers
//!
//! One worker per queue, each holding at most one job at a time. The NATS
//! worker pulls from a durable consumer with `max_ack_pending = 1`; the
//! local worker drains a [`MemoryJobQueue`] lane.

use async_nats::jetstream::{self, consumer::PullConsumer, AckKind};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::nats::{ensure_stream, queue_filter};
use super::processor::JobProcessor;
use super::queue::MemoryJobQueue;
use super::types::{Job, JobQueueName};
use crate::types::{MirrorError, Result};

const CONSUMER_NAME_PREFIX: &str = "rollup";

/// Run one job and log the outcome
pub async fn run_job(processor: &JobProcessor, job: &Job) -> Result<Option<String>> {
    let result = processor.process(job).await;
    match &result {
        Ok(Some(tx_hash)) => info!(job_id = %job.id, tx_hash = %tx_hash, "Job completed"),
        Ok(None) => debug!(job_id = %job.id, "Job had nothing to do"),
        Err(e) => error!(job_id = %job.id, job_type = %job.job_type, error = %e, "Job failed"),
    }
    result
}

pub struct NatsJobWorker {
    jetstream: jetstream::Context,
    queue: JobQueueName,
    processor: Arc<JobProcessor>,
    ack_wait: Duration,
    dedupe_window: Duration,
}

impl NatsJobWorker {
    pub fn new(
        jetstream: jetstream::Context,
        queue: JobQueueName,
        processor: Arc<JobProcessor>,
        ack_wait: Duration,
        dedupe_window: Duration,
    ) -> Self {
        Self {
            jetstream,
            queue,
            processor,
            ack_wait,
            dedupe_window,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let consumer = self.ensure_consumer().await?;
        info!(queue = %self.queue, "Worker starting job loop");

        loop {
            if let Err(e) = self.process_next(&consumer).await {
                error!(queue = %self.queue, error = %e, "Error fetching job");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    async fn ensure_consumer(&self) -> Result<PullConsumer> {
        let stream = ensure_stream(&self.jetstream, self.dedupe_window).await?;
        let consumer_name = format!("{}_{}", CONSUMER_NAME_PREFIX, self.queue);

        let consumer = stream
            .get_or_create_consumer(
                &consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: queue_filter(self.queue),
                    max_ack_pending: 1,
                    ack_wait: self.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MirrorError::Nats(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", consumer_name);
        Ok(consumer)
    }

    async fn process_next(&self, consumer: &PullConsumer) -> Result<()> {
        let mut messages = consumer
            .fetch()
            .max_messages(1)
            .expires(Duration::from_secs(5))
            .messages()
            .await
            .map_err(|e| MirrorError::Nats(format!("Failed to fetch messages: {e}")))?;

        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => self.process_message(msg).await,
                Err(e) => warn!("Error receiving message: {}", e),
            }
        }
        Ok(())
    }

    async fn process_message(&self, msg: jetstream::Message) {
        let job: Job = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(e) => {
                error!(subject = %msg.subject, "Failed to parse job: {}", e);
                if let Err(e) = msg.ack_with(AckKind::Term).await {
                    warn!("Failed to terminate malformed message: {}", e);
                }
                return;
            }
        };

        // No redelivery: the scheduler offers the unit again once the
        // dedupe window has passed
        let ack = match run_job(&self.processor, &job).await {
            Ok(_) => AckKind::Ack,
            Err(_) => AckKind::Term,
        };
        if let Err(e) = msg.ack_with(ack).await {
            warn!(job_id = %job.id, "Failed to ack job: {}", e);
        }
    }
}

/// One NATS worker task per queue
pub fn spawn_nats_workers(
    jetstream: jetstream::Context,
    processor: Arc<JobProcessor>,
    ack_wait: Duration,
    dedupe_window: Duration,
) -> Vec<tokio::task::JoinHandle<()>> {
    JobQueueName::ALL
        .iter()
        .map(|queue| {
            let worker = NatsJobWorker::new(
                jetstream.clone(),
                *queue,
                processor.clone(),
                ack_wait,
                dedupe_window,
            );
            tokio::spawn(async move {
                if let Err(e) = worker.run().await {
                    error!(queue = %worker.queue, error = %e, "Worker stopped");
                }
            })
        })
        .collect()
}

/// One local worker task per queue, draining the in-process queue
pub fn spawn_local_workers(
    queue: Arc<MemoryJobQueue>,
    processor: Arc<JobProcessor>,
) -> Vec<tokio::task::JoinHandle<()>> {
    JobQueueName::ALL
        .iter()
        .map(|name| {
            let name = *name;
            let queue = queue.clone();
            let processor = processor.clone();
            tokio::spawn(async move {
                loop {
                    match queue.next(name).await {
                        Some(job) => {
                            let _ = run_job(&processor, &job).await;
                            queue.complete(name, &job.id).await;
                        }
                        None => queue.wait(name).await,
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{committee, CommitteeAction, DomainKind};
    use crate::jobs::{JobQueue, JobType};
    use crate::ledger::MemoryLedger;
    use crate::merkle::MirrorRegistry;
    use crate::prover::{ProofSubmitter, RollupInput};
    use crate::store::MemoryStore;
    use crate::sync::Pipeline;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    struct ChannelSubmitter(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl ProofSubmitter for ChannelSubmitter {
        async fn submit(&self, input: &RollupInput) -> Result<String> {
            let _ = self.0.send(input.job_id.clone());
            Ok("0xfeed".to_string())
        }
    }

    #[tokio::test]
    async fn test_local_worker_runs_enqueued_job() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let create = CommitteeAction::Create {
            threshold: 1,
            members: vec!["pk".into()],
            ipfs_hash: String::new(),
        };
        ledger.push_action("committee", create.encode());
        Pipeline::new(
            &committee::COMMITTEE,
            "committee",
            store.clone(),
            ledger.clone(),
            Arc::new(MirrorRegistry::new()),
            10,
        )
        .run_cycle()
        .await
        .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let processor = Arc::new(JobProcessor::new(
            store,
            ledger,
            Arc::new(ChannelSubmitter(tx)),
            HashMap::from([(DomainKind::Committee, "committee".to_string())]),
            "sender",
            10,
        ));
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_secs(60)));
        let handles = spawn_local_workers(queue.clone(), processor);

        assert!(queue.enqueue(&Job::new(JobType::CommitteeRollup, 0)).await.unwrap());
        let job_id = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job_id, "committee_rollup-0");

        for handle in handles {
            handle.abort();
        }
    }
}
