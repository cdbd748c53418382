//! JetStream-backed job queue
//!
//! All queues share one work-queue stream. A job is published to
//! `rollup.jobs.{queue}.{jobType}` with its id as `Nats-Msg-Id`, so the
//! broker drops a republish of the same logical unit inside the duplicate
//! window. Messages stay in the stream until acked, so per-subject message
//! counts are the queued plus running occupancy.
//!
//! The window is counted from publish. Configuration keeps it longer than
//! the ack wait plus one sync and scheduler interval, so a unit that was
//! proved is not republished before its confirmation has been synced.

use async_nats::jetstream::{self, stream::Stream};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::queue::JobQueue;
use super::types::{Job, JobQueueName, JobType};
use crate::types::{MirrorError, Result};

pub const STREAM_NAME: &str = "ROLLUP_JOBS";
pub const SUBJECT_PREFIX: &str = "rollup.jobs";

pub fn subject_for(job_type: JobType) -> String {
    format!("{}.{}.{}", SUBJECT_PREFIX, job_type.queue(), job_type)
}

pub fn queue_filter(queue: JobQueueName) -> String {
    format!("{}.{}.>", SUBJECT_PREFIX, queue)
}

/// Job type from the last subject token
fn job_type_of(subject: &str) -> Option<JobType> {
    subject.rsplit('.').next().and_then(|t| t.parse().ok())
}

/// Create the jobs stream if it does not exist yet
pub async fn ensure_stream(
    jetstream: &jetstream::Context,
    dedupe_window: Duration,
) -> Result<Stream> {
    let stream = jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![format!("{}.>", SUBJECT_PREFIX)],
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            duplicate_window: dedupe_window,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        })
        .await
        .map_err(|e| MirrorError::Nats(format!("Failed to create stream: {e}")))?;

    info!(
        "Using stream {} with subjects {}.>",
        STREAM_NAME, SUBJECT_PREFIX
    );
    Ok(stream)
}

pub struct NatsJobQueue {
    jetstream: jetstream::Context,
}

impl NatsJobQueue {
    pub async fn new(jetstream: jetstream::Context, dedupe_window: Duration) -> Result<Self> {
        ensure_stream(&jetstream, dedupe_window).await?;
        Ok(Self { jetstream })
    }
}

#[async_trait]
impl JobQueue for NatsJobQueue {
    async fn occupancy(&self) -> Result<HashMap<JobType, u64>> {
        let stream = self
            .jetstream
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| MirrorError::Nats(format!("Failed to get stream: {e}")))?;
        let mut subjects = stream
            .info_with_subjects(format!("{}.>", SUBJECT_PREFIX))
            .await
            .map_err(|e| MirrorError::Nats(format!("Failed to read stream info: {e}")))?;

        let mut counts = HashMap::new();
        while let Some(entry) = subjects.next().await {
            let (subject, count) =
                entry.map_err(|e| MirrorError::Nats(format!("Failed to read subjects: {e}")))?;
            if let Some(job_type) = job_type_of(&subject) {
                *counts.entry(job_type).or_default() += count as u64;
            }
        }
        Ok(counts)
    }

    async fn enqueue(&self, job: &Job) -> Result<bool> {
        let mut headers = HeaderMap::new();
        headers.insert("Nats-Msg-Id", job.id.as_str());
        let payload = serde_json::to_vec(job)?;

        let ack = self
            .jetstream
            .publish_with_headers(subject_for(job.job_type), headers, payload.into())
            .await
            .map_err(|e| MirrorError::Nats(format!("Publish failed: {e}")))?
            .await
            .map_err(|e| MirrorError::Nats(format!("Publish not acknowledged: {e}")))?;

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Published job"
        );
        Ok(!ack.duplicate)
    }
}
