//! Job queue seam and the in-process queue used in dev mode and tests

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use super::types::{Job, JobQueueName, JobType};
use crate::types::Result;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queued plus running jobs per type, across every queue
    async fn occupancy(&self) -> Result<HashMap<JobType, u64>>;

    /// Returns false when a job with the same id is already known
    async fn enqueue(&self, job: &Job) -> Result<bool>;
}

#[derive(Debug, Default)]
struct Lane {
    pending: Vec<Job>,
    running: Option<Job>,
}

/// In-process queue with per-queue concurrency of one
pub struct MemoryJobQueue {
    lanes: Mutex<HashMap<JobQueueName, Lane>>,
    notify: HashMap<JobQueueName, Notify>,
    /// Job id -> time accepted or completed, for dedupe
    seen: DashMap<String, Instant>,
    dedupe_window: Duration,
}

impl MemoryJobQueue {
    pub fn new(dedupe_window: Duration) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            notify: JobQueueName::ALL
                .iter()
                .map(|q| (*q, Notify::new()))
                .collect(),
            seen: DashMap::new(),
            dedupe_window,
        }
    }

    /// Take the highest-priority pending job unless one is already running
    pub async fn next(&self, queue: JobQueueName) -> Option<Job> {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes.get_mut(&queue)?;
        if lane.running.is_some() {
            return None;
        }
        // Highest priority, oldest first on ties
        let index = lane
            .pending
            .iter()
            .enumerate()
            .max_by_key(|(i, job)| (job.priority(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i)?;
        let job = lane.pending.remove(index);
        lane.running = Some(job.clone());
        Some(job)
    }

    /// Release the queue's running slot. The dedupe window restarts here so
    /// a finished unit stays suppressed until its result lands on the ledger.
    pub async fn complete(&self, queue: JobQueueName, job_id: &str) {
        let mut lanes = self.lanes.lock().await;
        if let Some(lane) = lanes.get_mut(&queue) {
            if lane.running.as_ref().is_some_and(|j| j.id == job_id) {
                lane.running = None;
                self.seen.insert(job_id.to_string(), Instant::now());
            }
        }
        drop(lanes);
        self.wake(queue);
    }

    /// Wait until a job may be available on `queue`
    pub async fn wait(&self, queue: JobQueueName) {
        if let Some(notify) = self.notify.get(&queue) {
            notify.notified().await;
        }
    }

    fn wake(&self, queue: JobQueueName) {
        if let Some(notify) = self.notify.get(&queue) {
            notify.notify_one();
        }
    }

    fn is_duplicate(&self, id: &str) -> bool {
        self.seen
            .get(id)
            .is_some_and(|at| at.elapsed() < self.dedupe_window)
    }

    fn prune_seen(&self) {
        self.seen.retain(|_, at| at.elapsed() < self.dedupe_window);
    }

    #[cfg(test)]
    fn seen_len(&self) -> usize {
        self.seen.len()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn occupancy(&self) -> Result<HashMap<JobType, u64>> {
        let lanes = self.lanes.lock().await;
        let mut counts: HashMap<JobType, u64> = HashMap::new();
        for lane in lanes.values() {
            for job in lane.pending.iter().chain(lane.running.iter()) {
                *counts.entry(job.job_type).or_default() += 1;
            }
        }
        Ok(counts)
    }

    async fn enqueue(&self, job: &Job) -> Result<bool> {
        let queue = job.job_type.queue();
        self.prune_seen();
        {
            let mut lanes = self.lanes.lock().await;
            let lane = lanes.entry(queue).or_default();
            let in_flight = lane
                .pending
                .iter()
                .chain(lane.running.iter())
                .any(|j| j.id == job.id);
            if in_flight || self.is_duplicate(&job.id) {
                return Ok(false);
            }
            self.seen.insert(job.id.clone(), Instant::now());
            lane.pending.push(job.clone());
        }
        self.wake(queue);
        Ok(true)
    }
}
