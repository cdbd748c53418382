//! Rollup job scheduler
//!
//! Each tick asks every work source for its next ready unit, snapshots queue
//! occupancy, and enqueues candidates whose blocking job types are all
//! absent. The in-tick tally is bumped for each enqueued job so a later
//! candidate in the same tick sees it.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::queue::JobQueue;
use super::sources::{Candidate, WorkSource};
use super::types::{Job, JobQueueName, JobType};
use crate::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Enqueued,
    /// The broker already holds this job id
    Duplicate,
    /// A blocking job type is queued or running
    Blocked { by: JobType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job_id: String,
    pub job_type: JobType,
    pub outcome: ScheduleOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub jobs: Vec<ScheduledJob>,
    /// Occupancy after this tick's enqueues
    pub tally: HashMap<JobType, u64>,
}

impl TickReport {
    pub fn outcome(&self, job_type: JobType) -> Option<ScheduleOutcome> {
        self.jobs
            .iter()
            .find(|j| j.job_type == job_type)
            .map(|j| j.outcome)
    }
}

/// Queue-depth counters published by the scheduler
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub ticks: AtomicU64,
    pub enqueued: AtomicU64,
    pub duplicates: AtomicU64,
    pub blocked: AtomicU64,
    depth: DashMap<JobQueueName, u64>,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        for job in &report.jobs {
            let counter = match job.outcome {
                ScheduleOutcome::Enqueued => &self.enqueued,
                ScheduleOutcome::Duplicate => &self.duplicates,
                ScheduleOutcome::Blocked { .. } => &self.blocked,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        for queue in JobQueueName::ALL {
            let depth = report
                .tally
                .iter()
                .filter(|(t, _)| t.queue() == queue)
                .map(|(_, n)| *n)
                .sum();
            self.depth.insert(queue, depth);
        }
    }

    /// Last observed depth per queue
    pub fn depths(&self) -> Vec<(JobQueueName, u64)> {
        let mut depths: Vec<_> = self.depth.iter().map(|e| (*e.key(), *e.value())).collect();
        depths.sort();
        depths
    }
}

pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    sources: Vec<Arc<dyn WorkSource>>,
    metrics: Arc<SchedulerMetrics>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        sources: Vec<Arc<dyn WorkSource>>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            queue,
            sources,
            metrics,
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let mut candidates: Vec<Candidate> = Vec::new();
        for source in &self.sources {
            match source.next_ready().await {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(e) => error!(job_type = %source.job_type(), error = %e, "Work source failed"),
            }
        }

        let mut report = TickReport {
            jobs: Vec::with_capacity(candidates.len()),
            tally: self.queue.occupancy().await?,
        };

        for candidate in candidates {
            let job = Job::new(candidate.job_type, candidate.unique_id);
            let blocker = candidate
                .job_type
                .blocked_by()
                .iter()
                .copied()
                .find(|t| report.tally.get(t).copied().unwrap_or(0) > 0);

            let outcome = if let Some(by) = blocker {
                debug!(job_id = %job.id, blocked_by = %by, "Job blocked by dependency");
                ScheduleOutcome::Blocked { by }
            } else if self.queue.enqueue(&job).await? {
                *report.tally.entry(job.job_type).or_default() += 1;
                info!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
                ScheduleOutcome::Enqueued
            } else {
                debug!(job_id = %job.id, "Job already queued");
                ScheduleOutcome::Duplicate
            };
            report.jobs.push(ScheduledJob {
                job_id: job.id,
                job_type: job.job_type,
                outcome,
            });
        }

        self.metrics.record(&report);
        for (queue, depth) in self.metrics.depths() {
            debug!(queue = %queue, depth, "Queue depth");
        }
        Ok(report)
    }
}

pub fn spawn_scheduler_task(
    scheduler: Arc<Scheduler>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval_timer.tick().await;
            if let Err(e) = scheduler.tick().await {
                error!(error = %e, "Scheduler tick failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::queue::MemoryJobQueue;
    use async_trait::async_trait;

    struct Fixed(Candidate);

    #[async_trait]
    impl WorkSource for Fixed {
        fn job_type(&self) -> JobType {
            self.0.job_type
        }
        async fn next_ready(&self) -> Result<Option<Candidate>> {
            Ok(Some(self.0))
        }
    }

    fn fixed(job_type: JobType, unique_id: u64) -> Arc<dyn WorkSource> {
        Arc::new(Fixed(Candidate {
            job_type,
            unique_id,
        }))
    }

    #[tokio::test]
    async fn test_candidate_sees_same_tick_enqueue() {
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_secs(60)));
        let scheduler = Scheduler::new(
            queue.clone(),
            vec![
                fixed(JobType::Round1Rollup, 0),
                fixed(JobType::FinalizeRound1, 3),
            ],
            Arc::new(SchedulerMetrics::new()),
        );

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.outcome(JobType::Round1Rollup), Some(ScheduleOutcome::Enqueued));
        assert_eq!(
            report.outcome(JobType::FinalizeRound1),
            Some(ScheduleOutcome::Blocked {
                by: JobType::Round1Rollup
            })
        );
        assert_eq!(report.tally.get(&JobType::Round1Rollup), Some(&1));
    }

    #[tokio::test]
    async fn test_repeat_tick_is_duplicate() {
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_secs(60)));
        let metrics = Arc::new(SchedulerMetrics::new());
        let scheduler = Scheduler::new(
            queue,
            vec![fixed(JobType::CommitteeRollup, 2)],
            metrics.clone(),
        );
        scheduler.tick().await.unwrap();
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.outcome(JobType::CommitteeRollup), Some(ScheduleOutcome::Duplicate));
        assert_eq!(metrics.enqueued.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.duplicates.load(Ordering::Relaxed), 1);
        assert!(metrics.depths().contains(&(JobQueueName::Committee, 1)));
    }

    #[tokio::test]
    async fn test_completed_rollup_not_reoffered_before_confirmation() {
        use crate::db::schemas::CursorName;
        use crate::domain::{committee, CommitteeAction, DomainKind};
        use crate::jobs::sources::PendingRollup;
        use crate::ledger::MemoryLedger;
        use crate::store::{MemoryStore, MirrorStore};
        use crate::sync::Ingestor;

        let ledger = Arc::new(MemoryLedger::new());
        let create = CommitteeAction::Create {
            threshold: 1,
            members: vec!["pk".into()],
            ipfs_hash: String::new(),
        };
        ledger.push_action("committee", create.encode());
        let store = Arc::new(MemoryStore::new());
        Ingestor::new(store.clone(), ledger)
            .ingest(&committee::COMMITTEE, "committee")
            .await
            .unwrap();

        let queue = Arc::new(MemoryJobQueue::new(Duration::from_secs(2400)));
        let scheduler = Scheduler::new(
            queue.clone(),
            vec![Arc::new(PendingRollup::new(store.clone(), DomainKind::Committee))],
            Arc::new(SchedulerMetrics::new()),
        );
        let first = scheduler.tick().await.unwrap();
        assert_eq!(first.outcome(JobType::CommitteeRollup), Some(ScheduleOutcome::Enqueued));

        // The job succeeds but its rollup has not been observed on the ledger yet
        let job = queue.next(JobQueueName::Committee).await.unwrap();
        queue.complete(JobQueueName::Committee, &job.id).await;
        let again = scheduler.tick().await.unwrap();
        assert_eq!(again.outcome(JobType::CommitteeRollup), Some(ScheduleOutcome::Duplicate));

        store
            .advance_cursor(DomainKind::Committee, CursorName::Watermark, 0)
            .await
            .unwrap();
        let confirmed = scheduler.tick().await.unwrap();
        assert_eq!(confirmed.outcome(JobType::CommitteeRollup), None);
    }
}
