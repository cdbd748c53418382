//! Rollup job scheduling and execution
//!
//! Provides two modes:
//! - **Local mode**: in-process queue and workers (dev mode, tests)
//! - **NATS mode**: JetStream work-queue stream with one durable consumer per queue
//!
//! The scheduler only discovers and enqueues work. Workers rebuild the
//! mirror, check it against the ledger and submit the proof.

pub mod nats;
pub mod processor;
pub mod queue;
pub mod scheduler;
pub mod sources;
pub mod types;
pub mod worker;

pub use nats::{ensure_stream, NatsJobQueue, STREAM_NAME, SUBJECT_PREFIX};
pub use processor::JobProcessor;
pub use queue::{JobQueue, MemoryJobQueue};
pub use scheduler::{
    spawn_scheduler_task, ScheduleOutcome, ScheduledJob, Scheduler, SchedulerMetrics, TickReport,
};
pub use sources::{sources_for, Candidate, WorkSource};
pub use types::{Job, JobQueueName, JobType};
pub use worker::{run_job, spawn_local_workers, spawn_nats_workers, NatsJobWorker};
