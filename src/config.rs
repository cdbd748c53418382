//! Configuration for ledger-mirror
//!
//! CLI arguments and environment variable handling using clap. Both binaries
//! parse the same [`Args`]; a domain is enabled by setting its contract
//! address.

use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::DomainKind;
use crate::ledger::RetryPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-mirror")]
#[command(about = "Off-chain mirror and rollup scheduler for ledger action logs")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory fallbacks for MongoDB, NATS and the ledger)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Ledger archive/gateway base URL (required outside dev mode)
    #[arg(long, env = "LEDGER_URL")]
    pub ledger_url: Option<String>,

    /// Attempts per ledger call before the cycle gives up
    #[arg(long, env = "LEDGER_RETRIES", default_value = "3")]
    pub ledger_retries: u32,

    /// Delay before the first ledger retry, doubled per attempt
    #[arg(long, env = "LEDGER_RETRY_DELAY_MS", default_value = "500")]
    pub ledger_retry_delay_ms: u64,

    /// Ledger request timeout in milliseconds
    #[arg(long, env = "LEDGER_TIMEOUT_MS", default_value = "30000")]
    pub ledger_timeout_ms: u64,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "ledger_mirror")]
    pub mongodb_db: String,

    /// Contract addresses, one per domain
    #[command(flatten)]
    pub domains: DomainArgs,

    /// Seconds between sync cycles of one domain
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value = "180")]
    pub sync_interval_secs: u64,

    /// Seconds between scheduler ticks
    #[arg(long, env = "SCHEDULER_INTERVAL_SECS", default_value = "60")]
    pub scheduler_interval_secs: u64,

    /// Actions folded per reducer batch
    #[arg(long, env = "REDUCE_BATCH_SIZE", default_value = "500")]
    pub reduce_batch_size: usize,

    /// Actions carried by one rollup job
    #[arg(long, env = "ROLLUP_BATCH_SIZE", default_value = "16")]
    pub rollup_batch_size: usize,

    /// Prover service base URL
    #[arg(long, env = "PROVER_URL")]
    pub prover_url: Option<String>,

    /// Prover request timeout in milliseconds
    #[arg(long, env = "PROVER_TIMEOUT_MS", default_value = "600000")]
    pub prover_timeout_ms: u64,

    /// Account that signs rollup transactions (required by the worker)
    #[arg(long, env = "SUBMITTER_ADDRESS")]
    pub submitter_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// NATS connection settings
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// Dedupe window for job ids. Must outlast proving plus the sync cycle
    /// that observes the confirmed result.
    #[arg(long, env = "JOB_DEDUPE_WINDOW_SECS", default_value = "2400")]
    pub job_dedupe_window_secs: u64,

    /// How long a worker may hold a job before redelivery
    #[arg(long, env = "JOB_ACK_WAIT_SECS", default_value = "1800")]
    pub job_ack_wait_secs: u64,
}

impl NatsArgs {
    pub fn dedupe_window(&self) -> Duration {
        Duration::from_secs(self.job_dedupe_window_secs)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.job_ack_wait_secs)
    }
}

#[derive(Parser, Debug, Clone, Default)]
pub struct DomainArgs {
    #[arg(long, env = "COMMITTEE_ADDRESS")]
    pub committee_address: Option<String>,

    #[arg(long, env = "DKG_ADDRESS")]
    pub dkg_address: Option<String>,

    #[arg(long, env = "ROUND1_ADDRESS")]
    pub round1_address: Option<String>,

    #[arg(long, env = "ROUND2_ADDRESS")]
    pub round2_address: Option<String>,

    #[arg(long, env = "REQUEST_ADDRESS")]
    pub request_address: Option<String>,

    #[arg(long, env = "RESPONSE_ADDRESS")]
    pub response_address: Option<String>,

    #[arg(long, env = "CAMPAIGN_ADDRESS")]
    pub campaign_address: Option<String>,

    #[arg(long, env = "PROJECT_ADDRESS")]
    pub project_address: Option<String>,

    #[arg(long, env = "PARTICIPATION_ADDRESS")]
    pub participation_address: Option<String>,

    #[arg(long, env = "FUNDING_ADDRESS")]
    pub funding_address: Option<String>,

    #[arg(long, env = "TREASURY_ADDRESS")]
    pub treasury_address: Option<String>,
}

impl DomainArgs {
    pub fn address(&self, domain: DomainKind) -> Option<&str> {
        let address = match domain {
            DomainKind::Committee => &self.committee_address,
            DomainKind::Dkg => &self.dkg_address,
            DomainKind::Round1 => &self.round1_address,
            DomainKind::Round2 => &self.round2_address,
            DomainKind::Request => &self.request_address,
            DomainKind::Response => &self.response_address,
            DomainKind::Campaign => &self.campaign_address,
            DomainKind::Project => &self.project_address,
            DomainKind::Participation => &self.participation_address,
            DomainKind::Funding => &self.funding_address,
            DomainKind::Treasury => &self.treasury_address,
        };
        address.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }

    /// Contract address by domain, enabled domains only
    pub fn enabled(&self) -> HashMap<DomainKind, String> {
        DomainKind::ALL
            .iter()
            .filter_map(|d| self.address(*d).map(|a| (*d, a.to_string())))
            .collect()
    }

    /// Enabled domains in declaration order
    pub fn kinds(&self) -> Vec<DomainKind> {
        DomainKind::ALL
            .iter()
            .copied()
            .filter(|d| self.address(*d).is_some())
            .collect()
    }
}

impl Args {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.ledger_retries,
            Duration::from_millis(self.ledger_retry_delay_ms),
        )
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn prover_timeout(&self) -> Duration {
        Duration::from_millis(self.prover_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_interval_secs == 0 || self.scheduler_interval_secs == 0 {
            return Err("SYNC_INTERVAL_SECS and SCHEDULER_INTERVAL_SECS must be positive".to_string());
        }
        if self.reduce_batch_size == 0 || self.rollup_batch_size == 0 {
            return Err("REDUCE_BATCH_SIZE and ROLLUP_BATCH_SIZE must be positive".to_string());
        }
        if self.ledger_retries == 0 {
            return Err("LEDGER_RETRIES must be at least 1".to_string());
        }
        let settle_secs = self
            .nats
            .job_ack_wait_secs
            .saturating_add(self.sync_interval_secs)
            .saturating_add(self.scheduler_interval_secs);
        if self.nats.job_dedupe_window_secs < settle_secs {
            return Err(format!(
                "JOB_DEDUPE_WINDOW_SECS must be at least JOB_ACK_WAIT_SECS + SYNC_INTERVAL_SECS + SCHEDULER_INTERVAL_SECS ({})",
                settle_secs
            ));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!("LOG_FORMAT must be text or json, got {}", self.log_format));
        }

        if !self.dev_mode {
            if self.ledger_url.is_none() {
                return Err("LEDGER_URL is required in production mode".to_string());
            }
            if self.domains.kinds().is_empty() {
                return Err("At least one domain contract address must be set".to_string());
            }
        }

        Ok(())
    }

    /// Validate configuration for the worker binary
    pub fn validate_worker(&self) -> Result<(), String> {
        self.validate()?;
        if self.submitter_address.is_none() {
            return Err("SUBMITTER_ADDRESS is required by the worker".to_string());
        }
        if !self.dev_mode && self.prover_url.is_none() {
            return Err("PROVER_URL is required in production mode".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["ledger-mirror"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_dev_mode_needs_no_domains() {
        let args = parse(&["--dev-mode"]);
        assert!(args.validate().is_ok());
        assert!(args.domains.enabled().is_empty());
    }

    #[test]
    fn test_production_requires_domains_and_ledger() {
        let args = parse(&["--ledger-url", "http://ledger:8080"]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--ledger-url",
            "http://ledger:8080",
            "--committee-address",
            "B62committee",
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(args.domains.kinds(), vec![DomainKind::Committee]);
        assert_eq!(
            args.domains.enabled().get(&DomainKind::Committee).map(String::as_str),
            Some("B62committee")
        );
    }

    #[test]
    fn test_rejects_zero_batches() {
        let args = parse(&["--dev-mode", "--reduce-batch-size", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_dedupe_window_covers_confirmation() {
        let args = parse(&["--dev-mode"]);
        let settle = args.nats.ack_wait() + args.sync_interval() + args.scheduler_interval();
        assert!(args.validate().is_ok());
        assert!(args.nats.dedupe_window() >= settle);

        let args = parse(&["--dev-mode", "--job-dedupe-window-secs", "60"]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--dev-mode",
            "--job-dedupe-window-secs",
            "300",
            "--job-ack-wait-secs",
            "120",
            "--sync-interval-secs",
            "60",
            "--scheduler-interval-secs",
            "30",
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_worker_requires_submitter() {
        let args = parse(&["--dev-mode"]);
        assert!(args.validate_worker().is_err());

        let args = parse(&["--dev-mode", "--submitter-address", "B62sender"]);
        assert!(args.validate_worker().is_ok());
    }
}
