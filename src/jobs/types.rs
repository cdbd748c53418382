//! Rollup job descriptors
//!
//! Job types, their static dependency map, priority table and queue
//! assignment. A job of type T may only be scheduled while no job of any
//! type in `T::blocked_by()` is queued or running.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::DomainKind;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CommitteeRollup,
    DkgRollup,
    Round1Rollup,
    Round2Rollup,
    FinalizeRound1,
    FinalizeRound2,
    RequestRollup,
    ResponseRollup,
    FinalizeResponse,
    CampaignRollup,
    ProjectRollup,
    ParticipationRollup,
    FundingRollup,
    TreasuryRollup,
}

/// Serial pipeline a job runs on. One worker per queue.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobQueueName {
    Committee,
    Dkg,
    Request,
    Campaign,
}

impl JobQueueName {
    pub const ALL: [JobQueueName; 4] = [
        JobQueueName::Committee,
        JobQueueName::Dkg,
        JobQueueName::Request,
        JobQueueName::Campaign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committee => "committee",
            Self::Dkg => "dkg",
            Self::Request => "request",
            Self::Campaign => "campaign",
        }
    }
}

impl fmt::Display for JobQueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobType {
    pub const ALL: [JobType; 14] = [
        JobType::CommitteeRollup,
        JobType::DkgRollup,
        JobType::Round1Rollup,
        JobType::Round2Rollup,
        JobType::FinalizeRound1,
        JobType::FinalizeRound2,
        JobType::RequestRollup,
        JobType::ResponseRollup,
        JobType::FinalizeResponse,
        JobType::CampaignRollup,
        JobType::ProjectRollup,
        JobType::ParticipationRollup,
        JobType::FundingRollup,
        JobType::TreasuryRollup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommitteeRollup => "committee_rollup",
            Self::DkgRollup => "dkg_rollup",
            Self::Round1Rollup => "round1_rollup",
            Self::Round2Rollup => "round2_rollup",
            Self::FinalizeRound1 => "finalize_round1",
            Self::FinalizeRound2 => "finalize_round2",
            Self::RequestRollup => "request_rollup",
            Self::ResponseRollup => "response_rollup",
            Self::FinalizeResponse => "finalize_response",
            Self::CampaignRollup => "campaign_rollup",
            Self::ProjectRollup => "project_rollup",
            Self::ParticipationRollup => "participation_rollup",
            Self::FundingRollup => "funding_rollup",
            Self::TreasuryRollup => "treasury_rollup",
        }
    }

    /// Rollup job for a domain's pending actions
    pub fn rollup_for(domain: DomainKind) -> Self {
        match domain {
            DomainKind::Committee => Self::CommitteeRollup,
            DomainKind::Dkg => Self::DkgRollup,
            DomainKind::Round1 => Self::Round1Rollup,
            DomainKind::Round2 => Self::Round2Rollup,
            DomainKind::Request => Self::RequestRollup,
            DomainKind::Response => Self::ResponseRollup,
            DomainKind::Campaign => Self::CampaignRollup,
            DomainKind::Project => Self::ProjectRollup,
            DomainKind::Participation => Self::ParticipationRollup,
            DomainKind::Funding => Self::FundingRollup,
            DomainKind::Treasury => Self::TreasuryRollup,
        }
    }

    /// Domain whose contract receives the submission
    pub fn target(&self) -> DomainKind {
        match self {
            Self::CommitteeRollup => DomainKind::Committee,
            Self::DkgRollup | Self::FinalizeRound1 | Self::FinalizeRound2 => DomainKind::Dkg,
            Self::Round1Rollup => DomainKind::Round1,
            Self::Round2Rollup => DomainKind::Round2,
            Self::RequestRollup | Self::FinalizeResponse => DomainKind::Request,
            Self::ResponseRollup => DomainKind::Response,
            Self::CampaignRollup => DomainKind::Campaign,
            Self::ProjectRollup => DomainKind::Project,
            Self::ParticipationRollup => DomainKind::Participation,
            Self::FundingRollup => DomainKind::Funding,
            Self::TreasuryRollup => DomainKind::Treasury,
        }
    }

    /// Domain whose records a finalize job proves, None for rollups
    pub fn finalize_source(&self) -> Option<DomainKind> {
        match self {
            Self::FinalizeRound1 => Some(DomainKind::Round1),
            Self::FinalizeRound2 => Some(DomainKind::Round2),
            Self::FinalizeResponse => Some(DomainKind::Response),
            _ => None,
        }
    }

    pub fn is_finalize(&self) -> bool {
        self.finalize_source().is_some()
    }

    /// Job types that must be absent from every queue before this one runs
    pub fn blocked_by(&self) -> &'static [JobType] {
        use JobType::*;
        match self {
            CommitteeRollup | CampaignRollup | ProjectRollup => &[],
            DkgRollup => &[FinalizeRound1, FinalizeRound2],
            Round1Rollup => &[FinalizeRound1],
            Round2Rollup => &[FinalizeRound2],
            FinalizeRound1 => &[DkgRollup, Round1Rollup],
            FinalizeRound2 => &[DkgRollup, Round2Rollup],
            RequestRollup => &[FinalizeResponse],
            ResponseRollup => &[FinalizeResponse],
            FinalizeResponse => &[RequestRollup, ResponseRollup],
            ParticipationRollup => &[CampaignRollup, ProjectRollup],
            FundingRollup => &[CampaignRollup],
            TreasuryRollup => &[FundingRollup, ParticipationRollup],
        }
    }

    /// Higher runs first within a queue
    pub fn priority(&self) -> u8 {
        if self.is_finalize() {
            2
        } else {
            1
        }
    }

    pub fn queue(&self) -> JobQueueName {
        use JobType::*;
        match self {
            CommitteeRollup => JobQueueName::Committee,
            DkgRollup | Round1Rollup | Round2Rollup | FinalizeRound1 | FinalizeRound2 => {
                JobQueueName::Dkg
            }
            RequestRollup | ResponseRollup | FinalizeResponse => JobQueueName::Request,
            CampaignRollup | ProjectRollup | ParticipationRollup | FundingRollup
            | TreasuryRollup => JobQueueName::Campaign,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type '{}'", s))
    }
}

/// Serialized job message
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// `{jobType}-{uniqueId}`, the broker dedupe key
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// First pending action id for rollups, the natural id for finalize jobs
    pub unique_id: u64,
    /// Unix milliseconds at enqueue
    pub timestamp: i64,
}

impl Job {
    pub fn new(job_type: JobType, unique_id: u64) -> Self {
        Self {
            id: Self::id_for(job_type, unique_id),
            job_type,
            unique_id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn id_for(job_type: JobType, unique_id: u64) -> String {
        format!("{}-{}", job_type, unique_id)
    }

    pub fn priority(&self) -> u8 {
        self.job_type.priority()
    }
}
