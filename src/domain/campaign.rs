//! Funding domains: campaigns, projects, participations, fundings and
//! treasury claims

use serde::{Deserialize, Serialize};

use super::{
    rollup_confirmation, Action, DomainDescriptor, DomainKind, Entity, FieldReader, FieldWriter,
    FoldContext, Placement, TreeShape,
};
use crate::merkle::commit_leaf;
use crate::types::Result;

const ID_TREE_HEIGHT: u8 = 16;
const MAX_ID: u64 = 1 << ID_TREE_HEIGHT;
const PROJECT_MEMBER_TREE_HEIGHT: u8 = 5;
pub const MAX_PROJECT_MEMBERS: usize = 1 << PROJECT_MEMBER_TREE_HEIGHT;

const TAG_CAMPAIGN_CREATE: u64 = 0;
const TAG_CAMPAIGN_UPDATE_TIMELINE: u64 = 1;
const TAG_CAMPAIGN_CANCEL: u64 = 2;

const TAG_PROJECT_CREATE: u64 = 0;
const TAG_PROJECT_ADD_MEMBER: u64 = 1;
const TAG_PROJECT_UPDATE_INFO: u64 = 2;

const TAG_JOIN: u64 = 0;

const TAG_FUND: u64 = 0;
const TAG_REFUND: u64 = 1;

const TAG_CLAIM: u64 = 0;

const fn descriptor(
    kind: DomainKind,
    address_key: &'static str,
    level2_height: Option<u8>,
    decode: fn(&[String]) -> Result<Action>,
    entity_key: fn(&Action, u64) -> Option<String>,
    transition: fn(Option<&Entity>, &Action, &FoldContext) -> Option<Entity>,
    action_slot: fn(&Action, u64) -> Option<(u64, Option<u64>)>,
) -> DomainDescriptor {
    DomainDescriptor {
        kind,
        address_key,
        shape: TreeShape {
            level1_height: ID_TREE_HEIGHT,
            level2_height,
        },
        root_field: 0,
        action_state_field: 1,
        decode,
        entity_key,
        transition,
        action_slot,
        decode_confirmation: rollup_confirmation,
    }
}

pub static CAMPAIGN: DomainDescriptor = descriptor(
    DomainKind::Campaign,
    "CAMPAIGN_ADDRESS",
    None,
    decode_campaign,
    campaign_key,
    campaign_transition,
    campaign_slot,
);

pub static PROJECT: DomainDescriptor = descriptor(
    DomainKind::Project,
    "PROJECT_ADDRESS",
    Some(PROJECT_MEMBER_TREE_HEIGHT),
    decode_project,
    project_key,
    project_transition,
    project_slot,
);

pub static PARTICIPATION: DomainDescriptor = descriptor(
    DomainKind::Participation,
    "PARTICIPATION_ADDRESS",
    Some(ID_TREE_HEIGHT),
    decode_participation,
    pair_key,
    participation_transition,
    pair_slot,
);

pub static FUNDING: DomainDescriptor = descriptor(
    DomainKind::Funding,
    "FUNDING_ADDRESS",
    None,
    decode_funding,
    funding_key,
    funding_transition,
    funding_slot,
);

pub static TREASURY: DomainDescriptor = descriptor(
    DomainKind::Treasury,
    "TREASURY_ADDRESS",
    Some(ID_TREE_HEIGHT),
    decode_treasury,
    pair_key,
    treasury_transition,
    pair_slot,
);

// ---------------------------------------------------------------------------
// Campaign
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Open,
    Cancelled,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignAction {
    Create {
        campaign_id: u64,
        owner: String,
        ipfs_hash: String,
        start: u64,
        end: u64,
    },
    UpdateTimeline {
        campaign_id: u64,
        start: u64,
        end: u64,
    },
    Cancel {
        campaign_id: u64,
    },
}

impl CampaignAction {
    pub fn campaign_id(&self) -> u64 {
        match *self {
            Self::Create { campaign_id, .. }
            | Self::UpdateTimeline { campaign_id, .. }
            | Self::Cancel { campaign_id } => campaign_id,
        }
    }

    pub fn encode(&self) -> Vec<String> {
        match self {
            Self::Create {
                campaign_id,
                owner,
                ipfs_hash,
                start,
                end,
            } => FieldWriter::tag(TAG_CAMPAIGN_CREATE)
                .u64(*campaign_id)
                .string(owner)
                .string(ipfs_hash)
                .u64(*start)
                .u64(*end)
                .build(),
            Self::UpdateTimeline {
                campaign_id,
                start,
                end,
            } => FieldWriter::tag(TAG_CAMPAIGN_UPDATE_TIMELINE)
                .u64(*campaign_id)
                .u64(*start)
                .u64(*end)
                .build(),
            Self::Cancel { campaign_id } => FieldWriter::tag(TAG_CAMPAIGN_CANCEL)
                .u64(*campaign_id)
                .build(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Campaign {
    pub campaign_id: u64,
    pub owner: String,
    pub ipfs_hash: String,
    pub start: u64,
    pub end: u64,
    pub status: CampaignStatus,
}

impl Campaign {
    pub fn placement(&self) -> Placement {
        let status: u64 = match self.status {
            CampaignStatus::Open => 1,
            CampaignStatus::Cancelled => 2,
        };
        Placement {
            level1: self.campaign_id,
            level2: None,
            leaf: commit_leaf(&[
                self.owner.as_bytes(),
                self.ipfs_hash.as_bytes(),
                &self.start.to_be_bytes(),
                &self.end.to_be_bytes(),
                &status.to_be_bytes(),
            ]),
        }
    }
}

fn decode_campaign(fields: &[String]) -> Result<Action> {
    let domain = DomainKind::Campaign;
    let mut r = FieldReader::new(domain, fields);
    let action = match r.u64("tag")? {
        TAG_CAMPAIGN_CREATE => CampaignAction::Create {
            campaign_id: r.u64("campaign_id")?,
            owner: r.string("owner")?,
            ipfs_hash: r.string("ipfs_hash")?,
            start: r.u64("start")?,
            end: r.u64("end")?,
        },
        TAG_CAMPAIGN_UPDATE_TIMELINE => CampaignAction::UpdateTimeline {
            campaign_id: r.u64("campaign_id")?,
            start: r.u64("start")?,
            end: r.u64("end")?,
        },
        TAG_CAMPAIGN_CANCEL => CampaignAction::Cancel {
            campaign_id: r.u64("campaign_id")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Campaign(action))
}

fn campaign_key(action: &Action, _action_id: u64) -> Option<String> {
    match action {
        Action::Campaign(a) => Some(a.campaign_id().to_string()),
        _ => None,
    }
}

fn campaign_transition(
    current: Option<&Entity>,
    action: &Action,
    _ctx: &FoldContext,
) -> Option<Entity> {
    let Action::Campaign(action) = action else {
        return None;
    };
    let current = match current {
        Some(Entity::Campaign(c)) => Some(c),
        Some(_) => return None,
        None => None,
    };
    let next = match (current, action) {
        (
            None,
            CampaignAction::Create {
                campaign_id,
                owner,
                ipfs_hash,
                start,
                end,
            },
        ) => Campaign {
            campaign_id: *campaign_id,
            owner: owner.clone(),
            ipfs_hash: ipfs_hash.clone(),
            start: *start,
            end: *end,
            status: CampaignStatus::Open,
        },
        // Cancelled campaigns are frozen
        (Some(c), _) if c.status == CampaignStatus::Cancelled => return None,
        (Some(c), CampaignAction::UpdateTimeline { start, end, .. }) => Campaign {
            start: *start,
            end: *end,
            ..c.clone()
        },
        (Some(c), CampaignAction::Cancel { .. }) => Campaign {
            status: CampaignStatus::Cancelled,
            ..c.clone()
        },
        _ => return None,
    };
    Some(Entity::Campaign(next))
}

fn campaign_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    match action {
        Action::Campaign(a) => Some((a.campaign_id(), None)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProjectAction {
    Create {
        project_id: u64,
        owner: String,
        ipfs_hash: String,
        members: Vec<String>,
    },
    AddMember {
        project_id: u64,
        member: String,
    },
    UpdateInfo {
        project_id: u64,
        ipfs_hash: String,
    },
}

impl ProjectAction {
    pub fn project_id(&self) -> u64 {
        match *self {
            Self::Create { project_id, .. }
            | Self::AddMember { project_id, .. }
            | Self::UpdateInfo { project_id, .. } => project_id,
        }
    }

    pub fn encode(&self) -> Vec<String> {
        match self {
            Self::Create {
                project_id,
                owner,
                ipfs_hash,
                members,
            } => FieldWriter::tag(TAG_PROJECT_CREATE)
                .u64(*project_id)
                .string(owner)
                .string(ipfs_hash)
                .list(members)
                .build(),
            Self::AddMember { project_id, member } => FieldWriter::tag(TAG_PROJECT_ADD_MEMBER)
                .u64(*project_id)
                .string(member)
                .build(),
            Self::UpdateInfo {
                project_id,
                ipfs_hash,
            } => FieldWriter::tag(TAG_PROJECT_UPDATE_INFO)
                .u64(*project_id)
                .string(ipfs_hash)
                .build(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub project_id: u64,
    pub owner: String,
    pub ipfs_hash: String,
    /// Member addresses, index = level-2 slot
    pub members: Vec<String>,
}

impl Project {
    pub fn placements(&self) -> Vec<Placement> {
        self.members
            .iter()
            .enumerate()
            .map(|(index, member)| Placement {
                level1: self.project_id,
                level2: Some(index as u64),
                leaf: commit_leaf(&[member.as_bytes()]),
            })
            .collect()
    }
}

fn decode_project(fields: &[String]) -> Result<Action> {
    let domain = DomainKind::Project;
    let mut r = FieldReader::new(domain, fields);
    let action = match r.u64("tag")? {
        TAG_PROJECT_CREATE => {
            let project_id = r.u64("project_id")?;
            let owner = r.string("owner")?;
            let ipfs_hash = r.string("ipfs_hash")?;
            let members = r.list("members")?;
            ProjectAction::Create {
                project_id,
                owner,
                ipfs_hash,
                members,
            }
        }
        TAG_PROJECT_ADD_MEMBER => ProjectAction::AddMember {
            project_id: r.u64("project_id")?,
            member: r.string("member")?,
        },
        TAG_PROJECT_UPDATE_INFO => ProjectAction::UpdateInfo {
            project_id: r.u64("project_id")?,
            ipfs_hash: r.string("ipfs_hash")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Project(action))
}

fn project_key(action: &Action, _action_id: u64) -> Option<String> {
    match action {
        Action::Project(a) => Some(a.project_id().to_string()),
        _ => None,
    }
}

fn project_transition(
    current: Option<&Entity>,
    action: &Action,
    _ctx: &FoldContext,
) -> Option<Entity> {
    let Action::Project(action) = action else {
        return None;
    };
    let current = match current {
        Some(Entity::Project(p)) => Some(p),
        Some(_) => return None,
        None => None,
    };
    let next = match (current, action) {
        (
            None,
            ProjectAction::Create {
                project_id,
                owner,
                ipfs_hash,
                members,
            },
        ) if members.len() <= MAX_PROJECT_MEMBERS => Project {
            project_id: *project_id,
            owner: owner.clone(),
            ipfs_hash: ipfs_hash.clone(),
            members: members.clone(),
        },
        (Some(p), ProjectAction::AddMember { member, .. }) => {
            if p.members.len() >= MAX_PROJECT_MEMBERS || p.members.contains(member) {
                return None;
            }
            let mut next = p.clone();
            next.members.push(member.clone());
            next
        }
        (Some(p), ProjectAction::UpdateInfo { ipfs_hash, .. }) => Project {
            ipfs_hash: ipfs_hash.clone(),
            ..p.clone()
        },
        _ => return None,
    };
    Some(Entity::Project(next))
}

fn project_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    match action {
        Action::Project(a) => Some((a.project_id(), None)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Participation and treasury: both keyed by (campaign_id, project_id)
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticipationAction {
    Join { campaign_id: u64, project_id: u64 },
}

impl ParticipationAction {
    pub fn encode(&self) -> Vec<String> {
        let Self::Join {
            campaign_id,
            project_id,
        } = self;
        FieldWriter::tag(TAG_JOIN)
            .u64(*campaign_id)
            .u64(*project_id)
            .build()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Participation {
    pub campaign_id: u64,
    pub project_id: u64,
    /// Action that enrolled the project
    pub joined_at: u64,
}

impl Participation {
    pub fn placement(&self) -> Placement {
        Placement {
            level1: self.campaign_id,
            level2: Some(self.project_id),
            leaf: commit_leaf(&[&self.joined_at.to_be_bytes()]),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreasuryAction {
    Claim {
        campaign_id: u64,
        project_id: u64,
        amount: u64,
    },
}

impl TreasuryAction {
    pub fn encode(&self) -> Vec<String> {
        let Self::Claim {
            campaign_id,
            project_id,
            amount,
        } = self;
        FieldWriter::tag(TAG_CLAIM)
            .u64(*campaign_id)
            .u64(*project_id)
            .u64(*amount)
            .build()
    }
}

/// A project's treasury claim against a campaign
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub campaign_id: u64,
    pub project_id: u64,
    pub amount: u64,
}

impl Claim {
    pub fn placement(&self) -> Placement {
        Placement {
            level1: self.campaign_id,
            level2: Some(self.project_id),
            leaf: commit_leaf(&[&self.amount.to_be_bytes()]),
        }
    }
}

fn decode_participation(fields: &[String]) -> Result<Action> {
    let domain = DomainKind::Participation;
    let mut r = FieldReader::new(domain, fields);
    let action = match r.u64("tag")? {
        TAG_JOIN => ParticipationAction::Join {
            campaign_id: r.u64("campaign_id")?,
            project_id: r.u64("project_id")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Participation(action))
}

fn decode_treasury(fields: &[String]) -> Result<Action> {
    let domain = DomainKind::Treasury;
    let mut r = FieldReader::new(domain, fields);
    let action = match r.u64("tag")? {
        TAG_CLAIM => TreasuryAction::Claim {
            campaign_id: r.u64("campaign_id")?,
            project_id: r.u64("project_id")?,
            amount: r.u64("amount")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Treasury(action))
}

fn pair_of(action: &Action) -> Option<(u64, u64)> {
    match *action {
        Action::Participation(ParticipationAction::Join {
            campaign_id,
            project_id,
        })
        | Action::Treasury(TreasuryAction::Claim {
            campaign_id,
            project_id,
            ..
        }) => Some((campaign_id, project_id)),
        _ => None,
    }
}

fn pair_key(action: &Action, _action_id: u64) -> Option<String> {
    let (campaign_id, project_id) = pair_of(action)?;
    Some(format!("{}:{}", campaign_id, project_id))
}

fn pair_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    let (campaign_id, project_id) = pair_of(action)?;
    Some((campaign_id, Some(project_id)))
}

fn participation_transition(
    current: Option<&Entity>,
    action: &Action,
    ctx: &FoldContext,
) -> Option<Entity> {
    if current.is_some() {
        return None;
    }
    let Action::Participation(ParticipationAction::Join {
        campaign_id,
        project_id,
    }) = action
    else {
        return None;
    };
    Some(Entity::Participation(Participation {
        campaign_id: *campaign_id,
        project_id: *project_id,
        joined_at: ctx.action_id,
    }))
}

fn treasury_transition(
    current: Option<&Entity>,
    action: &Action,
    _ctx: &FoldContext,
) -> Option<Entity> {
    // One claim per project per campaign
    if current.is_some() {
        return None;
    }
    let Action::Treasury(TreasuryAction::Claim {
        campaign_id,
        project_id,
        amount,
    }) = action
    else {
        return None;
    };
    Some(Entity::Treasury(Claim {
        campaign_id: *campaign_id,
        project_id: *project_id,
        amount: *amount,
    }))
}

// ---------------------------------------------------------------------------
// Funding
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingStatus {
    Funded,
    Refunded,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FundingAction {
    Fund {
        funding_id: u64,
        campaign_id: u64,
        investor: String,
        amount: u64,
    },
    Refund {
        funding_id: u64,
    },
}

impl FundingAction {
    pub fn funding_id(&self) -> u64 {
        match *self {
            Self::Fund { funding_id, .. } | Self::Refund { funding_id } => funding_id,
        }
    }

    pub fn encode(&self) -> Vec<String> {
        match self {
            Self::Fund {
                funding_id,
                campaign_id,
                investor,
                amount,
            } => FieldWriter::tag(TAG_FUND)
                .u64(*funding_id)
                .u64(*campaign_id)
                .string(investor)
                .u64(*amount)
                .build(),
            Self::Refund { funding_id } => FieldWriter::tag(TAG_REFUND).u64(*funding_id).build(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Funding {
    pub funding_id: u64,
    pub campaign_id: u64,
    pub investor: String,
    pub amount: u64,
    pub status: FundingStatus,
}

impl Funding {
    pub fn placement(&self) -> Placement {
        let status: u64 = match self.status {
            FundingStatus::Funded => 1,
            FundingStatus::Refunded => 2,
        };
        Placement {
            level1: self.funding_id,
            level2: None,
            leaf: commit_leaf(&[
                &self.campaign_id.to_be_bytes(),
                self.investor.as_bytes(),
                &self.amount.to_be_bytes(),
                &status.to_be_bytes(),
            ]),
        }
    }
}

fn decode_funding(fields: &[String]) -> Result<Action> {
    let domain = DomainKind::Funding;
    let mut r = FieldReader::new(domain, fields);
    let action = match r.u64("tag")? {
        TAG_FUND => FundingAction::Fund {
            funding_id: r.u64("funding_id")?,
            campaign_id: r.u64("campaign_id")?,
            investor: r.string("investor")?,
            amount: r.u64("amount")?,
        },
        TAG_REFUND => FundingAction::Refund {
            funding_id: r.u64("funding_id")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Funding(action))
}

fn funding_key(action: &Action, _action_id: u64) -> Option<String> {
    match action {
        Action::Funding(a) => Some(a.funding_id().to_string()),
        _ => None,
    }
}

fn funding_transition(
    current: Option<&Entity>,
    action: &Action,
    _ctx: &FoldContext,
) -> Option<Entity> {
    let Action::Funding(action) = action else {
        return None;
    };
    let next = match (current, action) {
        (
            None,
            FundingAction::Fund {
                funding_id,
                campaign_id,
                investor,
                amount,
            },
        ) => Funding {
            funding_id: *funding_id,
            campaign_id: *campaign_id,
            investor: investor.clone(),
            amount: *amount,
            status: FundingStatus::Funded,
        },
        (Some(Entity::Funding(f)), FundingAction::Refund { .. })
            if f.status == FundingStatus::Funded =>
        {
            Funding {
                status: FundingStatus::Refunded,
                ..f.clone()
            }
        }
        _ => return None,
    };
    Some(Entity::Funding(next))
}

fn funding_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    match action {
        Action::Funding(a) => Some((a.funding_id(), None)),
        _ => None,
    }
}
