//! Key generation domains: key lifecycle plus round-1/round-2 contributions
//!
//! A key is addressed by `(committee_id, key_id)` and flattened into a
//! `key_index` for the contribution trees. Lifecycle markers are stored as
//! flags and the status is resolved by precedence, so the order in which
//! markers arrive never changes the outcome.

use serde::{Deserialize, Serialize};

use super::{
    rollup_confirmation, Action, DomainDescriptor, DomainKind, Entity, FieldReader, FieldWriter,
    FoldContext, Placement, TreeShape,
};
use crate::merkle::commit_leaf;
use crate::types::Result;

const TAG_GENERATE: u64 = 0;
const TAG_FINALIZE_ROUND_1: u64 = 1;
const TAG_FINALIZE_ROUND_2: u64 = 2;
const TAG_DEPRECATE: u64 = 3;

const TAG_CONTRIBUTE: u64 = 0;

const KEY_TREE_HEIGHT: u8 = 5;
pub const KEYS_PER_COMMITTEE: u64 = 1 << KEY_TREE_HEIGHT;
const CONTRIBUTION_TREE_HEIGHT: u8 = 5;

pub static DKG: DomainDescriptor = DomainDescriptor {
    kind: DomainKind::Dkg,
    address_key: "DKG_ADDRESS",
    shape: TreeShape {
        level1_height: 10,
        level2_height: Some(KEY_TREE_HEIGHT),
    },
    root_field: 0,
    action_state_field: 1,
    decode: decode_key,
    entity_key: key_entity_key,
    transition: key_transition,
    action_slot: key_slot,
    decode_confirmation: rollup_confirmation,
};

const CONTRIBUTION_BASE: DomainDescriptor = DomainDescriptor {
    kind: DomainKind::Round1,
    address_key: "ROUND1_ADDRESS",
    shape: TreeShape {
        level1_height: 15,
        level2_height: Some(CONTRIBUTION_TREE_HEIGHT),
    },
    root_field: 0,
    action_state_field: 1,
    decode: decode_round1,
    entity_key: contribution_key,
    transition: contribution_transition,
    action_slot: contribution_slot,
    decode_confirmation: rollup_confirmation,
};

pub static ROUND1: DomainDescriptor = CONTRIBUTION_BASE;

pub static ROUND2: DomainDescriptor = DomainDescriptor {
    kind: DomainKind::Round2,
    address_key: "ROUND2_ADDRESS",
    decode: decode_round2,
    ..CONTRIBUTION_BASE
};

/// Flattened key position shared by the contribution trees
pub fn key_index(committee_id: u64, key_id: u64) -> u64 {
    committee_id * KEYS_PER_COMMITTEE + key_id
}

/// Flattened position of an in-range key. A key id past the per-committee
/// bound would alias the next committee's keys.
fn checked_key_index(committee_id: u64, key_id: u64) -> Option<u64> {
    if key_id >= KEYS_PER_COMMITTEE {
        return None;
    }
    committee_id
        .checked_mul(KEYS_PER_COMMITTEE)
        .and_then(|base| base.checked_add(key_id))
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Empty,
    Round1Contribution,
    Round2Contribution,
    Active,
    Deprecated,
}

impl KeyStatus {
    /// Code committed in the key tree leaf; `Empty` is the unallocated slot
    pub fn code(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Round1Contribution => 1,
            Self::Round2Contribution => 2,
            Self::Active => 3,
            Self::Deprecated => 4,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyAction {
    Generate { committee_id: u64, key_id: u64 },
    FinalizeRound1 { committee_id: u64, key_id: u64 },
    FinalizeRound2 { committee_id: u64, key_id: u64 },
    Deprecate { committee_id: u64, key_id: u64 },
}

impl KeyAction {
    fn ids(&self) -> (u64, u64) {
        match *self {
            Self::Generate {
                committee_id,
                key_id,
            }
            | Self::FinalizeRound1 {
                committee_id,
                key_id,
            }
            | Self::FinalizeRound2 {
                committee_id,
                key_id,
            }
            | Self::Deprecate {
                committee_id,
                key_id,
            } => (committee_id, key_id),
        }
    }

    fn tag(&self) -> u64 {
        match self {
            Self::Generate { .. } => TAG_GENERATE,
            Self::FinalizeRound1 { .. } => TAG_FINALIZE_ROUND_1,
            Self::FinalizeRound2 { .. } => TAG_FINALIZE_ROUND_2,
            Self::Deprecate { .. } => TAG_DEPRECATE,
        }
    }

    pub fn encode(&self) -> Vec<String> {
        let (committee_id, key_id) = self.ids();
        FieldWriter::tag(self.tag()).u64(committee_id).u64(key_id).build()
    }
}

/// Key lifecycle entity
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Key {
    pub committee_id: u64,
    pub key_id: u64,
    pub key_index: u64,
    pub round1_finalized: bool,
    pub round2_finalized: bool,
    pub deprecated: bool,
    pub status: KeyStatus,
}

impl Key {
    fn new(committee_id: u64, key_id: u64) -> Self {
        Self {
            committee_id,
            key_id,
            key_index: key_index(committee_id, key_id),
            round1_finalized: false,
            round2_finalized: false,
            deprecated: false,
            status: KeyStatus::Round1Contribution,
        }
    }

    /// Highest-precedence marker wins; deprecation is absorbing
    pub fn resolve_status(&self) -> KeyStatus {
        if self.deprecated {
            KeyStatus::Deprecated
        } else if self.round2_finalized {
            KeyStatus::Active
        } else if self.round1_finalized {
            KeyStatus::Round2Contribution
        } else {
            KeyStatus::Round1Contribution
        }
    }

    pub fn placement(&self) -> Placement {
        Placement {
            level1: self.committee_id,
            level2: Some(self.key_id),
            leaf: key_leaf(self.status),
        }
    }
}

/// Leaf commitment of a key slot
pub fn key_leaf(status: KeyStatus) -> crate::types::Hash32 {
    commit_leaf(&[&status.code().to_be_bytes()])
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContributionAction {
    Contribute {
        committee_id: u64,
        key_id: u64,
        member_id: u64,
        data: Vec<String>,
    },
}

impl ContributionAction {
    pub fn encode(&self) -> Vec<String> {
        let Self::Contribute {
            committee_id,
            key_id,
            member_id,
            data,
        } = self;
        FieldWriter::tag(TAG_CONTRIBUTE)
            .u64(*committee_id)
            .u64(*key_id)
            .u64(*member_id)
            .list(data)
            .build()
    }
}

/// A member's round-1 or round-2 contribution for one key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub committee_id: u64,
    pub key_id: u64,
    pub key_index: u64,
    pub member_id: u64,
    pub data: Vec<String>,
}

impl Contribution {
    pub fn placement(&self) -> Placement {
        let parts: Vec<&[u8]> = self.data.iter().map(|d| d.as_bytes()).collect();
        Placement {
            level1: self.key_index,
            level2: Some(self.member_id),
            leaf: commit_leaf(&parts),
        }
    }
}

fn decode_key(fields: &[String]) -> Result<Action> {
    let mut r = FieldReader::new(DomainKind::Dkg, fields);
    let tag = r.u64("tag")?;
    let committee_id = r.u64("committee_id")?;
    let key_id = r.u64("key_id")?;
    let action = match tag {
        TAG_GENERATE => KeyAction::Generate {
            committee_id,
            key_id,
        },
        TAG_FINALIZE_ROUND_1 => KeyAction::FinalizeRound1 {
            committee_id,
            key_id,
        },
        TAG_FINALIZE_ROUND_2 => KeyAction::FinalizeRound2 {
            committee_id,
            key_id,
        },
        TAG_DEPRECATE => KeyAction::Deprecate {
            committee_id,
            key_id,
        },
        other => return Err(r.unknown_tag(other)),
    };
    r.finish()?;
    Ok(Action::Dkg(action))
}

fn key_entity_key(action: &Action, _action_id: u64) -> Option<String> {
    match action {
        Action::Dkg(a) => {
            let (committee_id, key_id) = a.ids();
            checked_key_index(committee_id, key_id).map(|i| i.to_string())
        }
        _ => None,
    }
}

fn key_transition(current: Option<&Entity>, action: &Action, _ctx: &FoldContext) -> Option<Entity> {
    let Action::Dkg(action) = action else {
        return None;
    };
    let (committee_id, key_id) = action.ids();
    checked_key_index(committee_id, key_id)?;
    let mut key = match current {
        Some(Entity::Key(k)) => k.clone(),
        Some(_) => return None,
        None => Key::new(committee_id, key_id),
    };
    match action {
        KeyAction::Generate { .. } => {}
        KeyAction::FinalizeRound1 { .. } => key.round1_finalized = true,
        KeyAction::FinalizeRound2 { .. } => key.round2_finalized = true,
        KeyAction::Deprecate { .. } => key.deprecated = true,
    }
    key.status = key.resolve_status();
    Some(Entity::Key(key))
}

fn key_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    match action {
        Action::Dkg(a) => {
            let (committee_id, key_id) = a.ids();
            checked_key_index(committee_id, key_id)?;
            Some((committee_id, Some(key_id)))
        }
        _ => None,
    }
}

fn decode_contribution(domain: DomainKind, fields: &[String]) -> Result<ContributionAction> {
    let mut r = FieldReader::new(domain, fields);
    let action = match r.u64("tag")? {
        TAG_CONTRIBUTE => ContributionAction::Contribute {
            committee_id: r.u64("committee_id")?,
            key_id: r.u64("key_id")?,
            member_id: r.u64("member_id")?,
            data: r.list("data")?,
        },
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(action)
}

fn decode_round1(fields: &[String]) -> Result<Action> {
    decode_contribution(DomainKind::Round1, fields).map(Action::Round1)
}

fn decode_round2(fields: &[String]) -> Result<Action> {
    decode_contribution(DomainKind::Round2, fields).map(Action::Round2)
}

fn contribution_of(action: &Action) -> Option<&ContributionAction> {
    match action {
        Action::Round1(c) | Action::Round2(c) => Some(c),
        _ => None,
    }
}

fn contribution_key(action: &Action, _action_id: u64) -> Option<String> {
    let ContributionAction::Contribute {
        committee_id,
        key_id,
        member_id,
        ..
    } = contribution_of(action)?;
    let index = checked_key_index(*committee_id, *key_id)?;
    Some(format!("{}:{}", index, member_id))
}

fn contribution_transition(
    current: Option<&Entity>,
    action: &Action,
    _ctx: &FoldContext,
) -> Option<Entity> {
    // First contribution per member wins
    if current.is_some() {
        return None;
    }
    let ContributionAction::Contribute {
        committee_id,
        key_id,
        member_id,
        data,
    } = contribution_of(action)?;
    let contribution = Contribution {
        committee_id: *committee_id,
        key_id: *key_id,
        key_index: checked_key_index(*committee_id, *key_id)?,
        member_id: *member_id,
        data: data.clone(),
    };
    match action {
        Action::Round1(_) => Some(Entity::Round1(contribution)),
        _ => Some(Entity::Round2(contribution)),
    }
}

fn contribution_slot(action: &Action, _action_id: u64) -> Option<(u64, Option<u64>)> {
    let ContributionAction::Contribute {
        committee_id,
        key_id,
        member_id,
        ..
    } = contribution_of(action)?;
    Some((checked_key_index(*committee_id, *key_id)?, Some(*member_id)))
}
