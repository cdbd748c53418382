//! Committee membership domain
//!
//! Every committee action creates exactly one committee, so the committee id
//! is the action's sequence number. Level-1 slots are committees, level-2
//! leaves are member public keys in enrollment order.

use serde::{Deserialize, Serialize};

use super::{
    rollup_confirmation, Action, DomainDescriptor, DomainKind, Entity, FieldReader, FieldWriter,
    FoldContext, Placement, TreeShape,
};
use crate::merkle::commit_leaf;
use crate::types::Result;

const TAG_CREATE: u64 = 0;

/// Level-2 height; bounds committee size
pub const MEMBER_TREE_HEIGHT: u8 = 5;
pub const MAX_MEMBERS: usize = 1 << MEMBER_TREE_HEIGHT;

pub static COMMITTEE: DomainDescriptor = DomainDescriptor {
    kind: DomainKind::Committee,
    address_key: "COMMITTEE_ADDRESS",
    shape: TreeShape {
        level1_height: 10,
        level2_height: Some(MEMBER_TREE_HEIGHT),
    },
    root_field: 0,
    action_state_field: 1,
    decode,
    entity_key,
    transition,
    action_slot,
    decode_confirmation: rollup_confirmation,
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitteeAction {
    Create {
        threshold: u32,
        members: Vec<String>,
        ipfs_hash: String,
    },
}

impl CommitteeAction {
    pub fn encode(&self) -> Vec<String> {
        match self {
            Self::Create {
                threshold,
                members,
                ipfs_hash,
            } => FieldWriter::tag(TAG_CREATE)
                .u64(*threshold as u64)
                .list(members)
                .string(ipfs_hash)
                .build(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    pub committee_id: u64,
    pub threshold: u32,
    /// Public keys, index = member id
    pub members: Vec<String>,
    pub ipfs_hash: String,
}

impl Committee {
    pub fn size(&self) -> u64 {
        self.members.len() as u64
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.members
            .iter()
            .enumerate()
            .map(|(index, public_key)| Placement {
                level1: self.committee_id,
                level2: Some(index as u64),
                leaf: member_leaf(public_key),
            })
            .collect()
    }
}

/// Leaf commitment for one committee member
pub fn member_leaf(public_key: &str) -> crate::types::Hash32 {
    commit_leaf(&[public_key.as_bytes()])
}

fn decode(fields: &[String]) -> Result<Action> {
    let mut r = FieldReader::new(DomainKind::Committee, fields);
    let action = match r.u64("tag")? {
        TAG_CREATE => {
            let threshold = r.u32("threshold")?;
            let members = r.list("members")?;
            let ipfs_hash = r.string("ipfs_hash")?;
            CommitteeAction::Create {
                threshold,
                members,
                ipfs_hash,
            }
        }
        tag => return Err(r.unknown_tag(tag)),
    };
    r.finish()?;
    Ok(Action::Committee(action))
}

fn entity_key(action: &Action, action_id: u64) -> Option<String> {
    match action {
        Action::Committee(CommitteeAction::Create { .. }) => Some(action_id.to_string()),
        _ => None,
    }
}

fn transition(current: Option<&Entity>, action: &Action, ctx: &FoldContext) -> Option<Entity> {
    let Action::Committee(CommitteeAction::Create {
        threshold,
        members,
        ipfs_hash,
    }) = action
    else {
        return None;
    };
    if current.is_some() || !valid_membership(*threshold, members.len()) {
        return None;
    }
    Some(Entity::Committee(Committee {
        committee_id: ctx.action_id,
        threshold: *threshold,
        members: members.clone(),
        ipfs_hash: ipfs_hash.clone(),
    }))
}

/// Size in 1..=MAX_MEMBERS and threshold in 1..=size
fn valid_membership(threshold: u32, size: usize) -> bool {
    (1..=MAX_MEMBERS).contains(&size) && threshold >= 1 && threshold as usize <= size
}

fn action_slot(action: &Action, action_id: u64) -> Option<(u64, Option<u64>)> {
    match action {
        Action::Committee(_) => Some((action_id, None)),
        _ => None,
    }
}
