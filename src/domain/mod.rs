//! Domain schemas and descriptors
//!
//! Every domain follows the same pattern: an action log on the ledger, a
//! family of canonical entities folded from it, and a two-level commitment
//! tree. The generic engine in [`crate::sync`] only sees the tagged unions
//! [`Action`] and [`Entity`] plus a [`DomainDescriptor`]; the per-domain
//! modules supply decoding, natural keys, transitions and leaf layout.

pub mod campaign;
pub mod committee;
pub mod dkg;
pub mod fields;
pub mod request;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ledger::LedgerEvent;
use crate::types::{Hash32, Result};

pub use campaign::{
    Campaign, CampaignAction, CampaignStatus, Claim, Funding, FundingAction, FundingStatus,
    Participation, ParticipationAction, Project, ProjectAction, TreasuryAction,
};
pub use committee::{Committee, CommitteeAction};
pub use dkg::{Contribution, ContributionAction, Key, KeyAction, KeyStatus, KEYS_PER_COMMITTEE};
pub use fields::{hash_payload, FieldReader, FieldWriter};
pub use request::{Request, RequestAction, RequestStatus, ResponseAction, ResponseShare};

/// Ledger event kind that confirms a rollup up to a given action hash
pub const ROLLUP_EVENT: &str = "rollup";

/// Logical domain backed by one ledger action log
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DomainKind {
    Committee,
    Dkg,
    Round1,
    Round2,
    Request,
    Response,
    Campaign,
    Project,
    Participation,
    Funding,
    Treasury,
}

impl DomainKind {
    pub const ALL: [DomainKind; 11] = [
        DomainKind::Committee,
        DomainKind::Dkg,
        DomainKind::Round1,
        DomainKind::Round2,
        DomainKind::Request,
        DomainKind::Response,
        DomainKind::Campaign,
        DomainKind::Project,
        DomainKind::Participation,
        DomainKind::Funding,
        DomainKind::Treasury,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committee => "committee",
            Self::Dkg => "dkg",
            Self::Round1 => "round1",
            Self::Round2 => "round2",
            Self::Request => "request",
            Self::Response => "response",
            Self::Campaign => "campaign",
            Self::Project => "project",
            Self::Participation => "participation",
            Self::Funding => "funding",
            Self::Treasury => "treasury",
        }
    }

    /// Static descriptor for this domain
    pub fn descriptor(&self) -> &'static DomainDescriptor {
        match self {
            Self::Committee => &committee::COMMITTEE,
            Self::Dkg => &dkg::DKG,
            Self::Round1 => &dkg::ROUND1,
            Self::Round2 => &dkg::ROUND2,
            Self::Request => &request::REQUEST,
            Self::Response => &request::RESPONSE,
            Self::Campaign => &campaign::CAMPAIGN,
            Self::Project => &campaign::PROJECT,
            Self::Participation => &campaign::PARTICIPATION,
            Self::Funding => &campaign::FUNDING,
            Self::Treasury => &campaign::TREASURY,
        }
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown domain '{}'", s))
    }
}

/// Decoded action payload, parsed once at ingestion
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "domain", content = "action", rename_all = "snake_case")]
pub enum Action {
    Committee(CommitteeAction),
    Dkg(KeyAction),
    Round1(ContributionAction),
    Round2(ContributionAction),
    Request(RequestAction),
    Response(ResponseAction),
    Campaign(CampaignAction),
    Project(ProjectAction),
    Participation(ParticipationAction),
    Funding(FundingAction),
    Treasury(TreasuryAction),
}

/// Canonical entity state, always a function of the folded actions
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "family", content = "state", rename_all = "snake_case")]
pub enum Entity {
    Committee(Committee),
    Key(Key),
    Round1(Contribution),
    Round2(Contribution),
    Request(Request),
    Response(ResponseShare),
    Campaign(Campaign),
    Project(Project),
    Participation(Participation),
    Funding(Funding),
    Treasury(Claim),
}

impl Entity {
    /// Leaves this entity contributes to its domain's mirror
    pub fn placements(&self) -> Vec<Placement> {
        match self {
            Self::Committee(c) => c.placements(),
            Self::Key(k) => vec![k.placement()],
            Self::Round1(c) | Self::Round2(c) => vec![c.placement()],
            Self::Request(r) => vec![r.placement()],
            Self::Response(r) => vec![r.placement()],
            Self::Campaign(c) => vec![c.placement()],
            Self::Project(p) => p.placements(),
            Self::Participation(p) => vec![p.placement()],
            Self::Funding(f) => vec![f.placement()],
            Self::Treasury(c) => vec![c.placement()],
        }
    }

    /// Contribution of this entity to a derived per-parent aggregate
    pub fn aggregate(&self) -> Option<AggregateShare> {
        match self {
            Self::Key(k) => Some(AggregateShare::count("keys", k.committee_id)),
            Self::Round1(c) | Self::Round2(c) => {
                Some(AggregateShare::count("contributions", c.key_index))
            }
            Self::Response(r) => Some(AggregateShare::count("responses", r.request_id)),
            Self::Participation(p) => Some(AggregateShare::count("participations", p.campaign_id)),
            Self::Funding(f) if f.status == FundingStatus::Funded => Some(AggregateShare {
                name: "funded_amount",
                parent: f.campaign_id,
                amount: f.amount,
            }),
            _ => None,
        }
    }
}

/// One entity's share of a grouped aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateShare {
    pub name: &'static str,
    pub parent: u64,
    pub amount: u64,
}

impl AggregateShare {
    fn count(name: &'static str, parent: u64) -> Self {
        Self {
            name,
            parent,
            amount: 1,
        }
    }
}

/// A committed leaf: scalar level-1 leaf when `level2` is None,
/// otherwise a member of the level-2 subtree under `level1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub level1: u64,
    pub level2: Option<u64>,
    pub leaf: Hash32,
}

/// Heights of a domain's two-level tree. `level2_height = None` means
/// level-1 leaves are scalar commitments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    pub level1_height: u8,
    pub level2_height: Option<u8>,
}

impl TreeShape {
    /// Whether a witness slot lies inside the tree. A slot without `level2`
    /// addresses the level-1 node.
    pub fn contains(&self, level1: u64, level2: Option<u64>) -> bool {
        let fits = |index: u64, height: u8| index < 1u64.checked_shl(height.into()).unwrap_or(u64::MAX);
        if !fits(level1, self.level1_height) {
            return false;
        }
        match (self.level2_height, level2) {
            (_, None) => true,
            (Some(height), Some(l2)) => fits(l2, height),
            (None, Some(_)) => false,
        }
    }

    /// Whether a leaf can be committed: in range and at the tree's leaf level
    pub fn holds(&self, placement: &Placement) -> bool {
        placement.level2.is_some() == self.level2_height.is_some()
            && self.contains(placement.level1, placement.level2)
    }
}

/// Per-action context handed to transition functions
#[derive(Debug, Clone, Copy)]
pub struct FoldContext {
    pub action_id: u64,
}

/// Small per-domain descriptor the generic engine is parameterized by
pub struct DomainDescriptor {
    pub kind: DomainKind,
    /// Environment variable holding the contract address
    pub address_key: &'static str,
    pub shape: TreeShape,
    /// Index of the mirror root in the ledger's state field vector
    pub root_field: usize,
    /// Index of the last rolled-up action hash in the state field vector
    pub action_state_field: usize,
    pub decode: fn(&[String]) -> Result<Action>,
    pub entity_key: fn(&Action, u64) -> Option<String>,
    pub transition: fn(Option<&Entity>, &Action, &FoldContext) -> Option<Entity>,
    /// Mirror slot an action writes, used to pick witnesses for a rollup
    pub action_slot: fn(&Action, u64) -> Option<(u64, Option<u64>)>,
    pub decode_confirmation: fn(&LedgerEvent) -> Option<Hash32>,
}

impl fmt::Debug for DomainDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainDescriptor")
            .field("kind", &self.kind)
            .field("address_key", &self.address_key)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Confirmation decoder shared by every domain: a `rollup` event whose
/// first datum is the last action hash the ledger folded
pub fn rollup_confirmation(event: &LedgerEvent) -> Option<Hash32> {
    if event.kind != ROLLUP_EVENT {
        return None;
    }
    event.data.first().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_names_roundtrip() {
        for domain in DomainKind::ALL {
            assert_eq!(domain.as_str().parse::<DomainKind>().unwrap(), domain);
            assert_eq!(domain.descriptor().kind, domain);
        }
    }

    #[test]
    fn test_tree_shape_bounds() {
        let grouped = TreeShape {
            level1_height: 10,
            level2_height: Some(5),
        };
        assert!(grouped.contains(1023, Some(31)));
        assert!(!grouped.contains(1024, Some(0)));
        assert!(!grouped.contains(0, Some(32)));
        assert!(grouped.contains(0, None));
        let leaf = Hash32::digest(&[b"x"]);
        assert!(grouped.holds(&Placement { level1: 3, level2: Some(1), leaf }));
        assert!(!grouped.holds(&Placement { level1: 3, level2: None, leaf }));
        assert!(!grouped.holds(&Placement { level1: 1024, level2: Some(1), leaf }));

        let scalar = TreeShape {
            level1_height: 16,
            level2_height: None,
        };
        assert!(scalar.contains(65535, None));
        assert!(!scalar.contains(65536, None));
        assert!(!scalar.contains(0, Some(0)));
    }

    #[test]
    fn test_address_keys_unique() {
        let mut keys: Vec<_> = DomainKind::ALL
            .iter()
            .map(|d| d.descriptor().address_key)
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), DomainKind::ALL.len());
    }

    #[test]
    fn test_rollup_confirmation_decoding() {
        let hash = Hash32::digest(&[b"a"]);
        let event = LedgerEvent {
            height: 10,
            kind: ROLLUP_EVENT.to_string(),
            data: vec![hash.to_hex()],
        };
        assert_eq!(rollup_confirmation(&event), Some(hash));

        let other = LedgerEvent {
            kind: "transfer".to_string(),
            ..event
        };
        assert_eq!(rollup_confirmation(&other), None);
    }
}
