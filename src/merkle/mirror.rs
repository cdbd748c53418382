//! Two-level mirror of a domain's on-chain commitment tree
//!
//! Level-1 leaves are either scalar commitments or the root of a level-2
//! subtree. A mirror is immutable once built; the sync pipeline rebuilds one
//! from scratch every cycle and publishes it to the [`MirrorRegistry`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::tree::{MerkleWitness, SparseMerkleTree};
use crate::domain::{DomainKind, Placement, TreeShape};
use crate::types::{Hash32, MirrorError, Result};

#[derive(Debug, Clone)]
pub struct MerkleMirror {
    domain: DomainKind,
    shape: TreeShape,
    level1: SparseMerkleTree,
    subtrees: BTreeMap<u64, SparseMerkleTree>,
    /// Shared empty level-2 tree; its root fills every unallocated level-1 slot
    empty_subtree: Option<SparseMerkleTree>,
    watermark: Option<u64>,
    built_at: DateTime<Utc>,
}

/// Authentication path for one slot, valid against `root`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorWitness {
    pub domain: DomainKind,
    pub root: Hash32,
    pub level1: u64,
    pub level2: Option<u64>,
    /// Leaf at the requested position (subtree root when `level2` is None)
    pub leaf: Hash32,
    pub level2_path: Option<MerkleWitness>,
    pub level1_path: MerkleWitness,
}

impl MirrorWitness {
    /// Recompute the root from the leaf and both paths
    pub fn compute_root(&self) -> Hash32 {
        let level1_leaf = match &self.level2_path {
            Some(path) => path.compute_root(&self.leaf),
            None => self.leaf,
        };
        self.level1_path.compute_root(&level1_leaf)
    }

    pub fn verify(&self) -> bool {
        self.compute_root() == self.root
    }
}

impl MerkleMirror {
    /// Build a mirror from scratch out of entity placements
    pub fn build<I>(
        domain: DomainKind,
        shape: TreeShape,
        placements: I,
        watermark: Option<u64>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Placement>,
    {
        let mut scalars: Vec<(u64, Hash32)> = Vec::new();
        let mut groups: BTreeMap<u64, Vec<(u64, Hash32)>> = BTreeMap::new();

        for p in placements {
            match (shape.level2_height, p.level2) {
                (None, None) => scalars.push((p.level1, p.leaf)),
                (Some(_), Some(l2)) => groups.entry(p.level1).or_default().push((l2, p.leaf)),
                _ => {
                    return Err(MirrorError::InvalidSlot(format!(
                        "{} placement at {}/{:?} does not fit the tree shape",
                        domain, p.level1, p.level2
                    )))
                }
            }
        }

        let (level1, subtrees, empty_subtree) = match shape.level2_height {
            None => (
                SparseMerkleTree::from_leaves(shape.level1_height, Hash32::ZERO, scalars)?,
                BTreeMap::new(),
                None,
            ),
            Some(h2) => {
                let empty_subtree = SparseMerkleTree::new(h2, Hash32::ZERO)?;
                let mut subtrees = BTreeMap::new();
                for (l1, members) in groups {
                    subtrees.insert(l1, SparseMerkleTree::from_leaves(h2, Hash32::ZERO, members)?);
                }
                let level1 = SparseMerkleTree::from_leaves(
                    shape.level1_height,
                    empty_subtree.root(),
                    subtrees.iter().map(|(l1, tree)| (*l1, tree.root())),
                )?;
                (level1, subtrees, Some(empty_subtree))
            }
        };

        Ok(Self {
            domain,
            shape,
            level1,
            subtrees,
            empty_subtree,
            watermark,
            built_at: Utc::now(),
        })
    }

    pub fn domain(&self) -> DomainKind {
        self.domain
    }

    pub fn root(&self) -> Hash32 {
        self.level1.root()
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Number of occupied level-1 slots
    pub fn occupied(&self) -> usize {
        self.level1.len()
    }

    /// Level-1 leaf: scalar commitment or subtree root
    pub fn level1_leaf(&self, level1: u64) -> Result<Hash32> {
        self.level1.leaf(level1)
    }

    pub fn get_witness(&self, level1: u64, level2: Option<u64>) -> Result<MirrorWitness> {
        let level1_path = self.level1.witness(level1)?;
        let (leaf, level2_path) = match (level2, &self.empty_subtree) {
            (None, _) => (self.level1.leaf(level1)?, None),
            (Some(l2), Some(empty)) => {
                let subtree = self.subtrees.get(&level1).unwrap_or(empty);
                (subtree.leaf(l2)?, Some(subtree.witness(l2)?))
            }
            (Some(_), None) => {
                return Err(MirrorError::InvalidSlot(format!(
                    "{} has no level-2 trees",
                    self.domain
                )))
            }
        };
        Ok(MirrorWitness {
            domain: self.domain,
            root: self.root(),
            level1,
            level2,
            leaf,
            level2_path,
            level1_path,
        })
    }

    pub fn shape(&self) -> TreeShape {
        self.shape
    }
}

/// Read-only witness capability handed to consumers of the mirror
pub trait WitnessProvider: Send + Sync {
    fn get_witness(
        &self,
        domain: DomainKind,
        level1: u64,
        level2: Option<u64>,
    ) -> Result<MirrorWitness>;
}

/// Latest completed rebuild per domain. Snapshots are swapped whole.
#[derive(Debug, Default)]
pub struct MirrorRegistry {
    mirrors: DashMap<DomainKind, Arc<MerkleMirror>>,
}

impl MirrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, mirror: MerkleMirror) -> Arc<MerkleMirror> {
        let mirror = Arc::new(mirror);
        self.mirrors.insert(mirror.domain(), mirror.clone());
        mirror
    }

    pub fn get(&self, domain: DomainKind) -> Option<Arc<MerkleMirror>> {
        self.mirrors.get(&domain).map(|m| m.value().clone())
    }

    pub fn domains(&self) -> Vec<DomainKind> {
        let mut domains: Vec<_> = self.mirrors.iter().map(|e| *e.key()).collect();
        domains.sort();
        domains
    }
}

impl WitnessProvider for MirrorRegistry {
    fn get_witness(
        &self,
        domain: DomainKind,
        level1: u64,
        level2: Option<u64>,
    ) -> Result<MirrorWitness> {
        let mirror = self
            .get(domain)
            .ok_or_else(|| MirrorError::NotFound(format!("no mirror built yet for {}", domain)))?;
        mirror.get_witness(level1, level2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::{commit_leaf, tree::empty_hashes};

    const SUBTREE: TreeShape = TreeShape {
        level1_height: 4,
        level2_height: Some(2),
    };

    fn member(n: u64) -> Hash32 {
        commit_leaf(&[&n.to_be_bytes()])
    }

    fn placements() -> Vec<Placement> {
        vec![
            Placement { level1: 2, level2: Some(0), leaf: member(0) },
            Placement { level1: 2, level2: Some(1), leaf: member(1) },
            Placement { level1: 5, level2: Some(3), leaf: member(3) },
        ]
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let a = MerkleMirror::build(DomainKind::Committee, SUBTREE, placements(), Some(1)).unwrap();
        let mut reversed = placements();
        reversed.reverse();
        let b = MerkleMirror::build(DomainKind::Committee, SUBTREE, reversed, Some(1)).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a.occupied(), 2);
    }

    #[test]
    fn test_unallocated_slots_share_empty_subtree_root() {
        let mirror = MerkleMirror::build(DomainKind::Committee, SUBTREE, placements(), None).unwrap();
        let empty_subtree_root = empty_hashes(2, Hash32::ZERO)[2];
        assert_eq!(mirror.level1_leaf(0).unwrap(), empty_subtree_root);
        assert_eq!(mirror.level1_leaf(15).unwrap(), empty_subtree_root);
        assert_ne!(mirror.level1_leaf(2).unwrap(), empty_subtree_root);

        let empty = MerkleMirror::build(DomainKind::Committee, SUBTREE, vec![], None).unwrap();
        assert_eq!(empty.root(), empty_hashes(4, empty_subtree_root)[4]);
    }

    #[test]
    fn test_witnesses_verify_at_both_levels() {
        let mirror = MerkleMirror::build(DomainKind::Committee, SUBTREE, placements(), None).unwrap();
        for (l1, l2) in [(2, None), (2, Some(1)), (5, Some(3)), (7, Some(0)), (7, None)] {
            let w = mirror.get_witness(l1, l2).unwrap();
            assert!(w.verify(), "witness {}/{:?} failed", l1, l2);
            assert_eq!(w.root, mirror.root());
        }
        let w = mirror.get_witness(2, Some(1)).unwrap();
        assert_eq!(w.leaf, member(1));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let scalar = TreeShape { level1_height: 4, level2_height: None };
        assert!(MerkleMirror::build(DomainKind::Request, scalar, placements(), None).is_err());
        let ok = MerkleMirror::build(
            DomainKind::Request,
            scalar,
            vec![Placement { level1: 1, level2: None, leaf: member(9) }],
            None,
        )
        .unwrap();
        assert!(matches!(ok.get_witness(1, Some(0)), Err(MirrorError::InvalidSlot(_))));
        assert!(ok.get_witness(1, None).unwrap().verify());
    }

    #[test]
    fn test_registry_replaces_snapshot() {
        let registry = MirrorRegistry::new();
        assert!(matches!(
            registry.get_witness(DomainKind::Committee, 0, None),
            Err(MirrorError::NotFound(_))
        ));
        let first = MerkleMirror::build(DomainKind::Committee, SUBTREE, vec![], None).unwrap();
        let held = registry.publish(first);
        let second = MerkleMirror::build(DomainKind::Committee, SUBTREE, placements(), None).unwrap();
        registry.publish(second);
        assert_ne!(held.root(), registry.get(DomainKind::Committee).unwrap().root());
        assert_eq!(registry.domains(), vec![DomainKind::Committee]);
    }
}
