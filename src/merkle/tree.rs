//! Fixed-height sparse Merkle tree
//!
//! Only non-default nodes are stored. Every absent node at level `l` equals
//! `empty[l]`, the root of an all-empty subtree of height `l`, precomputed once.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::hash_node;
use crate::types::{Hash32, MirrorError, Result};

/// Upper bound on tree height; slot indexes are u64
pub const MAX_HEIGHT: u8 = 32;

#[derive(Debug, Clone)]
pub struct SparseMerkleTree {
    height: u8,
    /// `empty[l]` = root of an empty subtree of height l; `empty[0]` is the empty leaf
    empty: Vec<Hash32>,
    /// `levels[l]` holds non-default nodes at height l
    levels: Vec<HashMap<u64, Hash32>>,
}

/// One step of an authentication path, leaf to root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessStep {
    pub sibling: Hash32,
    /// True when the node on the path is the left child
    pub is_left: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleWitness {
    pub index: u64,
    pub path: Vec<WitnessStep>,
}

impl MerkleWitness {
    /// Fold `leaf` up the path
    pub fn compute_root(&self, leaf: &Hash32) -> Hash32 {
        self.path.iter().fold(*leaf, |node, step| {
            if step.is_left {
                hash_node(&node, &step.sibling)
            } else {
                hash_node(&step.sibling, &node)
            }
        })
    }

    pub fn verify(&self, leaf: &Hash32, root: &Hash32) -> bool {
        self.compute_root(leaf) == *root
    }
}

/// Roots of empty subtrees of height 0..=height
pub fn empty_hashes(height: u8, empty_leaf: Hash32) -> Vec<Hash32> {
    let mut empty = Vec::with_capacity(height as usize + 1);
    empty.push(empty_leaf);
    for l in 0..height as usize {
        let below = empty[l];
        empty.push(hash_node(&below, &below));
    }
    empty
}

impl SparseMerkleTree {
    pub fn new(height: u8, empty_leaf: Hash32) -> Result<Self> {
        if height == 0 || height > MAX_HEIGHT {
            return Err(MirrorError::Internal(format!(
                "tree height {} outside 1..={}",
                height, MAX_HEIGHT
            )));
        }
        Ok(Self {
            height,
            empty: empty_hashes(height, empty_leaf),
            levels: vec![HashMap::new(); height as usize + 1],
        })
    }

    /// Build a tree from `(index, leaf)` pairs in one bottom-up pass
    pub fn from_leaves<I>(height: u8, empty_leaf: Hash32, leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, Hash32)>,
    {
        let mut tree = Self::new(height, empty_leaf)?;
        for (index, leaf) in leaves {
            tree.check_index(index)?;
            if tree.levels[0].insert(index, leaf).is_some() {
                return Err(MirrorError::InvalidSlot(format!(
                    "leaf {} assigned twice",
                    index
                )));
            }
        }
        for level in 0..tree.height as usize {
            let parents: Vec<u64> = {
                let mut p: Vec<u64> = tree.levels[level].keys().map(|i| i / 2).collect();
                p.sort_unstable();
                p.dedup();
                p
            };
            for parent in parents {
                let left = tree.node(level, parent * 2);
                let right = tree.node(level, parent * 2 + 1);
                tree.levels[level + 1].insert(parent, hash_node(&left, &right));
            }
        }
        Ok(tree)
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.height
    }

    pub fn root(&self) -> Hash32 {
        self.node(self.height as usize, 0)
    }

    pub fn empty_root(&self) -> Hash32 {
        self.empty[self.height as usize]
    }

    pub fn leaf(&self, index: u64) -> Result<Hash32> {
        self.check_index(index)?;
        Ok(self.node(0, index))
    }

    /// Number of non-empty leaves
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Update one leaf and rehash its path to the root
    pub fn set(&mut self, index: u64, leaf: Hash32) -> Result<()> {
        self.check_index(index)?;
        self.levels[0].insert(index, leaf);
        let mut idx = index;
        for level in 0..self.height as usize {
            let parent = idx / 2;
            let left = self.node(level, parent * 2);
            let right = self.node(level, parent * 2 + 1);
            self.levels[level + 1].insert(parent, hash_node(&left, &right));
            idx = parent;
        }
        Ok(())
    }

    pub fn witness(&self, index: u64) -> Result<MerkleWitness> {
        self.check_index(index)?;
        let mut idx = index;
        let mut path = Vec::with_capacity(self.height as usize);
        for level in 0..self.height as usize {
            let is_left = idx % 2 == 0;
            let sibling = self.node(level, if is_left { idx + 1 } else { idx - 1 });
            path.push(WitnessStep { sibling, is_left });
            idx /= 2;
        }
        Ok(MerkleWitness { index, path })
    }

    fn node(&self, level: usize, index: u64) -> Hash32 {
        self.levels[level]
            .get(&index)
            .copied()
            .unwrap_or(self.empty[level])
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.capacity() {
            return Err(MirrorError::InvalidSlot(format!(
                "index {} outside tree of height {}",
                index, self.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::commit_leaf;

    fn leaf(n: u64) -> Hash32 {
        commit_leaf(&[&n.to_be_bytes()])
    }

    #[test]
    fn test_empty_tree_root() {
        let tree = SparseMerkleTree::new(3, Hash32::ZERO).unwrap();
        let l1 = hash_node(&Hash32::ZERO, &Hash32::ZERO);
        let l2 = hash_node(&l1, &l1);
        assert_eq!(tree.root(), hash_node(&l2, &l2));
        assert_eq!(tree.root(), tree.empty_root());
    }

    #[test]
    fn test_bulk_build_matches_incremental() {
        let leaves = [(0u64, leaf(0)), (5, leaf(5)), (6, leaf(6))];
        let bulk = SparseMerkleTree::from_leaves(3, Hash32::ZERO, leaves).unwrap();
        let mut incremental = SparseMerkleTree::new(3, Hash32::ZERO).unwrap();
        for (i, l) in leaves {
            incremental.set(i, l).unwrap();
        }
        assert_eq!(bulk.root(), incremental.root());
        assert_eq!(bulk.len(), 3);
    }

    #[test]
    fn test_witness_recomputes_root() {
        let tree =
            SparseMerkleTree::from_leaves(4, Hash32::ZERO, [(3, leaf(3)), (9, leaf(9))]).unwrap();
        for index in [3u64, 9, 0, 15] {
            let w = tree.witness(index).unwrap();
            assert_eq!(w.path.len(), 4);
            assert!(w.verify(&tree.leaf(index).unwrap(), &tree.root()));
        }
        let w = tree.witness(3).unwrap();
        assert!(!w.verify(&leaf(4), &tree.root()));
    }

    #[test]
    fn test_rejects_out_of_range_and_duplicates() {
        let tree = SparseMerkleTree::new(2, Hash32::ZERO).unwrap();
        assert!(matches!(tree.witness(4), Err(MirrorError::InvalidSlot(_))));
        let dup = SparseMerkleTree::from_leaves(2, Hash32::ZERO, [(1, leaf(1)), (1, leaf(2))]);
        assert!(matches!(dup, Err(MirrorError::InvalidSlot(_))));
    }
}
