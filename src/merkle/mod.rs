//! Commitment trees
//!
//! Hashing is SHA-256 with a one-byte domain prefix so leaves, inner nodes and
//! payload hashes can never collide:
//!
//! - leaf = H(0x00 || len(f0) || f0 || len(f1) || f1 ...)
//! - node = H(0x01 || left || right)
//!
//! Lengths are u32 big-endian.

pub mod mirror;
pub mod tree;

use crate::types::Hash32;

pub use mirror::{MerkleMirror, MirrorRegistry, MirrorWitness, WitnessProvider};
pub use tree::{MerkleWitness, SparseMerkleTree, WitnessStep};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Commit an ordered list of fields into a leaf
pub fn commit_leaf(fields: &[&[u8]]) -> Hash32 {
    let mut buf = Vec::with_capacity(1 + fields.iter().map(|f| 4 + f.len()).sum::<usize>());
    buf.push(LEAF_PREFIX);
    for field in fields {
        buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
        buf.extend_from_slice(field);
    }
    Hash32::digest(&[&buf])
}

/// Inner node over two children
pub fn hash_node(left: &Hash32, right: &Hash32) -> Hash32 {
    Hash32::digest(&[&[NODE_PREFIX], left.as_bytes(), right.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_and_node_are_domain_separated() {
        let a = Hash32::digest(&[b"a"]);
        let b = Hash32::digest(&[b"b"]);
        let mut concatenated = a.as_bytes().to_vec();
        concatenated.extend_from_slice(b.as_bytes());
        assert_ne!(hash_node(&a, &b), commit_leaf(&[&concatenated]));
        assert_ne!(hash_node(&a, &b), hash_node(&b, &a));
    }

    #[test]
    fn test_leaf_fields_are_length_prefixed() {
        assert_ne!(commit_leaf(&[b"ab", b"c"]), commit_leaf(&[b"a", b"bc"]));
        assert_ne!(commit_leaf(&[]), Hash32::ZERO);
    }
}
