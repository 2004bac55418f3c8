//! Merkle commitment over a block's transaction hashes
//!
//! The root binds a header to the exact, ordered transaction set: changing,
//! adding, removing or reordering any transaction changes the root.

use super::hash::sha256;
use crate::types::Hash;

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    sha256(&data)
}

/// Calculate the merkle root from a list of transaction hashes
///
/// An empty list commits to `sha256("")`; an odd node at any level is paired
/// with itself.
pub fn calculate_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return sha256(b"");
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|chunk| match chunk {
                [left, right] => hash_pair(left, right),
                [single] => hash_pair(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }

    current_level[0]
}
