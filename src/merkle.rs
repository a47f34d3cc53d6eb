//! Transaction Merkle inclusion proofs.
//!
//! A proof is the concatenation of the 32-byte sibling nodes from the leaf
//! up to (not including) the root, in internal byte order. The leaf index
//! selects at each level whether the sibling sits on the left or right:
//!
//!   parent = HASH256( left || right )
//!
//! with odd levels duplicating their last node, as Bitcoin does.
use bitcoin::{
    hashes::{sha256d, Hash},
    TxMerkleNode, Txid,
};

const NODE_LEN: usize = 32;

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    sha256d::Hash::hash(&data).to_byte_array()
}

/// Verify that `txid` sits at `index` under `root`.
///
/// An empty proof only verifies the single-transaction block, where the
/// txid is the root.
pub fn verify(txid: Txid, root: TxMerkleNode, proof: &[u8], index: u64) -> bool {
    if proof.len() % NODE_LEN != 0 {
        return false;
    }
    let depth = proof.len() / NODE_LEN;
    if depth < 64 && index >> depth != 0 {
        return false;
    }

    let mut current = txid.to_byte_array();
    let mut idx = index;
    for node in proof.chunks_exact(NODE_LEN) {
        let mut sibling = [0u8; 32];
        sibling.copy_from_slice(node);
        current = if idx & 1 == 0 {
            hash_pair(&current, &sibling)
        } else {
            hash_pair(&sibling, &current)
        };
        idx >>= 1;
    }
    current == root.to_byte_array()
}

/// Build the proof for the leaf at `index`, or `None` when out of range.
pub fn prove(txids: &[Txid], index: usize) -> Option<Vec<u8>> {
    if index >= txids.len() {
        return None;
    }
    let mut level: Vec<[u8; 32]> = txids.iter().map(|t| t.to_byte_array()).collect();
    let mut idx = index;
    let mut proof = Vec::new();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        proof.extend_from_slice(&level[idx ^ 1]);
        level = level.chunks_exact(2).map(|p| hash_pair(&p[0], &p[1])).collect();
        idx /= 2;
    }
    Some(proof)
}

/// Merkle root over `txids`, or `None` for an empty list.
pub fn root(txids: &[Txid]) -> Option<TxMerkleNode> {
    bitcoin::merkle_tree::calculate_root(txids.iter().copied())
        .map(|t: Txid| TxMerkleNode::from_raw_hash(t.to_raw_hash()))
}
