//! Fixed 80-byte header layout, identity and work.
use bitcoin::{
    block::Header, consensus, pow::CompactTarget, BlockHash, Target, Work,
};

use crate::error::RelayError;

/// Serialized header length.
pub const HEADER_LEN: usize = 80;

/// Parse exactly one 80-byte header.
pub fn parse(bytes: &[u8]) -> Result<Header, RelayError> {
    if bytes.len() != HEADER_LEN {
        return Err(RelayError::MalformedHeader { len: bytes.len() });
    }
    // Every field is fixed width, so any 80 bytes decode.
    consensus::deserialize(bytes).map_err(|_| RelayError::MalformedHeader { len: bytes.len() })
}

/// Split a concatenated header array into headers.
///
/// An empty array is rejected along with misaligned ones: a batch must
/// extend the chain by at least one header.
pub fn parse_array(bytes: &[u8]) -> Result<Vec<Header>, RelayError> {
    if bytes.is_empty() || bytes.len() % HEADER_LEN != 0 {
        return Err(RelayError::HeaderArrayMisaligned { len: bytes.len() });
    }
    bytes.chunks_exact(HEADER_LEN).map(parse).collect()
}

/// Raw 80-byte encoding of a header.
pub fn serialize(header: &Header) -> [u8; HEADER_LEN] {
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&consensus::serialize(header));
    raw
}

/// Double-SHA256 identity. The internal byte order is little-endian.
pub fn identity(header: &Header) -> BlockHash {
    header.block_hash()
}

/// Expand compact `bits` into the full 256-bit target.
pub fn expand_target(bits: CompactTarget) -> Target {
    Target::from_compact(bits)
}

/// Work represented by a target (2^256 / (target + 1)).
pub fn work(target: Target) -> Work {
    target.to_work()
}

/// Work a header contributes under its own target.
pub fn header_work(header: &Header) -> Work {
    work(expand_target(header.bits))
}

/// Proof-of-work check: hash interpreted as a number is at or below target.
pub fn meets_target(identity: BlockHash, target: Target) -> bool {
    target.is_met_by(identity)
}
