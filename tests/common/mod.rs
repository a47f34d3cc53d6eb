#![allow(dead_code)]
//! Regtest-difficulty header mining and a transaction fixture.
use bitcoin::{
    absolute::LockTime,
    block::{Header, Version},
    consensus,
    hashes::Hash,
    transaction, Amount, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxMerkleNode, TxOut, Txid, WPubkeyHash, Witness,
};
use niebla_relay::{header, merkle, relay::RelayEngine};

pub const T0: u32 = 1_700_000_000;
pub const SPACING: u32 = 600;

pub fn regtest_bits() -> CompactTarget {
    CompactTarget::from_consensus(0x207f_ffff)
}

/// Grind the nonce until the header meets its own target.
pub fn mine_with(prev: BlockHash, time: u32, bits: CompactTarget, root: TxMerkleNode) -> Header {
    let mut h = Header {
        version: Version::from_consensus(0x2000_0000),
        prev_blockhash: prev,
        merkle_root: root,
        time,
        bits,
        nonce: 0,
    };
    let target = h.target();
    while !target.is_met_by(h.block_hash()) {
        h.nonce += 1;
    }
    h
}

/// A header whose nonce does *not* meet its target.
pub fn unmined_child(prev: &Header) -> Header {
    let mut h = Header {
        nonce: 0,
        ..mine(prev, 0)
    };
    while h.target().is_met_by(h.block_hash()) {
        h.nonce += 1;
    }
    h
}

pub fn salt_root(salt: u8) -> TxMerkleNode {
    TxMerkleNode::from_byte_array([salt; 32])
}

/// Parentless header, usable as a relay genesis at any height.
pub fn root_header(time: u32, bits: CompactTarget) -> Header {
    mine_with(BlockHash::all_zeros(), time, bits, salt_root(0))
}

/// Child of `prev` with the same bits. `salt` separates sibling branches.
pub fn mine(prev: &Header, salt: u8) -> Header {
    mine_with(prev.block_hash(), prev.time + SPACING, prev.bits, salt_root(salt))
}

/// `n` headers extending `from`.
pub fn extend(from: &Header, n: usize, salt: u8) -> Vec<Header> {
    let mut out: Vec<Header> = Vec::with_capacity(n);
    let mut prev = *from;
    for _ in 0..n {
        let h = mine(&prev, salt);
        out.push(h);
        prev = h;
    }
    out
}

pub fn raw(h: &Header) -> Vec<u8> {
    header::serialize(h).to_vec()
}

pub fn concat(headers: &[Header]) -> Vec<u8> {
    headers.iter().flat_map(|h| header::serialize(h)).collect()
}

/// Regtest relay rooted at a fresh header at `height`.
pub fn relay_at(height: u32) -> (RelayEngine, Header) {
    let genesis = root_header(T0, regtest_bits());
    let relay = RelayEngine::new(genesis, height, None, bitcoin::Network::Regtest)
        .expect("regtest genesis is valid");
    (relay, genesis)
}

/// Point the relay's best digest at `tip`.
pub fn make_best(relay: &mut RelayEngine, tip: &Header) {
    let best = relay.best_known_digest();
    let current = relay.chain().entry(&best).expect("best is known").header;
    relay
        .mark_new_heaviest(&best, &raw(&current), &raw(tip), 1_000)
        .expect("tip is heavier");
}

/// One-input, one-output transaction sitting at index 1 of a three-tx block.
pub struct TxFixture {
    pub version: [u8; 4],
    pub locktime: [u8; 4],
    pub vin: Vec<u8>,
    pub vout: Vec<u8>,
    pub txid: Txid,
    pub txids: Vec<Txid>,
    pub index: usize,
    /// The 36-byte outpoint the input spends.
    pub outpoint: Vec<u8>,
    /// Length-prefixed p2wpkh script the output pays.
    pub pays: Vec<u8>,
    pub value: u64,
}

impl TxFixture {
    pub fn new() -> Self {
        let outpoint_raw = vec![0x11; 36];
        let previous_output: OutPoint =
            consensus::deserialize(&outpoint_raw).expect("36 bytes decode");
        let script_pubkey = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([7; 20]));
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(100),
                script_pubkey: script_pubkey.clone(),
            }],
        };

        let txid = tx.compute_txid();
        Self {
            version: 2i32.to_le_bytes(),
            locktime: 0u32.to_le_bytes(),
            vin: consensus::serialize(&tx.input),
            vout: consensus::serialize(&tx.output),
            txid,
            txids: vec![Txid::from_byte_array([0xaa; 32]), txid, Txid::from_byte_array([0xbb; 32])],
            index: 1,
            outpoint: outpoint_raw,
            pays: consensus::serialize(&script_pubkey),
            value: 100,
        }
    }

    pub fn root(&self) -> TxMerkleNode {
        merkle::root(&self.txids).expect("non-empty")
    }

    pub fn proof(&self) -> Vec<u8> {
        merkle::prove(&self.txids, self.index).expect("in range")
    }

    /// Mined child of `prev` committing to this fixture's block.
    pub fn block_on(&self, prev: &Header) -> Header {
        mine_with(prev.block_hash(), prev.time + SPACING, prev.bits, self.root())
    }
}
