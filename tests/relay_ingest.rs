mod common;

use bitcoin::{hashes::Hash, BlockHash, CompactTarget};
use common::*;
use niebla_relay::{RelayError, RelayEvent};

#[test]
fn six_headers_on_a_mainnet_height_genesis() {
    let (mut relay, genesis) = relay_at(590_588);
    let headers = extend(&genesis, 6, 1);

    let event = relay
        .add_headers(&genesis.block_hash(), &concat(&headers))
        .expect("valid batch");

    assert_eq!(relay.find_height(&headers[0].block_hash()), Ok(590_589));
    assert_eq!(relay.find_height(&headers[5].block_hash()), Ok(590_594));
    assert_eq!(
        event,
        RelayEvent::Extension {
            first: headers[0].block_hash(),
            last: headers[5].block_hash(),
        }
    );
    // Only an explicit reorg claim moves the tip.
    assert_eq!(relay.best_known_digest(), genesis.block_hash());
    assert_eq!(relay.last_reorg_common_ancestor(), genesis.block_hash());
    assert_eq!(relay.relay_genesis(), genesis.block_hash());
}

#[test]
fn unknown_anchor_and_misaligned_batches_are_rejected() {
    let (mut relay, genesis) = relay_at(0);
    let headers = extend(&genesis, 2, 1);
    let bogus = BlockHash::from_byte_array([9; 32]);

    assert_eq!(
        relay.add_headers(&bogus, &concat(&headers)),
        Err(RelayError::UnknownBlock(bogus))
    );

    let mut raw = concat(&headers);
    raw.push(0);
    assert_eq!(
        relay.add_headers(&genesis.block_hash(), &raw),
        Err(RelayError::HeaderArrayMisaligned { len: 161 })
    );
    assert_eq!(
        relay.add_headers(&genesis.block_hash(), &[]),
        Err(RelayError::HeaderArrayMisaligned { len: 0 })
    );
}

#[test]
fn per_header_policy_violations() {
    let (mut relay, genesis) = relay_at(0);
    let anchor = genesis.block_hash();

    let weak = unmined_child(&genesis);
    assert_eq!(
        relay.add_headers(&anchor, &raw(&weak)),
        Err(RelayError::InsufficientWork(weak.block_hash()))
    );

    // A harder target still meets the anchor's, but is a retarget.
    let harder = mine_with(
        anchor,
        genesis.time + SPACING,
        CompactTarget::from_consensus(0x203f_ffff),
        salt_root(1),
    );
    assert_eq!(
        relay.add_headers(&anchor, &raw(&harder)),
        Err(RelayError::UnexpectedRetarget(harder.block_hash()))
    );

    let headers = extend(&genesis, 3, 1);
    let gapped = concat(&[headers[0], headers[2]]);
    assert_eq!(
        relay.add_headers(&anchor, &gapped),
        Err(RelayError::InconsistentChain(headers[2].block_hash()))
    );
}

#[test]
fn rejected_batches_leave_no_trace() {
    let (mut relay, genesis) = relay_at(0);
    let good = extend(&genesis, 2, 1);
    let weak = unmined_child(&good[1]);
    let before = relay.chain().len();

    let batch = concat(&[good[0], good[1], weak]);
    assert!(relay.add_headers(&genesis.block_hash(), &batch).is_err());
    assert_eq!(relay.chain().len(), before);
    assert!(!relay.chain().known(&good[0].block_hash()));
}

#[test]
fn overlapping_batches_are_idempotent() {
    let (mut once, genesis) = relay_at(100);
    let headers = extend(&genesis, 6, 1);
    once.add_headers(&genesis.block_hash(), &concat(&headers))
        .expect("full batch");

    let (mut twice, _) = relay_at(100);
    twice
        .add_headers(&genesis.block_hash(), &concat(&headers[..4]))
        .expect("prefix");
    let event = twice
        .add_headers(&headers[1].block_hash(), &concat(&headers[2..]))
        .expect("overlapping suffix");
    assert_eq!(
        event,
        RelayEvent::Extension {
            first: headers[2].block_hash(),
            last: headers[5].block_hash(),
        }
    );
    // Full replay is accepted too.
    twice
        .add_headers(&genesis.block_hash(), &concat(&headers))
        .expect("replay");

    let a: Vec<_> = once.chain().entries().copied().collect();
    let b: Vec<_> = twice.chain().entries().copied().collect();
    assert_eq!(a, b);
}

#[test]
fn replayed_known_headers_must_still_link() {
    let (mut relay, genesis) = relay_at(0);
    let headers = extend(&genesis, 3, 1);
    relay
        .add_headers(&genesis.block_hash(), &concat(&headers))
        .expect("batch");

    // headers[2] is known but does not follow the genesis anchor.
    assert_eq!(
        relay.add_headers(&genesis.block_hash(), &raw(&headers[2])),
        Err(RelayError::InconsistentChain(headers[2].block_hash()))
    );
}

#[test]
fn ancestors_round_trip_to_genesis() {
    let genesis_height = 590_588;
    let (mut relay, genesis) = relay_at(genesis_height);
    let headers = extend(&genesis, 8, 1);
    relay
        .add_headers(&genesis.block_hash(), &concat(&headers))
        .expect("batch");

    for h in &headers {
        let digest = h.block_hash();
        let height = relay.find_height(&digest).expect("known");
        assert_eq!(
            relay.find_ancestor(&digest, height - genesis_height),
            Ok(genesis.block_hash())
        );
        assert_eq!(relay.find_ancestor(&digest, 0), Ok(digest));
    }

    let tip = headers[7].block_hash();
    assert_eq!(
        relay.find_ancestor(&tip, 9),
        Err(RelayError::UnknownAncestor {
            digest: tip,
            offset: 9
        })
    );
}

#[test]
fn is_ancestor_respects_the_search_limit() {
    let (mut relay, genesis) = relay_at(0);
    let headers = extend(&genesis, 6, 1);
    relay
        .add_headers(&genesis.block_hash(), &concat(&headers))
        .expect("batch");

    let g = genesis.block_hash();
    let tip = headers[5].block_hash();
    // Genesis is six hops below the tip.
    assert!(relay.is_ancestor(&g, &tip, 7));
    assert!(!relay.is_ancestor(&g, &tip, 6));
    assert!(relay.is_ancestor(&tip, &tip, 1));
    assert!(!relay.is_ancestor(&tip, &tip, 0));
    assert!(!relay.is_ancestor(&tip, &g, 100));
}
