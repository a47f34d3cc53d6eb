mod common;

use bitcoin::{block::Header, hashes::Hash, BlockHash, CompactTarget, Network};
use common::*;
use niebla_relay::{relay::RelayEngine, RelayError, RelayEvent};

/// Regtest retargets over two weeks; closing the period in one week halves
/// the target.
const ONE_WEEK: u64 = 604_800;

fn halved_bits() -> CompactTarget {
    CompactTarget::from_consensus(0x203f_ffff)
}

/// Headers from `first_height` up to the period end at 2015, with the last
/// one stamped exactly a week after `start_time`.
fn mine_to_period_end(from: &Header, first_height: u32, start_time: u32) -> Vec<Header> {
    let span = u64::from(2015 - first_height + 1);
    let base = from.time;
    let total = u64::from(start_time) + ONE_WEEK - u64::from(base);
    let mut prev = *from;
    let mut out = Vec::new();
    for i in 1..=span {
        let time = base + (i * total / span) as u32;
        let h = mine_with(prev.block_hash(), time, prev.bits, salt_root(1));
        out.push(h);
        prev = h;
    }
    out
}

struct Closed {
    relay: RelayEngine,
    genesis: Header,
    /// Heights 1..=2015.
    period: Vec<Header>,
}

fn closed_period() -> Closed {
    let (mut relay, genesis) = relay_at(0);
    let period = mine_to_period_end(&genesis, 1, genesis.time);
    relay
        .add_headers(&genesis.block_hash(), &concat(&period))
        .expect("a full period at constant difficulty");
    Closed {
        relay,
        genesis,
        period,
    }
}

fn first_of_next(end: &Header, bits: CompactTarget) -> Header {
    mine_with(end.block_hash(), end.time + SPACING, bits, salt_root(2))
}

#[test]
fn retarget_is_accepted_at_the_period_boundary() {
    let mut c = closed_period();
    let end = c.period[2014];
    assert_eq!(c.relay.find_height(&end.block_hash()), Ok(2015));

    let n0 = first_of_next(&end, halved_bits());
    let n1 = mine(&n0, 2);
    let event = c
        .relay
        .add_headers_with_retarget(&c.genesis.block_hash(), &raw(&end), &concat(&[n0, n1]))
        .expect("halved target");
    assert_eq!(
        event,
        RelayEvent::Extension {
            first: n0.block_hash(),
            last: n1.block_hash(),
        }
    );
    assert_eq!(c.relay.find_height(&n0.block_hash()), Ok(2016));

    // The new period continues through the plain entry point.
    let n2 = mine(&n1, 2);
    c.relay
        .add_headers(&n1.block_hash(), &raw(&n2))
        .expect("same period");
    assert_eq!(c.relay.find_height(&n2.block_hash()), Ok(2018));
}

#[test]
fn wrong_new_target_is_an_invalid_retarget() {
    let mut c = closed_period();
    let end = c.period[2014];
    let stale = first_of_next(&end, regtest_bits());
    assert_eq!(
        c.relay
            .add_headers_with_retarget(&c.genesis.block_hash(), &raw(&end), &raw(&stale)),
        Err(RelayError::InvalidRetarget {
            expected: halved_bits(),
            actual: regtest_bits(),
        })
    );
    assert!(!c.relay.chain().known(&stale.block_hash()));
}

#[test]
fn plain_ingestion_cannot_cross_a_boundary() {
    let mut c = closed_period();
    let end = c.period[2014];
    let n0 = first_of_next(&end, halved_bits());
    assert_eq!(
        c.relay.add_headers(&end.block_hash(), &raw(&n0)),
        Err(RelayError::UnexpectedRetarget(n0.block_hash()))
    );
}

#[test]
fn period_bounds_are_enforced() {
    let mut c = closed_period();
    let g = c.genesis.block_hash();
    let end = c.period[2014];
    let n0 = first_of_next(&end, halved_bits());

    let unknown = BlockHash::from_byte_array([4; 32]);
    assert_eq!(
        c.relay.add_headers_with_retarget(&unknown, &raw(&end), &raw(&n0)),
        Err(RelayError::UnknownBlock(unknown))
    );
    let stranger = mine(&end, 7);
    assert_eq!(
        c.relay.add_headers_with_retarget(&g, &raw(&stranger), &raw(&n0)),
        Err(RelayError::UnknownBlock(stranger.block_hash()))
    );

    let mid = c.period[2013];
    assert_eq!(
        c.relay.add_headers_with_retarget(&g, &raw(&mid), &raw(&n0)),
        Err(RelayError::MustProvideClosingHeader)
    );

    let late_start = c.period[0].block_hash();
    assert_eq!(
        c.relay.add_headers_with_retarget(&late_start, &raw(&end), &raw(&n0)),
        Err(RelayError::MustSpanExactlyOnePeriod)
    );

    let mut misaligned = raw(&n0);
    misaligned.truncate(70);
    assert_eq!(
        c.relay.add_headers_with_retarget(&g, &raw(&end), &misaligned),
        Err(RelayError::HeaderArrayMisaligned { len: 70 })
    );
}

#[test]
fn harder_branch_across_a_retarget_outweighs_a_longer_one() {
    let mut c = closed_period();
    let g = c.genesis.block_hash();
    let fork = c.period[2013];

    // Hard: the closing header at 2015, then two halved-target headers.
    let end = c.period[2014];
    let n0 = first_of_next(&end, halved_bits());
    let n1 = mine(&n0, 2);
    c.relay
        .add_headers_with_retarget(&g, &raw(&end), &concat(&[n0, n1]))
        .expect("hard branch");

    // Easy: a period closed in two weeks keeps the target, then three more
    // headers, ending one above the hard tip.
    let slow_end = mine_with(
        fork.block_hash(),
        c.genesis.time + 2 * ONE_WEEK as u32,
        regtest_bits(),
        salt_root(5),
    );
    c.relay
        .add_headers(&fork.block_hash(), &raw(&slow_end))
        .expect("slow period end");
    let e0 = first_of_next(&slow_end, regtest_bits());
    let easy = {
        let mut out = vec![e0];
        out.extend(extend(&e0, 2, 5));
        out
    };
    c.relay
        .add_headers_with_retarget(&g, &raw(&slow_end), &concat(&easy))
        .expect("unchanged target");

    let (hard_tip, easy_tip) = (n1.block_hash(), easy[2].block_hash());
    assert_eq!(c.relay.find_height(&hard_tip), Ok(2017));
    assert_eq!(c.relay.find_height(&easy_tip), Ok(2018));
    assert_eq!(
        c.relay.heaviest_from_ancestor(&fork.block_hash(), &easy_tip, &hard_tip),
        Ok(hard_tip)
    );

    c.relay
        .mark_new_heaviest(&g, &raw(&c.genesis), &raw(&easy[2]), 2_100)
        .expect("easy tip over genesis");
    assert_eq!(
        c.relay
            .mark_new_heaviest(&easy_tip, &raw(&easy[2]), &raw(&n1), 10),
        Ok(RelayEvent::Reorg {
            from: easy_tip,
            to: hard_tip,
            common_ancestor: fork.block_hash(),
        })
    );
    assert!(matches!(
        c.relay
            .mark_new_heaviest(&hard_tip, &raw(&n1), &raw(&easy[2]), 10),
        Err(RelayError::NewBestNotHeavier { .. })
    ));
}

#[test]
fn mid_period_genesis_retargets_from_its_period_start() {
    let start = root_header(T0, regtest_bits());
    let genesis = mine_with(
        BlockHash::from_byte_array([5; 32]),
        T0 + 1_000 * SPACING / 2,
        regtest_bits(),
        salt_root(3),
    );
    let mut relay = RelayEngine::new(genesis, 1_000, Some(start), Network::Regtest)
        .expect("anchored relay");
    assert_eq!(relay.find_height(&start.block_hash()), Ok(0));
    assert_eq!(relay.state().period_start, Some(start.block_hash()));

    let rest = mine_to_period_end(&genesis, 1_001, start.time);
    relay
        .add_headers(&genesis.block_hash(), &concat(&rest))
        .expect("rest of the period");

    let end = rest[rest.len() - 1];
    assert_eq!(relay.find_height(&end.block_hash()), Ok(2015));
    let n0 = first_of_next(&end, halved_bits());
    relay
        .add_headers_with_retarget(&start.block_hash(), &raw(&end), &raw(&n0))
        .expect("retarget from the recorded period start");
    assert_eq!(relay.find_height(&n0.block_hash()), Ok(2016));
}

#[test]
fn construction_checks_genesis_and_period_start() {
    let genesis = root_header(T0, regtest_bits());
    let weak = unmined_child(&genesis);
    assert_eq!(
        RelayEngine::new(weak, 10, None, Network::Regtest).err(),
        Some(RelayError::InsufficientWork(weak.block_hash()))
    );

    let start = root_header(T0 - 1, regtest_bits());
    assert_eq!(
        RelayEngine::new(genesis, 2_016, Some(start), Network::Regtest).err(),
        Some(RelayError::MustSpanExactlyOnePeriod)
    );

    let harder_start = mine_with(BlockHash::all_zeros(), T0 - 1, halved_bits(), salt_root(9));
    assert_eq!(
        RelayEngine::new(genesis, 10, Some(harder_start), Network::Regtest).err(),
        Some(RelayError::PeriodTargetMismatch)
    );

    // Naming genesis as its own period start is the same as naming none.
    let relay = RelayEngine::new(genesis, 2_016, Some(genesis), Network::Regtest)
        .expect("genesis at a boundary");
    assert_eq!(relay.state().period_start, None);
}
