//! Header ingestion and best-chain selection.
//!
//! Mutations are split in two: `plan_*` validates against the current
//! state and returns a [`ChainUpdate`] without touching anything, and
//! [`RelayEngine::apply`] commits it. The async service persists each plan
//! in between, so a rejected or unpersisted update is never observable.
use bitcoin::{block::Header, params::Params, pow::CompactTarget, BlockHash, Network};
use tracing::{debug, info};

use crate::{
    chain::{ChainEntry, ChainStore},
    error::RelayError,
    events::RelayEvent,
    header, retarget,
};

/// Relay-wide pointers into the chain store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayState {
    /// Digest of the relay genesis.
    pub genesis: BlockHash,
    /// Absolute height of the relay genesis.
    pub genesis_height: u32,
    /// Tip of the heaviest chain marked so far.
    pub best_known: BlockHash,
    /// Always an ancestor of (or equal to) `best_known`.
    pub last_reorg_common_ancestor: BlockHash,
    /// Root recorded below genesis for the first retarget, if any.
    pub period_start: Option<BlockHash>,
}

/// A validated, not yet applied, state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainUpdate {
    /// New entries in parent-first order. May be empty when the whole
    /// batch was already known.
    Extend {
        /// Entries to insert.
        entries: Vec<ChainEntry>,
        /// Digest of the first header in the batch.
        first: BlockHash,
        /// Digest of the last header in the batch.
        last: BlockHash,
    },
    /// Move the best digest.
    Reorg {
        /// Current best digest.
        from: BlockHash,
        /// New best digest.
        to: BlockHash,
        /// Latest common ancestor of `from` and `to`.
        common_ancestor: BlockHash,
    },
}

/// Read-only view the proof oracle checks confirmations against.
pub trait ChainQuery {
    /// Tip of the heaviest known chain.
    fn best_known_digest(&self) -> BlockHash;
    /// Absolute height of a known header.
    fn find_height(&self, digest: &BlockHash) -> Result<u32, RelayError>;
    /// Bounded ancestry check, see [`ChainStore::is_ancestor`].
    fn is_ancestor(&self, ancestor: &BlockHash, descendant: &BlockHash, limit: u32) -> bool;
    /// Stored header for a known digest.
    fn header(&self, digest: &BlockHash) -> Option<Header>;
}

/// The header relay: a [`ChainStore`] plus the best-chain pointers.
#[derive(Clone, Debug)]
pub struct RelayEngine {
    chain: ChainStore,
    state: RelayState,
    params: Params,
}

impl RelayEngine {
    /// Create a relay rooted at `genesis`.
    ///
    /// `period_start` is the header that opened the difficulty period
    /// containing `genesis`; it is only needed when genesis is not itself
    /// at a period boundary, and only for validating the first retarget.
    pub fn new(
        genesis: Header,
        genesis_height: u32,
        period_start: Option<Header>,
        network: Network,
    ) -> Result<Self, RelayError> {
        let genesis_digest = header::identity(&genesis);
        if !header::meets_target(genesis_digest, genesis.target()) {
            return Err(RelayError::InsufficientWork(genesis_digest));
        }

        let mut chain = ChainStore::new();
        let start_height = retarget::period_start_height(genesis_height);
        let period_start = match period_start {
            Some(start) if header::identity(&start) != genesis_digest => {
                if start_height == genesis_height {
                    return Err(RelayError::MustSpanExactlyOnePeriod);
                }
                let digest = header::identity(&start);
                if !header::meets_target(digest, start.target()) {
                    return Err(RelayError::InsufficientWork(digest));
                }
                if start.bits != genesis.bits {
                    return Err(RelayError::PeriodTargetMismatch);
                }
                Some(chain.insert_root(start, start_height))
            }
            _ => None,
        };
        chain.insert_root(genesis, genesis_height);

        Ok(Self {
            chain,
            state: RelayState {
                genesis: genesis_digest,
                genesis_height,
                best_known: genesis_digest,
                last_reorg_common_ancestor: genesis_digest,
                period_start,
            },
            params: Params::new(network),
        })
    }

    /// Reassemble a relay from persisted parts.
    pub fn from_parts(
        chain: ChainStore,
        state: RelayState,
        network: Network,
    ) -> Result<Self, RelayError> {
        for digest in [state.genesis, state.best_known, state.last_reorg_common_ancestor] {
            chain.entry(&digest)?;
        }
        Ok(Self {
            chain,
            state,
            params: Params::new(network),
        })
    }

    /// The underlying chain store.
    pub fn chain(&self) -> &ChainStore {
        &self.chain
    }

    /// Current relay pointers.
    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Consensus parameters of the configured network.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Digest the relay was rooted at.
    pub fn relay_genesis(&self) -> BlockHash {
        self.state.genesis
    }

    /// Tip of the heaviest chain marked so far.
    pub fn best_known_digest(&self) -> BlockHash {
        self.state.best_known
    }

    /// Common ancestor recorded by the last reorg.
    pub fn last_reorg_common_ancestor(&self) -> BlockHash {
        self.state.last_reorg_common_ancestor
    }

    /// Height of a known digest.
    pub fn find_height(&self, digest: &BlockHash) -> Result<u32, RelayError> {
        self.chain.height(digest)
    }

    /// Ancestor `offset` hops below `digest`.
    pub fn find_ancestor(&self, digest: &BlockHash, offset: u32) -> Result<BlockHash, RelayError> {
        self.chain.ancestor(digest, offset)
    }

    /// See [`ChainStore::is_ancestor`].
    pub fn is_ancestor(&self, ancestor: &BlockHash, descendant: &BlockHash, limit: u32) -> bool {
        self.chain.is_ancestor(ancestor, descendant, limit)
    }

    // ---- ingestion ----

    /// Validate a batch that extends `anchor` without crossing a retarget.
    pub fn plan_add_headers(
        &self,
        anchor: &BlockHash,
        headers: &[u8],
    ) -> Result<ChainUpdate, RelayError> {
        let anchor = self.chain.entry(anchor)?;
        let batch = header::parse_array(headers)?;
        self.plan_extension(anchor, batch, anchor.header.bits)
    }

    /// Validate a batch that opens a new difficulty period.
    ///
    /// `period_start` and `period_end` bound the period that just closed;
    /// the first header of `headers` must carry the target derived from
    /// their timestamps.
    pub fn plan_add_headers_with_retarget(
        &self,
        period_start: &BlockHash,
        period_end: &[u8],
        headers: &[u8],
    ) -> Result<ChainUpdate, RelayError> {
        let start = self.chain.entry(period_start)?;
        let end_header = header::parse(period_end)?;
        let end = self.chain.entry(&header::identity(&end_header))?;

        if !retarget::is_period_end(end.height) {
            return Err(RelayError::MustProvideClosingHeader);
        }
        if end.height.checked_sub(start.height) != Some(retarget::PERIOD_LENGTH - 1)
            || !self.descends_from(end, start)
        {
            return Err(RelayError::MustSpanExactlyOnePeriod);
        }
        if start.header.bits != end.header.bits {
            return Err(RelayError::PeriodTargetMismatch);
        }

        let batch = header::parse_array(headers)?;
        let actual = batch[0].bits;
        let expected = retarget::expected_bits(
            end.header.target(),
            start.header.time,
            end.header.time,
            &self.params,
        );
        if actual != expected {
            return Err(RelayError::InvalidRetarget { expected, actual });
        }
        self.plan_extension(end, batch, actual)
    }

    // The pre-genesis period anchor is a bare root, so a period end above
    // genesis descends from it exactly when it descends from genesis.
    fn descends_from(&self, end: &ChainEntry, start: &ChainEntry) -> bool {
        let (root, root_height) = if self.state.period_start == Some(start.digest) {
            (self.state.genesis, self.state.genesis_height)
        } else {
            (start.digest, start.height)
        };
        end.height
            .checked_sub(root_height)
            .and_then(|hops| self.chain.ancestor(&end.digest, hops).ok())
            == Some(root)
    }

    fn plan_extension(
        &self,
        anchor: &ChainEntry,
        batch: Vec<Header>,
        bits: CompactTarget,
    ) -> Result<ChainUpdate, RelayError> {
        let target = header::expand_target(bits);
        let first = header::identity(&batch[0]);
        let mut prev = *anchor;
        let mut entries = Vec::new();

        for h in batch {
            let digest = header::identity(&h);

            if let Some(known) = self.chain.get(&digest) {
                // Work and target were proven on first sight; the link is
                // still checked so the running height stays honest.
                if h.prev_blockhash != prev.digest {
                    return Err(RelayError::InconsistentChain(digest));
                }
                debug!(%digest, height = known.height, "skipping known header");
                prev = *known;
                continue;
            }

            if !header::meets_target(digest, target) {
                return Err(RelayError::InsufficientWork(digest));
            }
            if h.bits != bits {
                return Err(RelayError::UnexpectedRetarget(digest));
            }
            if h.prev_blockhash != prev.digest {
                return Err(RelayError::InconsistentChain(digest));
            }

            let entry = ChainEntry::child_of(&prev, h);
            entries.push(entry);
            prev = entry;
        }

        Ok(ChainUpdate::Extend {
            entries,
            first,
            last: prev.digest,
        })
    }

    // ---- selection ----

    /// Whichever of `left`/`right` carries more work above `ancestor`.
    /// Ties go to `left`.
    pub fn heaviest_from_ancestor(
        &self,
        ancestor: &BlockHash,
        left: &BlockHash,
        right: &BlockHash,
    ) -> Result<BlockHash, RelayError> {
        let ancestor = self.chain.entry(ancestor)?;
        let l = self.chain.entry(left)?;
        let r = self.chain.entry(right)?;
        if l.height < ancestor.height || r.height < ancestor.height {
            return Err(RelayError::DescendantBelowAncestor);
        }
        // Both sides share the work up to `ancestor`, so comparing the
        // accumulated totals compares the work above it.
        if r.chain_work > l.chain_work {
            Ok(r.digest)
        } else {
            Ok(l.digest)
        }
    }

    /// Whether `ancestor` is the latest common ancestor of `left` and
    /// `right`, found within `limit` hops from each.
    pub fn is_most_recent_ancestor(
        &self,
        left: &BlockHash,
        right: &BlockHash,
        ancestor: &BlockHash,
        limit: u32,
    ) -> bool {
        if left == ancestor && right == ancestor {
            return true;
        }
        let below_left = self.chain.child_below(left, ancestor, limit);
        let below_right = self.chain.child_below(right, ancestor, limit);
        match (below_left, below_right) {
            // Sharing the child below means a nearer common ancestor exists.
            (Some(l), Some(r)) => l != r,
            _ => false,
        }
    }

    /// Validate moving the best known digest to `new_best_header`.
    pub fn plan_mark_new_heaviest(
        &self,
        asserted_best: &BlockHash,
        current_best_header: &[u8],
        new_best_header: &[u8],
        limit: u32,
    ) -> Result<ChainUpdate, RelayError> {
        let best = self.state.best_known;
        if *asserted_best != best {
            return Err(RelayError::StaleBest {
                asserted: *asserted_best,
                best,
            });
        }
        let current = header::identity(&header::parse(current_best_header)?);
        if current != best {
            return Err(RelayError::StaleBest {
                asserted: current,
                best,
            });
        }

        let new_best = header::identity(&header::parse(new_best_header)?);
        if !self.chain.known(&new_best) {
            return Err(RelayError::NewBestUnknown(new_best));
        }

        let ancestor = self
            .chain
            .common_ancestor(&best, &new_best, limit)
            .ok_or(RelayError::AncestorNotHeaviestCommon)?;
        if !self.is_most_recent_ancestor(&best, &new_best, &ancestor, limit) {
            return Err(RelayError::AncestorNotHeaviestCommon);
        }

        // A tie returns the incumbent, except when the incumbent is the claim.
        if new_best == best || self.heaviest_from_ancestor(&ancestor, &best, &new_best)? != new_best {
            return Err(RelayError::NewBestNotHeavier {
                current_best: best,
                new_best,
            });
        }

        Ok(ChainUpdate::Reorg {
            from: best,
            to: new_best,
            common_ancestor: ancestor,
        })
    }

    /// The relay state `update` would leave behind.
    pub fn state_after(&self, update: &ChainUpdate) -> RelayState {
        match update {
            ChainUpdate::Extend { .. } => self.state,
            ChainUpdate::Reorg {
                to,
                common_ancestor,
                ..
            } => RelayState {
                best_known: *to,
                last_reorg_common_ancestor: *common_ancestor,
                ..self.state
            },
        }
    }

    /// Commit a planned update.
    pub fn apply(&mut self, update: ChainUpdate) -> Result<RelayEvent, RelayError> {
        match update {
            ChainUpdate::Extend {
                entries,
                first,
                last,
            } => {
                let added = entries.len();
                for entry in entries {
                    self.chain.insert_entry(entry)?;
                }
                info!(%first, %last, added, "extended header chain");
                Ok(RelayEvent::Extension { first, last })
            }
            ChainUpdate::Reorg {
                from,
                to,
                common_ancestor,
            } => {
                self.chain.entry(&to)?;
                self.state.best_known = to;
                self.state.last_reorg_common_ancestor = common_ancestor;
                info!(%from, %to, %common_ancestor, "marked new heaviest");
                Ok(RelayEvent::Reorg {
                    from,
                    to,
                    common_ancestor,
                })
            }
        }
    }

    /// [`plan_add_headers`](Self::plan_add_headers) and apply.
    pub fn add_headers(&mut self, anchor: &BlockHash, headers: &[u8]) -> Result<RelayEvent, RelayError> {
        let update = self.plan_add_headers(anchor, headers)?;
        self.apply(update)
    }

    /// [`plan_add_headers_with_retarget`](Self::plan_add_headers_with_retarget) and apply.
    pub fn add_headers_with_retarget(
        &mut self,
        period_start: &BlockHash,
        period_end: &[u8],
        headers: &[u8],
    ) -> Result<RelayEvent, RelayError> {
        let update = self.plan_add_headers_with_retarget(period_start, period_end, headers)?;
        self.apply(update)
    }

    /// [`plan_mark_new_heaviest`](Self::plan_mark_new_heaviest) and apply.
    pub fn mark_new_heaviest(
        &mut self,
        asserted_best: &BlockHash,
        current_best_header: &[u8],
        new_best_header: &[u8],
        limit: u32,
    ) -> Result<RelayEvent, RelayError> {
        let update =
            self.plan_mark_new_heaviest(asserted_best, current_best_header, new_best_header, limit)?;
        self.apply(update)
    }
}

impl ChainQuery for RelayEngine {
    fn best_known_digest(&self) -> BlockHash {
        self.state.best_known
    }

    fn find_height(&self, digest: &BlockHash) -> Result<u32, RelayError> {
        self.chain.height(digest)
    }

    fn is_ancestor(&self, ancestor: &BlockHash, descendant: &BlockHash, limit: u32) -> bool {
        self.chain.is_ancestor(ancestor, descendant, limit)
    }

    fn header(&self, digest: &BlockHash) -> Option<Header> {
        self.chain.get(digest).map(|e| e.header)
    }
}
