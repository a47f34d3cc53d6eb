//! The on-demand proof oracle.
//!
//! Requests are subscriptions ("tell me when a transaction spending X or
//! paying Y is N blocks deep"); proofs are checked against whatever
//! [`ChainQuery`] the caller hands in. The oracle never mutates chain state.
use std::collections::{BTreeMap, HashMap};

use bitcoin::{BlockHash, Txid};
use tracing::debug;

use crate::{
    error::{OracleError, RelayError},
    events::RelayEvent,
    header, merkle,
    relay::ChainQuery,
    request::{
        Identity, NewRequest, ProofRequest, RequestId, RequestIndices, RequestState, UNCONSTRAINED,
    },
    tx,
};

/// Transactions already proven included, with the header that proved them.
#[derive(Clone, Debug, Default)]
pub struct ValidatedTxIndex {
    txs: HashMap<Txid, BlockHash>,
    latest: Option<Txid>,
}

impl ValidatedTxIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted pairs.
    pub fn from_parts<I>(txs: I, latest: Option<Txid>) -> Self
    where
        I: IntoIterator<Item = (Txid, BlockHash)>,
    {
        Self {
            txs: txs.into_iter().collect(),
            latest,
        }
    }

    /// Validated txids with the header each was proven under.
    pub fn iter(&self) -> impl Iterator<Item = (&Txid, &BlockHash)> {
        self.txs.iter()
    }

    /// Whether `txid` has been proven.
    pub fn contains(&self, txid: &Txid) -> bool {
        self.txs.contains_key(txid)
    }

    /// Header digest the transaction was proven under.
    pub fn confirming_header(&self, txid: &Txid) -> Option<BlockHash> {
        self.txs.get(txid).copied()
    }

    /// Most recently proven txid.
    pub fn latest(&self) -> Option<Txid> {
        self.latest
    }

    /// Number of proven txids.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Whether nothing has been proven yet.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Record `txid` as proven under `header` and make it the latest.
    pub fn insert(&mut self, txid: Txid, header: BlockHash) {
        self.txs.entry(txid).or_insert(header);
        self.latest = Some(txid);
    }
}

/// Everything a prover submits for one transaction.
#[derive(Clone, Debug)]
pub struct ProofSubmission {
    /// Raw 80-byte header the transaction is included under.
    pub header: Vec<u8>,
    /// Concatenated sibling nodes, leaf to root.
    pub merkle_proof: Vec<u8>,
    /// Transaction version, as serialized.
    pub version: [u8; 4],
    /// Transaction locktime, as serialized.
    pub locktime: [u8; 4],
    /// Position of the txid among the block's leaves.
    pub leaf_index: u64,
    /// Which input and output the request is matched against.
    pub indices: RequestIndices,
    /// Length-prefixed input vector.
    pub vin: Vec<u8>,
    /// Length-prefixed output vector.
    pub vout: Vec<u8>,
    /// Request this proof is meant to satisfy.
    pub id: RequestId,
}

/// What the consumer of a fulfilled request is told.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Who to notify.
    pub consumer: Identity,
    /// Request that was satisfied.
    pub id: RequestId,
    /// Transaction that satisfied it.
    pub txid: Txid,
    /// Its input vector.
    pub vin: Vec<u8>,
    /// Its output vector.
    pub vout: Vec<u8>,
}

/// A proof that passed every check, ready to be recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedProof {
    /// Computed txid.
    pub txid: Txid,
    /// Header that proves inclusion (the cached one if the txid was
    /// already validated).
    pub header: BlockHash,
    /// `false` when the inclusion check was skipped for a known txid.
    pub newly_validated: bool,
    /// What to send the consumer.
    pub notification: Notification,
}

/// Request registry and proof checker.
#[derive(Clone, Debug)]
pub struct ProofOracle {
    requests: BTreeMap<RequestId, ProofRequest>,
    validated: ValidatedTxIndex,
    search_limit: u32,
}

impl ProofOracle {
    /// `search_limit` bounds the walk proving a header is in the best
    /// chain. Requests needing more confirmations than that walk one hop
    /// past their own requirement instead.
    pub fn new(search_limit: u32) -> Self {
        Self {
            requests: BTreeMap::new(),
            validated: ValidatedTxIndex::new(),
            search_limit,
        }
    }

    /// Rebuild an oracle from persisted requests and proven txids.
    pub fn from_parts<I>(requests: I, validated: ValidatedTxIndex, search_limit: u32) -> Self
    where
        I: IntoIterator<Item = ProofRequest>,
    {
        Self {
            requests: requests.into_iter().map(|r| (r.id, r)).collect(),
            validated,
            search_limit,
        }
    }

    /// Minimum hop budget for best-chain membership checks.
    pub fn search_limit(&self) -> u32 {
        self.search_limit
    }

    /// All requests, ordered by id.
    pub fn requests(&self) -> impl Iterator<Item = &ProofRequest> {
        self.requests.values()
    }

    /// Proven txids.
    pub fn validated(&self) -> &ValidatedTxIndex {
        &self.validated
    }

    /// Whether `txid` was already proven included.
    pub fn is_validated(&self, txid: &Txid) -> bool {
        self.validated.contains(txid)
    }

    /// Most recently proven txid.
    pub fn latest_validated_tx(&self) -> Option<Txid> {
        self.validated.latest()
    }

    // ---- registry ----

    /// Validate a new request and build its record.
    pub fn plan_request(
        &self,
        requester: Identity,
        new: NewRequest,
    ) -> Result<ProofRequest, OracleError> {
        let spends_hash = if new.spends.is_empty() {
            UNCONSTRAINED
        } else {
            tx::parse_outpoint(&new.spends)?;
            tx::keccak256(&new.spends)
        };
        let pays_hash = if new.pays.is_empty() {
            UNCONSTRAINED
        } else {
            tx::parse_standard_script(&new.pays)?;
            tx::keccak256(&new.pays)
        };
        if new.spends.is_empty() && new.pays.is_empty() {
            return Err(OracleError::NoConditionSpecified);
        }
        if self.requests.contains_key(&new.id) {
            return Err(OracleError::DuplicateRequest(new.id));
        }

        Ok(ProofRequest {
            id: new.id,
            spends_hash,
            pays_hash,
            pays_value: new.pays_value,
            consumer: new.consumer,
            requester,
            required_confs: new.required_confs,
            not_before: new.not_before,
            state: RequestState::Active,
        })
    }

    /// Store a request produced by [`plan_request`](Self::plan_request).
    pub fn insert_request(&mut self, request: ProofRequest) -> RelayEvent {
        debug!(id = %request.id, requester = %request.requester, "registered proof request");
        let event = RelayEvent::NewProofRequest {
            requester: request.requester.clone(),
            id: request.id,
        };
        self.requests.insert(request.id, request);
        event
    }

    /// Validate and register in one step.
    pub fn request(
        &mut self,
        requester: Identity,
        new: NewRequest,
    ) -> Result<RelayEvent, OracleError> {
        let request = self.plan_request(requester, new)?;
        Ok(self.insert_request(request))
    }

    /// The record `cancel_request` would store.
    pub fn plan_cancel(&self, id: RequestId, caller: &Identity) -> Result<ProofRequest, OracleError> {
        let request = self
            .requests
            .get(&id)
            .filter(|r| r.is_active())
            .ok_or(OracleError::RequestNotActive(id))?;
        if *caller != request.requester && *caller != request.consumer {
            return Err(OracleError::NotAuthorizedToCancel(id));
        }
        Ok(ProofRequest {
            state: RequestState::Cancelled,
            ..request.clone()
        })
    }

    /// Overwrite a stored request with an updated record.
    pub fn commit_request(&mut self, request: ProofRequest) {
        debug!(id = %request.id, state = ?request.state, "updated proof request");
        self.requests.insert(request.id, request);
    }

    /// Cancel request `id` on behalf of `caller`.
    pub fn cancel_request(&mut self, id: RequestId, caller: &Identity) -> Result<(), OracleError> {
        let cancelled = self.plan_cancel(id, caller)?;
        self.commit_request(cancelled);
        Ok(())
    }

    /// The stored request, whatever its state.
    pub fn get_request(&self, id: RequestId) -> Result<&ProofRequest, OracleError> {
        self.requests.get(&id).ok_or(OracleError::UnknownRequest(id))
    }

    // ---- checks ----

    /// `height(best) - height(digest)`; zero for the best header itself.
    pub fn confirmations<C: ChainQuery>(chain: &C, digest: &BlockHash) -> Result<u32, OracleError> {
        let best = chain.find_height(&chain.best_known_digest())?;
        let height = chain.find_height(digest)?;
        Ok(best.saturating_sub(height))
    }

    /// Prove `txid` sits under `header_bytes` and that the header is deep
    /// enough in the best chain for request `id`.
    pub fn check_inclusion<C: ChainQuery>(
        &self,
        chain: &C,
        header_bytes: &[u8],
        merkle_proof: &[u8],
        leaf_index: u64,
        txid: Txid,
        id: RequestId,
    ) -> Result<BlockHash, OracleError> {
        let parsed = header::parse(header_bytes)?;
        if !merkle::verify(txid, parsed.merkle_root, merkle_proof, leaf_index) {
            return Err(OracleError::BadInclusionProof);
        }

        let digest = header::identity(&parsed);
        let best = chain.best_known_digest();
        // A header `n` deep sits at position `n`, so deep requests need a
        // walk one longer than their requirement.
        let limit = self
            .requests
            .get(&id)
            .map_or(self.search_limit, |r| {
                self.search_limit.max(u32::from(r.required_confs) + 1)
            });
        if !chain.is_ancestor(&digest, &best, limit) {
            return Err(OracleError::NotConfirmedByBestChain(digest));
        }

        let request = self.get_request(id)?;
        let got = Self::confirmations(chain, &digest)?;
        let required = u32::from(request.required_confs);
        if got < required {
            return Err(OracleError::InsufficientConfirmations { got, required });
        }
        Ok(digest)
    }

    /// Match the transaction's vectors against request `id`.
    pub fn check_requests(
        &self,
        indices: RequestIndices,
        vin: &[u8],
        vout: &[u8],
        id: RequestId,
    ) -> Result<(), OracleError> {
        let inputs = tx::parse_vin(vin)?;
        let outputs = tx::parse_vout(vout)?;
        let request = self
            .requests
            .get(&id)
            .filter(|r| r.is_active())
            .ok_or(OracleError::RequestNotActive(id))?;

        if request.has_pays() && indices.checks_output() {
            let output = outputs
                .get(usize::from(indices.output))
                .ok_or(OracleError::PaysMismatch(id))?;
            if tx::keccak256(&tx::script_bytes(output)) != request.pays_hash {
                return Err(OracleError::PaysMismatch(id));
            }
            if request.pays_value != 0 && output.value.to_sat() != request.pays_value {
                return Err(OracleError::ValueMismatch(id));
            }
        }

        if request.has_spends() && indices.checks_input() {
            let input = inputs
                .get(usize::from(indices.input))
                .ok_or(OracleError::SpendsMismatch(id))?;
            if tx::keccak256(&tx::outpoint_bytes(input)) != request.spends_hash {
                return Err(OracleError::SpendsMismatch(id));
            }
        }
        Ok(())
    }

    /// Run every check for a submission without recording anything.
    ///
    /// A txid proven once is never re-proven: its inclusion check is
    /// skipped and the header it was first proven under is reused for the
    /// `not_before` check.
    pub fn verify_proof<C: ChainQuery>(
        &self,
        chain: &C,
        submission: &ProofSubmission,
    ) -> Result<VerifiedProof, OracleError> {
        let txid = tx::txid(
            submission.version,
            &submission.vin,
            &submission.vout,
            submission.locktime,
        );

        let (header, newly_validated) = match self.validated.confirming_header(&txid) {
            Some(cached) => {
                debug!(%txid, "inclusion already proven");
                (cached, false)
            }
            None => {
                let digest = self.check_inclusion(
                    chain,
                    &submission.header,
                    &submission.merkle_proof,
                    submission.leaf_index,
                    txid,
                    submission.id,
                )?;
                (digest, true)
            }
        };

        self.check_requests(
            submission.indices,
            &submission.vin,
            &submission.vout,
            submission.id,
        )?;

        let request = self.get_request(submission.id)?;
        if request.not_before != 0 {
            let time = chain
                .header(&header)
                .map(|h| h.time)
                .ok_or(RelayError::UnknownBlock(header))?;
            if time < request.not_before {
                return Err(OracleError::ProofTooEarly {
                    time,
                    not_before: request.not_before,
                });
            }
        }

        Ok(VerifiedProof {
            txid,
            header,
            newly_validated,
            notification: Notification {
                consumer: request.consumer.clone(),
                id: submission.id,
                txid,
                vin: submission.vin.clone(),
                vout: submission.vout.clone(),
            },
        })
    }

    /// Record the txid of a verified proof.
    pub fn record_validated(&mut self, proof: &VerifiedProof) {
        if proof.newly_validated {
            self.validated.insert(proof.txid, proof.header);
        }
    }

    /// [`verify_proof`](Self::verify_proof) and record.
    pub fn provide_proof<C: ChainQuery>(
        &mut self,
        chain: &C,
        submission: &ProofSubmission,
    ) -> Result<Notification, OracleError> {
        let proof = self.verify_proof(chain, submission)?;
        self.record_validated(&proof);
        Ok(proof.notification)
    }
}
