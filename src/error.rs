//! Error taxonomy for the relay and the proof oracle.
//!
//! Every rejected call leaves state untouched, so none of these are
//! retried internally. Callers decide whether to resubmit corrected input.
use bitcoin::{BlockHash, CompactTarget};
use thiserror::Error;

use crate::request::RequestId;

/// Failures of header ingestion, reorgs and chain queries.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum RelayError {
    /// A header is not exactly 80 bytes.
    #[error("malformed header: expected 80 bytes, got {len}")]
    MalformedHeader {
        /// Length that was supplied.
        len: usize,
    },

    /// A header batch is empty or not a multiple of 80 bytes.
    #[error("header array length must be divisible by 80, got {len}")]
    HeaderArrayMisaligned {
        /// Length that was supplied.
        len: usize,
    },

    /// The digest is not in the chain store.
    #[error("unknown block {0}")]
    UnknownBlock(BlockHash),

    /// Walking `offset` parents from `digest` left the known set.
    #[error("unknown ancestor: {digest} has no known ancestor at offset {offset}")]
    UnknownAncestor {
        /// Starting digest.
        digest: BlockHash,
        /// Requested number of hops.
        offset: u32,
    },

    /// The header hash does not meet the required target.
    #[error("header work is insufficient at {0}")]
    InsufficientWork(BlockHash),

    /// The target changed inside a batch that was not allowed to retarget.
    #[error("target changed unexpectedly at {0}")]
    UnexpectedRetarget(BlockHash),

    /// A header's prev-hash does not reference the preceding header.
    #[error("headers do not form a consistent chain at {0}")]
    InconsistentChain(BlockHash),

    /// The period end passed to a retarget is not the last header of a period.
    #[error("must provide the last header of the closing difficulty period")]
    MustProvideClosingHeader,

    /// Period start and end are not exactly one difficulty period apart.
    #[error("must provide exactly 1 difficulty period")]
    MustSpanExactlyOnePeriod,

    /// Period start and end disagree on the target.
    #[error("period header difficulties do not match")]
    PeriodTargetMismatch,

    /// The first post-retarget header carries the wrong target.
    #[error("invalid retarget provided: expected {expected:?}, got {actual:?}")]
    InvalidRetarget {
        /// Target derived from the period timing.
        expected: CompactTarget,
        /// Target found in the new header.
        actual: CompactTarget,
    },

    /// A proposed descendant sits below the proposed ancestor.
    #[error("a descendant height is below the ancestor height")]
    DescendantBelowAncestor,

    /// The caller's view of the best header is out of date.
    #[error("passed in best {asserted} is not best known {best}")]
    StaleBest {
        /// Digest the caller claimed was best.
        asserted: BlockHash,
        /// Digest the relay holds as best.
        best: BlockHash,
    },

    /// The proposed new best header has never been ingested.
    #[error("new best {0} is unknown")]
    NewBestUnknown(BlockHash),

    /// No common ancestor could be confirmed within the search limit.
    #[error("ancestor must be heaviest common ancestor")]
    AncestorNotHeaviestCommon,

    /// The challenger does not carry strictly more work than the incumbent.
    #[error("new best {new_best} does not have more work than previous {current_best}")]
    NewBestNotHeavier {
        /// Incumbent best digest.
        current_best: BlockHash,
        /// Rejected challenger.
        new_best: BlockHash,
    },
}

/// Failures of proof requests and proof submission.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum OracleError {
    /// A chain-level failure surfaced while checking a proof.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// `spends` was supplied but is not a 36-byte outpoint.
    #[error("not a valid outpoint: expected 36 bytes, got {len}")]
    NotAValidOutpoint {
        /// Length that was supplied.
        len: usize,
    },

    /// `pays` was supplied but is not a standard output script.
    #[error("not a standard output type")]
    NonstandardOutput,

    /// Neither `spends` nor `pays` was supplied.
    #[error("no request specified")]
    NoConditionSpecified,

    /// A request with this id already exists.
    #[error("request {0} already exists")]
    DuplicateRequest(RequestId),

    /// No request with this id exists.
    #[error("request {0} not found")]
    UnknownRequest(RequestId),

    /// The request is missing or cancelled.
    #[error("request {0} is not active")]
    RequestNotActive(RequestId),

    /// Cancel attempted by someone other than the requester or consumer.
    #[error("request {0} can only be cancelled by owner or consumer")]
    NotAuthorizedToCancel(RequestId),

    /// The Merkle path does not connect the txid to the header.
    #[error("bad inclusion proof")]
    BadInclusionProof,

    /// The header is not an ancestor of the best known header.
    #[error("best known header does not confirm {0}")]
    NotConfirmedByBestChain(BlockHash),

    /// The header is buried less deeply than the request demands.
    #[error("insufficient confirmations: {got} < {required}")]
    InsufficientConfirmations {
        /// Depth below the best header.
        got: u32,
        /// Depth the request requires.
        required: u32,
    },

    /// The confirming header predates the request's `not_before` time.
    #[error("confirming header time {time} is before {not_before}")]
    ProofTooEarly {
        /// Header timestamp.
        time: u32,
        /// Request lower bound.
        not_before: u32,
    },

    /// The input vector does not parse.
    #[error("vin is malformatted")]
    MalformedVin,

    /// The output vector does not parse.
    #[error("vout is malformatted")]
    MalformedVout,

    /// The selected output does not match the pays condition.
    #[error("does not match pays request {0}")]
    PaysMismatch(RequestId),

    /// The selected output does not carry the requested value.
    #[error("does not match value request {0}")]
    ValueMismatch(RequestId),

    /// The selected input does not match the spends condition.
    #[error("does not match spends request {0}")]
    SpendsMismatch(RequestId),
}
