//! Notifications emitted by accepted mutations.
use bitcoin::BlockHash;

use crate::request::{Identity, RequestId};

/// Emitted once per successful state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// A header batch was accepted.
    Extension {
        /// Digest of the first header in the batch.
        first: BlockHash,
        /// Digest of the last header in the batch.
        last: BlockHash,
    },
    /// The best known digest moved to a heavier branch.
    Reorg {
        /// Previous best digest.
        from: BlockHash,
        /// New best digest.
        to: BlockHash,
        /// Latest common ancestor of the two.
        common_ancestor: BlockHash,
    },
    /// A proof request was registered.
    NewProofRequest {
        /// Who registered it.
        requester: Identity,
        /// Its id.
        id: RequestId,
    },
}
