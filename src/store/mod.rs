//! Persistence interfaces and implementations used by the relay service.
use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::{
    chain::{ChainEntry, ChainRecord},
    relay::RelayState,
    request::ProofRequest,
};

/// What the service needs to survive a restart. Every write is issued
/// before the matching in-memory change, so a failed write means the
/// change never happened.
#[async_trait]
pub trait Store: Send + Sync {
    /// `None` on a fresh store.
    async fn load_relay_state(&self) -> anyhow::Result<Option<RelayState>>;

    /// Chain records in insertion order (parents before children).
    async fn load_chain(&self) -> anyhow::Result<Vec<ChainRecord>>;

    /// Append `entries` and replace the relay state in one transaction.
    async fn save_chain(&self, entries: &[ChainEntry], state: &RelayState) -> anyhow::Result<()>;

    /// Every request ever registered, in any state.
    async fn load_requests(&self) -> anyhow::Result<Vec<ProofRequest>>;

    /// Insert or overwrite by id.
    async fn save_request(&self, request: &ProofRequest) -> anyhow::Result<()>;

    /// Validated `(txid, header)` pairs plus the latest validated txid.
    async fn load_validated(&self) -> anyhow::Result<(Vec<(Txid, BlockHash)>, Option<Txid>)>;

    /// Record a validated txid and make it the latest.
    async fn save_validated(&self, txid: Txid, header: BlockHash) -> anyhow::Result<()>;
}

/// In-process store.
pub mod memory;
pub use memory::MemoryStore;

/// SQLite store.
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;
