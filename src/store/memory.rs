//! In-process store for tests and ephemeral relays.
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::{
    chain::{ChainEntry, ChainRecord},
    relay::RelayState,
    request::ProofRequest,
    store::Store,
};

#[derive(Default)]
struct Inner {
    state: Option<RelayState>,
    chain: Vec<ChainRecord>,
    requests: Vec<ProofRequest>,
    validated: Vec<(Txid, BlockHash)>,
    latest: Option<Txid>,
}

/// Keeps everything behind one mutex. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> anyhow::Result<T> {
        let mut guard = self.inner.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_relay_state(&self) -> anyhow::Result<Option<RelayState>> {
        self.with(|s| s.state)
    }

    async fn load_chain(&self) -> anyhow::Result<Vec<ChainRecord>> {
        self.with(|s| s.chain.clone())
    }

    async fn save_chain(&self, entries: &[ChainEntry], state: &RelayState) -> anyhow::Result<()> {
        self.with(|s| {
            s.chain.extend(entries.iter().map(ChainRecord::from));
            s.state = Some(*state);
        })
    }

    async fn load_requests(&self) -> anyhow::Result<Vec<ProofRequest>> {
        self.with(|s| s.requests.clone())
    }

    async fn save_request(&self, request: &ProofRequest) -> anyhow::Result<()> {
        self.with(|s| match s.requests.iter_mut().find(|r| r.id == request.id) {
            Some(existing) => *existing = request.clone(),
            None => s.requests.push(request.clone()),
        })
    }

    async fn load_validated(&self) -> anyhow::Result<(Vec<(Txid, BlockHash)>, Option<Txid>)> {
        self.with(|s| (s.validated.clone(), s.latest))
    }

    async fn save_validated(&self, txid: Txid, header: BlockHash) -> anyhow::Result<()> {
        self.with(|s| {
            if !s.validated.iter().any(|(t, _)| *t == txid) {
                s.validated.push((txid, header));
            }
            s.latest = Some(txid);
        })
    }
}
