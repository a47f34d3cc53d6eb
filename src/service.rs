//! Async orchestrator: one relay, one oracle, one store.
//!
//! Every mutation takes the relevant write lock, plans against the current
//! state, persists, and only then applies. Readers share read locks and
//! always see a fully applied state. Locks are taken relay first, then
//! oracle.
use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Context};
use bitcoin::{BlockHash, Txid};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::{
    chain::{ChainEntry, ChainStore},
    config::RelayConfig,
    consumer::{call_callback, CallbackOutcome, ProofConsumer},
    error::{OracleError, RelayError},
    events::RelayEvent,
    header,
    oracle::{Notification, ProofOracle, ProofSubmission, ValidatedTxIndex},
    relay::{ChainUpdate, RelayEngine},
    request::{Identity, NewRequest, ProofRequest, RequestId, RequestIndices},
    store::Store,
};

/// Result of a successful [`SpvRelay::provide_proof`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofReceipt {
    /// Proven transaction.
    pub txid: Txid,
    /// What happened to the consumer callback. Never affects success.
    pub callback: CallbackOutcome,
}

/// The relay service.
pub struct SpvRelay<S> {
    config: RelayConfig,
    store: S,
    relay: RwLock<RelayEngine>,
    oracle: RwLock<ProofOracle>,
    consumers: RwLock<HashMap<Identity, Arc<dyn ProofConsumer>>>,
    events: broadcast::Sender<RelayEvent>,
}

fn logged<T>(res: anyhow::Result<T>, what: &'static str) -> anyhow::Result<T> {
    res.map_err(|e| {
        warn!(error = %e, "{what} failed");
        e.context(what)
    })
}

impl<S> SpvRelay<S>
where
    S: Store + 'static,
{
    /// Restore the relay persisted in `store`, or initialize it from
    /// `config` when the store is fresh.
    pub async fn open(config: RelayConfig, store: S) -> anyhow::Result<Self> {
        let genesis = config.genesis()?;
        let relay = match store.load_relay_state().await.context("load relay state")? {
            Some(state) => {
                if state.genesis != header::identity(&genesis) {
                    bail!(
                        "store is rooted at {} but config names genesis {}",
                        state.genesis,
                        header::identity(&genesis)
                    );
                }
                let chain = ChainStore::from_records(store.load_chain().await?)?;
                info!(entries = chain.len(), best = %state.best_known, "restored relay");
                RelayEngine::from_parts(chain, state, config.network)?
            }
            None => {
                let relay = RelayEngine::new(
                    genesis,
                    config.genesis_height,
                    config.period_start()?,
                    config.network,
                )?;
                let roots: Vec<_> = relay.chain().entries().copied().collect();
                logged(store.save_chain(&roots, relay.state()).await, "persist relay genesis")?;
                info!(genesis = %relay.relay_genesis(), height = config.genesis_height, "initialized relay");
                relay
            }
        };

        let (txs, latest) = store.load_validated().await.context("load validated txs")?;
        let oracle = ProofOracle::from_parts(
            store.load_requests().await.context("load requests")?,
            ValidatedTxIndex::from_parts(txs, latest),
            config.confirmation_search_limit,
        );

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            config,
            store,
            relay: RwLock::new(relay),
            oracle: RwLock::new(oracle),
            consumers: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Configuration the relay was opened with.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Notifications for every accepted mutation from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: &RelayEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
    }

    /// Route notifications for requests naming `identity` as consumer.
    pub async fn register_consumer(&self, identity: Identity, consumer: Arc<dyn ProofConsumer>) {
        self.consumers.write().await.insert(identity, consumer);
    }

    /// Stop routing notifications to `identity`. Returns whether one was registered.
    pub async fn unregister_consumer(&self, identity: &Identity) -> bool {
        self.consumers.write().await.remove(identity).is_some()
    }

    // ---- ingestion ----

    async fn commit(&self, relay: &mut RelayEngine, update: ChainUpdate) -> anyhow::Result<RelayEvent> {
        let state = relay.state_after(&update);
        let entries: &[ChainEntry] = match &update {
            ChainUpdate::Extend { entries, .. } => entries.as_slice(),
            ChainUpdate::Reorg { .. } => &[],
        };
        logged(self.store.save_chain(entries, &state).await, "persist chain update")?;
        let event = relay.apply(update)?;
        self.publish(&event);
        Ok(event)
    }

    /// Ingest a batch extending `anchor`.
    pub async fn add_headers(&self, anchor: &BlockHash, headers: &[u8]) -> anyhow::Result<RelayEvent> {
        let mut relay = self.relay.write().await;
        let update = relay.plan_add_headers(anchor, headers)?;
        self.commit(&mut relay, update).await
    }

    /// Ingest a batch that opens a new difficulty period.
    pub async fn add_headers_with_retarget(
        &self,
        period_start: &BlockHash,
        period_end: &[u8],
        headers: &[u8],
    ) -> anyhow::Result<RelayEvent> {
        let mut relay = self.relay.write().await;
        let update = relay.plan_add_headers_with_retarget(period_start, period_end, headers)?;
        self.commit(&mut relay, update).await
    }

    /// Move the best digest to a strictly heavier branch.
    pub async fn mark_new_heaviest(
        &self,
        asserted_best: &BlockHash,
        current_best_header: &[u8],
        new_best_header: &[u8],
        limit: u32,
    ) -> anyhow::Result<RelayEvent> {
        let mut relay = self.relay.write().await;
        let update =
            relay.plan_mark_new_heaviest(asserted_best, current_best_header, new_best_header, limit)?;
        self.commit(&mut relay, update).await
    }

    // ---- chain queries ----

    /// Height of a known digest.
    pub async fn find_height(&self, digest: &BlockHash) -> Result<u32, RelayError> {
        self.relay.read().await.find_height(digest)
    }

    /// Ancestor `offset` hops below `digest`.
    pub async fn find_ancestor(&self, digest: &BlockHash, offset: u32) -> Result<BlockHash, RelayError> {
        self.relay.read().await.find_ancestor(digest, offset)
    }

    /// Bounded ancestry check.
    pub async fn is_ancestor(&self, ancestor: &BlockHash, descendant: &BlockHash, limit: u32) -> bool {
        self.relay.read().await.is_ancestor(ancestor, descendant, limit)
    }

    /// The heavier of `left` and `right` above `ancestor`; ties go left.
    pub async fn heaviest_from_ancestor(
        &self,
        ancestor: &BlockHash,
        left: &BlockHash,
        right: &BlockHash,
    ) -> Result<BlockHash, RelayError> {
        self.relay.read().await.heaviest_from_ancestor(ancestor, left, right)
    }

    /// Whether `ancestor` is the latest common ancestor of `left` and `right`.
    pub async fn is_most_recent_ancestor(
        &self,
        left: &BlockHash,
        right: &BlockHash,
        ancestor: &BlockHash,
        limit: u32,
    ) -> bool {
        self.relay
            .read()
            .await
            .is_most_recent_ancestor(left, right, ancestor, limit)
    }

    /// Tip of the heaviest chain marked so far.
    pub async fn best_known_digest(&self) -> BlockHash {
        self.relay.read().await.best_known_digest()
    }

    /// Common ancestor recorded by the last reorg.
    pub async fn last_reorg_common_ancestor(&self) -> BlockHash {
        self.relay.read().await.last_reorg_common_ancestor()
    }

    /// Digest the relay was rooted at.
    pub async fn relay_genesis(&self) -> BlockHash {
        self.relay.read().await.relay_genesis()
    }

    // ---- oracle ----

    /// Register a request on behalf of `requester`.
    pub async fn request(&self, requester: Identity, new: NewRequest) -> anyhow::Result<RelayEvent> {
        let mut oracle = self.oracle.write().await;
        let request = oracle.plan_request(requester, new)?;
        logged(self.store.save_request(&request).await, "persist proof request")?;
        let event = oracle.insert_request(request);
        self.publish(&event);
        Ok(event)
    }

    /// Cancel request `id` on behalf of `caller`.
    pub async fn cancel_request(&self, id: RequestId, caller: &Identity) -> anyhow::Result<()> {
        let mut oracle = self.oracle.write().await;
        let cancelled = oracle.plan_cancel(id, caller)?;
        logged(self.store.save_request(&cancelled).await, "persist cancellation")?;
        oracle.commit_request(cancelled);
        Ok(())
    }

    /// A copy of the stored request.
    pub async fn get_request(&self, id: RequestId) -> Result<ProofRequest, OracleError> {
        self.oracle.read().await.get_request(id).cloned()
    }

    /// See [`ProofOracle::check_inclusion`].
    pub async fn check_inclusion(
        &self,
        header: &[u8],
        merkle_proof: &[u8],
        leaf_index: u64,
        txid: Txid,
        id: RequestId,
    ) -> Result<BlockHash, OracleError> {
        let relay = self.relay.read().await;
        let oracle = self.oracle.read().await;
        oracle.check_inclusion(&*relay, header, merkle_proof, leaf_index, txid, id)
    }

    /// See [`ProofOracle::check_requests`].
    pub async fn check_requests(
        &self,
        indices: RequestIndices,
        vin: &[u8],
        vout: &[u8],
        id: RequestId,
    ) -> Result<(), OracleError> {
        self.oracle.read().await.check_requests(indices, vin, vout, id)
    }

    /// Depth of `digest` below the best header.
    pub async fn confirmations(&self, digest: &BlockHash) -> Result<u32, OracleError> {
        let relay = self.relay.read().await;
        ProofOracle::confirmations(&*relay, digest)
    }

    /// Whether `txid` was already proven included.
    pub async fn is_validated(&self, txid: &Txid) -> bool {
        self.oracle.read().await.is_validated(txid)
    }

    /// Most recently proven txid.
    pub async fn latest_validated_tx(&self) -> Option<Txid> {
        self.oracle.read().await.latest_validated_tx()
    }

    /// Check a proof, record the txid, then notify the request's consumer.
    ///
    /// Fails only on the checks; the callback runs after every lock is
    /// released and its outcome is reported, not propagated.
    pub async fn provide_proof(&self, submission: ProofSubmission) -> anyhow::Result<ProofReceipt> {
        let notification = {
            let relay = self.relay.read().await;
            let mut oracle = self.oracle.write().await;
            let proof = oracle.verify_proof(&*relay, &submission)?;
            if proof.newly_validated {
                logged(
                    self.store.save_validated(proof.txid, proof.header).await,
                    "persist validated tx",
                )?;
            }
            oracle.record_validated(&proof);
            proof.notification
        };

        let txid = notification.txid;
        let callback = self.deliver(notification).await;
        Ok(ProofReceipt { txid, callback })
    }

    async fn deliver(&self, notification: Notification) -> CallbackOutcome {
        let consumer = self.consumers.read().await.get(&notification.consumer).cloned();
        match consumer {
            Some(consumer) => {
                call_callback(consumer, notification, self.config.callback_budget()).await
            }
            None => CallbackOutcome::NoConsumer,
        }
    }
}
