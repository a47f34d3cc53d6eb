#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! niebla-relay: a Bitcoin header relay (SPV) with an on-demand proof oracle.
//!
//! ## What the relay does
//! - Ingests raw 80-byte headers, checking **work**, **linkage** and
//!   **retargets** (one difficulty period at a time).
//! - Keeps every branch it has seen and moves the best tip only on an
//!   explicit, strictly heavier **reorg** claim.
//! - Answers height / ancestor / heaviest-branch queries.
//!
//! ## What the oracle does
//! - Stores **requests**: "tell `consumer` when a tx spending this outpoint
//!   and/or paying this script is N blocks deep".
//! - Checks **Merkle inclusion** and **confirmation depth** against the relay,
//!   matches the tx's inputs/outputs, and calls the consumer back inside a
//!   bounded, failure-isolated task.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use niebla_relay::prelude::*;
//! use async_trait::async_trait;
//!
//! struct Printer;
//! #[async_trait]
//! impl ProofConsumer for Printer {
//!     async fn notify(&self, n: &Notification) -> anyhow::Result<()> {
//!         println!("request {} satisfied by {}", n.id, n.txid);
//!         Ok(())
//!     }
//! }
//!
//! async fn run(headers: Vec<u8>) -> anyhow::Result<()> {
//!     let relay = SpvRelay::open(RelayConfig::for_testing(), MemoryStore::new()).await?;
//!     relay.register_consumer("printer".into(), std::sync::Arc::new(Printer)).await;
//!
//!     let genesis = relay.relay_genesis().await;
//!     relay.add_headers(&genesis, &headers).await?;
//!
//!     relay
//!         .request(
//!             "alice".into(),
//!             NewRequest {
//!                 id: RequestId(1),
//!                 spends: vec![0x11; 36],
//!                 pays: vec![],
//!                 pays_value: 0,
//!                 consumer: "printer".into(),
//!                 required_confs: 6,
//!                 not_before: 0,
//!             },
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

/// 80-byte header parsing, identity, target and work.
pub mod header;

/// Arena of accepted headers with ancestor queries.
pub mod chain;

/// Difficulty retarget arithmetic.
pub mod retarget;

/// Header ingestion and best-chain selection.
pub mod relay;

/// Merkle inclusion proofs.
pub mod merkle;

/// vin/vout parsing and request condition hashing.
pub mod tx;

/// Proof requests and their identifiers.
pub mod request;

/// Request registry and proof checking.
pub mod oracle;

/// Isolated consumer callbacks.
pub mod consumer;

/// Notifications for accepted mutations.
pub mod events;

/// Typed errors for the relay and oracle.
pub mod error;

/// Relay configuration.
pub mod config;

/// Async service tying relay, oracle and store together.
pub mod service;

/// Persistence layer (trait, in-memory and SQLite implementations).
pub mod store;

// Public re-exports
pub use config::RelayConfig;
pub use consumer::{CallbackOutcome, ProofConsumer};
pub use error::{OracleError, RelayError};
pub use events::RelayEvent;
pub use oracle::{Notification, ProofOracle, ProofSubmission};
pub use relay::{ChainQuery, RelayEngine};
pub use request::{Identity, NewRequest, ProofRequest, RequestId, RequestIndices, RequestState};
pub use service::{ProofReceipt, SpvRelay};
pub use store::{MemoryStore, Store};

#[cfg(feature = "store-sqlite")]
pub use store::SqliteStore;

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{
        Identity, MemoryStore, NewRequest, Notification, ProofConsumer, ProofSubmission,
        RelayConfig, RelayEvent, RequestId, RequestIndices, SpvRelay, Store,
    };
}
