//! Relay configuration.
use std::{path::Path, time::Duration};

use anyhow::Context;
use bitcoin::{block::Header, constants::genesis_block, Network};
use serde::{Deserialize, Serialize};

use crate::header;

/// Hop bound used when proving a header is part of the best chain.
pub const DEFAULT_CONFIRMATION_SEARCH_LIMIT: u32 = 240;

/// Time allowance for one consumer callback.
pub const DEFAULT_CALLBACK_BUDGET_MS: u64 = 500;

/// Network parameters and limits for one relay instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Selects the proof-of-work limit and retarget timespan.
    pub network: Network,

    /// Hex of the 80-byte header the relay is rooted at.
    pub genesis_header: String,

    /// Absolute height of `genesis_header`.
    pub genesis_height: u32,

    /// Hex of the header opening the difficulty period that contains
    /// genesis. Needed for the first retarget unless genesis is itself a
    /// period start.
    pub period_start_header: Option<String>,

    /// Hops `check_inclusion` walks from the best header, at least.
    pub confirmation_search_limit: u32,

    /// Time a consumer callback may run before it is aborted.
    pub callback_budget_ms: u64,

    /// Capacity of the notification channel.
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::for_network(Network::Bitcoin)
    }
}

impl RelayConfig {
    /// Rooted at the network's own genesis block.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            genesis_header: hex::encode(header::serialize(&genesis_block(network).header)),
            genesis_height: 0,
            period_start_header: None,
            confirmation_search_limit: DEFAULT_CONFIRMATION_SEARCH_LIMIT,
            callback_budget_ms: DEFAULT_CALLBACK_BUDGET_MS,
            event_capacity: 1024,
        }
    }

    /// Regtest with a short callback budget.
    pub fn for_testing() -> Self {
        Self {
            callback_budget_ms: 100,
            event_capacity: 64,
            ..Self::for_network(Network::Regtest)
        }
    }

    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("parse relay config")
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read relay config {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Decoded `genesis_header`.
    pub fn genesis(&self) -> anyhow::Result<Header> {
        decode_header(&self.genesis_header).context("genesis_header")
    }

    /// Decoded `period_start_header`, if set.
    pub fn period_start(&self) -> anyhow::Result<Option<Header>> {
        self.period_start_header
            .as_deref()
            .map(|h| decode_header(h).context("period_start_header"))
            .transpose()
    }

    /// [`callback_budget_ms`](Self::callback_budget_ms) as a `Duration`.
    pub fn callback_budget(&self) -> Duration {
        Duration::from_millis(self.callback_budget_ms)
    }
}

fn decode_header(s: &str) -> anyhow::Result<Header> {
    let raw = hex::decode(s.trim()).context("decode header hex")?;
    Ok(header::parse(&raw)?)
}
