//! Embedded SQLite store for relay and oracle state.
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use rusqlite::{params, Connection, OptionalExtension};
use std::{path::PathBuf, str::FromStr};
use tokio::task;

use crate::{
    chain::{ChainEntry, ChainRecord},
    header,
    relay::RelayState,
    request::{Identity, ProofRequest, RequestId, RequestState},
    store::Store,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chain_entries (
        seq     INTEGER PRIMARY KEY AUTOINCREMENT,
        digest  TEXT NOT NULL UNIQUE,
        height  INTEGER NOT NULL,
        prev    TEXT,
        header  TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS requests (
        id              INTEGER PRIMARY KEY,
        spends_hash     TEXT NOT NULL,
        pays_hash       TEXT NOT NULL,
        pays_value      INTEGER NOT NULL,
        consumer        TEXT NOT NULL,
        requester       TEXT NOT NULL,
        required_confs  INTEGER NOT NULL,
        not_before      INTEGER NOT NULL,
        state           INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS validated_txs (
        txid    TEXT PRIMARY KEY,
        header  TEXT NOT NULL
    );
"#;

/// Tables as in [`SCHEMA`]. Relay pointers live in the key/value `state`
/// table:
///   - genesis, best_known, last_reorg_common_ancestor : hex BlockHash
///   - period_start    : hex BlockHash (optional)
///   - genesis_height  : u32 decimal string
///   - latest_validated: hex Txid (optional)
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { path })
    }

    fn kv_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
        Ok(conn
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn kv_set(conn: &Connection, key: &str, val: &str) -> anyhow::Result<()> {
        conn.execute(
            "INSERT INTO state(key,value) VALUES(?1,?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, val],
        )?;
        Ok(())
    }

    fn kv_hash(conn: &Connection, key: &str) -> anyhow::Result<Option<BlockHash>> {
        Self::kv_get(conn, key)?
            .map(|v| BlockHash::from_str(&v).with_context(|| format!("parse {key}")))
            .transpose()
    }
}

fn hash32(s: &str) -> anyhow::Result<[u8; 32]> {
    hex::decode(s)?
        .try_into()
        .map_err(|v: Vec<u8>| anyhow!("expected 32 bytes, got {}", v.len()))
}

type RequestRow = (i64, String, String, i64, String, String, u8, u32, u8);

fn read_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_relay_state(&self) -> anyhow::Result<Option<RelayState>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let pointers = (
                Self::kv_hash(&conn, "genesis")?,
                Self::kv_get(&conn, "genesis_height")?,
                Self::kv_hash(&conn, "best_known")?,
                Self::kv_hash(&conn, "last_reorg_common_ancestor")?,
            );
            match pointers {
                (Some(genesis), Some(h), Some(best_known), Some(lca)) => Ok(Some(RelayState {
                    genesis,
                    genesis_height: h.parse().context("parse genesis_height")?,
                    best_known,
                    last_reorg_common_ancestor: lca,
                    period_start: Self::kv_hash(&conn, "period_start")?,
                })),
                _ => Ok(None),
            }
        })
        .await?
    }

    async fn load_chain(&self) -> anyhow::Result<Vec<ChainRecord>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let mut stmt =
                conn.prepare("SELECT height, prev, header FROM chain_entries ORDER BY seq")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (height, prev, raw) = row?;
                let header = header::parse(&hex::decode(&raw).context("decode stored header")?)?;
                let prev = prev
                    .map(|p| BlockHash::from_str(&p).context("parse stored prev"))
                    .transpose()?;
                records.push(ChainRecord {
                    header,
                    height,
                    prev,
                });
            }
            Ok(records)
        })
        .await?
    }

    async fn save_chain(&self, entries: &[ChainEntry], state: &RelayState) -> anyhow::Result<()> {
        let path = self.path.clone();
        let entries = entries.to_vec();
        let state = *state;
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let tx = conn.unchecked_transaction()?;
            for e in &entries {
                conn.execute(
                    "INSERT OR IGNORE INTO chain_entries(digest, height, prev, header)
                     VALUES(?1, ?2, ?3, ?4)",
                    params![
                        e.digest.to_string(),
                        e.height,
                        e.prev.map(|p| p.to_string()),
                        hex::encode(header::serialize(&e.header)),
                    ],
                )?;
            }
            Self::kv_set(&conn, "genesis", &state.genesis.to_string())?;
            Self::kv_set(&conn, "genesis_height", &state.genesis_height.to_string())?;
            Self::kv_set(&conn, "best_known", &state.best_known.to_string())?;
            Self::kv_set(
                &conn,
                "last_reorg_common_ancestor",
                &state.last_reorg_common_ancestor.to_string(),
            )?;
            if let Some(start) = state.period_start {
                Self::kv_set(&conn, "period_start", &start.to_string())?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn load_requests(&self) -> anyhow::Result<Vec<ProofRequest>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let mut stmt = conn.prepare(
                "SELECT id, spends_hash, pays_hash, pays_value, consumer, requester,
                        required_confs, not_before, state
                 FROM requests ORDER BY id",
            )?;
            let rows = stmt.query_map([], read_request)?;

            let mut out = Vec::new();
            for row in rows {
                let (id, spends, pays, value, consumer, requester, confs, not_before, state) = row?;
                out.push(ProofRequest {
                    id: RequestId(id as u64),
                    spends_hash: hash32(&spends).context("parse spends_hash")?,
                    pays_hash: hash32(&pays).context("parse pays_hash")?,
                    pays_value: value as u64,
                    consumer: Identity::new(consumer),
                    requester: Identity::new(requester),
                    required_confs: confs,
                    not_before,
                    state: RequestState::from_u8(state)
                        .ok_or_else(|| anyhow!("unknown request state {state}"))?,
                });
            }
            Ok(out)
        })
        .await?
    }

    async fn save_request(&self, request: &ProofRequest) -> anyhow::Result<()> {
        let path = self.path.clone();
        let r = request.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            // u64 columns are stored as their i64 bit pattern.
            conn.execute(
                "INSERT INTO requests(id, spends_hash, pays_hash, pays_value, consumer,
                                      requester, required_confs, not_before, state)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET state=excluded.state",
                params![
                    r.id.0 as i64,
                    hex::encode(r.spends_hash),
                    hex::encode(r.pays_hash),
                    r.pays_value as i64,
                    r.consumer.as_str(),
                    r.requester.as_str(),
                    r.required_confs,
                    r.not_before,
                    r.state.as_u8(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn load_validated(&self) -> anyhow::Result<(Vec<(Txid, BlockHash)>, Option<Txid>)> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let mut stmt = conn.prepare("SELECT txid, header FROM validated_txs")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut txs = Vec::new();
            for row in rows {
                let (txid, header) = row?;
                txs.push((
                    Txid::from_str(&txid).context("parse validated txid")?,
                    BlockHash::from_str(&header).context("parse validated header")?,
                ));
            }
            let latest = Self::kv_get(&conn, "latest_validated")?
                .map(|v| Txid::from_str(&v).context("parse latest_validated"))
                .transpose()?;
            Ok((txs, latest))
        })
        .await?
    }

    async fn save_validated(&self, txid: Txid, header: BlockHash) -> anyhow::Result<()> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let tx = conn.unchecked_transaction()?;
            conn.execute(
                "INSERT OR IGNORE INTO validated_txs(txid, header) VALUES(?1, ?2)",
                params![txid.to_string(), header.to_string()],
            )?;
            Self::kv_set(&conn, "latest_validated", &txid.to_string())?;
            tx.commit()?;
            Ok(())
        })
        .await?
    }
}
