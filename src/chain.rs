use std::collections::HashMap;

use bitcoin::{block::Header, BlockHash, Work};

use crate::{error::RelayError, header};

/// One accepted header with its position in the forest.
///
/// `prev` is `None` only for roots (the relay genesis and the optional
/// period-start anchor below it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainEntry {
    /// Header hash; the store's key.
    pub digest: BlockHash,
    /// Absolute height.
    pub height: u32,
    /// Parent digest.
    pub prev: Option<BlockHash>,
    /// The header itself.
    pub header: Header,
    /// Work accumulated from this entry's root, inclusive.
    pub chain_work: Work,
}

impl ChainEntry {
    /// Entry for a root header, with no known parent.
    pub fn root(header: Header, height: u32) -> Self {
        Self {
            digest: header::identity(&header),
            height,
            prev: None,
            chain_work: header::header_work(&header),
            header,
        }
    }

    /// Entry for `header` extending `parent`.
    pub fn child_of(parent: &ChainEntry, header: Header) -> Self {
        Self {
            digest: header::identity(&header),
            height: parent.height + 1,
            prev: Some(parent.digest),
            chain_work: parent.chain_work + header::header_work(&header),
            header,
        }
    }
}

/// The persisted form of a [`ChainEntry`]; accumulated work is recomputed
/// on load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainRecord {
    /// The accepted header.
    pub header: Header,
    /// Absolute height.
    pub height: u32,
    /// Parent digest, `None` for roots.
    pub prev: Option<BlockHash>,
}

impl From<&ChainEntry> for ChainRecord {
    fn from(e: &ChainEntry) -> Self {
        Self {
            header: e.header,
            height: e.height,
            prev: e.prev,
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    entry: ChainEntry,
    parent: Option<usize>,
}

/// Arena of accepted headers indexed by digest.
///
/// Slots are append-only and every parent precedes its children, so the
/// insertion order is a valid replay order for persistence.
#[derive(Clone, Debug, Default)]
pub struct ChainStore {
    slots: Vec<Slot>,
    index: HashMap<BlockHash, usize>,
}

impl ChainStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records in insertion order.
    pub fn from_records<I>(records: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = ChainRecord>,
    {
        let mut store = Self::new();
        for record in records {
            match record.prev {
                None => {
                    store.insert_root(record.header, record.height);
                }
                Some(prev) => {
                    store.insert(record.header, &prev, record.height)?;
                }
            }
        }
        Ok(store)
    }

    /// Number of entries, roots included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &ChainEntry> {
        self.slots.iter().map(|s| &s.entry)
    }

    /// Whether `digest` has been accepted.
    pub fn known(&self, digest: &BlockHash) -> bool {
        self.index.contains_key(digest)
    }

    /// Entry for `digest`, if known.
    pub fn get(&self, digest: &BlockHash) -> Option<&ChainEntry> {
        self.index.get(digest).map(|&i| &self.slots[i].entry)
    }

    /// Entry for `digest`, or `UnknownBlock`.
    pub fn entry(&self, digest: &BlockHash) -> Result<&ChainEntry, RelayError> {
        self.get(digest).ok_or(RelayError::UnknownBlock(*digest))
    }

    /// Height of a known digest, else `UnknownBlock`.
    pub fn height(&self, digest: &BlockHash) -> Result<u32, RelayError> {
        self.entry(digest).map(|e| e.height)
    }

    fn parent_of(&self, digest: &BlockHash) -> Option<BlockHash> {
        let slot = &self.slots[*self.index.get(digest)?];
        slot.parent.map(|p| self.slots[p].entry.digest)
    }

    /// Walk exactly `offset` parent links back from `digest`.
    pub fn ancestor(&self, digest: &BlockHash, offset: u32) -> Result<BlockHash, RelayError> {
        let unknown = RelayError::UnknownAncestor {
            digest: *digest,
            offset,
        };
        let mut idx = *self.index.get(digest).ok_or(unknown.clone())?;
        for _ in 0..offset {
            idx = self.slots[idx].parent.ok_or(unknown.clone())?;
        }
        Ok(self.slots[idx].entry.digest)
    }

    /// Whether `ancestor` is reached within the first `limit` positions
    /// of the walk from `descendant` (position 0 being `descendant`
    /// itself). Running out of budget and running off the known set both
    /// read as `false`.
    pub fn is_ancestor(&self, ancestor: &BlockHash, descendant: &BlockHash, limit: u32) -> bool {
        let mut current = Some(*descendant);
        for _ in 0..limit {
            match current {
                Some(d) if d == *ancestor => return true,
                Some(d) => current = self.parent_of(&d),
                None => return false,
            }
        }
        false
    }

    /// Walk at most `limit` hops from `from` looking for `target`.
    ///
    /// Returns the entry just below `target` on the path (or `from` itself
    /// when `from == target`).
    pub(crate) fn child_below(
        &self,
        from: &BlockHash,
        target: &BlockHash,
        limit: u32,
    ) -> Option<BlockHash> {
        let mut child = *from;
        let mut current = *from;
        for _ in 0..limit {
            if current == *target {
                break;
            }
            child = current;
            current = self.parent_of(&current)?;
        }
        (current == *target).then_some(child)
    }

    /// Latest common ancestor of `a` and `b`, spending at most `limit`
    /// hops on either side.
    pub fn common_ancestor(&self, a: &BlockHash, b: &BlockHash, limit: u32) -> Option<BlockHash> {
        let mut left = *self.get(a)?;
        let mut right = *self.get(b)?;
        let mut left_hops = 0u32;
        let mut right_hops = 0u32;

        while left.digest != right.digest {
            if left.height >= right.height {
                if left_hops == limit {
                    return None;
                }
                left = *self.get(&left.prev?)?;
                left_hops += 1;
            } else {
                if right_hops == limit {
                    return None;
                }
                right = *self.get(&right.prev?)?;
                right_hops += 1;
            }
        }
        Some(left.digest)
    }

    /// Record `header` under a known `prev`. Already-known digests are a
    /// no-op and return `false`.
    pub fn insert(
        &mut self,
        header: Header,
        prev: &BlockHash,
        height: u32,
    ) -> Result<bool, RelayError> {
        let parent = self.entry(prev)?;
        let digest = header::identity(&header);
        if parent.height + 1 != height {
            return Err(RelayError::InconsistentChain(digest));
        }
        let entry = ChainEntry::child_of(parent, header);
        self.insert_entry(entry)
    }

    /// Record a fully-formed child entry. Already-known digests are a no-op.
    pub fn insert_entry(&mut self, entry: ChainEntry) -> Result<bool, RelayError> {
        if self.known(&entry.digest) {
            return Ok(false);
        }
        let prev = entry.prev.ok_or(RelayError::InconsistentChain(entry.digest))?;
        let parent = *self.index.get(&prev).ok_or(RelayError::UnknownBlock(prev))?;
        if entry.header.prev_blockhash != prev {
            return Err(RelayError::InconsistentChain(entry.digest));
        }
        self.push(entry, Some(parent));
        Ok(true)
    }

    /// Record a root entry. Already-known digests are a no-op.
    pub fn insert_root(&mut self, header: Header, height: u32) -> BlockHash {
        let entry = ChainEntry::root(header, height);
        if !self.known(&entry.digest) {
            self.push(entry, None);
        }
        entry.digest
    }

    fn push(&mut self, entry: ChainEntry, parent: Option<usize>) {
        self.index.insert(entry.digest, self.slots.len());
        self.slots.push(Slot { entry, parent });
    }
}
