//! Multi-level block index.
//!
//! Each index level samples the level below by one entry per child block:
//! the child's first key and its `(offset, on_disk_size)`. The bottom level
//! points at data blocks. Levels are added until the top one fits in a
//! single root block, which [`BlockIndexReader`] keeps in memory; every
//! other index block is fetched through the block source when a descent
//! needs it.
//!
//! ```text
//! root (in memory)          [a ........ m ........ t]
//!                            │          │          │
//! intermediate / leaf       [a  d  h]  [m  p]     [t  w]
//!                            │  │  │    │  │       │  │
//! data blocks               ...........................
//! ```
//!
//! A key `K` belongs to entry `e_i` when `e_i.first_key <= K < e_{i+1}.first_key`.
//! Keys before the first root entry belong to no block.
//!
//! Descents produce an [`IndexCursor`]: the root-to-leaf path of
//! `(block, position)` pairs. Cursors are plain values; moving one to the
//! neighbouring data block happens on a copy and is committed only once
//! every child fetch succeeded.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use super::{BlockHandle, BlockType, read_block};
use crate::CellFileError;
use crate::cell::{CellKey, Comparator, KeyRef};
use crate::codec::SeekMode;
use crate::encoding::{self, EncodingError};
use crate::source::BlockSource;

// ------------------------------------------------------------------------------------------------
// Entries and blocks
// ------------------------------------------------------------------------------------------------

/// One index entry: the first key of a child block and where to find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub first_key: CellKey,
    pub offset: u64,
    /// Framed size of the child block.
    pub on_disk_size: u32,
}

impl BlockIndexEntry {
    pub fn handle(&self) -> BlockHandle {
        BlockHandle {
            offset: self.offset,
            size: self.on_disk_size,
        }
    }
}

/// A decoded index block. Entries are strictly increasing by first key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    entries: Vec<BlockIndexEntry>,
}

impl IndexBlock {
    pub fn entries(&self) -> &[BlockIndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes entries as an index block payload: `[u32 n][entry]×n`.
    pub(crate) fn encode(entries: &[BlockIndexEntry]) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::new();
        encoding::encode_vec(entries, &mut buf)?;
        Ok(buf)
    }

    /// Parses an index block payload read from `offset`.
    pub(crate) fn decode(
        payload: &[u8],
        comparator: Comparator,
        offset: u64,
    ) -> Result<Self, CellFileError> {
        let (entries, used) = encoding::decode_vec::<BlockIndexEntry>(payload)
            .map_err(|e| CellFileError::corrupt(offset, format!("index block: {e}")))?;
        if used != payload.len() {
            return Err(CellFileError::corrupt(
                offset,
                format!("{} trailing bytes after index entries", payload.len() - used),
            ));
        }
        for pair in entries.windows(2) {
            if comparator.compare(&pair[0].first_key.key_ref(), &pair[1].first_key.key_ref())
                != Ordering::Less
            {
                return Err(CellFileError::corrupt(
                    offset,
                    format!(
                        "index entries out of order: {} then {}",
                        pair[0].first_key, pair[1].first_key
                    ),
                ));
            }
        }
        Ok(Self { entries })
    }

    /// Greatest position whose first key satisfies `mode` against `key`.
    fn position(&self, comparator: Comparator, key: &KeyRef<'_>, mode: SeekMode) -> Option<usize> {
        self.entries
            .partition_point(|e| mode.accepts(comparator.compare(&e.first_key.key_ref(), key)))
            .checked_sub(1)
    }
}

// ------------------------------------------------------------------------------------------------
// Cursor
// ------------------------------------------------------------------------------------------------

/// Root-to-leaf path through the index, ending at one data block entry.
#[derive(Debug, Clone)]
pub struct IndexCursor {
    path: Vec<(Arc<IndexBlock>, usize)>,
}

impl IndexCursor {
    /// The data block entry this cursor points at.
    pub fn data_block(&self) -> Option<&BlockIndexEntry> {
        self.path
            .last()
            .and_then(|(block, pos)| block.entries.get(*pos))
    }

    /// Position at each level, root first.
    pub fn positions(&self) -> Vec<usize> {
        self.path.iter().map(|(_, pos)| *pos).collect()
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Searches the block index of one file.
pub struct BlockIndexReader {
    root: Arc<IndexBlock>,
    levels: u32,
    comparator: Comparator,
    source: Arc<dyn BlockSource>,
    verify: bool,
}

impl BlockIndexReader {
    pub(crate) fn new(
        root: Arc<IndexBlock>,
        levels: u32,
        comparator: Comparator,
        source: Arc<dyn BlockSource>,
        verify: bool,
    ) -> Self {
        Self {
            root,
            levels,
            comparator,
            source,
            verify,
        }
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn root(&self) -> &IndexBlock {
        &self.root
    }

    pub fn root_entry_count(&self) -> usize {
        self.root.len()
    }

    /// Root-level floor position of `key`, without touching lower levels.
    pub fn root_block_containing_key(&self, key: &KeyRef<'_>) -> Option<usize> {
        self.root.position(self.comparator, key, SeekMode::Floor)
    }

    /// Data block whose key range contains `key`, or `None` when `key`
    /// precedes every block.
    pub fn locate_data_block(
        &self,
        key: &KeyRef<'_>,
    ) -> Result<Option<BlockIndexEntry>, CellFileError> {
        let cursor = self.seek_cursor(key, SeekMode::Floor)?;
        Ok(cursor.and_then(|c| c.data_block().cloned()))
    }

    /// Last data block whose first key is strictly before `key`.
    pub fn locate_data_block_before(
        &self,
        key: &KeyRef<'_>,
    ) -> Result<Option<BlockIndexEntry>, CellFileError> {
        let cursor = self.seek_cursor(key, SeekMode::StrictBefore)?;
        Ok(cursor.and_then(|c| c.data_block().cloned()))
    }

    /// Descends to the data block selected by `mode` at every level.
    pub fn seek_cursor(
        &self,
        key: &KeyRef<'_>,
        mode: SeekMode,
    ) -> Result<Option<IndexCursor>, CellFileError> {
        trace!(key = %key, ?mode, "index descent");
        self.descend(|block| block.position(self.comparator, key, mode))
    }

    /// Cursor on the first data block, `None` for an empty file.
    pub fn first_cursor(&self) -> Result<Option<IndexCursor>, CellFileError> {
        self.descend(|block| (!block.is_empty()).then_some(0))
    }

    /// First key of the middle data block, picking the middle entry at
    /// every level. `None` for an empty file.
    pub fn mid_key(&self) -> Result<Option<CellKey>, CellFileError> {
        let cursor = self.descend(|block| block.len().checked_sub(1).map(|last| last / 2))?;
        Ok(cursor.and_then(|c| c.data_block().map(|e| e.first_key.clone())))
    }

    /// Moves `cursor` to the next data block in index order.
    ///
    /// Returns `false`, leaving the cursor untouched, at the last block.
    pub fn advance(&self, cursor: &mut IndexCursor) -> Result<bool, CellFileError> {
        self.step(cursor, |block, pos| (pos + 1 < block.len()).then_some(pos + 1), |_| 0)
    }

    /// Moves `cursor` to the previous data block in index order.
    ///
    /// Returns `false`, leaving the cursor untouched, at the first block.
    pub fn retreat(&self, cursor: &mut IndexCursor) -> Result<bool, CellFileError> {
        self.step(cursor, |_, pos| pos.checked_sub(1), |block| block.len() - 1)
    }

    /// First key of the data block following the cursor's block.
    pub fn next_indexed_key<'c>(&self, cursor: &'c IndexCursor) -> Option<&'c CellKey> {
        cursor
            .path
            .iter()
            .rev()
            .find_map(|(block, pos)| block.entries.get(pos + 1))
            .map(|entry| &entry.first_key)
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Walks from the root to a data block entry, choosing a position at
    /// each level with `pick`. `None` when `pick` rejects the root.
    fn descend<F>(&self, pick: F) -> Result<Option<IndexCursor>, CellFileError>
    where
        F: Fn(&IndexBlock) -> Option<usize>,
    {
        let Some(pos) = pick(&self.root) else {
            return Ok(None);
        };
        let mut path = vec![(Arc::clone(&self.root), pos)];

        for depth in 1..self.levels {
            let (parent, parent_pos) = &path[path.len() - 1];
            let entry = &parent.entries[*parent_pos];
            let child = self.read_child(entry, depth)?;
            let Some(pos) = pick(&child) else {
                return Err(CellFileError::corrupt(
                    entry.offset,
                    "child index block disagrees with its parent entry",
                ));
            };
            path.push((child, pos));
        }
        Ok(Some(IndexCursor { path }))
    }

    /// Moves to a neighbouring data block. `step` moves the position at the
    /// deepest level that can move; `reset` picks the position in every
    /// freshly loaded block below it.
    fn step<S, R>(&self, cursor: &mut IndexCursor, step: S, reset: R) -> Result<bool, CellFileError>
    where
        S: Fn(&IndexBlock, usize) -> Option<usize>,
        R: Fn(&IndexBlock) -> usize,
    {
        let mut path = cursor.path.clone();
        let mut depth = path.len();
        loop {
            if depth == 0 {
                return Ok(false);
            }
            depth -= 1;
            let (block, pos) = &mut path[depth];
            if let Some(moved) = step(&**block, *pos) {
                *pos = moved;
                break;
            }
        }

        path.truncate(depth + 1);
        for child_depth in depth + 1..self.levels as usize {
            let (parent, parent_pos) = &path[path.len() - 1];
            let child = self.read_child(&parent.entries[*parent_pos], child_depth as u32)?;
            let pos = reset(&child);
            path.push((child, pos));
        }

        cursor.path = path;
        Ok(true)
    }

    /// Fetches and validates the index block at `child_depth` behind `entry`.
    fn read_child(
        &self,
        entry: &BlockIndexEntry,
        child_depth: u32,
    ) -> Result<Arc<IndexBlock>, CellFileError> {
        let expected = if self.levels - child_depth == 1 {
            BlockType::LeafIndex
        } else {
            BlockType::IntermediateIndex
        };
        let payload = read_block(&*self.source, entry.handle(), expected, self.verify)?;
        let block = IndexBlock::decode(&payload, self.comparator, entry.offset)?;

        match block.entries.first() {
            None => Err(CellFileError::corrupt(entry.offset, "empty index block")),
            Some(first)
                if self
                    .comparator
                    .compare(&first.first_key.key_ref(), &entry.first_key.key_ref())
                    != Ordering::Equal =>
            {
                Err(CellFileError::corrupt(
                    entry.offset,
                    format!(
                        "index block starts at {} but its parent entry says {}",
                        first.first_key, entry.first_key
                    ),
                ))
            }
            Some(_) => Ok(Arc::new(block)),
        }
    }
}

impl std::fmt::Debug for BlockIndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockIndexReader")
            .field("levels", &self.levels)
            .field("root_entries", &self.root.len())
            .field("comparator", &self.comparator)
            .finish_non_exhaustive()
    }
}
