//! Seekable cursor over one cell file.
//!
//! A [`Scanner`] combines an [`IndexCursor`] (which data block) with a
//! decoded block and an in-block position (which cell). It is a small state
//! machine:
//!
//! ```text
//!               seek_to / seek_before / seek_to_first
//! Unpositioned ─────────────────────────────────────▶ Positioned ──next()──▶ Exhausted
//!      ▲                                                   │  ▲                  │
//!      └──────────── key before every cell ────────────────┘  └──── any seek ────┘
//! ```
//!
//! Every fetch a seek needs happens before the state is replaced, so a
//! failing seek leaves the scanner where it was.
//!
//! Scanners are single-threaded. Any number of them can share one reader:
//! `Scanner<&CellFileReader>` borrows it, `Scanner<Arc<CellFileReader>>`
//! owns a handle and can move to another thread.

use std::cmp::Ordering;
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, trace};

use super::CellFileReader;
use super::index::IndexCursor;
use crate::CellFileError;
use crate::cell::{Cell, CellKey, KeyRef};
use crate::codec::{BlockSeek, CodecError, DecodedBlock, SeekMode};

// ------------------------------------------------------------------------------------------------
// Seek result
// ------------------------------------------------------------------------------------------------

/// Outcome of [`Scanner::seek_to`] and [`Scanner::reseek_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekResult {
    /// Positioned on a cell whose key equals the target.
    Exact,
    /// Positioned on the last cell before the target.
    Predecessor,
    /// Every cell sorts after the target; the scanner is unpositioned.
    BeforeFirst,
}

impl From<SeekResult> for i32 {
    fn from(result: SeekResult) -> Self {
        match result {
            SeekResult::Exact => 0,
            SeekResult::Predecessor => 1,
            SeekResult::BeforeFirst => -1,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// State
// ------------------------------------------------------------------------------------------------

struct Position {
    index: IndexCursor,
    block_offset: u64,
    block: Arc<dyn DecodedBlock>,
    cell: usize,
    current: Cell,
}

enum ScanState {
    Unpositioned,
    Positioned(Position),
    Exhausted,
}

/// Cursor over the cells of one file.
pub struct Scanner<R: Deref<Target = CellFileReader>> {
    reader: R,
    state: ScanState,
}

impl<R: Deref<Target = CellFileReader>> Scanner<R> {
    /// Creates an unpositioned scanner.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: ScanState::Unpositioned,
        }
    }

    pub fn reader(&self) -> &CellFileReader {
        &self.reader
    }

    /// Whether the scanner currently points at a cell.
    pub fn is_seeked(&self) -> bool {
        matches!(self.state, ScanState::Positioned(_))
    }

    /// The current cell, `None` when unpositioned or exhausted.
    pub fn key_value(&self) -> Option<&Cell> {
        match &self.state {
            ScanState::Positioned(pos) => Some(&pos.current),
            _ => None,
        }
    }

    /// Positions on the greatest cell `<= key`.
    ///
    /// Returns [`SeekResult::BeforeFirst`] and leaves the scanner
    /// unpositioned when every cell sorts after `key`.
    pub fn seek_to(&mut self, key: &KeyRef<'_>) -> Result<SeekResult, CellFileError> {
        trace!(key = %key, "seek_to");
        let Some(index) = self.reader.index().seek_cursor(key, SeekMode::Floor)? else {
            self.state = ScanState::Unpositioned;
            return Ok(SeekResult::BeforeFirst);
        };

        let (block_offset, block) = self.load(&index)?;
        let (cell, exact) = match block
            .seek(self.reader.comparator(), key, SeekMode::Floor)
            .map_err(|e| corrupt(block_offset, e))?
        {
            BlockSeek::Found { position, exact } => (position, exact),
            BlockSeek::BeforeStart => {
                return Err(CellFileError::corrupt(
                    block_offset,
                    format!("index selected a block starting after {key}"),
                ));
            }
        };
        let current = block.cell_at(cell).map_err(|e| corrupt(block_offset, e))?;

        self.state = ScanState::Positioned(Position {
            index,
            block_offset,
            block,
            cell,
            current,
        });
        Ok(if exact {
            SeekResult::Exact
        } else {
            SeekResult::Predecessor
        })
    }

    /// Positions on the greatest cell strictly `< key`.
    ///
    /// Returns `false` and leaves the scanner unpositioned when no such cell
    /// exists.
    pub fn seek_before(&mut self, key: &KeyRef<'_>) -> Result<bool, CellFileError> {
        trace!(key = %key, "seek_before");
        let Some(index) = self.reader.index().seek_cursor(key, SeekMode::StrictBefore)? else {
            self.state = ScanState::Unpositioned;
            return Ok(false);
        };

        // The strict descent picked a block whose first key sorts before
        // `key`, so the block itself must hold a cell before it.
        let (block_offset, block) = self.load(&index)?;
        let cell = match block
            .seek(self.reader.comparator(), key, SeekMode::StrictBefore)
            .map_err(|e| corrupt(block_offset, e))?
        {
            BlockSeek::Found { position, .. } => position,
            BlockSeek::BeforeStart => {
                return Err(CellFileError::corrupt(
                    block_offset,
                    format!("index selected a block starting at or after {key}"),
                ));
            }
        };
        let current = block.cell_at(cell).map_err(|e| corrupt(block_offset, e))?;

        self.state = ScanState::Positioned(Position {
            index,
            block_offset,
            block,
            cell,
            current,
        });
        Ok(true)
    }

    /// Same result as [`seek_to`](Self::seek_to), answered from the current
    /// block without touching the index when `key` falls inside it.
    pub fn reseek_to(&mut self, key: &KeyRef<'_>) -> Result<SeekResult, CellFileError> {
        let comparator = self.reader.comparator();
        let ScanState::Positioned(pos) = &self.state else {
            return self.seek_to(key);
        };
        let Some(entry) = pos.index.data_block() else {
            return self.seek_to(key);
        };

        let from_block_start =
            comparator.compare(&entry.first_key.key_ref(), key) != Ordering::Greater;
        let before_next_block = self
            .reader
            .index()
            .next_indexed_key(&pos.index)
            .is_none_or(|next| comparator.compare(key, &next.key_ref()) == Ordering::Less);
        if !(from_block_start && before_next_block) {
            return self.seek_to(key);
        }

        trace!(key = %key, offset = pos.block_offset, "reseek within block");
        let (cell, exact) = match pos
            .block
            .seek(comparator, key, SeekMode::Floor)
            .map_err(|e| corrupt(pos.block_offset, e))?
        {
            BlockSeek::Found { position, exact } => (position, exact),
            BlockSeek::BeforeStart => {
                return Err(CellFileError::corrupt(
                    pos.block_offset,
                    format!("block indexed at {} starts after {key}", entry.first_key),
                ));
            }
        };
        let current = pos
            .block
            .cell_at(cell)
            .map_err(|e| corrupt(pos.block_offset, e))?;

        if let ScanState::Positioned(pos) = &mut self.state {
            pos.cell = cell;
            pos.current = current;
        }
        Ok(if exact {
            SeekResult::Exact
        } else {
            SeekResult::Predecessor
        })
    }

    /// Positions on the first cell. Returns `false` for an empty file.
    pub fn seek_to_first(&mut self) -> Result<bool, CellFileError> {
        let Some(index) = self.reader.index().first_cursor()? else {
            self.state = ScanState::Unpositioned;
            return Ok(false);
        };
        let (block_offset, block) = self.load(&index)?;
        let current = block.cell_at(0).map_err(|e| corrupt(block_offset, e))?;
        self.state = ScanState::Positioned(Position {
            index,
            block_offset,
            block,
            cell: 0,
            current,
        });
        Ok(true)
    }

    /// Positions on the first cell of `row`.
    ///
    /// Returns `false` when the file has no cell in `row`; the scanner is
    /// then on the first cell after it, or exhausted.
    pub fn seek_to_row(&mut self, row: &[u8]) -> Result<bool, CellFileError> {
        let lookup = CellKey::first_on_row(row);
        let positioned = match self.seek_to(&lookup.key_ref())? {
            SeekResult::BeforeFirst => self.seek_to_first()?,
            SeekResult::Exact => true,
            SeekResult::Predecessor => self.next()?.is_some(),
        };
        let comparator = self.reader.comparator();
        Ok(positioned
            && self
                .key_value()
                .is_some_and(|cell| comparator.compare_rows(cell.row(), row) == Ordering::Equal))
    }

    /// Moves to the next cell and returns it.
    ///
    /// Crosses into the following data block in index order when the
    /// current one is used up. Returns `None` once the last cell has been
    /// passed (the scanner is then exhausted) or when unpositioned.
    pub fn next(&mut self) -> Result<Option<Cell>, CellFileError> {
        let ScanState::Positioned(pos) = &self.state else {
            return Ok(None);
        };

        if let Some(cell) = pos.block.next(pos.cell) {
            let current = pos
                .block
                .cell_after(pos.cell, pos.current.key())
                .map_err(|e| corrupt(pos.block_offset, e))?;
            if let ScanState::Positioned(pos) = &mut self.state {
                pos.cell = cell;
                pos.current = current.clone();
            }
            return Ok(Some(current));
        }

        let mut index = pos.index.clone();
        if !self.reader.index().advance(&mut index)? {
            self.state = ScanState::Exhausted;
            return Ok(None);
        }
        let (block_offset, block) = self.load(&index)?;
        let current = block.cell_at(0).map_err(|e| corrupt(block_offset, e))?;
        debug!(offset = block_offset, cells = block.cell_count(), "scanner entered next data block");

        self.state = ScanState::Positioned(Position {
            index,
            block_offset,
            block,
            cell: 0,
            current: current.clone(),
        });
        Ok(Some(current))
    }

    fn load(&self, index: &IndexCursor) -> Result<(u64, Arc<dyn DecodedBlock>), CellFileError> {
        let entry = index
            .data_block()
            .ok_or_else(|| CellFileError::Internal("index cursor past its block".into()))?;
        let block = self.reader.read_data_block(entry)?;
        Ok((entry.offset, block))
    }
}

fn corrupt(offset: u64, error: CodecError) -> CellFileError {
    CellFileError::corrupt(offset, error.to_string())
}

impl<R: Deref<Target = CellFileReader>> std::fmt::Debug for Scanner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            ScanState::Unpositioned => "unpositioned".to_string(),
            ScanState::Exhausted => "exhausted".to_string(),
            ScanState::Positioned(pos) => {
                format!("block {} cell {} ({})", pos.block_offset, pos.cell, pos.current)
            }
        };
        f.debug_struct("Scanner").field("state", &state).finish()
    }
}
