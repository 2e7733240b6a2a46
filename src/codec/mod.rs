//! Data block encodings.
//!
//! A data block holds a sorted, non-empty run of [`Cell`]s. How those cells
//! are laid out inside the block payload is decided by a [`BlockCodec`],
//! selected per file by its [`DataBlockEncoding`] id (stored in the trailer).
//!
//! Every codec produces a [`DecodedBlock`] that answers the same in-block
//! seek questions with identical results, so the index and scanner never
//! need to know which encoding a file uses.
//!
//! | Encoding     | Id | Layout                                                  |
//! |--------------|----|---------------------------------------------------------|
//! | `None`       | 0  | raw entries + offset table, binary search               |
//! | `Prefix`     | 2  | front-coded flat keys, restart points every 16 cells    |
//! | `Diff`       | 3  | front-coded columns, timestamp deltas, type elision     |
//! | `PrefixTree` | 6  | recognised, not supported                               |
//!
//! Decoding validates all framing up front, so later accessors only fail on
//! out-of-range positions.

#[cfg(test)]
mod tests;

mod prefix;
mod raw;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cell::{Cell, CellKey, Comparator, KeyRef};
use crate::encoding::EncodingError;

pub use prefix::{DiffCodec, PrefixCodec};
pub use raw::RawCodec;

/// Cells between two full keys in the front-coded encodings.
pub const RESTART_INTERVAL: usize = 16;

// ------------------------------------------------------------------------------------------------
// Error types
// ------------------------------------------------------------------------------------------------

/// Failures while encoding or decoding a data block payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A fixed-width or varint field could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Counts, offsets, or lengths inside the payload are inconsistent.
    #[error("malformed block: {0}")]
    Malformed(String),

    /// A data block must hold at least one cell.
    #[error("data block holds no cells")]
    EmptyBlock,

    /// A position outside `0..cell_count` was requested.
    #[error("position {position} out of range (block holds {count} cells)")]
    OutOfRange { position: usize, count: usize },

    /// The encoding id is known but has no codec.
    #[error("unsupported data block encoding id {0}")]
    UnsupportedEncoding(u8),
}

// ------------------------------------------------------------------------------------------------
// Encoding identifiers
// ------------------------------------------------------------------------------------------------

/// Data block encoding recorded in the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataBlockEncoding {
    #[default]
    None,
    Prefix,
    Diff,
    PrefixTree,
}

impl DataBlockEncoding {
    /// Every encoding this crate can write and read.
    pub const SUPPORTED: [DataBlockEncoding; 3] = [Self::None, Self::Prefix, Self::Diff];

    pub fn id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Prefix => 2,
            Self::Diff => 3,
            Self::PrefixTree => 6,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            2 => Some(Self::Prefix),
            3 => Some(Self::Diff),
            6 => Some(Self::PrefixTree),
            _ => None,
        }
    }

    /// Returns the codec for this encoding.
    pub fn codec(self) -> Result<Arc<dyn BlockCodec>, CodecError> {
        match self {
            Self::None => Ok(Arc::new(RawCodec)),
            Self::Prefix => Ok(Arc::new(PrefixCodec)),
            Self::Diff => Ok(Arc::new(DiffCodec)),
            Self::PrefixTree => Err(CodecError::UnsupportedEncoding(self.id())),
        }
    }
}

impl fmt::Display for DataBlockEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Prefix => "PREFIX",
            Self::Diff => "DIFF",
            Self::PrefixTree => "PREFIX_TREE",
        };
        f.write_str(name)
    }
}

// ------------------------------------------------------------------------------------------------
// Codec contract
// ------------------------------------------------------------------------------------------------

/// How an in-block seek matches the target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Greatest position whose key is `<=` the target.
    Floor,

    /// Greatest position whose key is `<` the target.
    StrictBefore,
}

impl SeekMode {
    /// Whether a key ordered `ord` relative to the target satisfies the mode.
    pub(crate) fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Floor => ord != Ordering::Greater,
            Self::StrictBefore => ord == Ordering::Less,
        }
    }
}

/// Outcome of [`DecodedBlock::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSeek {
    /// `position` satisfies the mode; `exact` when its key equals the target.
    Found { position: usize, exact: bool },

    /// Every key in the block fails the mode.
    BeforeStart,
}

/// Encoder / decoder for one [`DataBlockEncoding`].
pub trait BlockCodec: Send + Sync + fmt::Debug {
    fn encoding(&self) -> DataBlockEncoding;

    /// Serializes a sorted, non-empty run of cells into a block payload.
    fn encode(&self, cells: &[Cell]) -> Result<Vec<u8>, CodecError>;

    /// Validates a payload and returns a seekable view over it.
    fn decode(&self, payload: Arc<[u8]>) -> Result<Arc<dyn DecodedBlock>, CodecError>;
}

/// A validated data block that supports positional access and seeks.
pub trait DecodedBlock: Send + Sync + fmt::Debug {
    fn cell_count(&self) -> usize;

    /// Seeks within the block. See [`SeekMode`].
    fn seek(
        &self,
        comparator: Comparator,
        key: &KeyRef<'_>,
        mode: SeekMode,
    ) -> Result<BlockSeek, CodecError>;

    /// Materializes the cell at `position`.
    fn cell_at(&self, position: usize) -> Result<Cell, CodecError>;

    /// Materializes only the key at `position`.
    fn key_at(&self, position: usize) -> Result<CellKey, CodecError>;

    /// Materializes the cell at `position + 1`, given the key at `position`.
    ///
    /// Sequential scans call this instead of [`cell_at`](Self::cell_at) so
    /// that front-coded blocks decode one entry per step rather than
    /// replaying the entries since the last restart point. The key passed
    /// in must be the one stored at `position`.
    fn cell_after(&self, position: usize, _previous: &CellKey) -> Result<Cell, CodecError> {
        self.cell_at(position + 1)
    }

    /// Position following `position`, if any.
    fn next(&self, position: usize) -> Option<usize> {
        let next = position + 1;
        (next < self.cell_count()).then_some(next)
    }

    /// Position of the last cell.
    fn last(&self) -> Option<usize> {
        self.cell_count().checked_sub(1)
    }

    /// Size of the payload backing this block.
    fn payload_len(&self) -> usize;
}

// ------------------------------------------------------------------------------------------------
// Shared helpers
// ------------------------------------------------------------------------------------------------

/// Binary search for the first index in `0..len` where `pred` is false,
/// assuming `pred` is true for a prefix of the range.
pub(crate) fn partition_point<F>(len: usize, mut pred: F) -> Result<usize, CodecError>
where
    F: FnMut(usize) -> Result<bool, CodecError>,
{
    let (mut lo, mut hi) = (0usize, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid)? {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

pub(crate) fn check_position(position: usize, count: usize) -> Result<(), CodecError> {
    if position < count {
        Ok(())
    } else {
        Err(CodecError::OutOfRange { position, count })
    }
}

/// Splits a payload into its body and a trailing little-endian `u32`.
pub(crate) fn split_trailing_u32<'a>(
    buf: &'a [u8],
    what: &str,
) -> Result<(&'a [u8], u32), CodecError> {
    let at = buf
        .len()
        .checked_sub(4)
        .ok_or_else(|| CodecError::Malformed(format!("payload too short for {what}")))?;
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..]);
    Ok((&buf[..at], u32::from_le_bytes(word)))
}

/// Reads `count` little-endian `u32`s from the end of `buf`.
pub(crate) fn split_trailing_table<'a>(
    buf: &'a [u8],
    count: usize,
    what: &str,
) -> Result<(&'a [u8], Vec<u32>), CodecError> {
    let table_len = count
        .checked_mul(4)
        .filter(|&n| n <= buf.len())
        .ok_or_else(|| {
            CodecError::Malformed(format!(
                "{what} table of {count} entries exceeds payload of {} bytes",
                buf.len()
            ))
        })?;
    let at = buf.len() - table_len;
    let table = buf[at..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((&buf[..at], table))
}
