//! # cellfile
//!
//! Immutable, block-structured files of sorted key/value **cells**, with a
//! multi-level block index and stateful scanners.
//!
//! A cell file is written once by a [`CellFileWriter`] and read by any number
//! of concurrent [`Scanner`]s through a shared [`CellFileReader`]. Any key is
//! located in O(log n) block reads by descending the index from its
//! in-memory root.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cellfile::{Cell, CellFileReader, CellKey, ReaderConfig, SeekResult, WriterConfig};
//!
//! let cells = vec![
//!     Cell::put("apple", "cf", "q", 1, "red"),
//!     Cell::put("banana", "cf", "q", 1, "yellow"),
//! ];
//! cellfile::write_file("/tmp/fruit.cells", cells, WriterConfig::default()).unwrap();
//!
//! let reader = CellFileReader::open("/tmp/fruit.cells", ReaderConfig::default()).unwrap();
//! let mut scanner = reader.new_scanner();
//!
//! let key = CellKey::first_on_row("b");
//! assert_eq!(scanner.seek_to(&key.key_ref()).unwrap(), SeekResult::Predecessor);
//! assert_eq!(scanner.key_value().unwrap().row(), b"apple");
//! assert_eq!(scanner.next().unwrap().unwrap().row(), b"banana");
//! ```
//!
//! ## Features
//!
//! - **Multi-level block index** — root held in memory, lower levels loaded
//!   lazily through a [`BlockSource`].
//! - **Three seek semantics** — floor seek, seek-before, and re-seek from
//!   the current position.
//! - **Pluggable block encodings** — raw, prefix, and diff front coding, all
//!   answering seeks identically.
//! - **Row bloom filters** — fast negative row lookups.
//! - **CRC32 integrity** — every block and the trailer are checksummed.
//! - **Block cache** — optional byte-budget cache shared by all scanners.

pub mod cell;
pub mod codec;
pub(crate) mod encoding;
pub mod file;
pub mod source;

use std::io;

use thiserror::Error;

pub use cell::{Cell, CellKey, CellType, Comparator, KeyRef, LATEST_TIMESTAMP, Tag};
pub use codec::{BlockCodec, BlockSeek, CodecError, DataBlockEncoding, DecodedBlock, SeekMode};
pub use encoding::EncodingError;
pub use file::builder::{CellFileWriter, write_file};
pub use file::index::{BlockIndexEntry, BlockIndexReader, IndexBlock, IndexCursor};
pub use file::scanner::{Scanner, SeekResult};
pub use file::{BlockHandle, CellFileReader, FileInfo, Trailer};
pub use source::{BlockSource, CacheStats, CachedBlockSource, MemoryBlockSource, MmapBlockSource};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`CellFileWriter`].
///
/// All fields have sensible defaults via [`WriterConfig::default()`].
/// The configuration is validated when the writer is created.
///
/// # Example
///
/// ```rust
/// use cellfile::{DataBlockEncoding, WriterConfig};
///
/// let config = WriterConfig {
///     block_size: 4 * 1024,
///     encoding: DataBlockEncoding::Prefix,
///     ..WriterConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Target unencoded size of a data block in bytes. A block is cut as
    /// soon as the cells buffered for it reach this size.
    ///
    /// Default: 64 KiB. Must be ≥ 64.
    pub block_size: usize,

    /// Encoding applied to every data block.
    ///
    /// Default: [`DataBlockEncoding::None`]. `PrefixTree` is rejected.
    pub encoding: DataBlockEncoding,

    /// Key order the input must follow.
    ///
    /// Default: [`Comparator::Cell`].
    pub comparator: Comparator,

    /// Maximum number of entries in one index block (the index fan-out).
    /// Levels are added until the root holds at most this many entries.
    ///
    /// Default: 128. Must be ≥ 2.
    pub index_block_entries: usize,

    /// Whether to write a row bloom filter.
    ///
    /// Default: `true`.
    pub bloom_filter: bool,

    /// Target false-positive rate of the row bloom filter.
    ///
    /// Default: 0.01. Must be in (0.0, 1.0).
    pub bloom_false_positive_rate: f64,

    /// Number of distinct rows the file is expected to hold. The bloom
    /// filter is sized from this up front and filled while cells stream in,
    /// so the writer never buffers row keys. More rows than expected raise
    /// the false-positive rate but never cause false negatives.
    ///
    /// Default: 10 000. Must be ≥ 1.
    pub expected_rows: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            encoding: DataBlockEncoding::None,
            comparator: Comparator::Cell,
            index_block_entries: 128,
            bloom_filter: true,
            bloom_false_positive_rate: 0.01,
            expected_rows: 10_000,
        }
    }
}

impl WriterConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), CellFileError> {
        if self.block_size < 64 {
            return Err(CellFileError::InvalidConfig(
                "block_size must be >= 64".into(),
            ));
        }
        if self.index_block_entries < 2 {
            return Err(CellFileError::InvalidConfig(
                "index_block_entries must be >= 2".into(),
            ));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(CellFileError::InvalidConfig(
                "bloom_false_positive_rate must be in (0.0, 1.0)".into(),
            ));
        }
        if self.expected_rows == 0 {
            return Err(CellFileError::InvalidConfig(
                "expected_rows must be >= 1".into(),
            ));
        }
        if !DataBlockEncoding::SUPPORTED.contains(&self.encoding) {
            return Err(CellFileError::UnsupportedEncoding(self.encoding.id()));
        }
        Ok(())
    }
}

/// Configuration for a [`CellFileReader`].
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Comparator the file must have been written with.
    ///
    /// Default: [`Comparator::Cell`].
    pub comparator: Comparator,

    /// Byte budget of the block cache placed in front of the file.
    ///
    /// Default: 0 (no cache).
    pub cache_capacity_bytes: usize,

    /// Whether block and trailer checksums are verified on read.
    ///
    /// Default: `true`.
    pub verify_checksums: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            comparator: Comparator::Cell,
            cache_capacity_bytes: 0,
            verify_checksums: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by cell file operations.
#[derive(Debug, Error)]
pub enum CellFileError {
    /// Underlying I/O error, including block source failures.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Low-level decoding failure outside a data block (trailer, file info).
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Malformed framing, bad magic, undecodable block, or index/block
    /// inconsistency.
    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    /// Stored CRC32 does not match the block or trailer contents.
    #[error("checksum mismatch at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    /// The file was written with a different key order than requested.
    #[error("comparator mismatch: expected {expected}, found {found}")]
    ComparatorMismatch { expected: String, found: String },

    /// The data block encoding is unknown or not implemented.
    #[error("unsupported data block encoding id {0}")]
    UnsupportedEncoding(u8),

    /// The trailer declares a format version this crate cannot read.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// Writer input not strictly increasing.
    #[error("cell {current} does not sort after {previous}")]
    OutOfOrder { previous: String, current: String },

    /// A cell cannot be stored (synthetic type, oversized field).
    #[error("invalid cell: {0}")]
    InvalidCell(String),

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CellFileError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptBlock {
            offset,
            reason: reason.into(),
        }
    }
}
