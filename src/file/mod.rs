//! # Cell file layout and reader
//!
//! A cell file is immutable once written. Its blocks are laid out in this
//! order, with all integers little-endian:
//!
//! ```text
//! [DATA BLOCK]*            magic "DATABLK*"
//! [LEAF INDEX BLOCK]*      magic "IDXLEAF2"   (levels >= 2)
//! [INTERMEDIATE BLOCK]*    magic "IDXINTE2"   (levels >= 3)
//! [ROOT INDEX BLOCK]       magic "IDXROOT2"
//! [BLOOM BLOCK]?           magic "BLMFBLK2"
//! [FILE INFO BLOCK]        magic "FILEINF2"
//! [TRAILER]                magic "TRABLK\"$", TRAILER_SIZE bytes
//! ```
//!
//! Every block shares one framing:
//!
//! ```text
//! [magic (8 B)][payload_len (4 B)][payload][crc32(magic ‖ len ‖ payload) (4 B)]
//! ```
//!
//! The trailer is read first. It locates the root index, which is loaded
//! eagerly and kept for the reader's lifetime; lower index levels and data
//! blocks are fetched through the [`BlockSource`] on demand.
//!
//! ## Submodules
//!
//! - [`builder`] — [`CellFileWriter`](builder::CellFileWriter).
//! - [`index`] — the multi-level block index and its cursor.
//! - [`scanner`] — the seekable [`Scanner`](scanner::Scanner).

#[cfg(test)]
mod tests;

pub mod builder;
mod encoding_impls;
pub mod index;
pub mod scanner;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use tracing::{info, warn};

use crate::cell::{CellKey, Comparator};
use crate::codec::{BlockCodec, DataBlockEncoding, DecodedBlock};
use crate::encoding::{self, len_to_u32};
use crate::source::{BlockSource, CacheStats, CachedBlockSource, MemoryBlockSource, MmapBlockSource};
use crate::{CellFileError, ReaderConfig};

use index::{BlockIndexEntry, BlockIndexReader, IndexBlock};
use scanner::Scanner;

// ------------------------------------------------------------------------------------------------
// Format constants
// ------------------------------------------------------------------------------------------------

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes opening the trailer.
pub const TRAILER_MAGIC: [u8; 8] = *b"TRABLK\"$";

/// Size of the fixed trailer at the end of every file.
pub const TRAILER_SIZE: usize = 8 // magic
    + 4 // version
    + 3 * BLOCK_HANDLE_SIZE // file info, bloom, root index
    + 4 // index levels
    + 8 // data block count
    + 4 // root entry count
    + 8 // cell count
    + 8 + 8 // first / last data block offset
    + 1 + 1 // encoding id, comparator id
    + 4; // crc32

/// Encoded size of a [`BlockHandle`].
pub const BLOCK_HANDLE_SIZE: usize = 8 + 4;

/// Framing bytes around every block payload (magic, length, crc).
pub const BLOCK_OVERHEAD: usize = 8 + 4 + 4;

/// Deepest index a reader accepts.
pub const MAX_INDEX_LEVELS: u32 = 16;

// ------------------------------------------------------------------------------------------------
// Block types and handles
// ------------------------------------------------------------------------------------------------

/// Kind of a framed block, identified on disk by its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Data,
    LeafIndex,
    IntermediateIndex,
    RootIndex,
    Bloom,
    FileInfo,
}

impl BlockType {
    pub fn magic(self) -> &'static [u8; 8] {
        match self {
            Self::Data => b"DATABLK*",
            Self::LeafIndex => b"IDXLEAF2",
            Self::IntermediateIndex => b"IDXINTE2",
            Self::RootIndex => b"IDXROOT2",
            Self::Bloom => b"BLMFBLK2",
            Self::FileInfo => b"FILEINF2",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Location of a framed block: `(offset, on-disk size including framing)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u32,
}

impl BlockHandle {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Wraps a payload in block framing.
pub(crate) fn frame_block(block_type: BlockType, payload: &[u8]) -> Result<Vec<u8>, CellFileError> {
    let len = len_to_u32(payload.len())?;
    let mut framed = Vec::with_capacity(BLOCK_OVERHEAD + payload.len());
    framed.extend_from_slice(block_type.magic());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(payload);

    let mut hasher = Crc32::new();
    hasher.update(&framed);
    framed.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(framed)
}

/// Fetches a framed block, checks its magic, length and checksum, and
/// returns the payload.
pub(crate) fn read_block(
    source: &dyn BlockSource,
    handle: BlockHandle,
    expected: BlockType,
    verify: bool,
) -> Result<Arc<[u8]>, CellFileError> {
    let offset = handle.offset;
    let raw = source.fetch_block(offset, handle.size)?;
    if raw.len() < BLOCK_OVERHEAD {
        warn!(offset, size = raw.len(), "block shorter than its framing");
        return Err(CellFileError::corrupt(
            offset,
            format!("{} bytes cannot hold a framed block", raw.len()),
        ));
    }
    if &raw[..8] != expected.magic() {
        warn!(offset, expected = %expected, "block magic mismatch");
        return Err(CellFileError::corrupt(
            offset,
            format!("expected {expected} block magic"),
        ));
    }

    let len = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as usize;
    if len != raw.len() - BLOCK_OVERHEAD {
        warn!(offset, len, size = raw.len(), "block length mismatch");
        return Err(CellFileError::corrupt(
            offset,
            format!("payload length {len} does not fit block of {} bytes", raw.len()),
        ));
    }

    let body_end = raw.len() - 4;
    if verify {
        let stored = u32::from_le_bytes([
            raw[body_end],
            raw[body_end + 1],
            raw[body_end + 2],
            raw[body_end + 3],
        ]);
        let mut hasher = Crc32::new();
        hasher.update(&raw[..body_end]);
        if hasher.finalize() != stored {
            warn!(offset, block = %expected, "block checksum mismatch");
            return Err(CellFileError::ChecksumMismatch { offset });
        }
    }

    Ok(Arc::from(&raw[12..body_end]))
}

// ------------------------------------------------------------------------------------------------
// Trailer
// ------------------------------------------------------------------------------------------------

/// Fixed-size record at the end of every cell file.
///
/// Encoding and comparator are kept as raw ids so that a reader can report
/// exactly which unknown value it found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub version: u32,
    pub file_info: BlockHandle,
    /// Empty handle when the file has no bloom filter.
    pub bloom: BlockHandle,
    pub root_index: BlockHandle,
    /// Index levels including the root. `1` means root entries point
    /// straight at data blocks.
    pub index_levels: u32,
    pub data_block_count: u64,
    pub root_entry_count: u32,
    pub cell_count: u64,
    pub first_data_block_offset: u64,
    pub last_data_block_offset: u64,
    pub encoding_id: u8,
    pub comparator_id: u8,
}

impl Trailer {
    /// Serializes the trailer including its checksum.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CellFileError> {
        let mut buf = encoding::encode_to_vec(self)?;
        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
        Ok(buf)
    }

    /// Reads and verifies the trailer at the end of `source`.
    pub fn read_from(source: &dyn BlockSource, verify: bool) -> Result<Self, CellFileError> {
        let len = source.len();
        if len < TRAILER_SIZE as u64 {
            return Err(CellFileError::corrupt(
                0,
                format!("file of {len} bytes is shorter than the trailer"),
            ));
        }
        let offset = len - TRAILER_SIZE as u64;
        let raw = source.fetch_block(offset, TRAILER_SIZE as u32)?;
        if raw[..8] != TRAILER_MAGIC {
            warn!(offset, "trailer magic mismatch");
            return Err(CellFileError::corrupt(offset, "bad trailer magic"));
        }

        let (body, stored) = raw.split_at(TRAILER_SIZE - 4);
        if verify {
            let mut hasher = Crc32::new();
            hasher.update(body);
            if hasher.finalize().to_le_bytes() != stored {
                warn!(offset, "trailer checksum mismatch");
                return Err(CellFileError::ChecksumMismatch { offset });
            }
        }

        let (trailer, _) = encoding::decode_from_slice::<Trailer>(body)?;
        Ok(trailer)
    }
}

// ------------------------------------------------------------------------------------------------
// File info
// ------------------------------------------------------------------------------------------------

/// Summary metadata written once per file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    /// Creation time, nanoseconds since the UNIX epoch.
    pub creation_timestamp: u64,
    pub cell_count: u64,
    pub data_block_count: u64,
    pub first_key: Option<CellKey>,
    pub last_key: Option<CellKey>,
    /// Average flat key length, rounded down.
    pub avg_key_len: u32,
    /// Average value length, rounded down.
    pub avg_value_len: u32,
    /// Largest encoded tag list of any cell.
    pub max_tags_len: u32,
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// An opened cell file.
///
/// Holds the root index, file info and bloom filter in memory. Everything
/// else is read through the block source. `CellFileReader` is `Send + Sync`;
/// share it behind an `Arc` to scan from several threads.
pub struct CellFileReader {
    source: Arc<dyn BlockSource>,
    cache: Option<Arc<CachedBlockSource<Arc<dyn BlockSource>>>>,
    trailer: Trailer,
    index: BlockIndexReader,
    codec: Arc<dyn BlockCodec>,
    encoding: DataBlockEncoding,
    file_info: FileInfo,
    bloom: Option<Bloom<[u8]>>,
    config: ReaderConfig,
}

impl CellFileReader {
    /// Opens a memory-mapped cell file.
    pub fn open(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self, CellFileError> {
        let path = path.as_ref();
        let source = MmapBlockSource::open(path)?;
        let trailer = Trailer::read_from(&source, config.verify_checksums)?;
        info!(
            path = %path.display(),
            bytes = source.len(),
            "opening cell file"
        );
        Self::open_index(trailer, Arc::new(source), config)
    }

    /// Opens a cell file held in memory.
    pub fn open_bytes(bytes: impl Into<Arc<[u8]>>, config: ReaderConfig) -> Result<Self, CellFileError> {
        let source = MemoryBlockSource::new(bytes);
        let trailer = Trailer::read_from(&source, config.verify_checksums)?;
        Self::open_index(trailer, Arc::new(source), config)
    }

    /// Opens a file from an already-read trailer and an arbitrary source.
    ///
    /// # Errors
    ///
    /// - [`CellFileError::UnsupportedVersion`] for an unknown format version.
    /// - [`CellFileError::ComparatorMismatch`] when the file was written with
    ///   a different comparator than `config.comparator`.
    /// - [`CellFileError::UnsupportedEncoding`] for unknown or unimplemented
    ///   data block encodings.
    /// - [`CellFileError::CorruptBlock`] / [`CellFileError::ChecksumMismatch`]
    ///   when the root index, file info or bloom block is damaged.
    pub fn open_index(
        trailer: Trailer,
        source: Arc<dyn BlockSource>,
        config: ReaderConfig,
    ) -> Result<Self, CellFileError> {
        if trailer.version != FORMAT_VERSION {
            return Err(CellFileError::UnsupportedVersion(trailer.version));
        }

        match Comparator::from_id(trailer.comparator_id) {
            Some(found) if found == config.comparator => {}
            found => {
                return Err(CellFileError::ComparatorMismatch {
                    expected: config.comparator.name().to_string(),
                    found: found.map_or_else(
                        || format!("unknown id {}", trailer.comparator_id),
                        |c| c.name().to_string(),
                    ),
                });
            }
        }

        let encoding = DataBlockEncoding::from_id(trailer.encoding_id)
            .ok_or(CellFileError::UnsupportedEncoding(trailer.encoding_id))?;
        let codec = encoding
            .codec()
            .map_err(|_| CellFileError::UnsupportedEncoding(trailer.encoding_id))?;

        if trailer.index_levels == 0 || trailer.index_levels > MAX_INDEX_LEVELS {
            return Err(CellFileError::corrupt(
                trailer.root_index.offset,
                format!("invalid index level count {}", trailer.index_levels),
            ));
        }

        let (source, cache) = if config.cache_capacity_bytes > 0 {
            let cache = Arc::new(CachedBlockSource::new(source, config.cache_capacity_bytes));
            (Arc::clone(&cache) as Arc<dyn BlockSource>, Some(cache))
        } else {
            (source, None)
        };

        let verify = config.verify_checksums;
        let root_payload = read_block(&*source, trailer.root_index, BlockType::RootIndex, verify)?;
        let root = IndexBlock::decode(&root_payload, config.comparator, trailer.root_index.offset)?;
        if root.len() != trailer.root_entry_count as usize {
            return Err(CellFileError::corrupt(
                trailer.root_index.offset,
                format!(
                    "root holds {} entries, trailer declares {}",
                    root.len(),
                    trailer.root_entry_count
                ),
            ));
        }
        if root.is_empty() != (trailer.data_block_count == 0) {
            return Err(CellFileError::corrupt(
                trailer.root_index.offset,
                format!(
                    "root of {} entries for {} data blocks",
                    root.len(),
                    trailer.data_block_count
                ),
            ));
        }

        let info_payload = read_block(&*source, trailer.file_info, BlockType::FileInfo, verify)?;
        let (file_info, _) = encoding::decode_from_slice::<FileInfo>(&info_payload)?;

        let bloom = if trailer.bloom.is_empty() {
            None
        } else {
            let payload = read_block(&*source, trailer.bloom, BlockType::Bloom, verify)?;
            let bloom = Bloom::from_slice(&payload)
                .map_err(|e| CellFileError::corrupt(trailer.bloom.offset, e.to_string()))?;
            Some(bloom)
        };

        let index = BlockIndexReader::new(
            Arc::new(root),
            trailer.index_levels,
            config.comparator,
            Arc::clone(&source),
            verify,
        );

        info!(
            levels = trailer.index_levels,
            data_blocks = trailer.data_block_count,
            cells = trailer.cell_count,
            encoding = %encoding,
            comparator = config.comparator.name(),
            cache_bytes = config.cache_capacity_bytes,
            "opened cell file"
        );

        Ok(Self {
            source,
            cache,
            trailer,
            index,
            codec,
            encoding,
            file_info,
            bloom,
            config,
        })
    }

    /// Creates an unpositioned scanner borrowing this reader.
    ///
    /// Use [`Scanner::new`] with an `Arc<CellFileReader>` for a scanner that
    /// owns its reader.
    pub fn new_scanner(&self) -> Scanner<&Self> {
        Scanner::new(self)
    }

    /// Fetches and decodes the data block behind `entry`.
    pub fn read_data_block(
        &self,
        entry: &BlockIndexEntry,
    ) -> Result<Arc<dyn DecodedBlock>, CellFileError> {
        let payload = read_block(
            &*self.source,
            entry.handle(),
            BlockType::Data,
            self.config.verify_checksums,
        )?;
        self.codec.decode(payload).map_err(|e| {
            warn!(offset = entry.offset, error = %e, "data block failed to decode");
            CellFileError::corrupt(entry.offset, e.to_string())
        })
    }

    /// Whether any cell of `row` might be stored in this file.
    ///
    /// `false` is definite. Always `true` when the file has no bloom filter.
    pub fn might_contain_row(&self, row: &[u8]) -> bool {
        self.bloom.as_ref().is_none_or(|bloom| bloom.check(row))
    }

    pub fn file_info(&self) -> &FileInfo {
        &self.file_info
    }

    pub fn first_key(&self) -> Option<&CellKey> {
        self.file_info.first_key.as_ref()
    }

    pub fn last_key(&self) -> Option<&CellKey> {
        self.file_info.last_key.as_ref()
    }

    pub fn index(&self) -> &BlockIndexReader {
        &self.index
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn comparator(&self) -> Comparator {
        self.config.comparator
    }

    pub fn encoding(&self) -> DataBlockEncoding {
        self.encoding
    }

    pub fn has_bloom_filter(&self) -> bool {
        self.bloom.is_some()
    }

    /// Block cache counters, when a cache was configured.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }
}

impl fmt::Debug for CellFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellFileReader")
            .field("trailer", &self.trailer)
            .field("encoding", &self.encoding)
            .field("comparator", &self.config.comparator)
            .field("bloom", &self.bloom.is_some())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
