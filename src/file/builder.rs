//! Cell file writer — builds a complete cell file from sorted cells.
//!
//! [`CellFileWriter`] accepts cells one at a time in strictly increasing
//! comparator order and writes, in file order:
//!
//! 1. Data blocks, each cut once its buffered cells reach `block_size`.
//! 2. Index levels, bottom-up, `index_block_entries` entries per block,
//!    until the remaining entries fit in one root block.
//! 3. The root index block.
//! 4. An optional row bloom filter, sized from `expected_rows` and filled
//!    as cells arrive.
//! 5. The file info block.
//! 6. The fixed-size trailer.
//!
//! # Atomicity
//!
//! [`write_file`] writes to `path.tmp`, syncs, then renames into place, so a
//! crash never leaves a partially written file under the final name.

use std::cmp::Ordering;
use std::fs::{OpenOptions, remove_file, rename};
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bloomfilter::Bloom;
use tracing::{debug, info, warn};

use super::index::{BlockIndexEntry, IndexBlock};
use super::{BlockHandle, BlockType, FORMAT_VERSION, FileInfo, Trailer, frame_block};
use crate::cell::{Cell, CellKey, CellType, tags_encoded_len};
use crate::codec::BlockCodec;
use crate::encoding::{self, len_to_u32};
use crate::{CellFileError, WriterConfig};

/// Per-cell framing counted against `block_size` on top of key, value and tags.
const CELL_ENTRY_OVERHEAD: usize = 4 + 4 + 2;

// ------------------------------------------------------------------------------------------------
// BuildStats — accumulates file info during construction
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
struct BuildStats {
    cell_count: u64,
    key_bytes: u64,
    value_bytes: u64,
    max_tags_len: u32,
    first_key: Option<CellKey>,
    /// Distinct rows seen so far.
    row_count: u64,
}

impl BuildStats {
    fn track(&mut self, cell: &Cell, tags_len: usize, new_row: bool) {
        self.cell_count += 1;
        self.key_bytes += cell.key_ref().encoded_len() as u64;
        self.value_bytes += cell.value().len() as u64;
        self.max_tags_len = self.max_tags_len.max(tags_len as u32);
        if self.first_key.is_none() {
            self.first_key = Some(cell.key().clone());
        }
        if new_row {
            self.row_count += 1;
        }
    }

    fn into_file_info(self, data_block_count: u64, last_key: Option<CellKey>) -> FileInfo {
        let average = |total: u64| {
            total
                .checked_div(self.cell_count)
                .map_or(0, |avg| u32::try_from(avg).unwrap_or(u32::MAX))
        };
        FileInfo {
            creation_timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64),
            cell_count: self.cell_count,
            data_block_count,
            first_key: self.first_key,
            last_key,
            avg_key_len: average(self.key_bytes),
            avg_value_len: average(self.value_bytes),
            max_tags_len: self.max_tags_len,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// CellFileWriter — public entry point
// ------------------------------------------------------------------------------------------------

/// Streams sorted cells into a cell file.
///
/// Block offsets are absolute positions in `W`, so `W` should start at the
/// beginning of the file.
///
/// # Example
///
/// ```rust
/// use cellfile::{Cell, CellFileReader, CellFileWriter, ReaderConfig, WriterConfig};
///
/// let mut writer = CellFileWriter::in_memory(WriterConfig::default()).unwrap();
/// writer.append(Cell::put("row", "cf", "q", 1, "value")).unwrap();
/// let bytes = writer.finish_to_vec().unwrap();
///
/// let reader = CellFileReader::open_bytes(bytes, ReaderConfig::default()).unwrap();
/// assert_eq!(reader.file_info().cell_count, 1);
/// ```
pub struct CellFileWriter<W: Write + Seek> {
    writer: W,
    position: u64,
    config: WriterConfig,
    codec: Arc<dyn BlockCodec>,
    pending: Vec<Cell>,
    pending_bytes: usize,
    /// One entry per written data block.
    data_index: Vec<BlockIndexEntry>,
    last_key: Option<CellKey>,
    /// Row filter, filled as rows arrive. `None` when disabled.
    bloom: Option<Bloom<[u8]>>,
    stats: BuildStats,
}

impl<W: Write + Seek> CellFileWriter<W> {
    /// Creates a writer over `writer`.
    ///
    /// # Errors
    ///
    /// - [`CellFileError::InvalidConfig`] for out-of-range parameters.
    /// - [`CellFileError::UnsupportedEncoding`] for `PrefixTree`.
    pub fn new(mut writer: W, config: WriterConfig) -> Result<Self, CellFileError> {
        config.validate()?;
        let codec = config
            .encoding
            .codec()
            .map_err(|_| CellFileError::UnsupportedEncoding(config.encoding.id()))?;
        let bloom = if config.bloom_filter {
            let bloom: Bloom<[u8]> =
                Bloom::new_for_fp_rate(config.expected_rows, config.bloom_false_positive_rate)
                    .map_err(|e| CellFileError::Internal(e.to_string()))?;
            Some(bloom)
        } else {
            None
        };
        let position = writer.stream_position()?;
        Ok(Self {
            writer,
            position,
            config,
            codec,
            pending: Vec::new(),
            pending_bytes: 0,
            data_index: Vec::new(),
            last_key: None,
            bloom,
            stats: BuildStats::default(),
        })
    }

    /// Number of cells appended so far.
    pub fn cell_count(&self) -> u64 {
        self.stats.cell_count
    }

    /// Appends the next cell.
    ///
    /// # Errors
    ///
    /// - [`CellFileError::OutOfOrder`] unless `cell` sorts strictly after the
    ///   previous cell.
    /// - [`CellFileError::InvalidCell`] for synthetic key types or fields
    ///   too long for the flat key layout.
    pub fn append(&mut self, cell: Cell) -> Result<(), CellFileError> {
        let tags_len = check_storable(&cell)?;
        if let Some(previous) = &self.last_key {
            let order = self
                .config
                .comparator
                .compare(&previous.key_ref(), &cell.key_ref());
            if order != Ordering::Less {
                return Err(CellFileError::OutOfOrder {
                    previous: previous.to_string(),
                    current: cell.key().to_string(),
                });
            }
        }

        let new_row = self
            .last_key
            .as_ref()
            .is_none_or(|previous| previous.row.as_slice() != cell.row());
        if let Some(bloom) = self.bloom.as_mut().filter(|_| new_row) {
            bloom.set(cell.row());
        }
        self.stats.track(&cell, tags_len, new_row);
        self.last_key = Some(cell.key().clone());
        self.pending_bytes +=
            cell.key_ref().encoded_len() + cell.value().len() + tags_len + CELL_ENTRY_OVERHEAD;
        self.pending.push(cell);

        if self.pending_bytes >= self.config.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Writes the index, bloom filter, file info and trailer.
    ///
    /// Returns the underlying writer (flushed) and the trailer written.
    pub fn finish(mut self) -> Result<(W, Trailer), CellFileError> {
        self.flush_data_block()?;

        let data_block_count = self.data_index.len() as u64;
        let first_data_block_offset = self.data_index.first().map_or(0, |e| e.offset);
        let last_data_block_offset = self.data_index.last().map_or(0, |e| e.offset);

        let data_index = std::mem::take(&mut self.data_index);
        let (root_entries, index_levels) = self.write_index_levels(data_index)?;
        let root_index =
            self.write_block(BlockType::RootIndex, &IndexBlock::encode(&root_entries)?)?;

        let bloom = self.write_bloom()?;

        let stats = std::mem::take(&mut self.stats);
        let cell_count = stats.cell_count;
        let file_info = stats.into_file_info(data_block_count, self.last_key.take());
        let file_info =
            self.write_block(BlockType::FileInfo, &encoding::encode_to_vec(&file_info)?)?;

        let trailer = Trailer {
            version: FORMAT_VERSION,
            file_info,
            bloom,
            root_index,
            index_levels,
            data_block_count,
            root_entry_count: len_to_u32(root_entries.len())?,
            cell_count,
            first_data_block_offset,
            last_data_block_offset,
            encoding_id: self.config.encoding.id(),
            comparator_id: self.config.comparator.id(),
        };
        let trailer_bytes = trailer.to_bytes()?;
        self.writer.write_all(&trailer_bytes)?;
        self.writer.flush()?;
        self.position += trailer_bytes.len() as u64;

        info!(
            cells = cell_count,
            data_blocks = data_block_count,
            levels = index_levels,
            encoding = %self.config.encoding,
            bytes = self.position,
            "finished cell file"
        );
        Ok((self.writer, trailer))
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn write_block(
        &mut self,
        block_type: BlockType,
        payload: &[u8],
    ) -> Result<BlockHandle, CellFileError> {
        let framed = frame_block(block_type, payload)?;
        let handle = BlockHandle {
            offset: self.position,
            size: len_to_u32(framed.len())?,
        };
        self.writer.write_all(&framed)?;
        self.position += framed.len() as u64;
        Ok(handle)
    }

    fn flush_data_block(&mut self) -> Result<(), CellFileError> {
        let Some(first) = self.pending.first() else {
            return Ok(());
        };
        let first_key = first.key().clone();
        let payload = self
            .codec
            .encode(&self.pending)
            .map_err(|e| CellFileError::Internal(format!("encoding data block: {e}")))?;
        let handle = self.write_block(BlockType::Data, &payload)?;

        debug!(
            offset = handle.offset,
            size = handle.size,
            cells = self.pending.len(),
            first_key = %first_key,
            "flushed data block"
        );
        self.data_index.push(BlockIndexEntry {
            first_key,
            offset: handle.offset,
            on_disk_size: handle.size,
        });
        self.pending.clear();
        self.pending_bytes = 0;
        Ok(())
    }

    /// Writes non-root index levels until at most `index_block_entries`
    /// entries remain. Returns the root entries and the level count
    /// including the root.
    fn write_index_levels(
        &mut self,
        mut level: Vec<BlockIndexEntry>,
    ) -> Result<(Vec<BlockIndexEntry>, u32), CellFileError> {
        let fan_out = self.config.index_block_entries;
        let mut levels = 1;
        let mut block_type = BlockType::LeafIndex;

        while level.len() > fan_out {
            let mut parent = Vec::with_capacity(level.len().div_ceil(fan_out));
            for chunk in level.chunks(fan_out) {
                let handle = self.write_block(block_type, &IndexBlock::encode(chunk)?)?;
                parent.push(BlockIndexEntry {
                    first_key: chunk[0].first_key.clone(),
                    offset: handle.offset,
                    on_disk_size: handle.size,
                });
            }
            debug!(
                level = levels,
                block_type = %block_type,
                blocks = parent.len(),
                "wrote index level"
            );
            level = parent;
            levels += 1;
            block_type = BlockType::IntermediateIndex;
        }
        Ok((level, levels))
    }

    fn write_bloom(&mut self) -> Result<BlockHandle, CellFileError> {
        let Some(bloom) = self.bloom.take() else {
            return Ok(BlockHandle::default());
        };
        if self.stats.row_count == 0 {
            return Ok(BlockHandle::default());
        }
        if self.stats.row_count > self.config.expected_rows as u64 {
            debug!(
                rows = self.stats.row_count,
                expected = self.config.expected_rows,
                "bloom filter holds more rows than it was sized for"
            );
        }
        self.write_block(BlockType::Bloom, bloom.as_slice())
    }
}

impl CellFileWriter<Cursor<Vec<u8>>> {
    /// Creates a writer that builds the file in memory.
    pub fn in_memory(config: WriterConfig) -> Result<Self, CellFileError> {
        Self::new(Cursor::new(Vec::new()), config)
    }

    /// Finishes the file and returns its bytes.
    pub fn finish_to_vec(self) -> Result<Vec<u8>, CellFileError> {
        let (cursor, _) = self.finish()?;
        Ok(cursor.into_inner())
    }
}

/// Rejects cells the flat key layout cannot hold. Returns the encoded tag
/// length.
fn check_storable(cell: &Cell) -> Result<usize, CellFileError> {
    if matches!(cell.cell_type(), CellType::Minimum | CellType::Maximum) {
        return Err(CellFileError::InvalidCell(format!(
            "{} has a seek-only type",
            cell.key()
        )));
    }
    let too_long = |what: &str, len: usize, max: usize| {
        CellFileError::InvalidCell(format!("{what} of {len} bytes exceeds {max}"))
    };
    if cell.row().len() > u16::MAX as usize {
        return Err(too_long("row", cell.row().len(), u16::MAX as usize));
    }
    if cell.family().len() > u8::MAX as usize {
        return Err(too_long("family", cell.family().len(), u8::MAX as usize));
    }
    if cell.qualifier().len() > u16::MAX as usize {
        return Err(too_long("qualifier", cell.qualifier().len(), u16::MAX as usize));
    }
    let tags_len = tags_encoded_len(cell.tags());
    if tags_len > u16::MAX as usize {
        return Err(too_long("tag list", tags_len, u16::MAX as usize));
    }
    Ok(tags_len)
}

// ------------------------------------------------------------------------------------------------
// File helper
// ------------------------------------------------------------------------------------------------

/// Writes `cells` (already sorted) to a new cell file at `path`.
///
/// 1. Write everything to `path.tmp`.
/// 2. Flush and sync the file.
/// 3. Rename `path.tmp` → `path`.
///
/// On error the temporary file is removed and `path` is left untouched.
pub fn write_file(
    path: impl AsRef<Path>,
    cells: impl IntoIterator<Item = Cell>,
    config: WriterConfig,
) -> Result<Trailer, CellFileError> {
    let final_path = path.as_ref();
    let tmp_path = final_path.with_extension("tmp");

    let trailer = match write_tmp(&tmp_path, cells, config) {
        Ok(trailer) => trailer,
        Err(e) => {
            if let Err(cleanup) = remove_file(&tmp_path) {
                warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temporary file");
            }
            return Err(e);
        }
    };

    rename(&tmp_path, final_path)?;
    info!(path = %final_path.display(), "cell file written");
    Ok(trailer)
}

fn write_tmp(
    tmp_path: &Path,
    cells: impl IntoIterator<Item = Cell>,
    config: WriterConfig,
) -> Result<Trailer, CellFileError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_path)?;

    let mut writer = CellFileWriter::new(BufWriter::new(file), config)?;
    for cell in cells {
        writer.append(cell)?;
    }
    let (buffered, trailer) = writer.finish()?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(trailer)
}

impl<W: Write + Seek> std::fmt::Debug for CellFileWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellFileWriter")
            .field("position", &self.position)
            .field("encoding", &self.config.encoding)
            .field("cells", &self.stats.cell_count)
            .field("data_blocks", &self.data_index.len())
            .finish_non_exhaustive()
    }
}
