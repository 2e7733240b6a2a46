//! Unencoded data blocks.
//!
//! ```text
//! [entry 0][entry 1]...[entry n-1][u32 offset]×n[u32 n]
//!
//! entry = [u32 key_len][u32 value_len][u16 tags_len][flat key][value][tags]
//! ```
//!
//! The offset table gives random access to every entry, so seeks are a
//! plain binary search.

use std::cmp::Ordering;
use std::sync::Arc;

use super::{
    BlockCodec, BlockSeek, CodecError, DataBlockEncoding, DecodedBlock, SeekMode,
    check_position, partition_point, split_trailing_table, split_trailing_u32,
};
use crate::cell::{Cell, CellKey, Comparator, KeyRef, decode_tags, encode_tags, tags_encoded_len};
use crate::encoding::{Encode, EncodingError, Reader, len_to_u32};

const ENTRY_HEADER_LEN: usize = 4 + 4 + 2;

/// Codec for [`DataBlockEncoding::None`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl BlockCodec for RawCodec {
    fn encoding(&self) -> DataBlockEncoding {
        DataBlockEncoding::None
    }

    fn encode(&self, cells: &[Cell]) -> Result<Vec<u8>, CodecError> {
        if cells.is_empty() {
            return Err(CodecError::EmptyBlock);
        }
        let mut buf = Vec::new();
        let mut offsets = Vec::with_capacity(cells.len());

        for cell in cells {
            offsets.push(len_to_u32(buf.len())?);
            let key = cell.key_ref();
            let tags_len = u16::try_from(tags_encoded_len(cell.tags())).map_err(|_| {
                EncodingError::LengthOverflow("tags exceed u16::MAX bytes".to_string())
            })?;

            len_to_u32(key.encoded_len())?.encode_to(&mut buf)?;
            len_to_u32(cell.value().len())?.encode_to(&mut buf)?;
            tags_len.encode_to(&mut buf)?;
            key.encode_flat(&mut buf)?;
            buf.extend_from_slice(cell.value());
            encode_tags(cell.tags(), &mut buf)?;
        }

        for offset in &offsets {
            offset.encode_to(&mut buf)?;
        }
        len_to_u32(cells.len())?.encode_to(&mut buf)?;
        Ok(buf)
    }

    fn decode(&self, payload: Arc<[u8]>) -> Result<Arc<dyn DecodedBlock>, CodecError> {
        Ok(Arc::new(RawBlock::new(payload)?))
    }
}

// ------------------------------------------------------------------------------------------------
// Decoded view
// ------------------------------------------------------------------------------------------------

struct RawEntry<'a> {
    key: KeyRef<'a>,
    value: &'a [u8],
    tags: &'a [u8],
}

#[derive(Debug)]
pub(crate) struct RawBlock {
    data: Arc<[u8]>,
    offsets: Vec<u32>,
    entries_end: usize,
}

impl RawBlock {
    fn new(data: Arc<[u8]>) -> Result<Self, CodecError> {
        let (entries_end, offsets) = {
            let (body, count) = split_trailing_u32(&data, "cell count")?;
            if count == 0 {
                return Err(CodecError::EmptyBlock);
            }
            let (entries, offsets) = split_trailing_table(body, count as usize, "offset")?;
            (entries.len(), offsets)
        };

        if offsets.first() != Some(&0) {
            return Err(CodecError::Malformed(
                "first entry does not start at offset 0".to_string(),
            ));
        }
        for pair in offsets.windows(2) {
            if pair[1] as usize <= pair[0] as usize + ENTRY_HEADER_LEN {
                return Err(CodecError::Malformed(format!(
                    "offset table not increasing at {} -> {}",
                    pair[0], pair[1]
                )));
            }
        }

        let block = Self {
            data,
            offsets,
            entries_end,
        };
        for position in 0..block.offsets.len() {
            let entry = block.entry(position)?;
            decode_tags(entry.tags)?;
        }
        Ok(block)
    }

    fn entry(&self, position: usize) -> Result<RawEntry<'_>, CodecError> {
        check_position(position, self.offsets.len())?;
        let start = self.offsets[position] as usize;
        let end = self
            .offsets
            .get(position + 1)
            .map_or(self.entries_end, |&o| o as usize);
        if start > end || end > self.entries_end {
            return Err(CodecError::Malformed(format!(
                "entry {position} spans {start}..{end} outside {} entry bytes",
                self.entries_end
            )));
        }

        let mut reader = Reader::new(&self.data[start..end]);
        let key_len: u32 = reader.read()?;
        let value_len: u32 = reader.read()?;
        let tags_len: u16 = reader.read()?;
        let key = KeyRef::decode_flat_exact(reader.take(key_len as usize)?)?;
        let value = reader.take(value_len as usize)?;
        let tags = reader.take(tags_len as usize)?;
        if reader.remaining() != 0 {
            return Err(CodecError::Malformed(format!(
                "entry {position} has {} trailing bytes",
                reader.remaining()
            )));
        }
        Ok(RawEntry { key, value, tags })
    }
}

impl DecodedBlock for RawBlock {
    fn cell_count(&self) -> usize {
        self.offsets.len()
    }

    fn seek(
        &self,
        comparator: Comparator,
        key: &KeyRef<'_>,
        mode: SeekMode,
    ) -> Result<BlockSeek, CodecError> {
        let p = partition_point(self.offsets.len(), |i| {
            let entry = self.entry(i)?;
            Ok(mode.accepts(comparator.compare(&entry.key, key)))
        })?;
        if p == 0 {
            return Ok(BlockSeek::BeforeStart);
        }
        let position = p - 1;
        let exact = mode == SeekMode::Floor
            && comparator.compare(&self.entry(position)?.key, key) == Ordering::Equal;
        Ok(BlockSeek::Found { position, exact })
    }

    fn cell_at(&self, position: usize) -> Result<Cell, CodecError> {
        let entry = self.entry(position)?;
        Ok(Cell::new(
            entry.key.to_owned_key(),
            entry.value,
            decode_tags(entry.tags)?,
        ))
    }

    fn key_at(&self, position: usize) -> Result<CellKey, CodecError> {
        Ok(self.entry(position)?.key.to_owned_key())
    }

    fn payload_len(&self) -> usize {
        self.data.len()
    }
}
