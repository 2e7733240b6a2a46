//! Encode / Decode implementations for the cell file's metadata structures.
//!
//! The types themselves live in `super` (`src/file/mod.rs`) and
//! `super::index`.

use crate::cell::CellKey;
use crate::encoding::{self, Decode, EncodingError};

use super::index::BlockIndexEntry;
use super::{BlockHandle, FileInfo, TRAILER_MAGIC, Trailer};

// ------------------------------------------------------------------------------------------------
// BlockHandle
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.offset, buf)?;
        encoding::Encode::encode_to(&self.size, buf)?;
        Ok(())
    }
}

impl encoding::Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

// ------------------------------------------------------------------------------------------------
// CellKey: [u32 len][flat key]
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for CellKey {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.to_flat()?, buf)
    }
}

impl encoding::Decode for CellKey {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (flat, n) = <Vec<u8>>::decode_from(buf)?;
        Ok((CellKey::from_flat(&flat)?, n))
    }
}

// ------------------------------------------------------------------------------------------------
// BlockIndexEntry: [u64 offset][u32 on_disk_size][u32 key_len][flat key]
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for BlockIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.offset, buf)?;
        encoding::Encode::encode_to(&self.on_disk_size, buf)?;
        encoding::Encode::encode_to(&self.first_key, buf)?;
        Ok(())
    }
}

impl encoding::Decode for BlockIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (on_disk_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (first_key, n) = CellKey::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                first_key,
                offset,
                on_disk_size,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Trailer (without its trailing crc32)
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for Trailer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&TRAILER_MAGIC, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.file_info, buf)?;
        encoding::Encode::encode_to(&self.bloom, buf)?;
        encoding::Encode::encode_to(&self.root_index, buf)?;
        encoding::Encode::encode_to(&self.index_levels, buf)?;
        encoding::Encode::encode_to(&self.data_block_count, buf)?;
        encoding::Encode::encode_to(&self.root_entry_count, buf)?;
        encoding::Encode::encode_to(&self.cell_count, buf)?;
        encoding::Encode::encode_to(&self.first_data_block_offset, buf)?;
        encoding::Encode::encode_to(&self.last_data_block_offset, buf)?;
        encoding::Encode::encode_to(&self.encoding_id, buf)?;
        encoding::Encode::encode_to(&self.comparator_id, buf)?;
        Ok(())
    }
}

impl encoding::Decode for Trailer {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 8]>::decode_from(&buf[off..])?;
        off += n;
        if magic != TRAILER_MAGIC {
            return Err(EncodingError::InvalidTag {
                tag: u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]),
                type_name: "Trailer",
            });
        }
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (file_info, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (bloom, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (root_index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (index_levels, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (data_block_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (root_entry_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (cell_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (first_data_block_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (last_data_block_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (encoding_id, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (comparator_id, n) = u8::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                version,
                file_info,
                bloom,
                root_index,
                index_levels,
                data_block_count,
                root_entry_count,
                cell_count,
                first_data_block_offset,
                last_data_block_offset,
                encoding_id,
                comparator_id,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// FileInfo
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for FileInfo {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.creation_timestamp, buf)?;
        encoding::Encode::encode_to(&self.cell_count, buf)?;
        encoding::Encode::encode_to(&self.data_block_count, buf)?;
        encoding::Encode::encode_to(&self.first_key, buf)?;
        encoding::Encode::encode_to(&self.last_key, buf)?;
        encoding::Encode::encode_to(&self.avg_key_len, buf)?;
        encoding::Encode::encode_to(&self.avg_value_len, buf)?;
        encoding::Encode::encode_to(&self.max_tags_len, buf)?;
        Ok(())
    }
}

impl encoding::Decode for FileInfo {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (creation_timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (cell_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (data_block_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (first_key, n) = <Option<CellKey>>::decode_from(&buf[off..])?;
        off += n;
        let (last_key, n) = <Option<CellKey>>::decode_from(&buf[off..])?;
        off += n;
        let (avg_key_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (avg_value_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (max_tags_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                creation_timestamp,
                cell_count,
                data_block_count,
                first_key,
                last_key,
                avg_key_len,
                avg_value_len,
                max_tags_len,
            },
            off,
        ))
    }
}
