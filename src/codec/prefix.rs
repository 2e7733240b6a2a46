//! Front-coded data blocks (`Prefix` and `Diff`).
//!
//! Both encodings store each key as "bytes shared with the previous key" plus
//! the unshared suffix. Every [`RESTART_INTERVAL`] cells a restart point
//! stores the key in full, so a seek binary-searches the restart points and
//! then decodes forward through at most one interval. Sequential reads decode
//! one entry per step from the previous key.
//!
//! ```text
//! [entry]*[u32 restart offset]×r[u32 interval][u32 r][u32 cell_count]
//!
//! Prefix entry = [varint shared][varint unshared][varint value_len][varint tags_len]
//!                [unshared key bytes][value][tags]
//!
//! Diff entry   = [u8 flags][varint shared][varint unshared][varint value_len][varint tags_len]
//!                [unshared column bytes][varint zigzag(ts - prev_ts)][u8 type]?
//!                [value][tags]
//! ```
//!
//! `Prefix` front-codes the whole flat key. `Diff` front-codes only the
//! row/family/qualifier portion, stores the timestamp as a delta from the
//! previous cell (from 0 at a restart), and omits the type byte when the
//! `SAME_TYPE` flag is set.

use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use super::{
    BlockCodec, BlockSeek, CodecError, DataBlockEncoding, DecodedBlock, RESTART_INTERVAL,
    SeekMode, check_position, partition_point, split_trailing_table, split_trailing_u32,
};
use crate::cell::{Cell, CellKey, Comparator, KeyRef, decode_tags, encode_tags, tags_encoded_len};
use crate::encoding::{
    Encode, Reader, encode_varint, len_to_u32, zigzag_decode, zigzag_encode,
};

/// Trailing `[u64 timestamp][u8 type]` of a flat key.
const TIMESTAMP_TYPE_LEN: usize = 9;

const FLAG_SAME_TYPE: u8 = 0x01;

/// Codec for [`DataBlockEncoding::Prefix`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixCodec;

/// Codec for [`DataBlockEncoding::Diff`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffCodec;

impl BlockCodec for PrefixCodec {
    fn encoding(&self) -> DataBlockEncoding {
        DataBlockEncoding::Prefix
    }

    fn encode(&self, cells: &[Cell]) -> Result<Vec<u8>, CodecError> {
        encode_front_coded(cells, Scheme::Prefix)
    }

    fn decode(&self, payload: Arc<[u8]>) -> Result<Arc<dyn DecodedBlock>, CodecError> {
        Ok(Arc::new(FrontCodedBlock::new(payload, Scheme::Prefix)?))
    }
}

impl BlockCodec for DiffCodec {
    fn encoding(&self) -> DataBlockEncoding {
        DataBlockEncoding::Diff
    }

    fn encode(&self, cells: &[Cell]) -> Result<Vec<u8>, CodecError> {
        encode_front_coded(cells, Scheme::Diff)
    }

    fn decode(&self, payload: Arc<[u8]>) -> Result<Arc<dyn DecodedBlock>, CodecError> {
        Ok(Arc::new(FrontCodedBlock::new(payload, Scheme::Diff)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Prefix,
    Diff,
}

impl Scheme {
    /// The part of a flat key that is front-coded.
    fn shared_part(self, flat: &[u8]) -> &[u8] {
        match self {
            Self::Prefix => flat,
            Self::Diff => &flat[..flat.len().saturating_sub(TIMESTAMP_TYPE_LEN)],
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// ------------------------------------------------------------------------------------------------
// Encoder
// ------------------------------------------------------------------------------------------------

fn encode_front_coded(cells: &[Cell], scheme: Scheme) -> Result<Vec<u8>, CodecError> {
    if cells.is_empty() {
        return Err(CodecError::EmptyBlock);
    }

    let mut buf = Vec::new();
    let mut restarts = Vec::with_capacity(cells.len().div_ceil(RESTART_INTERVAL));
    let mut prev_flat = Vec::new();
    let mut flat = Vec::new();
    let mut prev_ts = 0u64;
    let mut prev_type: Option<u8> = None;

    for (i, cell) in cells.iter().enumerate() {
        if i % RESTART_INTERVAL == 0 {
            restarts.push(len_to_u32(buf.len())?);
            prev_flat.clear();
            prev_ts = 0;
            prev_type = None;
        }

        flat.clear();
        cell.key_ref().encode_flat(&mut flat)?;
        let part = scheme.shared_part(&flat);
        let shared = common_prefix_len(scheme.shared_part(&prev_flat), part);
        let type_code = cell.cell_type().code();
        let same_type = prev_type == Some(type_code);

        if scheme == Scheme::Diff {
            buf.push(if same_type { FLAG_SAME_TYPE } else { 0 });
        }
        encode_varint(shared as u64, &mut buf);
        encode_varint((part.len() - shared) as u64, &mut buf);
        encode_varint(cell.value().len() as u64, &mut buf);
        encode_varint(tags_encoded_len(cell.tags()) as u64, &mut buf);
        buf.extend_from_slice(&part[shared..]);
        if scheme == Scheme::Diff {
            let delta = cell.timestamp().wrapping_sub(prev_ts) as i64;
            encode_varint(zigzag_encode(delta), &mut buf);
            if !same_type {
                buf.push(type_code);
            }
        }
        buf.extend_from_slice(cell.value());
        encode_tags(cell.tags(), &mut buf)?;

        prev_ts = cell.timestamp();
        prev_type = Some(type_code);
        std::mem::swap(&mut prev_flat, &mut flat);
    }

    for offset in &restarts {
        offset.encode_to(&mut buf)?;
    }
    len_to_u32(RESTART_INTERVAL)?.encode_to(&mut buf)?;
    len_to_u32(restarts.len())?.encode_to(&mut buf)?;
    len_to_u32(cells.len())?.encode_to(&mut buf)?;
    Ok(buf)
}

// ------------------------------------------------------------------------------------------------
// Decoded view
// ------------------------------------------------------------------------------------------------

/// Key state carried from one entry to the next while decoding forward.
#[derive(Debug, Default)]
struct DecodeState {
    flat: Vec<u8>,
    timestamp: u64,
    cell_type: Option<u8>,
}

impl DecodeState {
    fn reset(&mut self) {
        self.flat.clear();
        self.timestamp = 0;
        self.cell_type = None;
    }

    fn key(&self) -> Result<KeyRef<'_>, CodecError> {
        Ok(KeyRef::decode_flat_exact(&self.flat)?)
    }
}

/// Byte ranges of one decoded entry's payload.
struct EntrySpan {
    value: Range<usize>,
    tags: Range<usize>,
    next: usize,
}

#[derive(Debug)]
struct FrontCodedBlock {
    data: Arc<[u8]>,
    scheme: Scheme,
    restarts: Vec<u32>,
    interval: usize,
    cell_count: usize,
    entries_end: usize,
    /// Start of every entry, filled once the framing has been validated.
    offsets: Vec<usize>,
}

impl FrontCodedBlock {
    fn new(data: Arc<[u8]>, scheme: Scheme) -> Result<Self, CodecError> {
        let (entries_end, restarts, interval, cell_count) = {
            let (body, cell_count) = split_trailing_u32(&data, "cell count")?;
            let (body, restart_count) = split_trailing_u32(body, "restart count")?;
            let (body, interval) = split_trailing_u32(body, "restart interval")?;
            let (entries, restarts) =
                split_trailing_table(body, restart_count as usize, "restart")?;
            (
                entries.len(),
                restarts,
                interval as usize,
                cell_count as usize,
            )
        };

        if cell_count == 0 {
            return Err(CodecError::EmptyBlock);
        }
        if interval == 0 {
            return Err(CodecError::Malformed("restart interval is zero".to_string()));
        }
        if restarts.len() != cell_count.div_ceil(interval) {
            return Err(CodecError::Malformed(format!(
                "{} restart points for {cell_count} cells at interval {interval}",
                restarts.len()
            )));
        }

        let mut block = Self {
            data,
            scheme,
            restarts,
            interval,
            cell_count,
            entries_end,
            offsets: Vec::new(),
        };
        block.offsets = block.validate()?;
        Ok(block)
    }

    /// Walks every entry once so that later accesses cannot hit bad framing.
    /// Returns where each entry starts.
    fn validate(&self) -> Result<Vec<usize>, CodecError> {
        let mut state = DecodeState::default();
        let mut offsets = Vec::with_capacity(self.cell_count);
        let mut offset = 0usize;
        for position in 0..self.cell_count {
            let at_restart = position % self.interval == 0;
            if at_restart && self.restarts[position / self.interval] as usize != offset {
                return Err(CodecError::Malformed(format!(
                    "restart {} points at {} but entry {position} starts at {offset}",
                    position / self.interval,
                    self.restarts[position / self.interval]
                )));
            }
            offsets.push(offset);
            let span = self.read_entry(offset, &mut state, at_restart)?;
            state.key()?;
            decode_tags(&self.data[span.tags.clone()])?;
            offset = span.next;
        }
        if offset != self.entries_end {
            return Err(CodecError::Malformed(format!(
                "entries end at {offset}, restart table starts at {}",
                self.entries_end
            )));
        }
        Ok(offsets)
    }

    /// Decodes the entry at `offset`, updating `state` to hold its key.
    fn read_entry(
        &self,
        offset: usize,
        state: &mut DecodeState,
        at_restart: bool,
    ) -> Result<EntrySpan, CodecError> {
        if at_restart {
            state.reset();
        }
        let region = self.data.get(offset..self.entries_end).ok_or_else(|| {
            CodecError::Malformed(format!("entry offset {offset} past {}", self.entries_end))
        })?;
        let mut reader = Reader::new(region);

        let flags = match self.scheme {
            Scheme::Prefix => 0,
            Scheme::Diff => reader.read::<u8>()?,
        };
        if flags & !FLAG_SAME_TYPE != 0 {
            return Err(CodecError::Malformed(format!("unknown entry flags 0x{flags:02X}")));
        }
        let shared = varint_len(&mut reader)?;
        let unshared = varint_len(&mut reader)?;
        let value_len = varint_len(&mut reader)?;
        let tags_len = varint_len(&mut reader)?;

        let available = self.scheme.shared_part(&state.flat).len();
        if shared > available || (at_restart && shared != 0) {
            return Err(CodecError::Malformed(format!(
                "entry at {offset} shares {shared} bytes with a {available}-byte predecessor"
            )));
        }
        state.flat.truncate(shared);
        state.flat.extend_from_slice(reader.take(unshared)?);

        if self.scheme == Scheme::Diff {
            let delta = zigzag_decode(reader.read_varint()?);
            let timestamp = state.timestamp.wrapping_add(delta as u64);
            let cell_type = if flags & FLAG_SAME_TYPE != 0 {
                state.cell_type.ok_or_else(|| {
                    CodecError::Malformed(format!("entry at {offset} elides type at a restart"))
                })?
            } else {
                reader.read::<u8>()?
            };
            state.flat.extend_from_slice(&timestamp.to_le_bytes());
            state.flat.push(cell_type);
            state.timestamp = timestamp;
            state.cell_type = Some(cell_type);
        }

        let value_start = offset + reader.position();
        reader.take(value_len)?;
        let tags_start = offset + reader.position();
        reader.take(tags_len)?;
        let next = offset + reader.position();

        Ok(EntrySpan {
            value: value_start..tags_start,
            tags: tags_start..next,
            next,
        })
    }

    /// Decodes forward from the governing restart point up to `position`.
    fn entry_at(&self, position: usize, state: &mut DecodeState) -> Result<EntrySpan, CodecError> {
        check_position(position, self.cell_count)?;
        let restart = position / self.interval;
        let mut offset = self.restarts[restart] as usize;
        let mut span = self.read_entry(offset, state, true)?;
        for _ in restart * self.interval..position {
            offset = span.next;
            span = self.read_entry(offset, state, false)?;
        }
        Ok(span)
    }
}

fn varint_len(reader: &mut Reader<'_>) -> Result<usize, CodecError> {
    let value = reader.read_varint()?;
    usize::try_from(value)
        .map_err(|_| CodecError::Malformed(format!("length {value} does not fit in usize")))
}

impl DecodedBlock for FrontCodedBlock {
    fn cell_count(&self) -> usize {
        self.cell_count
    }

    fn seek(
        &self,
        comparator: Comparator,
        key: &KeyRef<'_>,
        mode: SeekMode,
    ) -> Result<BlockSeek, CodecError> {
        let mut state = DecodeState::default();
        let p = partition_point(self.restarts.len(), |r| {
            self.read_entry(self.restarts[r] as usize, &mut state, true)?;
            Ok(mode.accepts(comparator.compare(&state.key()?, key)))
        })?;
        if p == 0 {
            return Ok(BlockSeek::BeforeStart);
        }

        let mut position = (p - 1) * self.interval;
        let mut next = self
            .read_entry(self.restarts[p - 1] as usize, &mut state, true)?
            .next;
        let mut ord = comparator.compare(&state.key()?, key);

        // The next restart already failed the mode, so stay inside this interval.
        let end = (position + self.interval).min(self.cell_count);
        while position + 1 < end {
            let span = self.read_entry(next, &mut state, false)?;
            let next_ord = comparator.compare(&state.key()?, key);
            if !mode.accepts(next_ord) {
                break;
            }
            position += 1;
            next = span.next;
            ord = next_ord;
        }

        Ok(BlockSeek::Found {
            position,
            exact: mode == SeekMode::Floor && ord == Ordering::Equal,
        })
    }

    fn cell_at(&self, position: usize) -> Result<Cell, CodecError> {
        let mut state = DecodeState::default();
        let span = self.entry_at(position, &mut state)?;
        Ok(Cell::new(
            state.key()?.to_owned_key(),
            &self.data[span.value],
            decode_tags(&self.data[span.tags])?,
        ))
    }

    fn key_at(&self, position: usize) -> Result<CellKey, CodecError> {
        let mut state = DecodeState::default();
        self.entry_at(position, &mut state)?;
        Ok(state.key()?.to_owned_key())
    }

    fn cell_after(&self, position: usize, previous: &CellKey) -> Result<Cell, CodecError> {
        let next = position + 1;
        check_position(next, self.cell_count)?;
        let at_restart = next % self.interval == 0;

        let mut state = DecodeState::default();
        if !at_restart {
            previous.key_ref().encode_flat(&mut state.flat)?;
            state.timestamp = previous.timestamp;
            state.cell_type = Some(previous.cell_type.code());
        }
        let span = self.read_entry(self.offsets[next], &mut state, at_restart)?;
        Ok(Cell::new(
            state.key()?.to_owned_key(),
            &self.data[span.value],
            decode_tags(&self.data[span.tags])?,
        ))
    }

    fn payload_len(&self) -> usize {
        self.data.len()
    }
}
