//! Record model — cells, keys, and the key ordering.
//!
//! A [`Cell`] is the unit stored in a cell file: a key made of
//! `(row, family, qualifier, timestamp, type)` plus a value and an optional
//! list of [`Tag`]s. Only the key takes part in ordering.
//!
//! # Ordering
//!
//! [`Comparator`] defines the total order every block, index level, and
//! scanner relies on:
//!
//! 1. `row` — ascending (byte-lexicographic, or catalog order for
//!    [`Comparator::Meta`])
//! 2. `family` — ascending
//! 3. `qualifier` — ascending
//! 4. `timestamp` — **descending** (newest first)
//! 5. `type` — **descending** by numeric code
//!
//! # Flat key layout
//!
//! Keys are serialized into blocks and index entries in a self-delimiting
//! flat form:
//!
//! ```text
//! [u16 row_len][row][u8 family_len][family][u16 qualifier_len][qualifier][u64 timestamp][u8 type]
//! ```
//!
//! Tags are serialized as repeated `[u8 type][u16 value_len][value]`.


use std::cmp::Ordering;
use std::fmt;

use crate::encoding::{Encode, EncodingError, Reader};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Timestamp that sorts before every real version of a column.
pub const LATEST_TIMESTAMP: u64 = u64::MAX;

/// Fixed overhead of a flat key on top of its variable-length parts.
pub const FLAT_KEY_OVERHEAD: usize = 2 + 1 + 2 + 8 + 1;

// ------------------------------------------------------------------------------------------------
// Cell type
// ------------------------------------------------------------------------------------------------

/// Kind of mutation a cell records.
///
/// `Minimum` and `Maximum` never appear in files; they exist to build
/// synthetic seek keys that sort after or before every real cell of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellType {
    Minimum = 0,
    Put = 4,
    Delete = 8,
    DeleteFamilyVersion = 10,
    DeleteColumn = 12,
    DeleteFamily = 14,
    Maximum = 255,
}

impl CellType {
    /// On-disk numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parses an on-disk numeric code.
    pub fn from_code(code: u8) -> Result<Self, EncodingError> {
        Ok(match code {
            0 => Self::Minimum,
            4 => Self::Put,
            8 => Self::Delete,
            10 => Self::DeleteFamilyVersion,
            12 => Self::DeleteColumn,
            14 => Self::DeleteFamily,
            255 => Self::Maximum,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: u32::from(other),
                    type_name: "CellType",
                });
            }
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Tags
// ------------------------------------------------------------------------------------------------

/// Opaque per-cell metadata carried alongside the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    /// Application-defined tag type.
    pub tag_type: u8,

    /// Tag payload.
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(tag_type: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag_type,
            value: value.into(),
        }
    }
}

/// Number of bytes [`encode_tags`] produces for `tags`.
pub fn tags_encoded_len(tags: &[Tag]) -> usize {
    tags.iter().map(|t| 3 + t.value.len()).sum()
}

/// Appends `tags` as repeated `[u8 type][u16 len][value]`.
pub fn encode_tags(tags: &[Tag], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    for tag in tags {
        let len = u16::try_from(tag.value.len()).map_err(|_| {
            EncodingError::LengthOverflow(format!(
                "tag value length {} exceeds u16::MAX",
                tag.value.len()
            ))
        })?;
        tag.tag_type.encode_to(buf)?;
        len.encode_to(buf)?;
        buf.extend_from_slice(&tag.value);
    }
    Ok(())
}

/// Decodes a tag region produced by [`encode_tags`]. The region must be
/// consumed exactly.
pub fn decode_tags(buf: &[u8]) -> Result<Vec<Tag>, EncodingError> {
    let mut reader = Reader::new(buf);
    let mut tags = Vec::new();
    while reader.remaining() > 0 {
        let tag_type: u8 = reader.read()?;
        let len: u16 = reader.read()?;
        let value = reader.take(len as usize)?.to_vec();
        tags.push(Tag { tag_type, value });
    }
    Ok(tags)
}

// ------------------------------------------------------------------------------------------------
// Keys
// ------------------------------------------------------------------------------------------------

/// Borrowed view of a cell key.
///
/// All searches (index descent, in-block seeks) run on `KeyRef`s so that
/// keys decoded straight out of block bytes are compared without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRef<'a> {
    pub row: &'a [u8],
    pub family: &'a [u8],
    pub qualifier: &'a [u8],
    pub timestamp: u64,
    pub cell_type: CellType,
}

impl<'a> KeyRef<'a> {
    /// Copies the borrowed parts into an owned [`CellKey`].
    pub fn to_owned_key(&self) -> CellKey {
        CellKey {
            row: self.row.to_vec(),
            family: self.family.to_vec(),
            qualifier: self.qualifier.to_vec(),
            timestamp: self.timestamp,
            cell_type: self.cell_type,
        }
    }

    /// Length of the flat serialization.
    pub fn encoded_len(&self) -> usize {
        FLAT_KEY_OVERHEAD + self.row.len() + self.family.len() + self.qualifier.len()
    }

    /// Appends the flat serialization of this key to `buf`.
    pub fn encode_flat(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let row_len = u16::try_from(self.row.len()).map_err(|_| {
            EncodingError::LengthOverflow(format!("row length {} exceeds u16::MAX", self.row.len()))
        })?;
        let family_len = u8::try_from(self.family.len()).map_err(|_| {
            EncodingError::LengthOverflow(format!(
                "family length {} exceeds u8::MAX",
                self.family.len()
            ))
        })?;
        let qualifier_len = u16::try_from(self.qualifier.len()).map_err(|_| {
            EncodingError::LengthOverflow(format!(
                "qualifier length {} exceeds u16::MAX",
                self.qualifier.len()
            ))
        })?;

        row_len.encode_to(buf)?;
        buf.extend_from_slice(self.row);
        family_len.encode_to(buf)?;
        buf.extend_from_slice(self.family);
        qualifier_len.encode_to(buf)?;
        buf.extend_from_slice(self.qualifier);
        self.timestamp.encode_to(buf)?;
        self.cell_type.code().encode_to(buf)?;
        Ok(())
    }

    /// Parses a flat key from the start of `buf`, borrowing its byte fields.
    ///
    /// Returns `(key, bytes_consumed)`.
    pub fn decode_flat(buf: &'a [u8]) -> Result<(Self, usize), EncodingError> {
        let mut reader = Reader::new(buf);
        let row_len: u16 = reader.read()?;
        let row = reader.take(row_len as usize)?;
        let family_len: u8 = reader.read()?;
        let family = reader.take(family_len as usize)?;
        let qualifier_len: u16 = reader.read()?;
        let qualifier = reader.take(qualifier_len as usize)?;
        let timestamp: u64 = reader.read()?;
        let cell_type = CellType::from_code(reader.read()?)?;
        Ok((
            Self {
                row,
                family,
                qualifier,
                timestamp,
                cell_type,
            },
            reader.position(),
        ))
    }

    /// Parses a flat key that must occupy all of `buf`.
    pub fn decode_flat_exact(buf: &'a [u8]) -> Result<Self, EncodingError> {
        let (key, used) = Self::decode_flat(buf)?;
        if used != buf.len() {
            return Err(EncodingError::LengthOverflow(format!(
                "flat key uses {used} of {} bytes",
                buf.len()
            )));
        }
        Ok(key)
    }
}

impl fmt::Display for KeyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}/",
            Printable(self.row),
            Printable(self.family),
            Printable(self.qualifier)
        )?;
        if self.timestamp == LATEST_TIMESTAMP {
            f.write_str("LATEST_TIMESTAMP")?;
        } else {
            write!(f, "{}", self.timestamp)?;
        }
        write!(f, "/{:?}", self.cell_type)
    }
}

/// Owned cell key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub timestamp: u64,
    pub cell_type: CellType,
}

impl CellKey {
    pub fn new(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        timestamp: u64,
        cell_type: CellType,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            cell_type,
        }
    }

    /// A key that sorts at or before every cell of `row`.
    pub fn first_on_row(row: impl Into<Vec<u8>>) -> Self {
        Self::new(row, Vec::new(), Vec::new(), LATEST_TIMESTAMP, CellType::Maximum)
    }

    /// A key that sorts after every cell of the given column.
    pub fn last_on_column(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(row, family, qualifier, 0, CellType::Minimum)
    }

    /// Borrowed view of this key.
    pub fn key_ref(&self) -> KeyRef<'_> {
        KeyRef {
            row: &self.row,
            family: &self.family,
            qualifier: &self.qualifier,
            timestamp: self.timestamp,
            cell_type: self.cell_type,
        }
    }

    /// Flat serialization of this key.
    pub fn to_flat(&self) -> Result<Vec<u8>, EncodingError> {
        let key = self.key_ref();
        let mut buf = Vec::with_capacity(key.encoded_len());
        key.encode_flat(&mut buf)?;
        Ok(buf)
    }

    /// Parses an owned key that occupies all of `buf`.
    pub fn from_flat(buf: &[u8]) -> Result<Self, EncodingError> {
        Ok(KeyRef::decode_flat_exact(buf)?.to_owned_key())
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key_ref().fmt(f)
    }
}

// ------------------------------------------------------------------------------------------------
// Cell
// ------------------------------------------------------------------------------------------------

/// An immutable key/value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    key: CellKey,
    value: Vec<u8>,
    tags: Vec<Tag>,
}

impl Cell {
    pub fn new(key: CellKey, value: impl Into<Vec<u8>>, tags: Vec<Tag>) -> Self {
        Self {
            key,
            value: value.into(),
            tags,
        }
    }

    /// Builds an untagged `Put` cell.
    pub fn put(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        timestamp: u64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(
            CellKey::new(row, family, qualifier, timestamp, CellType::Put),
            value,
            Vec::new(),
        )
    }

    /// Replaces the tag list.
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn key(&self) -> &CellKey {
        &self.key
    }

    pub fn key_ref(&self) -> KeyRef<'_> {
        self.key.key_ref()
    }

    pub fn row(&self) -> &[u8] {
        &self.key.row
    }

    pub fn family(&self) -> &[u8] {
        &self.key.family
    }

    pub fn qualifier(&self) -> &[u8] {
        &self.key.qualifier
    }

    pub fn timestamp(&self) -> u64 {
        self.key.timestamp
    }

    pub fn cell_type(&self) -> CellType {
        self.key.cell_type
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Splits the cell into its parts.
    pub fn into_parts(self) -> (CellKey, Vec<u8>, Vec<Tag>) {
        (self.key, self.value, self.tags)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/vlen={}", self.key, self.value.len())
    }
}

// ------------------------------------------------------------------------------------------------
// Comparator
// ------------------------------------------------------------------------------------------------

/// Total order over cell keys.
///
/// The comparator a file was written with is recorded in its trailer by
/// [`Comparator::id`]; readers must open the file with the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Comparator {
    /// Byte-lexicographic rows.
    #[default]
    Cell,

    /// Catalog rows shaped `table,startkey,id`: ordered by table, then start
    /// key, then id, so that `,` inside a segment does not break ordering.
    Meta,
}

impl Comparator {
    pub fn id(self) -> u8 {
        match self {
            Self::Cell => 1,
            Self::Meta => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Cell),
            2 => Some(Self::Meta),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::Meta => "meta",
        }
    }

    /// Orders two rows.
    pub fn compare_rows(self, left: &[u8], right: &[u8]) -> Ordering {
        match self {
            Self::Cell => left.cmp(right),
            Self::Meta => compare_meta_rows(left, right),
        }
    }

    /// Orders two keys. Values and tags never take part.
    pub fn compare(self, left: &KeyRef<'_>, right: &KeyRef<'_>) -> Ordering {
        self.compare_rows(left.row, right.row)
            .then_with(|| left.family.cmp(right.family))
            .then_with(|| left.qualifier.cmp(right.qualifier))
            .then_with(|| right.timestamp.cmp(&left.timestamp))
            .then_with(|| right.cell_type.code().cmp(&left.cell_type.code()))
    }

    /// Orders two cells by key.
    pub fn compare_cells(self, left: &Cell, right: &Cell) -> Ordering {
        self.compare(&left.key_ref(), &right.key_ref())
    }
}

fn split_first(row: &[u8]) -> (&[u8], Option<&[u8]>) {
    match row.iter().position(|&b| b == b',') {
        Some(i) => (&row[..i], Some(&row[i + 1..])),
        None => (row, None),
    }
}

fn split_last(row: &[u8]) -> (&[u8], Option<&[u8]>) {
    match row.iter().rposition(|&b| b == b',') {
        Some(i) => (&row[..i], Some(&row[i + 1..])),
        None => (row, None),
    }
}

fn compare_meta_rows(left: &[u8], right: &[u8]) -> Ordering {
    let (left_table, left_rest) = split_first(left);
    let (right_table, right_rest) = split_first(right);
    left_table
        .cmp(right_table)
        .then_with(|| match (left_rest, right_rest) {
            (Some(l), Some(r)) => {
                let (l_start, l_id) = split_last(l);
                let (r_start, r_id) = split_last(r);
                l_start.cmp(r_start).then_with(|| l_id.cmp(&r_id))
            }
            (l, r) => l.cmp(&r),
        })
}

// ------------------------------------------------------------------------------------------------
// Display helpers
// ------------------------------------------------------------------------------------------------

/// Renders bytes with printable ASCII kept as-is and everything else
/// escaped as `\xNN`. Long inputs are truncated.
pub(crate) struct Printable<'a>(pub(crate) &'a [u8]);

impl fmt::Display for Printable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const LIMIT: usize = 64;
        let shown = &self.0[..self.0.len().min(LIMIT)];
        for &byte in shown {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02X}")?;
            }
        }
        if self.0.len() > LIMIT {
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
