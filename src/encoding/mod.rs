//! Byte-level building blocks of the cell file format.
//!
//! Fixed-layout metadata (trailer, block handles, index entries, file info)
//! goes through the [`Encode`] / [`Decode`] pair. The front-coded block
//! encodings use the LEB128 and zigzag helpers and walk their payloads with
//! a [`Reader`].
//!
//! # Field layouts
//!
//! | Rust type     | On disk                                      |
//! |---------------|----------------------------------------------|
//! | `u8`          | 1 byte                                       |
//! | `u16` / `u32` / `u64` | 2 / 4 / 8 bytes, little-endian       |
//! | `[u8; N]`     | `N` bytes as-is (magics)                     |
//! | `Vec<u8>`     | `[u32 len][bytes]`                           |
//! | `Option<T>`   | `[u8 0]` or `[u8 1][T]`                      |
//! | `[T]` via [`encode_vec`] | `[u32 n][T]×n`                    |
//! | varint        | unsigned LEB128, at most 10 bytes            |
//!
//! Decoders never panic on short or hostile input. Length and count fields
//! are capped ([`MAX_BYTE_LEN`], [`MAX_VEC_ELEMENTS`]) before anything is
//! allocated.

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Limits
// ------------------------------------------------------------------------------------------------

/// Largest `Vec<u8>` a decoder accepts (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

/// Largest element count [`decode_vec`] accepts.
pub const MAX_VEC_ELEMENTS: u32 = 16 * 1024 * 1024;

/// A `u64` never needs more LEB128 bytes than this.
pub const MAX_VARINT_LEN: usize = 10;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Failure to read or write a field.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// Input ended in the middle of a field.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof { needed: usize, available: usize },

    /// A discriminant or magic did not match any known value.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag { tag: u32, type_name: &'static str },

    /// Varint longer than [`MAX_VARINT_LEN`] or wider than 64 bits.
    #[error("malformed varint")]
    InvalidVarint,

    /// A length or count does not fit its field or exceeds a decode limit.
    #[error("length overflow: {0}")]
    LengthOverflow(String),
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Appends a value's on-disk form to a buffer. Equal values always produce
/// equal bytes.
pub trait Encode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Reads a value from the front of a buffer, returning it together with
/// the number of bytes it occupied.
pub trait Decode: Sized {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Forward-only cursor that decodes fields one after another.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn read<T: Decode>(&mut self) -> Result<T, EncodingError> {
        let (value, n) = T::decode_from(self.rest())?;
        self.pos += n;
        Ok(value)
    }

    pub fn read_varint(&mut self) -> Result<u64, EncodingError> {
        let (value, n) = decode_varint(self.rest())?;
        self.pos += n;
        Ok(value)
    }

    /// Borrows the next `len` bytes without copying.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], EncodingError> {
        let rest: &'a [u8] = &self.buf[self.pos..];
        require(rest, len)?;
        self.pos += len;
        Ok(&rest[..len])
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

#[inline]
pub(crate) fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        return Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Narrows an in-memory length to a `u32` length field.
#[inline]
pub(crate) fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} does not fit in u32")))
}

#[inline]
fn array<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    buf.get(..N)
        .and_then(|head| <[u8; N]>::try_from(head).ok())
        .ok_or(EncodingError::UnexpectedEof {
            needed: N,
            available: buf.len(),
        })
}

// ------------------------------------------------------------------------------------------------
// Varints
// ------------------------------------------------------------------------------------------------

/// Appends `value` as unsigned LEB128.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Reads an unsigned LEB128 value, returning it and its length.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize), EncodingError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().copied().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(EncodingError::InvalidVarint);
        }
        let low = u64::from(byte & 0x7F);
        // The tenth byte may only carry the single top bit of a u64.
        if i == MAX_VARINT_LEN - 1 && low > 1 {
            return Err(EncodingError::InvalidVarint);
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(EncodingError::UnexpectedEof {
        needed: buf.len() + 1,
        available: buf.len(),
    })
}

/// Folds a signed delta into an unsigned value: 0, -1, 1, -2 … become
/// 0, 1, 2, 3 …
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

// ------------------------------------------------------------------------------------------------
// Integers and magics
// ------------------------------------------------------------------------------------------------

macro_rules! little_endian {
    ($($ty:ty),*) => {$(
        impl Encode for $ty {
            #[inline]
            fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                buf.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }
        }

        impl Decode for $ty {
            #[inline]
            fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                Ok((<$ty>::from_le_bytes(array::<WIDTH>(buf)?), WIDTH))
            }
        }
    )*};
}

little_endian!(u8, u16, u32, u64);

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((array::<N>(buf)?, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Length-prefixed bytes
// ------------------------------------------------------------------------------------------------

impl Encode for &[u8] {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Encode for Vec<u8> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_slice().encode_to(buf)
    }
}

impl Decode for Vec<u8> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut reader = Reader::new(buf);
        let len: u32 = reader.read()?;
        if len > MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "byte string of {len} bytes exceeds the {MAX_BYTE_LEN} byte limit"
            )));
        }
        let bytes = reader.take(len as usize)?.to_vec();
        Ok((bytes, reader.position()))
    }
}

// ------------------------------------------------------------------------------------------------
// Option<T>
// ------------------------------------------------------------------------------------------------

impl<T: Encode> Encode for Option<T> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let Some(value) = self else {
            buf.push(0);
            return Ok(());
        };
        buf.push(1);
        value.encode_to(buf)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, _) = u8::decode_from(buf)?;
        match tag {
            0 => Ok((None, 1)),
            1 => {
                let (value, n) = T::decode_from(&buf[1..])?;
                Ok((Some(value), 1 + n))
            }
            other => Err(EncodingError::InvalidTag {
                tag: u32::from(other),
                type_name: "Option",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Sequences
//
// Free functions rather than a `Vec<T>` impl, which would overlap with the
// byte-string impl of `Vec<u8>`.
// ------------------------------------------------------------------------------------------------

/// Writes `[u32 n]` followed by every item.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    len_to_u32(items.len())?.encode_to(buf)?;
    items.iter().try_for_each(|item| item.encode_to(buf))
}

/// Reads what [`encode_vec`] wrote. Counts above [`MAX_VEC_ELEMENTS`], or
/// larger than the remaining bytes, are rejected before allocating.
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let mut reader = Reader::new(buf);
    let count: u32 = reader.read()?;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!(
            "{count} elements exceed the {MAX_VEC_ELEMENTS} element limit"
        )));
    }
    let count = count as usize;
    // Every element takes at least one byte.
    require(&buf[reader.position()..], count)?;
    let items = (0..count)
        .map(|_| reader.read::<T>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((items, reader.position()))
}
