//! Little-endian binary codec with one-byte type tags.
//!
//! Every value is prefixed by a tag byte naming its type, so a reader that
//! drifts out of sync fails fast with [`EcsError::BadTag`] instead of
//! reinterpreting bytes. Multi-byte integers are little-endian; `bytes`
//! values carry a `u32` length between the tag and the payload.

use crate::entity::Entity;
use crate::error::EcsError;

const TAG_U8: u8 = 0x01;
const TAG_U16: u8 = 0x02;
const TAG_U32: u8 = 0x03;
const TAG_U64: u8 = 0x04;
const TAG_I8: u8 = 0x05;
const TAG_I16: u8 = 0x06;
const TAG_I32: u8 = 0x07;
const TAG_I64: u8 = 0x08;
const TAG_F32: u8 = 0x09;
const TAG_F64: u8 = 0x0A;
const TAG_BOOL: u8 = 0x0B;
const TAG_BYTES: u8 = 0x0C;

macro_rules! writer_put {
    ($(#[$doc:meta] $fn:ident, $ty:ty, $tag:ident;)*) => {
        $(
            #[$doc]
            pub fn $fn(&mut self, value: $ty) {
                self.buf.push($tag);
                self.buf.extend_from_slice(&value.to_le_bytes());
            }
        )*
    };
}

macro_rules! reader_read {
    ($(#[$doc:meta] $fn:ident, $ty:ty, $tag:ident;)*) => {
        $(
            #[$doc]
            pub fn $fn(&mut self) -> Result<$ty, EcsError> {
                self.expect_tag($tag)?;
                let raw = self.take(std::mem::size_of::<$ty>())?;
                Ok(<$ty>::from_le_bytes(raw.try_into().expect("length checked")))
            }
        )*
    };
}

/// Appends tagged values to a growable buffer.
#[derive(Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    writer_put! {
        /// Writes a tagged `u8`.
        put_u8, u8, TAG_U8;
        /// Writes a tagged `u16`.
        put_u16, u16, TAG_U16;
        /// Writes a tagged `u32`.
        put_u32, u32, TAG_U32;
        /// Writes a tagged `u64`.
        put_u64, u64, TAG_U64;
        /// Writes a tagged `i8`.
        put_i8, i8, TAG_I8;
        /// Writes a tagged `i16`.
        put_i16, i16, TAG_I16;
        /// Writes a tagged `i32`.
        put_i32, i32, TAG_I32;
        /// Writes a tagged `i64`.
        put_i64, i64, TAG_I64;
        /// Writes a tagged `f32`.
        put_f32, f32, TAG_F32;
        /// Writes a tagged `f64`.
        put_f64, f64, TAG_F64;
    }

    /// Writes a tagged `bool` as one byte.
    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(TAG_BOOL);
        self.buf.push(u8::from(value));
    }

    /// Writes a tagged, length-prefixed byte string.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.push(TAG_BYTES);
        self.buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(bytes);
    }

    /// Writes an entity handle as its tagged packed `u64`.
    pub fn put_entity(&mut self, e: Entity) {
        self.put_u64(e.to_bits());
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, returning the buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads tagged values back out of a byte slice.
pub struct BinaryReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    /// Creates a reader over `buf`, positioned at the start.
    pub fn new(buf: &'a [u8]) -> Self {
        BinaryReader { buf, pos: 0 }
    }

    reader_read! {
        /// Reads a tagged `u8`.
        read_u8, u8, TAG_U8;
        /// Reads a tagged `u16`.
        read_u16, u16, TAG_U16;
        /// Reads a tagged `u32`.
        read_u32, u32, TAG_U32;
        /// Reads a tagged `u64`.
        read_u64, u64, TAG_U64;
        /// Reads a tagged `i8`.
        read_i8, i8, TAG_I8;
        /// Reads a tagged `i16`.
        read_i16, i16, TAG_I16;
        /// Reads a tagged `i32`.
        read_i32, i32, TAG_I32;
        /// Reads a tagged `i64`.
        read_i64, i64, TAG_I64;
        /// Reads a tagged `f32`.
        read_f32, f32, TAG_F32;
        /// Reads a tagged `f64`.
        read_f64, f64, TAG_F64;
    }

    /// Reads a tagged `bool`.
    pub fn read_bool(&mut self) -> Result<bool, EcsError> {
        self.expect_tag(TAG_BOOL)?;
        Ok(self.take(1)?[0] != 0)
    }

    /// Reads a tagged, length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], EcsError> {
        self.expect_tag(TAG_BYTES)?;
        let raw = self.take(4)?;
        let len = u32::from_le_bytes(raw.try_into().expect("length checked")) as usize;
        self.take(len)
    }

    /// Reads an entity handle from its tagged packed `u64`.
    pub fn read_entity(&mut self) -> Result<Entity, EcsError> {
        Ok(Entity::from_bits(self.read_u64()?))
    }

    /// Returns `true` if every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn expect_tag(&mut self, expected: u8) -> Result<(), EcsError> {
        let found = self.take(1)?[0];
        if found == expected {
            Ok(())
        } else {
            Err(EcsError::BadTag { expected, found })
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], EcsError> {
        let end = self.pos.checked_add(count).ok_or(EcsError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(EcsError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars() {
        let mut w = BinaryWriter::new();
        w.put_u32(0xDEAD_BEEF);
        w.put_f32(1.5);
        w.put_i64(-42);
        w.put_bool(true);
        w.put_bytes(b"blob");

        let buf = w.into_inner();
        let mut r = BinaryReader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_i64().unwrap(), -42);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_bytes().unwrap(), b"blob");
        assert!(r.is_at_end());
    }

    #[test]
    fn rejects_wrong_tag() {
        let mut w = BinaryWriter::new();
        w.put_u32(7);
        let buf = w.into_inner();
        let mut r = BinaryReader::new(&buf);
        assert!(matches!(
            r.read_u64(),
            Err(EcsError::BadTag { found: 0x03, .. })
        ));
    }

    #[test]
    fn reports_truncation() {
        let mut w = BinaryWriter::new();
        w.put_u64(7);
        let buf = w.into_inner();
        let mut r = BinaryReader::new(&buf[..5]);
        assert_eq!(r.read_u64(), Err(EcsError::Truncated));
    }
}
