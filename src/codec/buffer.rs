//! Wire primitives: growable writer and bounds-checked reader.
//!
//! Integers are big-endian. Varints are unsigned LEB128 limited to 32 bits.
//! Byte strings and UTF-8 strings carry a varint length prefix.

use crate::core::{DecodeError, MAX_VARINT_LEN};

/// Growable buffer used by codecs to write packet fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with capacity hint.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer and return the bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a boolean as `0x00`/`0x01`.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    /// Write a big-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `i64`.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian `f64`.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write an unsigned LEB128 varint (1 to 5 bytes).
    pub fn write_varint(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a varint length followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Write a varint length followed by UTF-8 bytes.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }
}

impl From<PacketWriter> for Vec<u8> {
    fn from(writer: PacketWriter) -> Self {
        writer.buf
    }
}

/// Number of bytes [`PacketWriter::write_varint`] uses for `value`.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => MAX_VARINT_LEN,
    }
}

/// Bounds-checked cursor over a received frame.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Check if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fail with [`DecodeError::TrailingBytes`] if anything is left.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof {
                needed: len - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a boolean; only `0x00` and `0x01` are accepted.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    /// Read a big-endian `f64`.
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    /// Read a non-negative big-endian `i32` length or count.
    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| DecodeError::NegativeLength(len))
    }

    /// Read an unsigned LEB128 varint of at most 32 bits.
    pub fn read_varint(&mut self) -> Result<u32, DecodeError> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let bits = (byte & 0x7F) as u32;
            // The fifth byte may only carry the top four bits.
            if i == MAX_VARINT_LEN - 1 && bits > 0x0F {
                return Err(DecodeError::VarIntTooLong);
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarIntTooLong)
    }

    /// Read exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    /// Read everything left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Read varint-length-prefixed bytes.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varint()? as usize;
        self.take(len)
    }

    /// Read a varint-length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<&'a str, DecodeError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Read a varint-length-prefixed UTF-8 string into an owned `String`.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_str().map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_varint_known_values() {
        let cases: [(u32, &[u8]); 5] = [
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (u32::MAX, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];
        for (value, bytes) in cases {
            let mut w = PacketWriter::new();
            w.write_varint(value);
            assert_eq!(w.as_slice(), bytes, "encoding {value}");
            assert_eq!(varint_len(value), bytes.len());
            assert_eq!(PacketReader::new(bytes).read_varint().unwrap(), value);
        }
    }

    #[test]
    fn test_varint_too_long() {
        // Six continuation bytes.
        let data = [0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(
            PacketReader::new(&data).read_varint(),
            Err(DecodeError::VarIntTooLong)
        );

        // Fifth byte overflows 32 bits.
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x1F];
        assert_eq!(
            PacketReader::new(&data).read_varint(),
            Err(DecodeError::VarIntTooLong)
        );
    }

    #[test]
    fn test_truncated_reads() {
        let mut r = PacketReader::new(&[0x00, 0x01]);
        assert_eq!(
            r.read_i32(),
            Err(DecodeError::UnexpectedEof { needed: 2 })
        );

        let mut r = PacketReader::new(&[0x80]);
        assert!(matches!(
            r.read_varint(),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_bool_strict() {
        assert_eq!(PacketReader::new(&[1]).read_bool(), Ok(true));
        assert_eq!(PacketReader::new(&[0]).read_bool(), Ok(false));
        assert_eq!(
            PacketReader::new(&[2]).read_bool(),
            Err(DecodeError::InvalidBool(2))
        );
    }

    #[test]
    fn test_string_and_len() {
        let mut w = PacketWriter::new();
        w.write_str("héllo");
        w.write_i32(-3);
        let bytes = w.into_inner();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_str().unwrap(), "héllo");
        assert_eq!(r.read_len(), Err(DecodeError::NegativeLength(-3)));
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut w = PacketWriter::new();
        w.write_bytes(&[0xC3, 0x28]);
        let bytes = w.into_inner();
        assert_eq!(
            PacketReader::new(&bytes).read_str(),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn test_finish_trailing() {
        let mut r = PacketReader::new(&[1, 2, 3]);
        r.read_u8().unwrap();
        assert_eq!(r.finish(), Err(DecodeError::TrailingBytes(2)));
        assert_eq!(r.read_rest(), &[2, 3]);
        assert!(r.is_empty());
    }

    proptest! {
        #[test]
        fn prop_varint_roundtrip(value in any::<u32>()) {
            let mut w = PacketWriter::new();
            w.write_varint(value);
            prop_assert_eq!(w.len(), varint_len(value));
            let bytes = w.into_inner();
            let mut r = PacketReader::new(&bytes);
            prop_assert_eq!(r.read_varint().unwrap(), value);
            prop_assert!(r.is_empty());
        }

        #[test]
        fn prop_mixed_fields_roundtrip(
            a in any::<i32>(),
            b in any::<u64>(),
            flag in any::<bool>(),
            text in ".{0,64}",
            blob in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut w = PacketWriter::new();
            w.write_i32(a);
            w.write_u64(b);
            w.write_bool(flag);
            w.write_str(&text);
            w.write_bytes(&blob);
            let bytes = w.into_inner();

            let mut r = PacketReader::new(&bytes);
            prop_assert_eq!(r.read_i32().unwrap(), a);
            prop_assert_eq!(r.read_u64().unwrap(), b);
            prop_assert_eq!(r.read_bool().unwrap(), flag);
            prop_assert_eq!(r.read_str().unwrap(), text.as_str());
            prop_assert_eq!(r.read_bytes().unwrap(), blob.as_slice());
            prop_assert!(r.finish().is_ok());
        }
    }
}
