//! Field-tagged binary serialization.
//!
//! Every object is a sequence of `(field id: u16 LE, value)` pairs closed by the
//! terminator field id `0xFFFF`. Unsigned integers are LEB128 varints, signed integers
//! are zig-zag free SLEB128 varints, strings and blobs are a varint length followed by
//! the raw bytes, lists are a varint count followed by their elements.

pub const MESSAGE_TERMINATOR_FIELD_ID: u16 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    UnexpectedEof,
    UnexpectedField { expected: u16, found: u16 },
    VarintOverflow,
    InvalidBool(u8),
    InvalidUtf8,
    InvalidTypeId(u8),
    InvalidTokenKind(u8),
    ValueTypeMismatch {
        logical_type: String,
        value: &'static str,
    },
    ValueOutOfRange {
        logical_type: String,
    },
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    LengthTooLarge(&'static str, usize),
    TrailingBytes,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "unexpected end of input"),
            WireError::UnexpectedField { expected, found } => {
                write!(f, "unexpected field id {found}, expected {expected}")
            }
            WireError::VarintOverflow => write!(f, "varint overflows 64 bits"),
            WireError::InvalidBool(value) => write!(f, "invalid bool value: {value}"),
            WireError::InvalidUtf8 => write!(f, "invalid utf-8 string"),
            WireError::InvalidTypeId(id) => write!(f, "invalid logical type id: {id}"),
            WireError::InvalidTokenKind(code) => write!(f, "invalid token kind: {code}"),
            WireError::ValueTypeMismatch {
                logical_type,
                value,
            } => write!(f, "cannot store {value} value in {logical_type} column"),
            WireError::ValueOutOfRange { logical_type } => {
                write!(f, "value out of range for {logical_type} column")
            }
            WireError::LengthMismatch {
                field,
                expected,
                found,
            } => write!(f, "{field} has {found} entries, expected {expected}"),
            WireError::LengthTooLarge(field, len) => {
                write!(f, "{field} length too large: {len}")
            }
            WireError::TrailingBytes => write!(f, "trailing bytes after envelope"),
        }
    }
}

impl std::error::Error for WireError {}

#[derive(Default)]
pub struct BinaryWriter {
    out: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    pub fn field(&mut self, id: u16) -> &mut Self {
        self.out.extend_from_slice(&id.to_le_bytes());
        self
    }

    pub fn end_object(&mut self) -> &mut Self {
        self.field(MESSAGE_TERMINATOR_FIELD_ID)
    }

    pub fn write_varint(&mut self, mut value: u64) -> &mut Self {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.out.push(byte);
                break;
            }
            self.out.push(byte | 0x80);
        }
        self
    }

    pub fn write_signed_varint(&mut self, mut value: i64) -> &mut Self {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                self.out.push(byte);
                break;
            }
            self.out.push(byte | 0x80);
        }
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.out.push(u8::from(value));
        self
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.write_varint(value.len() as u64);
        self.out.extend_from_slice(value);
        self
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_bytes(value.as_bytes())
    }

    pub fn write_list_len(&mut self, len: usize) -> &mut Self {
        self.write_varint(len as u64)
    }
}

pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn expect_field(&mut self, expected: u16) -> Result<(), WireError> {
        let found = self.read_field_id()?;
        if found != expected {
            return Err(WireError::UnexpectedField { expected, found });
        }
        Ok(())
    }

    /// Consumes `id` if it is the next field, leaving the cursor untouched otherwise.
    pub fn optional_field(&mut self, id: u16) -> Result<bool, WireError> {
        let saved = self.offset;
        let found = self.read_field_id()?;
        if found == id {
            return Ok(true);
        }
        self.offset = saved;
        Ok(false)
    }

    pub fn expect_end_object(&mut self) -> Result<(), WireError> {
        self.expect_field(MESSAGE_TERMINATOR_FIELD_ID)
    }

    pub fn expect_eof(&self) -> Result<(), WireError> {
        if self.offset == self.bytes.len() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes)
        }
    }

    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 || (shift == 63 && byte & 0x7e != 0) {
                return Err(WireError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    pub fn read_signed_varint(&mut self) -> Result<i64, WireError> {
        let mut value = 0i64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(WireError::VarintOverflow);
            }
            value |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return Ok(value);
            }
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_len("bytes")?;
        self.read_exact(len)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn read_list_len(&mut self) -> Result<usize, WireError> {
        self.read_len("list")
    }

    fn read_len(&mut self, field: &'static str) -> Result<usize, WireError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::LengthTooLarge(field, usize::MAX))?;
        // a length can never exceed the bytes left, which also bounds list allocations
        if len > self.remaining() {
            return Err(WireError::UnexpectedEof);
        }
        Ok(len)
    }

    fn read_field_id(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_exact(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        let value = self
            .bytes
            .get(self.offset)
            .ok_or(WireError::UnexpectedEof)?;
        self.offset += 1;
        Ok(*value)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(WireError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varints_use_minimal_encoding() {
        let mut writer = BinaryWriter::new();
        writer.write_varint(0).write_varint(127).write_varint(128);
        assert_eq!(writer.finish(), vec![0x00, 0x7f, 0x80, 0x01]);
    }

    #[test]
    fn signed_varints_keep_sign() {
        let mut writer = BinaryWriter::new();
        writer
            .write_signed_varint(-1)
            .write_signed_varint(63)
            .write_signed_varint(64)
            .write_signed_varint(i64::MIN);
        let bytes = writer.finish();
        assert_eq!(&bytes[..4], &[0x7f, 0x3f, 0xc0, 0x00]);

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_signed_varint(), Ok(-1));
        assert_eq!(reader.read_signed_varint(), Ok(63));
        assert_eq!(reader.read_signed_varint(), Ok(64));
        assert_eq!(reader.read_signed_varint(), Ok(i64::MIN));
        reader.expect_eof().expect("all bytes should be consumed");
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xffu8; 11];
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_varint(), Err(WireError::VarintOverflow));
    }

    #[test]
    fn optional_field_does_not_consume_other_ids() {
        let mut writer = BinaryWriter::new();
        writer.field(102).end_object();
        let bytes = writer.finish();

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.optional_field(101), Ok(false));
        assert_eq!(reader.optional_field(102), Ok(true));
        reader.expect_end_object().expect("terminator should follow");
    }

    #[test]
    fn length_beyond_input_is_eof() {
        let mut writer = BinaryWriter::new();
        writer.write_varint(1_000);
        let bytes = writer.finish();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_string(), Err(WireError::UnexpectedEof));
    }
}
