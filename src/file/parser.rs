//! Cursor over a single blob for signature and attribute decoding.
//!
//! [`crate::file::parser::Parser`] keeps a position inside a byte slice and offers bounds
//! checked reads for the primitives that appear in signature blobs: little-endian values,
//! compressed integers (ECMA-335 II.23.2), compressed `TypeDefOrRef` tokens and serialized
//! strings as used by custom attribute blobs (II.23.3).
//!
//! # Examples
//!
//! ```rust,ignore
//! use crate::file::parser::Parser;
//!
//! let blob = [0x06, 0x08];
//! let mut parser = Parser::new(&blob);
//! assert_eq!(parser.read_le::<u8>()?, 0x06);
//! assert_eq!(parser.read_compressed_uint()?, 0x08);
//! assert!(!parser.has_more_data());
//! # Ok::<(), crate::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::{tables::CodedIndexType, token::Token},
    Error::OutOfBounds,
    Result,
};

/// A position-tracking reader over a borrowed byte slice.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns true if there is at least one more byte to read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Returns the number of bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Returns the current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Returns the byte at the current position without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        match self.data.get(self.position) {
            Some(byte) => Ok(*byte),
            None => Err(OutOfBounds),
        }
    }

    /// Read a little-endian primitive and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data is left.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read `length` raw bytes and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data is left.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(length).ok_or(OutOfBounds)?;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a compressed unsigned integer (1, 2 or 4 bytes).
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated input, or
    /// [`crate::Error::Malformed`] if the leading byte has the invalid `111` prefix.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok(value);
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed signed integer.
    ///
    /// The sign lives in bit zero, the bias removed on negative values depends on the
    /// width of the encoded form.
    ///
    /// # Errors
    /// Same conditions as [`Parser::read_compressed_uint`].
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let first_byte = self.peek_byte()?;
        let unsigned = self.read_compressed_uint()?;

        #[allow(clippy::cast_possible_wrap)]
        let magnitude = (unsigned >> 1) as i32;
        if unsigned & 1 == 0 {
            return Ok(magnitude);
        }

        let bias = match first_byte & 0xC0 {
            0x00 | 0x40 => 0x40,
            0x80 => 0x2000,
            _ => 0x1000_0000,
        };

        Ok(magnitude - bias)
    }

    /// Read a compressed `TypeDefOrRefOrSpecEncoded` token (ECMA-335 II.23.2.8).
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedCodedIndex`] if the tag bits are invalid.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;
        CodedIndexType::TypeDefOrRef.decompress(compressed_token)
    }

    /// Read a `SerString`: `0xFF` for null, otherwise a compressed length followed by UTF-8.
    ///
    /// # Errors
    /// Returns an error on truncated input or invalid UTF-8.
    pub fn read_ser_string(&mut self) -> Result<Option<String>> {
        if self.peek_byte()? == 0xFF {
            self.position += 1;
            return Ok(None);
        }

        let length = self.read_compressed_uint()? as usize;
        let bytes = self.read_bytes(length)?;
        match std::str::from_utf8(bytes) {
            Ok(value) => Ok(Some(value.to_string())),
            Err(_) => Err(malformed_error!(
                "Invalid UTF-8 string at {} - {:?}",
                self.position,
                bytes
            )),
        }
    }

    /// Read all remaining bytes as a UTF-16LE string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for odd lengths or invalid UTF-16.
    pub fn read_utf16_to_end(&mut self) -> Result<String> {
        let remaining = self.remaining();
        if remaining % 2 != 0 {
            return Err(malformed_error!("Invalid UTF-16 length - {}", remaining));
        }

        let mut utf16_chars: Vec<u16> = Vec::with_capacity(remaining / 2);
        while self.has_more_data() {
            utf16_chars.push(self.read_le::<u16>()?);
        }

        match String::from_utf16(&utf16_chars) {
            Ok(s) => Ok(s),
            Err(_) => Err(malformed_error!(
                "Invalid UTF-16 str - {} - {:?}",
                self.position,
                utf16_chars
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::io::{write_compressed_int, write_compressed_uint}, Error};

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),                             // 1-byte format
            (vec![0x7F], 0x7F),                          // 1-byte format, max value
            (vec![0x80, 0x80], 0x80),                    // 2-byte format, min value
            (vec![0xBF, 0xFF], 0x3FFF),                  // 2-byte format, max value
            (vec![0xC0, 0x00, 0x40, 0x00], 0x4000),      // 4-byte format, min value
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF), // 4-byte format, max value
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            let result = parser.read_compressed_uint().unwrap();
            assert_eq!(result, expected);
            assert!(!parser.has_more_data());
        }
    }

    #[test]
    fn test_read_compressed_uint_invalid_prefix() {
        let data = [0xE0, 0x00, 0x00, 0x00];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_read_compressed_int() {
        let test_cases: Vec<(Vec<u8>, i32)> = vec![
            (vec![0x06], 3),
            (vec![0x7B], -3),
            (vec![0x80, 0x80], 64),
            (vec![0x01], -64),
            (vec![0xC0, 0x00, 0x40, 0x00], 8192),
            (vec![0x80, 0x01], -8192),
            (vec![0xDF, 0xFF, 0xFF, 0xFE], 268_435_455),
            (vec![0xC0, 0x00, 0x00, 0x01], -268_435_456),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_int().unwrap(), expected);
        }
    }

    #[test]
    fn test_compressed_int_round_trip_edges() {
        for value in [0, 1, -1, 63, -63, -65, 8191, -8191, -8193, 1_000_000, -1_000_000] {
            let mut out = Vec::new();
            write_compressed_int(&mut out, value).unwrap();
            let mut parser = Parser::new(&out);
            assert_eq!(parser.read_compressed_int().unwrap(), value);
        }
    }

    #[test]
    fn test_compressed_uint_minimal_width() {
        for (value, width) in [(0x7F_u32, 1), (0x80, 2), (0x3FFF, 2), (0x4000, 4)] {
            let mut out = Vec::new();
            write_compressed_uint(&mut out, value).unwrap();
            assert_eq!(out.len(), width);
            assert_eq!(Parser::new(&out).read_compressed_uint().unwrap(), value);
        }
    }

    #[test]
    fn test_read_compressed_token() {
        // TypeRef row 0x12, tag 1
        let data = [0x49];
        let mut parser = Parser::new(&data);
        let token = parser.read_compressed_token().unwrap();
        assert_eq!(token.value(), 0x0100_0012);

        let invalid = [0x03];
        assert!(matches!(
            Parser::new(&invalid).read_compressed_token(),
            Err(Error::UnsupportedCodedIndex { .. })
        ));
    }

    #[test]
    fn test_ser_string() {
        let data = [0xFF, 0x03, b'a', b'b', b'c', 0x00];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_ser_string().unwrap(), None);
        assert_eq!(parser.read_ser_string().unwrap(), Some("abc".to_string()));
        assert_eq!(parser.read_ser_string().unwrap(), Some(String::new()));
    }

    #[test]
    fn test_error_handling() {
        let data = [0x80];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds)
        ));

        let mut parser = Parser::new(&data);
        assert!(parser.read_bytes(2).is_err());
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn test_utf16_to_end() {
        let data = [b'<', 0x00, b'a', 0x00];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_utf16_to_end().unwrap(), "<a");
        assert!(Parser::new(&data[..3]).read_utf16_to_end().is_err());
    }
}
