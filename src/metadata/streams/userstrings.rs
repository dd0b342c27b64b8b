use widestring::U16Str;

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// The `#US` heap: length-prefixed UTF-16 string literals referenced by `ldstr` tokens.
///
/// Each entry is a compressed byte length, the UTF-16LE code units and one trailing flag
/// byte that is set when the string needs more than ASCII handling.
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap the heap bytes. An empty slice is accepted.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a non-empty heap does not start with a null byte.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("Provided #US heap does not start with 0"));
        }

        Ok(UserStrings { data })
    }

    /// Get the string literal at byte offset `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry runs past the heap, or
    /// [`crate::Error::Malformed`] for invalid UTF-16.
    pub fn get(&self, index: usize) -> Result<String> {
        if index == 0 || index >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        let length = parser.read_compressed_uint()? as usize;
        if length == 0 {
            return Ok(String::new());
        }

        // the final byte is the terminal flag, not part of the string
        let bytes = parser.read_bytes(length)?;
        let units: Vec<u16> = bytes[..length - 1]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        match U16Str::from_slice(&units).to_string() {
            Ok(value) => Ok(value),
            Err(_) => Err(malformed_error!("Invalid string from index - {}", index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data: [u8; 31] = [
            0x00,
            0x1b, 0x48, 0x00, 0x65, 0x00, 0x6c, 0x00, 0x6c, 0x00, 0x6f, 0x00, 0x2c, 0x00, 0x20, 0x00,
            0x57, 0x00, 0x6f, 0x00, 0x72, 0x00, 0x6c, 0x00, 0x64, 0x00, 0x21, 0x00, 0x00,
            0x01, 0x00,
        ];

        let us_str = UserStrings::from(&data).unwrap();

        assert_eq!(us_str.get(1).unwrap(), "Hello, World!");
        assert_eq!(us_str.get(29).unwrap(), "");
    }

    #[test]
    fn invalid() {
        assert!(UserStrings::from(&[0x01]).is_err());

        let data = [0x00, 0x09, 0x48, 0x00];
        let us_str = UserStrings::from(&data).unwrap();
        assert!(us_str.get(1).is_err());
        assert!(us_str.get(0).is_err());
    }
}
