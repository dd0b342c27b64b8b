//! Metadata tokens.
//!
//! A token identifies one row in one metadata table: the upper 8 bits carry the table id,
//! the lower 24 bits carry the 1-based row id (RID). A RID of zero never names an entity
//! and marks an absent reference. User string tokens (`0x70`) use the lower 24 bits as an
//! offset into the `#US` heap instead.
//!
//! # Examples
//!
//! ```rust
//! use dotmeta::metadata::{tables::TableId, token::Token};
//!
//! let token = Token::from_parts(TableId::MethodDef, 3);
//! assert_eq!(token.value(), 0x0600_0003);
//! assert_eq!(token.table_id(), Some(TableId::MethodDef));
//! assert_eq!(token.row(), 3);
//! ```

use std::fmt;

use crate::metadata::tables::TableId;

/// Table byte used by tokens that reference the `#US` heap.
pub const USER_STRING_TABLE: u8 = 0x70;

/// A 32-bit metadata token: table id in the upper byte, row id in the lower 24 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Compose a token from a table and a row id.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Build a token referencing an offset in the `#US` heap.
    #[must_use]
    pub fn user_string(offset: u32) -> Self {
        Token((u32::from(USER_STRING_TABLE) << 24) | (offset & 0x00FF_FFFF))
    }

    /// The raw 32-bit value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table byte (upper 8 bits).
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table this token points into, if the table byte names a metadata table.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_u8(self.table())
    }

    /// The 1-based row id (lower 24 bits).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// True if the row id is zero, which never names an entity.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row() == 0
    }

    /// True if this token points into the `#US` heap.
    #[must_use]
    pub fn is_user_string(&self) -> bool {
        self.table() == USER_STRING_TABLE
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_parts() {
        let token = Token::new(0x0600_0001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
        assert_eq!(token.table_id(), Some(TableId::MethodDef));

        let token = Token(0x06FF_FFFF);
        assert_eq!(token.row(), 0x00FF_FFFF);
    }

    #[test]
    fn test_from_parts() {
        let token = Token::from_parts(TableId::GenericParamConstraint, 0x1234);
        assert_eq!(token.value(), 0x2C00_1234);

        // row ids wider than 24 bits are truncated, not bled into the table byte
        let token = Token::from_parts(TableId::TypeDef, 0x0100_0002);
        assert_eq!(token.value(), 0x0200_0002);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(Token::from_parts(TableId::TypeDef, 0).is_null());
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_user_string() {
        let token = Token::user_string(0x1F);
        assert_eq!(token.value(), 0x7000_001F);
        assert!(token.is_user_string());
        assert_eq!(token.table_id(), None);
    }

    #[test]
    fn test_token_from_conversion() {
        let value = 0x0600_0001u32;
        let token: Token = value.into();
        assert_eq!(token.value(), value);

        let back_to_u32: u32 = token.into();
        assert_eq!(back_to_u32, value);
    }

    #[test]
    fn test_token_formatting() {
        let token = Token(0x0600_0001);
        assert_eq!(format!("{}", token), "0x06000001");

        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("Token(0x06000001"));
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_token_as_key() {
        let mut map = HashMap::new();
        map.insert(Token(0x0200_0001), "C");
        map.insert(Token(0x0200_0002), "D");
        assert_eq!(map.get(&Token(0x0200_0001)), Some(&"C"));
        assert_eq!(map.len(), 2);
    }
}
