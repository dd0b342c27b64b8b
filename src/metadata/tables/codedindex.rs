use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Error, Result,
};

/// The coded index schemes of ECMA-335 II.24.2.6.
///
/// A coded index packs a reference into one of several tables into a single value: the low
/// [`CodedIndexType::tag_bits`] select the table, the remaining bits carry the row id.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef`, `TypeSpec`
    TypeDefOrRef,
    /// `Field`, `Param`, `Property`
    HasConstant,
    /// Any table that can own a custom attribute
    HasCustomAttribute,
    /// `Field`, `Param`
    HasFieldMarshal,
    /// `TypeDef`, `MethodDef`, `Assembly`
    HasDeclSecurity,
    /// `TypeDef`, `TypeRef`, `ModuleRef`, `MethodDef`, `TypeSpec`
    MemberRefParent,
    /// `Event`, `Property`
    HasSemantics,
    /// `MethodDef`, `MemberRef`
    MethodDefOrRef,
    /// `Field`, `MethodDef`
    MemberForwarded,
    /// `File`, `AssemblyRef`, `ExportedType`
    Implementation,
    /// `MethodDef`, `MemberRef` at tags 2 and 3, the other tags are unused
    CustomAttributeType,
    /// `Module`, `ModuleRef`, `AssemblyRef`, `TypeRef`
    ResolutionScope,
    /// `TypeDef`, `MethodDef`
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// The table behind each tag value. `None` marks a tag that must not appear.
    #[must_use]
    pub fn slots(&self) -> &'static [Option<TableId>] {
        match self {
            CodedIndexType::TypeDefOrRef => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasConstant => &[
                Some(TableId::Field),
                Some(TableId::Param),
                Some(TableId::Property),
            ],
            CodedIndexType::HasCustomAttribute => &[
                Some(TableId::MethodDef),
                Some(TableId::Field),
                Some(TableId::TypeRef),
                Some(TableId::TypeDef),
                Some(TableId::Param),
                Some(TableId::InterfaceImpl),
                Some(TableId::MemberRef),
                Some(TableId::Module),
                // labeled 'Permission' in the standard, no such table exists
                Some(TableId::DeclSecurity),
                Some(TableId::Property),
                Some(TableId::Event),
                Some(TableId::StandAloneSig),
                Some(TableId::ModuleRef),
                Some(TableId::TypeSpec),
                Some(TableId::Assembly),
                Some(TableId::AssemblyRef),
                Some(TableId::File),
                Some(TableId::ExportedType),
                Some(TableId::ManifestResource),
                Some(TableId::GenericParam),
                Some(TableId::GenericParamConstraint),
                Some(TableId::MethodSpec),
            ],
            CodedIndexType::HasFieldMarshal => &[Some(TableId::Field), Some(TableId::Param)],
            CodedIndexType::HasDeclSecurity => &[
                Some(TableId::TypeDef),
                Some(TableId::MethodDef),
                Some(TableId::Assembly),
            ],
            CodedIndexType::MemberRefParent => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::ModuleRef),
                Some(TableId::MethodDef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasSemantics => &[Some(TableId::Event), Some(TableId::Property)],
            CodedIndexType::MethodDefOrRef => &[Some(TableId::MethodDef), Some(TableId::MemberRef)],
            CodedIndexType::MemberForwarded => &[Some(TableId::Field), Some(TableId::MethodDef)],
            CodedIndexType::Implementation => &[
                Some(TableId::File),
                Some(TableId::AssemblyRef),
                Some(TableId::ExportedType),
            ],
            CodedIndexType::CustomAttributeType => &[
                None,
                None,
                Some(TableId::MethodDef),
                Some(TableId::MemberRef),
                None,
            ],
            CodedIndexType::ResolutionScope => &[
                Some(TableId::Module),
                Some(TableId::ModuleRef),
                Some(TableId::AssemblyRef),
                Some(TableId::TypeRef),
            ],
            CodedIndexType::TypeOrMethodDef => &[Some(TableId::TypeDef), Some(TableId::MethodDef)],
        }
    }

    /// The tables this scheme can reference, in tag order.
    pub fn tables(&self) -> impl Iterator<Item = TableId> {
        self.slots().iter().filter_map(|slot| *slot)
    }

    /// Number of low bits that carry the tag.
    #[must_use]
    pub fn tag_bits(&self) -> u32 {
        match self.slots().len() {
            0..=2 => 1,
            3..=4 => 2,
            5..=8 => 3,
            9..=16 => 4,
            _ => 5,
        }
    }

    /// Encode `token` as a coded index value. A null token encodes as zero.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenNotEncodable`] if the token's table is not part of this scheme.
    pub fn compress(&self, token: Token) -> Result<u32> {
        if token.is_null() {
            return Ok(0);
        }

        let tag = self
            .slots()
            .iter()
            .position(|slot| slot.is_some_and(|table| table as u8 == token.table()))
            .ok_or(Error::TokenNotEncodable { kind: *self, token })?;

        let row = token.row();
        if row >> (32 - self.tag_bits()) != 0 {
            return Err(Error::TokenNotEncodable { kind: *self, token });
        }

        Ok((row << self.tag_bits()) | tag as u32)
    }

    /// Decode a coded index value into a token.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedCodedIndex`] if the tag bits select no table.
    pub fn decompress(&self, value: u32) -> Result<Token> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;

        match self.slots().get(tag).copied().flatten() {
            Some(table) => Ok(Token::from_parts(table, value >> bits)),
            None => Err(Error::UnsupportedCodedIndex { kind: *self, value }),
        }
    }

    /// True if a coded index of this kind needs four bytes, given a row count lookup.
    ///
    /// The two byte form holds row ids below `2^(16 - tag_bits)`.
    pub fn is_large<F>(&self, rows: F) -> bool
    where
        F: Fn(TableId) -> u32,
    {
        let max_rows = self.tables().map(rows).max().unwrap_or(0);
        max_rows >= (1 << (16 - self.tag_bits()))
    }
}
