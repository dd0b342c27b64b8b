//! Facts attached to a parent token: custom attributes, security, constants, marshalling
//! and field layout.

use tracing::debug;

use crate::{
    metadata::{
        cache::{add_to_range, Range},
        reader::MetadataReader,
        signatures::{ConstantValue, MarshalInfo, SecurityAction},
        tables::{CodedIndexType, TableId},
        token::Token,
        typesystem::{
            CustomAttribute, CustomAttributeRc, SecurityDeclaration, SecurityDeclarationRc,
        },
    },
    Result,
};

impl MetadataReader {
    pub(crate) fn read_custom_attributes(&self, token: Token) -> Result<Vec<CustomAttributeRc>> {
        self.cache.custom_attributes.ensure(|map| {
            self.scan(TableId::CustomAttribute, |rid, row| {
                let parent = self.coded(CodedIndexType::HasCustomAttribute, row[0])?;
                add_to_range(map, parent, rid);
                Ok(())
            })
        })?;
        let attributes = self
            .cache
            .custom_attributes
            .consume(&token, |ranges| {
                let _guard = self.enter(None)?;
                ranges
                    .iter()
                    .flat_map(Range::rows)
                    .map(|rid| self.custom_attribute_row(rid))
                    .collect::<Result<Vec<_>>>()
            })?
            .unwrap_or_default();

        debug!(owner = %token, attributes = attributes.len(), "read custom attributes");
        Ok(attributes)
    }

    /// Decode one `CustomAttribute` row; the value blob stays undecoded.
    pub(crate) fn custom_attribute_row(&self, rid: u32) -> Result<CustomAttributeRc> {
        let row = self.row(TableId::CustomAttribute, rid)?;
        let constructor =
            self.method_handle_for(self.coded(CodedIndexType::CustomAttributeType, row[1])?)?;
        let blob = self.blob(row[2])?.to_vec();

        Ok(CustomAttribute::from_metadata(
            Token::from_parts(TableId::CustomAttribute, rid),
            constructor,
            blob,
            self.module_weak(),
        ))
    }

    pub(crate) fn read_security_declarations(
        &self,
        token: Token,
    ) -> Result<Vec<SecurityDeclarationRc>> {
        self.cache.security_declarations.ensure(|map| {
            self.scan(TableId::DeclSecurity, |rid, row| {
                let parent = self.coded(CodedIndexType::HasDeclSecurity, row[1])?;
                add_to_range(map, parent, rid);
                Ok(())
            })
        })?;
        let declarations = self.cache.security_declarations.consume(&token, |ranges| {
            let _guard = self.enter(None)?;
            ranges
                .iter()
                .flat_map(Range::rows)
                .map(|rid| self.security_declaration_row(rid))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(declarations.unwrap_or_default())
    }

    /// Decode one `DeclSecurity` row; the permission set stays undecoded.
    pub(crate) fn security_declaration_row(&self, rid: u32) -> Result<SecurityDeclarationRc> {
        let row = self.row(TableId::DeclSecurity, rid)?;
        Ok(SecurityDeclaration::from_metadata(
            Token::from_parts(TableId::DeclSecurity, rid),
            SecurityAction::from(row[0] as u16),
            self.blob(row[2])?.to_vec(),
            self.module_weak(),
        ))
    }

    pub(crate) fn read_constant(&self, token: Token) -> Result<Option<ConstantValue>> {
        self.cache.constants.ensure(|map| {
            self.scan(TableId::Constant, |rid, row| {
                let parent = self.coded(CodedIndexType::HasConstant, row[1])?;
                map.insert(parent, rid);
                Ok(())
            })
        })?;
        self.cache.constants.consume(&token, |rid| {
            let _guard = self.enter(None)?;
            let row = self.row(TableId::Constant, rid)?;
            // the type column is a padded byte
            ConstantValue::parse((row[0] & 0xFF) as u8, self.blob(row[2])?)
        })
    }

    pub(crate) fn read_marshal_info(&self, token: Token) -> Result<Option<MarshalInfo>> {
        self.cache.marshal_infos.ensure(|map| {
            self.scan(TableId::FieldMarshal, |rid, row| {
                let parent = self.coded(CodedIndexType::HasFieldMarshal, row[0])?;
                map.insert(parent, rid);
                Ok(())
            })
        })?;
        self.cache.marshal_infos.consume(&token, |rid| {
            let _guard = self.enter(None)?;
            let row = self.row(TableId::FieldMarshal, rid)?;
            MarshalInfo::parse(self.blob(row[1])?)
        })
    }

    pub(crate) fn read_field_layout(&self, token: Token) -> Result<Option<u32>> {
        self.cache.field_layouts.ensure(|map| {
            self.scan(TableId::FieldLayout, |_, row| {
                map.insert(row[1], row[0]);
                Ok(())
            })
        })?;
        self.cache.field_layouts.consume(&token.row(), Ok)
    }

    pub(crate) fn read_field_rva(&self, token: Token) -> Result<Option<u32>> {
        self.cache.field_rvas.ensure(|map| {
            self.scan(TableId::FieldRVA, |_, row| {
                map.insert(row[1], row[0]);
                Ok(())
            })
        })?;
        self.cache.field_rvas.consume(&token.row(), Ok)
    }
}
