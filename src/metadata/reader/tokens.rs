//! Token to entity lookup.

use crate::{
    metadata::{
        reader::{GenericContext, MetadataReader},
        tables::TableId,
        token::Token,
        typesystem::MetadataEntity,
    },
    Error, Result,
};

impl MetadataReader {
    /// The entity named by `token`, or `None` if the row does not exist or the table holds
    /// nothing that is exposed as an entity (pointer tables, `File`, manifest resources,
    /// edit-and-continue logs).
    ///
    /// Rows that are owned by another entity (`InterfaceImpl`, `CustomAttribute`,
    /// `DeclSecurity`, `GenericParamConstraint`) are decoded afresh on every call.
    ///
    /// # Errors
    /// Returns an error if the row exists but can not be decoded.
    pub fn lookup_token(&self, token: Token) -> Result<Option<MetadataEntity>> {
        if token.is_user_string() {
            let heap = self.image.user_strings()?;
            return match heap.get(token.row() as usize) {
                Ok(value) => Ok(Some(MetadataEntity::UserString(value))),
                Err(Error::OutOfBounds) => Ok(None),
                Err(error) => Err(error),
            };
        }

        let Some(table) = token.table_id() else {
            return Ok(None);
        };
        let rid = token.row();
        if rid == 0 || rid > self.rows(table) {
            return Ok(None);
        }

        let entity = match table {
            TableId::Module => self
                .module_weak()
                .upgrade()
                .map(MetadataEntity::Module),
            TableId::TypeRef => Some(MetadataEntity::TypeReference(self.get_type_reference(rid)?)),
            TableId::TypeDef => Some(MetadataEntity::Type(self.get_type(rid)?)),
            TableId::Field => Some(MetadataEntity::Field(self.get_field(rid)?)),
            TableId::MethodDef => Some(MetadataEntity::Method(self.get_method(rid)?)),
            TableId::Param => Some(MetadataEntity::Parameter(self.get_parameter(rid)?)),
            TableId::InterfaceImpl => {
                let class = {
                    let _guard = self.enter(None)?;
                    self.row(TableId::InterfaceImpl, rid)?[0]
                };
                let definition = self.get_type(class)?;
                let _guard = self.enter(Some(GenericContext::for_type(&definition)))?;
                Some(MetadataEntity::InterfaceImplementation(self.interface_row(rid)?))
            }
            TableId::MemberRef => {
                Some(MetadataEntity::MemberReference(self.get_member_reference(rid)?))
            }
            TableId::CustomAttribute => {
                let _guard = self.enter(None)?;
                Some(MetadataEntity::CustomAttribute(self.custom_attribute_row(rid)?))
            }
            TableId::DeclSecurity => {
                let _guard = self.enter(None)?;
                Some(MetadataEntity::SecurityDeclaration(
                    self.security_declaration_row(rid)?,
                ))
            }
            TableId::Event => Some(MetadataEntity::Event(self.get_event(rid)?)),
            TableId::Property => Some(MetadataEntity::Property(self.get_property(rid)?)),
            TableId::ModuleRef => {
                Some(MetadataEntity::ModuleReference(self.get_module_reference(rid)?))
            }
            TableId::TypeSpec => Some(MetadataEntity::TypeSpecification(self.get_type_spec(rid)?)),
            TableId::Assembly => match self.module_weak().upgrade() {
                Some(module) => module.assembly()?.map(MetadataEntity::Assembly),
                None => None,
            },
            TableId::AssemblyRef => Some(MetadataEntity::AssemblyReference(
                self.get_assembly_reference(rid)?,
            )),
            TableId::ExportedType => {
                Some(MetadataEntity::ExportedType(self.get_exported_type(rid)?))
            }
            TableId::GenericParam => {
                Some(MetadataEntity::GenericParameter(self.get_generic_parameter(rid)?))
            }
            TableId::MethodSpec => {
                Some(MetadataEntity::MethodSpecification(self.get_method_spec(rid)?))
            }
            TableId::GenericParamConstraint => {
                let context = {
                    let _guard = self.enter(None)?;
                    let owner = self.row(TableId::GenericParamConstraint, rid)?[0];
                    self.constraint_context(owner)?
                };
                let _guard = self.enter(Some(context))?;
                Some(MetadataEntity::GenericParameterConstraint(
                    self.constraint_row(rid)?,
                ))
            }
            _ => None,
        };
        Ok(entity)
    }
}
