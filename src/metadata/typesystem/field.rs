use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        signatures::{ConstantValue, MarshalInfo, TypeSignature},
        token::Token,
        typesystem::{
            read_with, Backlink, Collection, CustomAttributeRc, FieldAttributes, Lazy,
            ModuleDefinition, ModuleDefinitionRc, Slot, TypeDefinition, TypeDefinitionRc,
        },
    },
    Result,
};

/// A reference to a `FieldDefinition`
pub type FieldDefinitionRc = Arc<FieldDefinition>;

/// A field of a type (`Field`).
pub struct FieldDefinition {
    /// The `Field` token, null for fields created in memory
    pub token: Token,
    /// Name
    pub name: String,
    /// Field type
    pub field_type: TypeSignature,
    flags: Slot<u16>,
    declaring_type: Backlink<TypeDefinition>,
    module: Backlink<ModuleDefinition>,
    constant: Lazy<Slot<Option<ConstantValue>>>,
    marshal_info: Lazy<Slot<Option<MarshalInfo>>>,
    offset: Lazy<Slot<Option<u32>>>,
    rva: Lazy<Slot<Option<u32>>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
}

impl FieldDefinition {
    /// A new field; attach it with [`TypeDefinition::add_field`].
    #[must_use]
    pub fn new(name: &str, flags: u16, field_type: TypeSignature) -> FieldDefinitionRc {
        Arc::new(FieldDefinition {
            token: Token::new(0),
            name: name.to_string(),
            field_type,
            flags: Slot::new(flags),
            declaring_type: Backlink::default(),
            module: Backlink::default(),
            constant: Lazy::ready(Slot::new(None)),
            marshal_info: Lazy::ready(Slot::new(None)),
            offset: Lazy::ready(Slot::new(None)),
            rva: Lazy::ready(Slot::new(None)),
            custom_attributes: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        name: String,
        flags: u16,
        field_type: TypeSignature,
        declaring_type: Weak<TypeDefinition>,
        module: Weak<ModuleDefinition>,
    ) -> FieldDefinitionRc {
        Arc::new(FieldDefinition {
            token,
            name,
            field_type,
            flags: Slot::new(flags),
            declaring_type: Backlink::new(declaring_type),
            module: Backlink::new(module),
            constant: Lazy::new(),
            marshal_info: Lazy::new(),
            offset: Lazy::new(),
            rva: Lazy::new(),
            custom_attributes: Lazy::new(),
        })
    }

    /// `FieldAttributes`
    pub fn flags(&self) -> u16 {
        self.flags.get()
    }

    /// Replace the `FieldAttributes`.
    pub fn set_flags(&self, flags: u16) {
        self.flags.set(flags);
    }

    /// True for static fields.
    pub fn is_static(&self) -> bool {
        self.flags() & FieldAttributes::STATIC != 0
    }

    /// True for compile time constants.
    pub fn is_literal(&self) -> bool {
        self.flags() & FieldAttributes::LITERAL != 0
    }

    /// True for fields that may only be assigned in a constructor.
    pub fn is_init_only(&self) -> bool {
        self.flags() & FieldAttributes::INIT_ONLY != 0
    }

    /// True for public fields.
    pub fn is_public(&self) -> bool {
        self.flags() & FieldAttributes::FIELD_ACCESS_MASK == FieldAttributes::PUBLIC
    }

    /// The declaring type.
    pub fn declaring_type(&self) -> Option<TypeDefinitionRc> {
        self.declaring_type.get()
    }

    pub(crate) fn attach(&self, declaring_type: &TypeDefinitionRc) {
        self.declaring_type.set(declaring_type);
        self.module.set_weak(declaring_type.module_link());
    }

    pub(crate) fn detach(&self) {
        self.declaring_type.set_weak(Weak::new());
    }

    /// The module, through the declaring type if needed.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module
            .get()
            .or_else(|| self.declaring_type()?.module())
    }

    /// `DeclaringType::Name`
    pub fn full_name(&self) -> String {
        match self.declaring_type() {
            Some(declaring) => format!("{}::{}", declaring.full_name(), self.name),
            None => self.name.clone(),
        }
    }

    /// The default value from the `Constant` table.
    ///
    /// # Errors
    /// Propagates decode failures of the `Constant` row.
    pub fn constant(&self) -> Result<Option<ConstantValue>> {
        self.constant
            .load_value(|| read_with(&self.module, |reader| reader.read_constant(self.token)))
    }

    /// Set or clear the default value; `HasDefault` follows.
    ///
    /// # Errors
    /// Propagates decode failures of the `Constant` row.
    pub fn set_constant(&self, value: Option<ConstantValue>) -> Result<()> {
        let flags = self.flags();
        self.set_flags(if value.is_some() {
            flags | FieldAttributes::HAS_DEFAULT
        } else {
            flags & !FieldAttributes::HAS_DEFAULT
        });
        self.constant.store(
            || read_with(&self.module, |reader| reader.read_constant(self.token)),
            value,
        )
    }

    /// The marshalling descriptor from the `FieldMarshal` table.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldMarshal` row.
    pub fn marshal_info(&self) -> Result<Option<MarshalInfo>> {
        self.marshal_info
            .load_value(|| read_with(&self.module, |reader| reader.read_marshal_info(self.token)))
    }

    /// Set or clear the marshalling descriptor; `HasFieldMarshal` follows.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldMarshal` row.
    pub fn set_marshal_info(&self, value: Option<MarshalInfo>) -> Result<()> {
        let flags = self.flags();
        self.set_flags(if value.is_some() {
            flags | FieldAttributes::HAS_FIELD_MARSHAL
        } else {
            flags & !FieldAttributes::HAS_FIELD_MARSHAL
        });
        self.marshal_info.store(
            || read_with(&self.module, |reader| reader.read_marshal_info(self.token)),
            value,
        )
    }

    /// The explicit offset from the `FieldLayout` table.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldLayout` table.
    pub fn offset(&self) -> Result<Option<u32>> {
        self.offset
            .load_value(|| read_with(&self.module, |reader| reader.read_field_layout(self.token)))
    }

    /// Set or clear the explicit offset.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldLayout` table.
    pub fn set_offset(&self, value: Option<u32>) -> Result<()> {
        self.offset.store(
            || read_with(&self.module, |reader| reader.read_field_layout(self.token)),
            value,
        )
    }

    /// The RVA of the initial data from the `FieldRVA` table.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldRVA` table.
    pub fn rva(&self) -> Result<Option<u32>> {
        self.rva
            .load_value(|| read_with(&self.module, |reader| reader.read_field_rva(self.token)))
    }

    /// Set or clear the initial data RVA; `HasFieldRVA` follows.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldRVA` table.
    pub fn set_rva(&self, value: Option<u32>) -> Result<()> {
        let flags = self.flags();
        self.set_flags(if value.is_some() {
            flags | FieldAttributes::HAS_FIELD_RVA
        } else {
            flags & !FieldAttributes::HAS_FIELD_RVA
        });
        self.rva.store(
            || read_with(&self.module, |reader| reader.read_field_rva(self.token)),
            value,
        )
    }

    /// Custom attributes on the field.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn custom_attributes(&self) -> Result<Vec<CustomAttributeRc>> {
        Ok(self
            .custom_attributes
            .load(|| read_with(&self.module, |reader| reader.read_custom_attributes(self.token)))?
            .items())
    }

    /// Attach a custom attribute.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn add_custom_attribute(&self, attribute: CustomAttributeRc) -> Result<()> {
        self.custom_attributes
            .load(|| read_with(&self.module, |reader| reader.read_custom_attributes(self.token)))?
            .push(attribute);
        Ok(())
    }
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("token", &self.token)
            .field("name", &self.full_name())
            .field("type", &self.field_type)
            .field("flags", &format_args!("{:#06x}", self.flags()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::TypeAttributes;

    #[test]
    fn flags_follow_attached_data() {
        let field = FieldDefinition::new("F", FieldAttributes::PUBLIC, TypeSignature::I4);
        assert!(field.is_public());
        assert!(!field.is_static());

        field.set_constant(Some(ConstantValue::I4(3))).unwrap();
        assert_eq!(field.flags() & FieldAttributes::HAS_DEFAULT, FieldAttributes::HAS_DEFAULT);
        assert_eq!(field.constant().unwrap(), Some(ConstantValue::I4(3)));

        field.set_constant(None).unwrap();
        assert_eq!(field.flags() & FieldAttributes::HAS_DEFAULT, 0);

        field.set_rva(Some(0x2050)).unwrap();
        assert_eq!(field.rva().unwrap(), Some(0x2050));
        assert_ne!(field.flags() & FieldAttributes::HAS_FIELD_RVA, 0);
    }

    #[test]
    fn declaring_type_is_weak() {
        let class = TypeDefinition::new("N", "C", TypeAttributes::PUBLIC, None);
        let field = FieldDefinition::new("F", FieldAttributes::STATIC, TypeSignature::String);
        class.add_field(field.clone()).unwrap();

        assert_eq!(field.full_name(), "N.C::F");
        drop(class);
        assert!(field.declaring_type().is_none());
        assert_eq!(field.full_name(), "F");
    }
}
