use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        signatures::TypeSignature,
        token::Token,
        typesystem::{
            read_with, Backlink, Collection, CustomAttributeRc, EventDefinitionRc,
            FieldDefinitionRc, GenericOwnerRef, GenericParameter, GenericParameterRc, Lazy,
            MethodDefinitionRc, ModuleDefinition, ModuleDefinitionRc, PropertyDefinitionRc,
            SecurityDeclarationRc, Slot, TypeAttributes,
        },
    },
    Error, Result,
};

/// A reference to a `TypeDefinition`
pub type TypeDefinitionRc = Arc<TypeDefinition>;
/// A reference to an `InterfaceImplementation`
pub type InterfaceImplementationRc = Arc<InterfaceImplementation>;

/// Explicit packing and size of a type (`ClassLayout`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassLayout {
    /// Field alignment, 0 for the default
    pub packing_size: u16,
    /// Total size in bytes, 0 for the default
    pub class_size: u32,
}

/// An interface implemented by a type (`InterfaceImpl`).
pub struct InterfaceImplementation {
    /// The `InterfaceImpl` token, null for rows created in memory
    pub token: Token,
    /// The implemented interface
    pub interface: TypeSignature,
    module: Backlink<ModuleDefinition>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
}

impl InterfaceImplementation {
    /// A new interface implementation.
    #[must_use]
    pub fn new(interface: TypeSignature) -> InterfaceImplementationRc {
        Arc::new(InterfaceImplementation {
            token: Token::new(0),
            interface,
            module: Backlink::default(),
            custom_attributes: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        interface: TypeSignature,
        module: Weak<ModuleDefinition>,
    ) -> InterfaceImplementationRc {
        Arc::new(InterfaceImplementation {
            token,
            interface,
            module: Backlink::new(module),
            custom_attributes: Lazy::new(),
        })
    }

    /// Custom attributes on the implementation.
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

impl fmt::Debug for InterfaceImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceImplementation({})", self.interface.full_name())
    }
}

fn already_owned(kind: &str, name: &str) -> Error {
    Error::InvalidArgument(format!("{kind} '{name}' already belongs to a type"))
}

/// A type defined in a module (`TypeDef`).
///
/// Every member collection is read on first access. Collections of types created in memory
/// start out empty and never touch a reader.
pub struct TypeDefinition {
    /// The `TypeDef` token, null for types created in memory
    pub token: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    flags: Slot<u32>,
    module: Backlink<ModuleDefinition>,
    declaring_type: Backlink<TypeDefinition>,
    base_type: Lazy<Slot<Option<TypeSignature>>>,
    fields: Lazy<Collection<FieldDefinitionRc>>,
    methods: Lazy<Collection<MethodDefinitionRc>>,
    properties: Lazy<Collection<PropertyDefinitionRc>>,
    events: Lazy<Collection<EventDefinitionRc>>,
    nested_types: Lazy<Collection<TypeDefinitionRc>>,
    interfaces: Lazy<Collection<InterfaceImplementationRc>>,
    generic_parameters: Lazy<Collection<GenericParameterRc>>,
    layout: Lazy<Slot<Option<ClassLayout>>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
    security_declarations: Lazy<Collection<SecurityDeclarationRc>>,
}

impl TypeDefinition {
    /// A new, empty type.
    #[must_use]
    pub fn new(
        namespace: &str,
        name: &str,
        flags: u32,
        base_type: Option<TypeSignature>,
    ) -> TypeDefinitionRc {
        Arc::new(TypeDefinition {
            token: Token::new(0),
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: Slot::new(flags),
            module: Backlink::default(),
            declaring_type: Backlink::default(),
            base_type: Lazy::ready(Slot::new(base_type)),
            fields: Lazy::ready(Collection::new()),
            methods: Lazy::ready(Collection::new()),
            properties: Lazy::ready(Collection::new()),
            events: Lazy::ready(Collection::new()),
            nested_types: Lazy::ready(Collection::new()),
            interfaces: Lazy::ready(Collection::new()),
            generic_parameters: Lazy::ready(Collection::new()),
            layout: Lazy::ready(Slot::new(None)),
            custom_attributes: Lazy::ready(Collection::new()),
            security_declarations: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        namespace: String,
        name: String,
        flags: u32,
        module: Weak<ModuleDefinition>,
    ) -> TypeDefinitionRc {
        Arc::new(TypeDefinition {
            token,
            namespace,
            name,
            flags: Slot::new(flags),
            module: Backlink::new(module),
            declaring_type: Backlink::default(),
            base_type: Lazy::new(),
            fields: Lazy::new(),
            methods: Lazy::new(),
            properties: Lazy::new(),
            events: Lazy::new(),
            nested_types: Lazy::new(),
            interfaces: Lazy::new(),
            generic_parameters: Lazy::new(),
            layout: Lazy::new(),
            custom_attributes: Lazy::new(),
            security_declarations: Lazy::new(),
        })
    }

    /// `TypeAttributes`
    pub fn flags(&self) -> u32 {
        self.flags.get()
    }

    /// Replace the `TypeAttributes`.
    pub fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }

    /// True for interfaces.
    pub fn is_interface(&self) -> bool {
        self.flags() & TypeAttributes::INTERFACE != 0
    }

    /// True for abstract types.
    pub fn is_abstract(&self) -> bool {
        self.flags() & TypeAttributes::ABSTRACT != 0
    }

    /// True for sealed types.
    pub fn is_sealed(&self) -> bool {
        self.flags() & TypeAttributes::SEALED != 0
    }

    /// True for public top-level or nested public types.
    pub fn is_public(&self) -> bool {
        matches!(
            self.flags() & TypeAttributes::VISIBILITY_MASK,
            TypeAttributes::PUBLIC | TypeAttributes::NESTED_PUBLIC
        )
    }

    /// True if the type is declared inside another type.
    pub fn is_nested(&self) -> bool {
        self.declaring_type.get().is_some()
            || self.flags() & TypeAttributes::VISIBILITY_MASK > TypeAttributes::PUBLIC
    }

    /// True if the type derives from `System.ValueType` or `System.Enum`.
    ///
    /// # Errors
    /// Propagates decode failures of the `Extends` column.
    pub fn is_value_type(&self) -> Result<bool> {
        let Some(base) = self.base_type()? else {
            return Ok(false);
        };

        let base = base.full_name();
        Ok((base == "System.ValueType" && self.full_name() != "System.Enum")
            || base == "System.Enum")
    }

    /// True if the type derives from `System.Enum`.
    ///
    /// # Errors
    /// Propagates decode failures of the `Extends` column.
    pub fn is_enum(&self) -> Result<bool> {
        Ok(self
            .base_type()?
            .is_some_and(|base| base.full_name() == "System.Enum"))
    }

    /// Full name, with `/` between nested type names.
    pub fn full_name(&self) -> String {
        if let Some(declaring) = self.declaring_type() {
            return format!("{}/{}", declaring.full_name(), self.name);
        }

        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// The module, through the declaring type for nested types created in memory.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module
            .get()
            .or_else(|| self.declaring_type()?.module())
    }

    /// A weak pointer to the module, handed to members on attach.
    pub(crate) fn module_link(&self) -> Weak<ModuleDefinition> {
        self.module()
            .map(|module| Arc::downgrade(&module))
            .unwrap_or_default()
    }

    pub(crate) fn set_module(&self, module: Weak<ModuleDefinition>) {
        self.module.set_weak(module);
    }

    /// The enclosing type of a nested type.
    pub fn declaring_type(&self) -> Option<TypeDefinitionRc> {
        self.declaring_type.get()
    }

    pub(crate) fn set_declaring_type(&self, declaring_type: Weak<TypeDefinition>) {
        self.declaring_type.set_weak(declaring_type);
    }

    /// The base type, `None` for interfaces and `System.Object`.
    ///
    /// # Errors
    /// Propagates decode failures of the `Extends` column.
    pub fn base_type(&self) -> Result<Option<TypeSignature>> {
        self.base_type
            .load_value(|| read_with(&self.module, |reader| reader.read_base_type(self.token)))
    }

    /// Replace the base type.
    ///
    /// # Errors
    /// Propagates decode failures of the `Extends` column.
    pub fn set_base_type(&self, base_type: Option<TypeSignature>) -> Result<()> {
        self.base_type.store(
            || read_with(&self.module, |reader| reader.read_base_type(self.token)),
            base_type,
        )
    }

    fn field_list(&self) -> Result<&Collection<FieldDefinitionRc>> {
        self.fields
            .load(|| read_with(&self.module, |reader| reader.read_fields(self.token)))
    }

    /// Fields, in declaration order.
    ///
    /// # Errors
    /// Propagates decode failures of the `Field` rows.
    pub fn fields(&self) -> Result<Vec<FieldDefinitionRc>> {
        Ok(self.field_list()?.items())
    }

    /// The first field called `name`.
    ///
    /// # Errors
    /// Propagates decode failures of the `Field` rows.
    pub fn get_field(&self, name: &str) -> Result<Option<FieldDefinitionRc>> {
        Ok(self.fields()?.into_iter().find(|field| field.name == name))
    }

    /// Append a field.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the field already belongs to a type.
    pub fn add_field(self: &Arc<Self>, field: FieldDefinitionRc) -> Result<()> {
        if field.declaring_type().is_some() {
            return Err(already_owned("field", &field.name));
        }
        let fields = self.field_list()?;
        field.attach(self);
        fields.push(field);
        Ok(())
    }

    /// Remove a field. Returns false if it is not a field of this type.
    ///
    /// # Errors
    /// Propagates decode failures of the `Field` rows.
    pub fn remove_field(&self, field: &FieldDefinitionRc) -> Result<bool> {
        let removed = self.field_list()?.remove_item(field);
        if removed {
            field.detach();
        }
        Ok(removed)
    }

    fn method_list(&self) -> Result<&Collection<MethodDefinitionRc>> {
        self.methods
            .load(|| read_with(&self.module, |reader| reader.read_methods(self.token)))
    }

    /// Methods, in declaration order.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodDef` rows and their signatures.
    pub fn methods(&self) -> Result<Vec<MethodDefinitionRc>> {
        Ok(self.method_list()?.items())
    }

    /// All methods called `name`.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodDef` rows and their signatures.
    pub fn get_methods(&self, name: &str) -> Result<Vec<MethodDefinitionRc>> {
        Ok(self
            .methods()?
            .into_iter()
            .filter(|method| method.name == name)
            .collect())
    }

    /// Append a method.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the method already belongs to a type.
    pub fn add_method(self: &Arc<Self>, method: MethodDefinitionRc) -> Result<()> {
        if method.declaring_type().is_some() {
            return Err(already_owned("method", &method.name));
        }
        let methods = self.method_list()?;
        method.attach(self);
        methods.push(method);
        Ok(())
    }

    /// Remove a method. Returns false if it is not a method of this type.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodDef` rows.
    pub fn remove_method(&self, method: &MethodDefinitionRc) -> Result<bool> {
        let removed = self.method_list()?.remove_item(method);
        if removed {
            method.detach();
        }
        Ok(removed)
    }

    fn property_list(&self) -> Result<&Collection<PropertyDefinitionRc>> {
        self.properties
            .load(|| read_with(&self.module, |reader| reader.read_properties(self.token)))
    }

    /// Properties.
    ///
    /// # Errors
    /// Propagates decode failures of the `Property` rows.
    pub fn properties(&self) -> Result<Vec<PropertyDefinitionRc>> {
        Ok(self.property_list()?.items())
    }

    /// Append a property.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the property already belongs to a type.
    pub fn add_property(self: &Arc<Self>, property: PropertyDefinitionRc) -> Result<()> {
        if property.declaring_type().is_some() {
            return Err(already_owned("property", &property.name));
        }
        let properties = self.property_list()?;
        property.attach(self);
        properties.push(property);
        Ok(())
    }

    /// Remove a property. Returns false if it is not a property of this type.
    ///
    /// # Errors
    /// Propagates decode failures of the `Property` rows.
    pub fn remove_property(&self, property: &PropertyDefinitionRc) -> Result<bool> {
        let removed = self.property_list()?.remove_item(property);
        if removed {
            property.detach();
        }
        Ok(removed)
    }

    fn event_list(&self) -> Result<&Collection<EventDefinitionRc>> {
        self.events
            .load(|| read_with(&self.module, |reader| reader.read_events(self.token)))
    }

    /// Events.
    ///
    /// # Errors
    /// Propagates decode failures of the `Event` rows.
    pub fn events(&self) -> Result<Vec<EventDefinitionRc>> {
        Ok(self.event_list()?.items())
    }

    /// Append an event.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the event already belongs to a type.
    pub fn add_event(self: &Arc<Self>, event: EventDefinitionRc) -> Result<()> {
        if event.declaring_type().is_some() {
            return Err(already_owned("event", &event.name));
        }
        let events = self.event_list()?;
        event.attach(self);
        events.push(event);
        Ok(())
    }

    /// Remove an event. Returns false if it is not an event of this type.
    ///
    /// # Errors
    /// Propagates decode failures of the `Event` rows.
    pub fn remove_event(&self, event: &EventDefinitionRc) -> Result<bool> {
        let removed = self.event_list()?.remove_item(event);
        if removed {
            event.detach();
        }
        Ok(removed)
    }

    fn nested_list(&self) -> Result<&Collection<TypeDefinitionRc>> {
        self.nested_types
            .load(|| read_with(&self.module, |reader| reader.read_nested_types(self.token)))
    }

    /// Types declared inside this one.
    ///
    /// # Errors
    /// Propagates decode failures of the `NestedClass` table.
    pub fn nested_types(&self) -> Result<Vec<TypeDefinitionRc>> {
        Ok(self.nested_list()?.items())
    }

    /// Nest a type inside this one.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the type is already nested in another type.
    pub fn add_nested_type(self: &Arc<Self>, nested: TypeDefinitionRc) -> Result<()> {
        if nested.declaring_type().is_some() {
            return Err(already_owned("type", &nested.full_name()));
        }
        let nested_types = self.nested_list()?;
        nested.set_declaring_type(Arc::downgrade(self));
        nested.set_module(self.module_link());
        nested_types.push(nested);
        Ok(())
    }

    /// Remove a nested type. Returns false if it is not nested in this type.
    ///
    /// # Errors
    /// Propagates decode failures of the `NestedClass` table.
    pub fn remove_nested_type(&self, nested: &TypeDefinitionRc) -> Result<bool> {
        let removed = self.nested_list()?.remove_item(nested);
        if removed {
            nested.set_declaring_type(Weak::new());
        }
        Ok(removed)
    }

    fn interface_list(&self) -> Result<&Collection<InterfaceImplementationRc>> {
        self.interfaces
            .load(|| read_with(&self.module, |reader| reader.read_interfaces(self.token)))
    }

    /// Implemented interfaces.
    ///
    /// # Errors
    /// Propagates decode failures of the `InterfaceImpl` rows.
    pub fn interfaces(&self) -> Result<Vec<InterfaceImplementationRc>> {
        Ok(self.interface_list()?.items())
    }

    /// Add an implemented interface.
    ///
    /// # Errors
    /// Propagates decode failures of the `InterfaceImpl` rows.
    pub fn add_interface(&self, interface: InterfaceImplementationRc) -> Result<()> {
        self.interface_list()?.push(interface);
        Ok(())
    }

    fn generic_list(&self) -> Result<&Collection<GenericParameterRc>> {
        self.generic_parameters.load(|| {
            read_with(&self.module, |reader| {
                reader.read_generic_parameters(self.token)
            })
        })
    }

    /// Generic parameters, ordered by position.
    ///
    /// # Errors
    /// Propagates decode failures of the `GenericParam` rows.
    pub fn generic_parameters(&self) -> Result<Vec<GenericParameterRc>> {
        Ok(self.generic_list()?.items())
    }

    /// True if the type declares generic parameters.
    ///
    /// # Errors
    /// Propagates decode failures of the `GenericParam` rows.
    pub fn has_generic_parameters(&self) -> Result<bool> {
        Ok(!self.generic_list()?.is_empty())
    }

    /// Declare a new generic parameter at the next position.
    ///
    /// # Errors
    /// Propagates decode failures of the existing `GenericParam` rows.
    pub fn add_generic_parameter(self: &Arc<Self>, name: &str) -> Result<GenericParameterRc> {
        let parameters = self.generic_list()?;
        let parameter = GenericParameter::create(
            name,
            parameters.len() as u16,
            0,
            GenericOwnerRef::Type(Arc::downgrade(self)),
            self.module_link(),
        );
        parameters.push(parameter.clone());
        Ok(parameter)
    }

    /// Explicit layout from the `ClassLayout` table.
    ///
    /// # Errors
    /// Propagates decode failures of the `ClassLayout` table.
    pub fn layout(&self) -> Result<Option<ClassLayout>> {
        self.layout
            .load_value(|| read_with(&self.module, |reader| reader.read_class_layout(self.token)))
    }

    /// Set or clear the explicit layout.
    ///
    /// # Errors
    /// Propagates decode failures of the `ClassLayout` table.
    pub fn set_layout(&self, layout: Option<ClassLayout>) -> Result<()> {
        self.layout.store(
            || read_with(&self.module, |reader| reader.read_class_layout(self.token)),
            layout,
        )
    }

    /// Custom attributes on the type.
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

    /// Declarative security on the type.
    ///
    /// # Errors
    /// Propagates decode failures of the `DeclSecurity` rows.
    pub fn security_declarations(&self) -> Result<Vec<SecurityDeclarationRc>> {
        Ok(self
            .security_declarations
            .load(|| {
                read_with(&self.module, |reader| {
                    reader.read_security_declarations(self.token)
                })
            })?
            .items())
    }

    /// Attach a security declaration.
    ///
    /// # Errors
    /// Propagates decode failures of the `DeclSecurity` rows.
    pub fn add_security_declaration(&self, declaration: SecurityDeclarationRc) -> Result<()> {
        self.security_declarations
            .load(|| {
                read_with(&self.module, |reader| {
                    reader.read_security_declarations(self.token)
                })
            })?
            .push(declaration);
        Ok(())
    }

    /// Force every lazy collection of this type and its members.
    pub(crate) fn load_all(&self) -> Result<()> {
        self.base_type()?;
        self.layout()?;
        self.interfaces()?;
        self.custom_attributes()?;
        self.security_declarations()?;
        for parameter in self.generic_parameters()? {
            parameter.constraints()?;
            parameter.custom_attributes()?;
        }

        for field in self.fields()? {
            field.constant()?;
            field.marshal_info()?;
            field.offset()?;
            field.rva()?;
            field.custom_attributes()?;
        }

        for method in self.methods()? {
            method.overrides()?;
            method.pinvoke()?;
            method.semantics()?;
            method.custom_attributes()?;
            method.security_declarations()?;
            for parameter in method.generic_parameters()? {
                parameter.constraints()?;
                parameter.custom_attributes()?;
            }
            for parameter in method
                .parameters()
                .into_iter()
                .chain(method.return_parameter())
            {
                parameter.constant()?;
                parameter.marshal_info()?;
                parameter.custom_attributes()?;
            }
        }

        for property in self.properties()? {
            property.accessors()?;
            property.constant()?;
            property.custom_attributes()?;
        }

        for event in self.events()? {
            event.accessors()?;
            event.custom_attributes()?;
        }

        for nested in self.nested_types()? {
            nested.load_all()?;
        }
        Ok(())
    }
}

impl fmt::Debug for TypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("token", &self.token)
            .field("name", &self.full_name())
            .field("flags", &format_args!("{:#010x}", self.flags()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::{
        FieldAttributes, FieldDefinition, MethodAttributes, MethodDefinition,
    };

    #[test]
    fn nested_names_use_slash() {
        let outer = TypeDefinition::new("N", "Outer", TypeAttributes::PUBLIC, None);
        let inner = TypeDefinition::new("", "Inner", TypeAttributes::NESTED_PUBLIC, None);
        outer.add_nested_type(inner.clone()).unwrap();

        assert_eq!(inner.full_name(), "N.Outer/Inner");
        assert!(inner.is_nested());
        assert!(!outer.is_nested());
        assert!(outer.add_nested_type(inner.clone()).is_err());

        assert!(outer.remove_nested_type(&inner).unwrap());
        assert_eq!(inner.full_name(), "Inner");
    }

    #[test]
    fn members_belong_to_one_type() {
        let first = TypeDefinition::new("N", "A", TypeAttributes::PUBLIC, None);
        let second = TypeDefinition::new("N", "B", TypeAttributes::PUBLIC, None);
        let field = FieldDefinition::new("F", FieldAttributes::PUBLIC, TypeSignature::I4);
        let method = MethodDefinition::new("M", MethodAttributes::PUBLIC, TypeSignature::Void);

        first.add_field(field.clone()).unwrap();
        first.add_method(method.clone()).unwrap();
        assert!(matches!(
            second.add_field(field.clone()),
            Err(Error::InvalidArgument(_))
        ));

        assert!(first.remove_field(&field).unwrap());
        assert!(!first.remove_field(&field).unwrap());
        second.add_field(field.clone()).unwrap();
        assert!(Arc::ptr_eq(&field.declaring_type().unwrap(), &second));

        assert_eq!(first.get_methods("M").unwrap().len(), 1);
        assert!(first.get_field("F").unwrap().is_none());
    }

    #[test]
    fn generic_parameters_are_positional() {
        let list = TypeDefinition::new("N", "Pair`2", TypeAttributes::PUBLIC, None);
        let first = list.add_generic_parameter("TKey").unwrap();
        let second = list.add_generic_parameter("").unwrap();

        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(second.name, "!1");
        assert!(list.has_generic_parameters().unwrap());

        let owner = second.owner().unwrap();
        assert_eq!(owner.parameter(0).unwrap().unwrap().name, "TKey");
    }
}
