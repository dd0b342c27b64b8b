use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        signatures::{ConstantValue, PropertySignature, TypeSignature},
        token::Token,
        typesystem::{
            read_with, Backlink, Collection, CustomAttributeRc, Lazy, MethodDefinitionRc,
            MethodSemanticsAttributes, ModuleDefinition, ModuleDefinitionRc, PropertyAttributes,
            Slot, TypeDefinition, TypeDefinitionRc,
        },
    },
    Result,
};

/// A reference to a `PropertyDefinition`
pub type PropertyDefinitionRc = Arc<PropertyDefinition>;
/// A reference to an `EventDefinition`
pub type EventDefinitionRc = Arc<EventDefinition>;

/// One `MethodSemantics` row: a method and the role it plays for a property or event.
#[derive(Clone)]
pub struct SemanticMethod {
    /// The role
    pub semantics: MethodSemanticsAttributes,
    /// The accessor
    pub method: MethodDefinitionRc,
}

impl fmt::Debug for SemanticMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.semantics, self.method.name)
    }
}

fn first_with(
    accessors: &[SemanticMethod],
    role: MethodSemanticsAttributes,
) -> Option<MethodDefinitionRc> {
    accessors
        .iter()
        .find(|accessor| accessor.semantics.contains(role))
        .map(|accessor| accessor.method.clone())
}

fn all_with(accessors: &[SemanticMethod], role: MethodSemanticsAttributes) -> Vec<MethodDefinitionRc> {
    accessors
        .iter()
        .filter(|accessor| accessor.semantics.contains(role))
        .map(|accessor| accessor.method.clone())
        .collect()
}

fn replace_with(
    accessors: &Collection<SemanticMethod>,
    role: MethodSemanticsAttributes,
    method: Option<MethodDefinitionRc>,
) -> Result<()> {
    accessors.retain(|accessor| !accessor.semantics.contains(role));
    if let Some(method) = method {
        method.add_semantics(role)?;
        accessors.push(SemanticMethod {
            semantics: role,
            method,
        });
    }
    Ok(())
}

/// A property of a type (`Property`).
pub struct PropertyDefinition {
    /// The `Property` token, null for properties created in memory
    pub token: Token,
    /// Name
    pub name: String,
    flags: Slot<u16>,
    has_this: Slot<bool>,
    property_type: Slot<TypeSignature>,
    parameters: Slot<Vec<TypeSignature>>,
    declaring_type: Backlink<TypeDefinition>,
    module: Backlink<ModuleDefinition>,
    accessors: Lazy<Collection<SemanticMethod>>,
    constant: Lazy<Slot<Option<ConstantValue>>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
}

impl PropertyDefinition {
    /// A new instance property without index parameters.
    #[must_use]
    pub fn new(name: &str, flags: u16, property_type: TypeSignature) -> PropertyDefinitionRc {
        Arc::new(PropertyDefinition {
            token: Token::new(0),
            name: name.to_string(),
            flags: Slot::new(flags),
            has_this: Slot::new(true),
            property_type: Slot::new(property_type),
            parameters: Slot::new(Vec::new()),
            declaring_type: Backlink::default(),
            module: Backlink::default(),
            accessors: Lazy::ready(Collection::new()),
            constant: Lazy::ready(Slot::new(None)),
            custom_attributes: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        name: String,
        flags: u16,
        signature: PropertySignature,
        declaring_type: Weak<TypeDefinition>,
        module: Weak<ModuleDefinition>,
    ) -> PropertyDefinitionRc {
        Arc::new(PropertyDefinition {
            token,
            name,
            flags: Slot::new(flags),
            has_this: Slot::new(signature.has_this),
            property_type: Slot::new(signature.property_type),
            parameters: Slot::new(signature.parameters),
            declaring_type: Backlink::new(declaring_type),
            module: Backlink::new(module),
            accessors: Lazy::new(),
            constant: Lazy::new(),
            custom_attributes: Lazy::new(),
        })
    }

    /// `PropertyAttributes`
    pub fn flags(&self) -> u16 {
        self.flags.get()
    }

    /// Replace the `PropertyAttributes`.
    pub fn set_flags(&self, flags: u16) {
        self.flags.set(flags);
    }

    /// The property type.
    pub fn property_type(&self) -> TypeSignature {
        self.property_type.get()
    }

    /// Index parameter types.
    pub fn parameters(&self) -> Vec<TypeSignature> {
        self.parameters.get()
    }

    /// Replace the index parameter types.
    pub fn set_parameters(&self, parameters: Vec<TypeSignature>) {
        self.parameters.set(parameters);
    }

    /// Mark the property static or instance.
    pub fn set_has_this(&self, has_this: bool) {
        self.has_this.set(has_this);
    }

    /// The property signature.
    pub fn signature(&self) -> PropertySignature {
        PropertySignature {
            has_this: self.has_this.get(),
            property_type: self.property_type(),
            parameters: self.parameters(),
        }
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

    fn accessor_list(&self) -> Result<&Collection<SemanticMethod>> {
        self.accessors
            .load(|| read_with(&self.module, |reader| reader.read_accessors(self.token)))
    }

    /// All accessors with their roles.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn accessors(&self) -> Result<Vec<SemanticMethod>> {
        Ok(self.accessor_list()?.items())
    }

    /// The `get` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn getter(&self) -> Result<Option<MethodDefinitionRc>> {
        Ok(first_with(&self.accessors()?, MethodSemanticsAttributes::GETTER))
    }

    /// Replace the `get` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn set_getter(&self, method: Option<MethodDefinitionRc>) -> Result<()> {
        replace_with(self.accessor_list()?, MethodSemanticsAttributes::GETTER, method)
    }

    /// The `set` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn setter(&self) -> Result<Option<MethodDefinitionRc>> {
        Ok(first_with(&self.accessors()?, MethodSemanticsAttributes::SETTER))
    }

    /// Replace the `set` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn set_setter(&self, method: Option<MethodDefinitionRc>) -> Result<()> {
        replace_with(self.accessor_list()?, MethodSemanticsAttributes::SETTER, method)
    }

    /// Accessors marked `.other`.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn other_methods(&self) -> Result<Vec<MethodDefinitionRc>> {
        Ok(all_with(&self.accessors()?, MethodSemanticsAttributes::OTHER))
    }

    /// Add an accessor marked `.other`.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn add_other_method(&self, method: MethodDefinitionRc) -> Result<()> {
        method.add_semantics(MethodSemanticsAttributes::OTHER)?;
        self.accessor_list()?.push(SemanticMethod {
            semantics: MethodSemanticsAttributes::OTHER,
            method,
        });
        Ok(())
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
            flags | PropertyAttributes::HAS_DEFAULT
        } else {
            flags & !PropertyAttributes::HAS_DEFAULT
        });
        self.constant.store(
            || read_with(&self.module, |reader| reader.read_constant(self.token)),
            value,
        )
    }

    /// Custom attributes on the property.
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

impl fmt::Debug for PropertyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDefinition")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("type", &self.property_type())
            .finish()
    }
}

/// An event of a type (`Event`).
pub struct EventDefinition {
    /// The `Event` token, null for events created in memory
    pub token: Token,
    /// Name
    pub name: String,
    flags: Slot<u16>,
    event_type: Slot<TypeSignature>,
    declaring_type: Backlink<TypeDefinition>,
    module: Backlink<ModuleDefinition>,
    accessors: Lazy<Collection<SemanticMethod>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
}

impl EventDefinition {
    /// A new event of the delegate type `event_type`.
    #[must_use]
    pub fn new(name: &str, flags: u16, event_type: TypeSignature) -> EventDefinitionRc {
        Arc::new(EventDefinition {
            token: Token::new(0),
            name: name.to_string(),
            flags: Slot::new(flags),
            event_type: Slot::new(event_type),
            declaring_type: Backlink::default(),
            module: Backlink::default(),
            accessors: Lazy::ready(Collection::new()),
            custom_attributes: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        name: String,
        flags: u16,
        event_type: TypeSignature,
        declaring_type: Weak<TypeDefinition>,
        module: Weak<ModuleDefinition>,
    ) -> EventDefinitionRc {
        Arc::new(EventDefinition {
            token,
            name,
            flags: Slot::new(flags),
            event_type: Slot::new(event_type),
            declaring_type: Backlink::new(declaring_type),
            module: Backlink::new(module),
            accessors: Lazy::new(),
            custom_attributes: Lazy::new(),
        })
    }

    /// `EventAttributes`
    pub fn flags(&self) -> u16 {
        self.flags.get()
    }

    /// Replace the `EventAttributes`.
    pub fn set_flags(&self, flags: u16) {
        self.flags.set(flags);
    }

    /// The delegate type.
    pub fn event_type(&self) -> TypeSignature {
        self.event_type.get()
    }

    /// Replace the delegate type.
    pub fn set_event_type(&self, event_type: TypeSignature) {
        self.event_type.set(event_type);
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

    fn accessor_list(&self) -> Result<&Collection<SemanticMethod>> {
        self.accessors
            .load(|| read_with(&self.module, |reader| reader.read_accessors(self.token)))
    }

    /// All accessors with their roles.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn accessors(&self) -> Result<Vec<SemanticMethod>> {
        Ok(self.accessor_list()?.items())
    }

    /// The `add` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn add_method(&self) -> Result<Option<MethodDefinitionRc>> {
        Ok(first_with(&self.accessors()?, MethodSemanticsAttributes::ADD_ON))
    }

    /// Replace the `add` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn set_add_method(&self, method: Option<MethodDefinitionRc>) -> Result<()> {
        replace_with(self.accessor_list()?, MethodSemanticsAttributes::ADD_ON, method)
    }

    /// The `remove` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn remove_method(&self) -> Result<Option<MethodDefinitionRc>> {
        Ok(first_with(&self.accessors()?, MethodSemanticsAttributes::REMOVE_ON))
    }

    /// Replace the `remove` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn set_remove_method(&self, method: Option<MethodDefinitionRc>) -> Result<()> {
        replace_with(self.accessor_list()?, MethodSemanticsAttributes::REMOVE_ON, method)
    }

    /// The `raise` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn invoke_method(&self) -> Result<Option<MethodDefinitionRc>> {
        Ok(first_with(&self.accessors()?, MethodSemanticsAttributes::FIRE))
    }

    /// Replace the `raise` accessor.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn set_invoke_method(&self, method: Option<MethodDefinitionRc>) -> Result<()> {
        replace_with(self.accessor_list()?, MethodSemanticsAttributes::FIRE, method)
    }

    /// Accessors marked `.other`.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn other_methods(&self) -> Result<Vec<MethodDefinitionRc>> {
        Ok(all_with(&self.accessors()?, MethodSemanticsAttributes::OTHER))
    }

    /// Custom attributes on the event.
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

impl fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDefinition")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("type", &self.event_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::{MethodAttributes, MethodDefinition};

    #[test]
    fn accessors_are_replaced_by_role() {
        let property = PropertyDefinition::new("P", 0, TypeSignature::I4);
        let first = MethodDefinition::new("get_P", MethodAttributes::SPECIAL_NAME, TypeSignature::I4);
        let second = MethodDefinition::new("get_P2", MethodAttributes::SPECIAL_NAME, TypeSignature::I4);
        let setter = MethodDefinition::new("set_P", MethodAttributes::SPECIAL_NAME, TypeSignature::Void);

        property.set_getter(Some(first)).unwrap();
        property.set_setter(Some(setter.clone())).unwrap();
        property.set_getter(Some(second.clone())).unwrap();

        assert!(Arc::ptr_eq(&property.getter().unwrap().unwrap(), &second));
        assert!(Arc::ptr_eq(&property.setter().unwrap().unwrap(), &setter));
        assert_eq!(property.accessors().unwrap().len(), 2);
        assert_eq!(setter.semantics().unwrap(), MethodSemanticsAttributes::SETTER);

        property.set_setter(None).unwrap();
        assert!(property.setter().unwrap().is_none());
    }

    #[test]
    fn event_accessors() {
        let event = EventDefinition::new("Changed", 0, TypeSignature::Object);
        let add = MethodDefinition::new("add_Changed", 0, TypeSignature::Void);
        event.set_add_method(Some(add.clone())).unwrap();

        assert!(Arc::ptr_eq(&event.add_method().unwrap().unwrap(), &add));
        assert!(event.remove_method().unwrap().is_none());
        assert!(event.invoke_method().unwrap().is_none());
        assert_eq!(add.semantics().unwrap(), MethodSemanticsAttributes::ADD_ON);
    }
}
