use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        signatures::{
            read_custom_attribute, read_security_declaration, ArraySignature, AttributeContext,
            CustomAttributeValue, SecurityAction, SecurityAttribute, TypeHandle, TypeName,
            TypeSignature,
        },
        token::Token,
        typesystem::{
            AssemblyNameReference, Backlink, Lazy, MethodHandle, ModuleDefinition,
            ModuleDefinitionRc, TypeDefinitionRc, TypeReference, TypeReferenceRc,
            TypeReferenceScope,
        },
    },
    Error, Result,
};

/// A reference to a `CustomAttribute`
pub type CustomAttributeRc = Arc<CustomAttribute>;
/// A reference to a `SecurityDeclaration`
pub type SecurityDeclarationRc = Arc<SecurityDeclaration>;

fn dropped_module() -> Error {
    Error::InvalidArgument("the module owning this attribute has been dropped".to_string())
}

/// A custom attribute attached to a metadata entity.
///
/// Attributes read from metadata keep their raw blob; the value is decoded on first access,
/// since decoding enum arguments may need to resolve types in other assemblies.
pub struct CustomAttribute {
    /// The `CustomAttribute` token, null for attributes created in memory
    pub token: Token,
    /// The attribute constructor
    pub constructor: MethodHandle,
    module: Backlink<ModuleDefinition>,
    blob: Option<Vec<u8>>,
    value: Lazy<CustomAttributeValue>,
}

impl CustomAttribute {
    /// A new attribute with an already known value.
    #[must_use]
    pub fn new(constructor: MethodHandle, value: CustomAttributeValue) -> CustomAttributeRc {
        Arc::new(CustomAttribute {
            token: Token::new(0),
            constructor,
            module: Backlink::default(),
            blob: None,
            value: Lazy::ready(value),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        constructor: MethodHandle,
        blob: Vec<u8>,
        module: Weak<ModuleDefinition>,
    ) -> CustomAttributeRc {
        Arc::new(CustomAttribute {
            token,
            constructor,
            module: Backlink::new(module),
            blob: Some(blob),
            value: Lazy::new(),
        })
    }

    /// The attribute type, i.e. the constructor's declaring type.
    pub fn attribute_type(&self) -> Option<TypeSignature> {
        self.constructor.declaring_type()
    }

    /// The blob as read from metadata.
    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// True once the value is known, either decoded or given at creation.
    pub fn is_decoded(&self) -> bool {
        self.value.is_loaded()
    }

    /// The decoded constructor and named arguments.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed, an enum argument type can not be resolved,
    /// or the owning module was dropped.
    pub fn value(&self) -> Result<CustomAttributeValue> {
        self.value
            .get_or_populate(|| {
                let module = self.module.get().ok_or_else(dropped_module)?;
                let parameters = self.constructor.signature()?.parameters;
                let mut context = ModuleAttributeContext::new(&module);
                read_custom_attribute(self.blob().unwrap_or_default(), &parameters, &mut context)
            })
            .cloned()
    }
}

impl fmt::Debug for CustomAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAttribute")
            .field("token", &self.token)
            .field("constructor", &self.constructor)
            .field("decoded", &self.is_decoded())
            .finish()
    }
}

/// A `DeclSecurity` row: a security action with its permission attributes.
pub struct SecurityDeclaration {
    /// The `DeclSecurity` token, null for declarations created in memory
    pub token: Token,
    /// The security action
    pub action: SecurityAction,
    module: Backlink<ModuleDefinition>,
    blob: Option<Vec<u8>>,
    attributes: Lazy<Vec<SecurityAttribute>>,
}

impl SecurityDeclaration {
    /// A new declaration with known permission attributes.
    #[must_use]
    pub fn new(action: SecurityAction, attributes: Vec<SecurityAttribute>) -> SecurityDeclarationRc {
        Arc::new(SecurityDeclaration {
            token: Token::new(0),
            action,
            module: Backlink::default(),
            blob: None,
            attributes: Lazy::ready(attributes),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        action: SecurityAction,
        blob: Vec<u8>,
        module: Weak<ModuleDefinition>,
    ) -> SecurityDeclarationRc {
        Arc::new(SecurityDeclaration {
            token,
            action,
            module: Backlink::new(module),
            blob: Some(blob),
            attributes: Lazy::new(),
        })
    }

    /// The permission set blob as read from metadata.
    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// True once the permission attributes are known.
    pub fn is_decoded(&self) -> bool {
        self.attributes.is_loaded()
    }

    /// The permission attributes.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or the owning module was dropped.
    pub fn attributes(&self) -> Result<Vec<SecurityAttribute>> {
        self.attributes
            .get_or_populate(|| {
                let module = self.module.get().ok_or_else(dropped_module)?;
                let mut context = ModuleAttributeContext::new(&module);
                read_security_declaration(self.blob().unwrap_or_default(), &mut context)
            })
            .cloned()
    }
}

impl fmt::Debug for SecurityDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityDeclaration")
            .field("token", &self.token)
            .field("action", &self.action)
            .finish()
    }
}

/// Names of assemblies that act as the core library.
pub(crate) const CORLIB_NAMES: &[&str] = &[
    "mscorlib",
    "System.Runtime",
    "System.Private.CoreLib",
    "netstandard",
];

/// Resolves the type names and enum types found in attribute blobs against one module.
pub struct ModuleAttributeContext {
    module: ModuleDefinitionRc,
}

impl ModuleAttributeContext {
    /// A context for blobs of `module`.
    #[must_use]
    pub fn new(module: &ModuleDefinitionRc) -> Self {
        ModuleAttributeContext {
            module: module.clone(),
        }
    }

    fn definition(&self, handle: &TypeHandle) -> Result<Option<TypeDefinitionRc>> {
        match handle {
            TypeHandle::Definition(definition) => Ok(definition.upgrade()),
            TypeHandle::Reference(reference) => reference.resolve(),
        }
    }

    fn reference_chain(
        &self,
        name: &TypeName,
        scope: TypeReferenceScope,
    ) -> TypeReferenceRc {
        let mut reference = TypeReference::new(&self.module, &name.namespace, &name.name, scope);
        for nested in &name.nested {
            reference = TypeReference::new(
                &self.module,
                "",
                nested,
                TypeReferenceScope::DeclaringType(reference),
            );
        }
        reference
    }

    fn local_type(&self, name: &TypeName) -> Result<Option<TypeDefinitionRc>> {
        let Some(mut current) = self.module.get_type(&name.outer_full_name())? else {
            return Ok(None);
        };

        for nested in &name.nested {
            let found = current
                .nested_types()?
                .into_iter()
                .find(|candidate| &candidate.name == nested);
            match found {
                Some(found) => current = found,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// The assembly qualifier a type name needs when written from this module.
    fn qualifier(&self, handle: &TypeHandle) -> Option<String> {
        let assembly = match handle {
            TypeHandle::Definition(definition) => {
                let owner = definition.upgrade()?.module()?;
                if Arc::ptr_eq(&owner, &self.module) {
                    return None;
                }
                owner.assembly().ok()??.name.clone()
            }
            TypeHandle::Reference(reference) => (*reference.assembly_name()?).clone(),
        };

        if CORLIB_NAMES.contains(&assembly.name.as_str()) {
            None
        } else {
            Some(assembly.full_name())
        }
    }
}

fn serialized_name(handle: &TypeHandle) -> String {
    // Nested types use '+' in serialized names
    handle.full_name().replace('/', "+")
}

impl AttributeContext for ModuleAttributeContext {
    fn enum_underlying_type(&mut self, enum_type: &TypeSignature) -> Result<TypeSignature> {
        let not_found = || Error::TypeNotFound(enum_type.full_name());
        let handle = enum_type.handle().ok_or_else(not_found)?;
        let definition = self.definition(handle)?.ok_or_else(not_found)?;

        definition
            .fields()?
            .into_iter()
            .find(|field| !field.is_static())
            .map(|field| field.field_type.clone())
            .ok_or_else(not_found)
    }

    fn type_from_name(&mut self, name: &str) -> Result<TypeSignature> {
        let parsed = TypeName::parse(name)?;

        let base = match &parsed.assembly {
            None => match self.local_type(&parsed)? {
                Some(definition) => TypeSignature::class(&definition),
                None => {
                    let corlib = self.module.corlib_reference()?;
                    let reference =
                        self.reference_chain(&parsed, TypeReferenceScope::Assembly(corlib));
                    TypeSignature::reference(&reference, false)
                }
            },
            Some(assembly) => {
                let name = AssemblyNameReference::parse(assembly)?;
                let assembly = self.module.find_or_add_assembly_reference(name)?;
                let reference =
                    self.reference_chain(&parsed, TypeReferenceScope::Assembly(assembly));
                TypeSignature::reference(&reference, false)
            }
        };

        Ok(parsed
            .arrays
            .iter()
            .fold(base, |element, array| match array {
                None => TypeSignature::sz_array(element),
                Some(rank) => TypeSignature::Array(ArraySignature {
                    element: Box::new(element),
                    rank: *rank,
                    dimensions: Vec::new(),
                }),
            }))
    }

    fn type_name(&mut self, signature: &TypeSignature) -> Result<String> {
        if signature.primitive_name().is_some() {
            return Ok(signature.full_name());
        }

        match signature {
            TypeSignature::Class(handle) | TypeSignature::ValueType(handle) => {
                let name = serialized_name(handle);
                Ok(match self.qualifier(handle) {
                    Some(assembly) => format!("{name}, {assembly}"),
                    None => name,
                })
            }
            TypeSignature::SzArray(element) => {
                let (name, qualifier) = split_qualifier(self.type_name(element)?);
                Ok(join_qualifier(format!("{name}[]"), qualifier))
            }
            TypeSignature::Array(array) => {
                let (name, qualifier) = split_qualifier(self.type_name(&array.element)?);
                let commas = ",".repeat(array.rank.saturating_sub(1) as usize);
                let suffix = if array.rank == 1 {
                    "[*]".to_string()
                } else {
                    format!("[{commas}]")
                };
                Ok(join_qualifier(format!("{name}{suffix}"), qualifier))
            }
            other => Err(Error::NotSupported(format!(
                "type {} has no serialized name",
                other.full_name()
            ))),
        }
    }

    fn system_type(&mut self, namespace: &str, name: &str) -> Result<TypeSignature> {
        let corlib = self.module.corlib_reference()?;
        let reference = TypeReference::new(
            &self.module,
            namespace,
            name,
            TypeReferenceScope::Assembly(corlib),
        );
        Ok(TypeSignature::reference(&reference, false))
    }
}

fn split_qualifier(name: String) -> (String, Option<String>) {
    match name.split_once(", ") {
        Some((name, qualifier)) => (name.to_string(), Some(qualifier.to_string())),
        None => (name, None),
    }
}

fn join_qualifier(name: String, qualifier: Option<String>) -> String {
    match qualifier {
        Some(qualifier) => format!("{name}, {qualifier}"),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        image::ModuleKind,
        signatures::{CustomAttributeArgument, CustomAttributeElement, MethodSignature},
        typesystem::{
            AssemblyVersion, FieldAttributes, FieldDefinition, MethodReference, TypeAttributes,
            TypeDefinition,
        },
    };

    #[test]
    fn local_names_resolve_to_definitions() {
        let module = ModuleDefinition::create("Attrs.dll", ModuleKind::Dll);
        let outer = TypeDefinition::new("N", "Outer", TypeAttributes::PUBLIC, None);
        let inner = TypeDefinition::new("", "Inner", TypeAttributes::NESTED_PUBLIC, None);
        outer.add_nested_type(inner.clone()).unwrap();
        module.add_type(outer).unwrap();

        let mut context = ModuleAttributeContext::new(&module);
        let resolved = context.type_from_name("N.Outer+Inner").unwrap();
        assert_eq!(resolved, TypeSignature::class(&inner));
        assert_eq!(context.type_name(&resolved).unwrap(), "N.Outer+Inner");
    }

    #[test]
    fn foreign_names_are_qualified() {
        let module = ModuleDefinition::create("Attrs.dll", ModuleKind::Dll);
        let mut context = ModuleAttributeContext::new(&module);

        let name = "Lib.Kind[], Lib, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null";
        let resolved = context.type_from_name(name).unwrap();
        assert_eq!(resolved.full_name(), "Lib.Kind[]");
        assert_eq!(context.type_name(&resolved).unwrap(), name);

        let references = module.assembly_references().unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].version, AssemblyVersion::new(1, 2, 0, 0));
    }

    #[test]
    fn unqualified_unknown_names_go_to_corlib() {
        let module = ModuleDefinition::create("Attrs.dll", ModuleKind::Dll);
        let mut context = ModuleAttributeContext::new(&module);

        let resolved = context.type_from_name("System.AttributeTargets").unwrap();
        assert_eq!(context.type_name(&resolved).unwrap(), "System.AttributeTargets");
        assert_eq!(module.assembly_references().unwrap()[0].name, "mscorlib");
    }

    #[test]
    fn enum_underlying_type_is_the_instance_field() {
        let module = ModuleDefinition::create("Attrs.dll", ModuleKind::Dll);
        let color = TypeDefinition::new("N", "Color", TypeAttributes::PUBLIC, None);
        color
            .add_field(FieldDefinition::new(
                "Red",
                FieldAttributes::STATIC | FieldAttributes::LITERAL,
                TypeSignature::class(&color),
            ))
            .unwrap();
        color
            .add_field(FieldDefinition::new(
                "value__",
                FieldAttributes::PUBLIC,
                TypeSignature::U2,
            ))
            .unwrap();
        module.add_type(color.clone()).unwrap();

        let mut context = ModuleAttributeContext::new(&module);
        assert_eq!(
            context
                .enum_underlying_type(&TypeSignature::value_type(&color))
                .unwrap(),
            TypeSignature::U2
        );
        assert!(matches!(
            context.enum_underlying_type(&TypeSignature::I4),
            Err(Error::TypeNotFound(_))
        ));
    }

    #[test]
    fn values_decode_against_the_constructor() {
        let module = ModuleDefinition::create("Attrs.dll", ModuleKind::Dll);
        let attribute_type = TypeReference::new(&module, "N", "A", TypeReferenceScope::None);
        let mut signature = MethodSignature::new(TypeSignature::Void, vec![TypeSignature::I4]);
        signature.has_this = true;
        let constructor = MethodReference::new(
            &module,
            ".ctor",
            TypeSignature::reference(&attribute_type, false),
            signature,
        );

        let attribute = CustomAttribute::from_metadata(
            Token::new(0x0C00_0001),
            MethodHandle::Reference(constructor),
            vec![0x01, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00],
            Arc::downgrade(&module),
        );
        assert!(!attribute.is_decoded());

        let value = attribute.value().unwrap();
        assert_eq!(
            value.fixed_arguments,
            vec![CustomAttributeArgument::new(
                TypeSignature::I4,
                CustomAttributeElement::I4(42)
            )]
        );
        assert!(attribute.is_decoded());
        assert_eq!(attribute.attribute_type().unwrap().full_name(), "N.A");
    }
}
