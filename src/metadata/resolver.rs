//! Resolution of references to the definitions they denote.
//!
//! A [`TypeReference`], [`MethodReference`] or [`FieldReference`] only describes its target
//! by shape. The [`MetadataResolver`] of the owning module finds the definition: in the
//! module itself, or in another assembly handed out by an [`AssemblyResolver`]. Members are
//! matched by name and signature, walking the base type chain of the declaring type.
//!
//! Signatures are compared structurally: two reference objects created independently can
//! denote the same entity. Nothing is cached here; an unresolvable reference is `Ok(None)`.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    metadata::{
        signatures::{MethodSignature, TypeHandle, TypeSignature},
        typesystem::{
            AssemblyDefinitionRc, AssemblyNameReference, ExportedTypeScope, FieldDefinitionRc,
            FieldReference, MethodDefinitionRc, MethodReference, ModuleDefinition,
            ModuleDefinitionRc, TypeDefinitionRc, TypeReference, TypeReferenceScope,
        },
    },
    Error::RecursionLimit,
    Result,
};

/// Maximum depth of nested references, forwarders and base types followed in one resolution.
const MAX_RESOLVE_DEPTH: usize = 64;

/// Finds assemblies referenced from a module.
pub trait AssemblyResolver: Send + Sync {
    /// The assembly matching `name`, or `None` if it is not available.
    ///
    /// # Errors
    /// Implementations return decode failures of the assemblies they load.
    fn resolve(&self, name: &AssemblyNameReference) -> Result<Option<AssemblyDefinitionRc>>;
}

/// An [`AssemblyResolver`] over modules already in memory, matched by simple name.
///
/// The registry does not keep modules alive; a module that was dropped no longer resolves.
#[derive(Default)]
pub struct AssemblyRegistry {
    modules: DashMap<String, Weak<ModuleDefinition>>,
}

impl AssemblyRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the assembly of `module` resolvable.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `module` carries no assembly manifest.
    pub fn register(&self, module: &ModuleDefinitionRc) -> Result<()> {
        let Some(assembly) = module.assembly()? else {
            return Err(crate::Error::InvalidArgument(format!(
                "module '{}' has no assembly manifest",
                module.name
            )));
        };

        self.modules
            .insert(assembly.name.name.clone(), Arc::downgrade(module));
        Ok(())
    }

    /// Number of registered assemblies.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl AssemblyResolver for AssemblyRegistry {
    fn resolve(&self, name: &AssemblyNameReference) -> Result<Option<AssemblyDefinitionRc>> {
        let module = self
            .modules
            .get(&name.name)
            .and_then(|entry| entry.value().upgrade());
        match module {
            Some(module) => module.assembly(),
            None => Ok(None),
        }
    }
}

/// Resolves the references of one module. See the [module documentation](self).
pub struct MetadataResolver {
    assembly_resolver: Option<Arc<dyn AssemblyResolver>>,
}

impl MetadataResolver {
    /// A resolver that looks up other assemblies through `assembly_resolver`.
    #[must_use]
    pub fn new(assembly_resolver: Option<Arc<dyn AssemblyResolver>>) -> Self {
        MetadataResolver { assembly_resolver }
    }

    /// The definition `reference` denotes.
    ///
    /// # Errors
    /// Propagates decode failures of the searched modules, and returns
    /// [`crate::Error::RecursionLimit`] for cyclic nesting or forwarding.
    pub fn resolve_type(&self, reference: &TypeReference) -> Result<Option<TypeDefinitionRc>> {
        self.resolve_reference(reference, 0)
    }

    /// The method definition `reference` denotes, searching the base types of its
    /// declaring type.
    ///
    /// # Errors
    /// Propagates decode failures of the searched modules.
    pub fn resolve_method(&self, reference: &MethodReference) -> Result<Option<MethodDefinitionRc>> {
        let mut current = self.resolve_signature(&reference.declaring_type, 0)?;
        let mut depth = 0;
        while let Some(definition) = current {
            if let Some(method) = definition.methods()?.into_iter().find(|method| {
                method.name == reference.name
                    && same_method_signature(&method.signature(), &reference.signature)
            }) {
                return Ok(Some(method));
            }

            depth += 1;
            current = self.base_of(&definition, depth)?;
        }

        debug!(method = %reference.full_name(), "method reference not resolved");
        Ok(None)
    }

    /// The field definition `reference` denotes, searching the base types of its declaring
    /// type.
    ///
    /// # Errors
    /// Propagates decode failures of the searched modules.
    pub fn resolve_field(&self, reference: &FieldReference) -> Result<Option<FieldDefinitionRc>> {
        let mut current = self.resolve_signature(&reference.declaring_type, 0)?;
        let mut depth = 0;
        while let Some(definition) = current {
            if let Some(field) = definition.fields()?.into_iter().find(|field| {
                field.name == reference.name && field.field_type.same_shape(&reference.field_type)
            }) {
                return Ok(Some(field));
            }

            depth += 1;
            current = self.base_of(&definition, depth)?;
        }

        debug!(field = %reference.full_name(), "field reference not resolved");
        Ok(None)
    }

    /// The main module of the assembly called `name`.
    ///
    /// # Errors
    /// Propagates the failures of the assembly resolver.
    pub fn resolve_assembly(&self, name: &AssemblyNameReference) -> Result<Option<ModuleDefinitionRc>> {
        let Some(resolver) = &self.assembly_resolver else {
            return Ok(None);
        };

        Ok(resolver
            .resolve(name)?
            .and_then(|assembly| assembly.main_module()))
    }

    fn base_of(&self, definition: &TypeDefinitionRc, depth: usize) -> Result<Option<TypeDefinitionRc>> {
        match definition.base_type()? {
            Some(base) => self.resolve_signature(&base, depth),
            None => Ok(None),
        }
    }

    /// The definition behind the `CLASS`/`VALUETYPE` handle of `signature`, looking through
    /// generic instantiations.
    fn resolve_signature(&self, signature: &TypeSignature, depth: usize) -> Result<Option<TypeDefinitionRc>> {
        if depth >= MAX_RESOLVE_DEPTH {
            return Err(RecursionLimit(MAX_RESOLVE_DEPTH));
        }

        match signature.handle() {
            Some(TypeHandle::Definition(definition)) => Ok(definition.upgrade()),
            Some(TypeHandle::Reference(reference)) => self.resolve_reference(reference, depth + 1),
            None => Ok(None),
        }
    }

    fn resolve_reference(&self, reference: &TypeReference, depth: usize) -> Result<Option<TypeDefinitionRc>> {
        if depth >= MAX_RESOLVE_DEPTH {
            return Err(RecursionLimit(MAX_RESOLVE_DEPTH));
        }

        if let TypeReferenceScope::DeclaringType(declaring) = &reference.scope {
            let Some(outer) = self.resolve_reference(declaring, depth + 1)? else {
                return Ok(None);
            };
            return Ok(outer
                .nested_types()?
                .into_iter()
                .find(|nested| nested.name == reference.name));
        }

        let Some(module) = reference.module() else {
            return Ok(None);
        };
        let target = match &reference.scope {
            TypeReferenceScope::Assembly(name) => match self.resolve_assembly(name)? {
                Some(target) => target,
                None => return Ok(None),
            },
            // only the module holding the reference is loaded
            TypeReferenceScope::Module(module_reference) if module_reference.name != module.name => {
                return Ok(None)
            }
            _ => module,
        };

        self.find_type(&target, &reference.namespace, &reference.name, depth + 1)
    }

    /// A top-level type of `module`, following `ExportedType` forwarders into other
    /// assemblies.
    fn find_type(
        &self,
        module: &ModuleDefinitionRc,
        namespace: &str,
        name: &str,
        depth: usize,
    ) -> Result<Option<TypeDefinitionRc>> {
        if depth >= MAX_RESOLVE_DEPTH {
            return Err(RecursionLimit(MAX_RESOLVE_DEPTH));
        }

        if let Some(definition) = module
            .types()?
            .into_iter()
            .find(|definition| definition.namespace == namespace && definition.name == name)
        {
            return Ok(Some(definition));
        }

        let forwarder = module.exported_types()?.into_iter().find(|exported| {
            exported.namespace == namespace
                && exported.name == name
                && matches!(exported.scope, ExportedTypeScope::Assembly(_))
        });
        let Some(forwarder) = forwarder else {
            return Ok(None);
        };
        let Some(assembly) = forwarder.assembly_name() else {
            return Ok(None);
        };

        match self.resolve_assembly(&assembly)? {
            Some(target) => self.find_type(&target, namespace, name, depth + 1),
            None => Ok(None),
        }
    }
}

/// Method signature match: arity, vararg-ness, return and parameter types by full name.
fn same_method_signature(a: &MethodSignature, b: &MethodSignature) -> bool {
    a.generic_parameter_count == b.generic_parameter_count
        && a.explicit_this == b.explicit_this
        && a.calling_convention == b.calling_convention
        && a.return_type.same_shape(&b.return_type)
        && a.parameters.len() == b.parameters.len()
        && a.parameters.iter().zip(&b.parameters).all(|(a, b)| a.same_shape(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        image::ModuleKind,
        typesystem::{
            AssemblyVersion, FieldAttributes, FieldDefinition, MethodAttributes,
            MethodDefinition, ParameterDefinition, TypeAttributes, TypeDefinition,
        },
    };

    fn library() -> (ModuleDefinitionRc, TypeDefinitionRc) {
        let module = ModuleDefinition::create_assembly(
            AssemblyNameReference::new("Library", AssemblyVersion::new(1, 0, 0, 0)),
            "Library.dll",
            ModuleKind::Dll,
        );
        let base = TypeDefinition::new("Lib", "Base", TypeAttributes::PUBLIC, None);
        let method = MethodDefinition::new("Run", MethodAttributes::PUBLIC, TypeSignature::Void);
        method.add_parameter(ParameterDefinition::new("count", 0, TypeSignature::I4));
        base.add_method(method).unwrap();
        base.add_field(FieldDefinition::new("Value", FieldAttributes::PUBLIC, TypeSignature::String))
            .unwrap();
        module.add_type(base.clone()).unwrap();

        let derived = TypeDefinition::new(
            "Lib",
            "Derived",
            TypeAttributes::PUBLIC,
            Some(TypeSignature::class(&base)),
        );
        module.add_type(derived.clone()).unwrap();
        (module, derived)
    }

    #[test]
    fn members_are_found_on_base_types() {
        let (library, derived) = library();
        let registry = Arc::new(AssemblyRegistry::new());
        registry.register(&library).unwrap();

        let client = ModuleDefinition::create("Client.dll", ModuleKind::Dll);
        let scope = client
            .add_assembly_reference(AssemblyNameReference::new(
                "Library",
                AssemblyVersion::new(1, 0, 0, 0),
            ))
            .unwrap();
        let reference = TypeReference::new(&client, "Lib", "Derived", TypeReferenceScope::Assembly(scope));
        let declaring = TypeSignature::reference(&reference, false);

        let resolver = MetadataResolver::new(Some(registry));
        let resolved = resolver.resolve_type(&reference).unwrap().unwrap();
        assert!(Arc::ptr_eq(&resolved, &derived));

        let run = MethodReference::new(
            &client,
            "Run",
            declaring.clone(),
            MethodSignature {
                has_this: true,
                ..MethodSignature::new(TypeSignature::Void, vec![TypeSignature::I4])
            },
        );
        let method = resolver.resolve_method(&run).unwrap().unwrap();
        assert_eq!(method.full_name(), "Lib.Base::Run");

        let wrong = MethodReference::new(
            &client,
            "Run",
            declaring.clone(),
            MethodSignature::new(TypeSignature::Void, vec![TypeSignature::I8]),
        );
        assert!(resolver.resolve_method(&wrong).unwrap().is_none());

        let value = FieldReference::new(&client, "Value", declaring, TypeSignature::String);
        assert!(resolver.resolve_field(&value).unwrap().is_some());
    }

    #[test]
    fn missing_assemblies_resolve_to_none() {
        let client = ModuleDefinition::create("Client.dll", ModuleKind::Dll);
        let scope = client.corlib_reference().unwrap();
        let reference = TypeReference::new(&client, "System", "Object", TypeReferenceScope::Assembly(scope));

        assert!(MetadataResolver::new(None).resolve_type(&reference).unwrap().is_none());
        let empty = Arc::new(AssemblyRegistry::new());
        assert!(MetadataResolver::new(Some(empty))
            .resolve_type(&reference)
            .unwrap()
            .is_none());
    }

    #[test]
    fn local_nested_references() {
        let module = ModuleDefinition::create("Local.dll", ModuleKind::Dll);
        let outer = TypeDefinition::new("N", "Outer", TypeAttributes::PUBLIC, None);
        let inner = TypeDefinition::new("", "Inner", TypeAttributes::NESTED_PUBLIC, None);
        outer.add_nested_type(inner.clone()).unwrap();
        module.add_type(outer).unwrap();

        let outer_ref = TypeReference::new(&module, "N", "Outer", TypeReferenceScope::CurrentModule);
        let inner_ref = TypeReference::new(&module, "", "Inner", TypeReferenceScope::DeclaringType(outer_ref));
        let resolved = module.resolver().resolve_type(&inner_ref).unwrap().unwrap();
        assert!(Arc::ptr_eq(&resolved, &inner));
    }
}
