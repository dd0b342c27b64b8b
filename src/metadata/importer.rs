//! Importing types and members of one module into another.
//!
//! An imported entity is always a reference owned by the target module: definitions of a
//! foreign module become `TypeRef`/`MemberRef` shaped objects scoped to the foreign
//! assembly, references are re-created with their assembly scope registered in the
//! target's `AssemblyRef` list. Entities that already belong to the target pass through
//! unchanged.

use std::sync::Arc;

use tracing::trace;

use crate::{
    metadata::{
        signatures::{ArraySignature, GenericParamSig, MethodSignature, TypeSignature, TypeHandle},
        token::Token,
        typesystem::{
            AssemblyNameReference, AssemblyNameReferenceRc, FieldHandle, FieldReference,
            GenericInstanceMethod, GenericOwnerRef, GenericParameterKind, MethodHandle,
            MethodReference, ModuleDefinitionRc, TypeDefinitionRc, TypeReference,
            TypeReferenceRc, TypeReferenceScope,
        },
    },
    Error, Result,
};

/// The generic providers of the target graph that imported `!n` / `!!n` bind to.
///
/// Providers are searched innermost first. An empty stack imports parameters as unbound
/// placeholders.
#[derive(Debug, Clone, Default)]
pub struct ImportGenericContext {
    providers: Vec<GenericOwnerRef>,
}

impl ImportGenericContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        ImportGenericContext::default()
    }

    /// Make `provider` the innermost provider.
    pub fn push(&mut self, provider: GenericOwnerRef) {
        self.providers.push(provider);
    }

    /// Push `provider` only if it declares generic parameters.
    ///
    /// # Errors
    /// Propagates errors from lazily reading the provider's parameter list.
    pub fn push_if_generic(&mut self, provider: GenericOwnerRef) -> Result<()> {
        if provider.parameter(0)?.is_some() {
            self.providers.push(provider);
        }
        Ok(())
    }

    /// Remove the innermost provider.
    pub fn pop(&mut self) -> Option<GenericOwnerRef> {
        self.providers.pop()
    }

    /// True if no provider is on the stack.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Bind a `kind` parameter at `position` to the innermost provider that declares it.
    ///
    /// With no provider on the stack the parameter stays an unbound placeholder.
    ///
    /// # Errors
    /// Returns [`Error::UnboundGenericParameter`] if providers are in scope but none of
    /// them declares the parameter, and propagates errors from lazily reading a
    /// provider's parameter list.
    pub fn bind(&self, kind: GenericParameterKind, position: u16) -> Result<GenericParamSig> {
        if self.providers.is_empty() {
            return Ok(GenericParamSig::unbound(kind, position));
        }

        for provider in self.providers.iter().rev() {
            if provider.kind() != kind {
                continue;
            }
            if provider.parameter(position)?.is_some() {
                return Ok(GenericParamSig {
                    kind,
                    position,
                    owner: Some(provider.clone()),
                });
            }
        }
        Err(Error::UnboundGenericParameter { position })
    }
}

/// Creates references in a target module for entities of other modules.
pub struct MetadataImporter {
    module: ModuleDefinitionRc,
}

impl MetadataImporter {
    /// An importer targeting `module`.
    #[must_use]
    pub fn new(module: &ModuleDefinitionRc) -> Self {
        MetadataImporter {
            module: module.clone(),
        }
    }

    fn is_local(&self, module: Option<ModuleDefinitionRc>) -> bool {
        module.is_some_and(|module| Arc::ptr_eq(&module, &self.module))
    }

    /// Import `signature`, rewriting every type handle into the target module.
    ///
    /// # Errors
    /// Returns [`Error::NotImplemented`] for types scoped to a module with no assembly, and
    /// [`Error::InvalidArgument`] for handles whose definition was dropped.
    pub fn import_type(
        &self,
        signature: &TypeSignature,
        context: &mut ImportGenericContext,
    ) -> Result<TypeSignature> {
        Ok(match signature {
            TypeSignature::Class(handle) => TypeSignature::Class(self.import_handle(handle)?),
            TypeSignature::ValueType(handle) => {
                TypeSignature::ValueType(self.import_handle(handle)?)
            }
            TypeSignature::Ptr(inner) => TypeSignature::Ptr(self.boxed(inner, context)?),
            TypeSignature::ByRef(inner) => TypeSignature::ByRef(self.boxed(inner, context)?),
            TypeSignature::Pinned(inner) => TypeSignature::Pinned(self.boxed(inner, context)?),
            TypeSignature::Sentinel(inner) => TypeSignature::Sentinel(self.boxed(inner, context)?),
            TypeSignature::SzArray(inner) => TypeSignature::SzArray(self.boxed(inner, context)?),
            TypeSignature::Array(array) => TypeSignature::Array(ArraySignature {
                element: self.boxed(&array.element, context)?,
                rank: array.rank,
                dimensions: array.dimensions.clone(),
            }),
            TypeSignature::Modified {
                required,
                modifier,
                base,
            } => TypeSignature::Modified {
                required: *required,
                modifier: self.boxed(modifier, context)?,
                base: self.boxed(base, context)?,
            },
            TypeSignature::GenericInst { generic, arguments } => TypeSignature::GenericInst {
                generic: self.boxed(generic, context)?,
                arguments: arguments
                    .iter()
                    .map(|argument| self.import_type(argument, context))
                    .collect::<Result<_>>()?,
            },
            TypeSignature::GenericParam(param) => {
                TypeSignature::GenericParam(context.bind(param.kind, param.position)?)
            }
            TypeSignature::FnPtr(method) => {
                TypeSignature::FnPtr(Box::new(self.import_signature(method, context)?))
            }
            primitive => primitive.clone(),
        })
    }

    fn boxed(
        &self,
        inner: &TypeSignature,
        context: &mut ImportGenericContext,
    ) -> Result<Box<TypeSignature>> {
        Ok(Box::new(self.import_type(inner, context)?))
    }

    fn import_signature(
        &self,
        signature: &MethodSignature,
        context: &mut ImportGenericContext,
    ) -> Result<MethodSignature> {
        Ok(MethodSignature {
            has_this: signature.has_this,
            explicit_this: signature.explicit_this,
            calling_convention: signature.calling_convention,
            generic_parameter_count: signature.generic_parameter_count,
            return_type: self.import_type(&signature.return_type, context)?,
            parameters: signature
                .parameters
                .iter()
                .map(|parameter| self.import_type(parameter, context))
                .collect::<Result<_>>()?,
        })
    }

    fn import_handle(&self, handle: &TypeHandle) -> Result<TypeHandle> {
        if self.is_local(handle.module()) {
            return Ok(handle.clone());
        }

        let reference = match handle {
            TypeHandle::Definition(definition) => match definition.upgrade() {
                Some(definition) => self.import_definition(&definition)?,
                None => {
                    return Err(Error::InvalidArgument(
                        "type definition has been dropped".to_string(),
                    ))
                }
            },
            TypeHandle::Reference(reference) => self.import_reference(reference)?,
        };
        trace!(name = %reference.full_name(), "imported type");
        Ok(TypeHandle::Reference(reference))
    }

    fn import_definition(&self, definition: &TypeDefinitionRc) -> Result<TypeReferenceRc> {
        let scope = match definition.declaring_type() {
            Some(declaring) => TypeReferenceScope::DeclaringType(self.import_definition(&declaring)?),
            None => {
                let source = definition.module().ok_or_else(|| {
                    Error::InvalidArgument("type definition has no module".to_string())
                })?;
                match source.assembly()? {
                    Some(assembly) => TypeReferenceScope::Assembly(self.import_assembly(&assembly.name)?),
                    None => {
                        return Err(Error::NotImplemented(format!(
                            "importing {} from a module without an assembly",
                            definition.full_name()
                        )))
                    }
                }
            }
        };

        Ok(TypeReference::new(
            &self.module,
            &definition.namespace,
            &definition.name,
            scope,
        ))
    }

    fn import_reference(&self, reference: &TypeReferenceRc) -> Result<TypeReferenceRc> {
        let scope = match &reference.scope {
            TypeReferenceScope::Assembly(assembly) => {
                TypeReferenceScope::Assembly(self.import_assembly(assembly)?)
            }
            TypeReferenceScope::DeclaringType(declaring) => {
                TypeReferenceScope::DeclaringType(self.import_reference(declaring)?)
            }
            TypeReferenceScope::CurrentModule => {
                let assembly = reference
                    .module()
                    .map(|source| source.assembly())
                    .transpose()?
                    .flatten();
                match assembly {
                    Some(assembly) => {
                        TypeReferenceScope::Assembly(self.import_assembly(&assembly.name)?)
                    }
                    None => return Err(Self::module_scoped(reference)),
                }
            }
            TypeReferenceScope::Module(_) | TypeReferenceScope::None => {
                return Err(Self::module_scoped(reference))
            }
        };

        Ok(TypeReference::new(
            &self.module,
            &reference.namespace,
            &reference.name,
            scope,
        ))
    }

    fn module_scoped(reference: &TypeReferenceRc) -> Error {
        Error::NotImplemented(format!(
            "importing {} from a module scope",
            reference.full_name()
        ))
    }

    fn import_assembly(&self, name: &AssemblyNameReference) -> Result<AssemblyNameReferenceRc> {
        self.module.find_or_add_assembly_reference(AssemblyNameReference {
            token: Token::new(0),
            ..name.clone()
        })
    }

    /// Import a method, producing a `MemberRef` (or `MethodSpec`) shaped handle.
    ///
    /// `context` applies to the declaring type and to instantiation arguments. The method
    /// signature binds `!n` and `!!n` to the source method and its declaring type; for a
    /// source reference they stay positional placeholders.
    ///
    /// # Errors
    /// See [`MetadataImporter::import_type`]; a method without a declaring type is
    /// [`Error::InvalidArgument`].
    pub fn import_method(
        &self,
        method: &MethodHandle,
        context: &mut ImportGenericContext,
    ) -> Result<MethodHandle> {
        if self.is_local(method.module()) {
            return Ok(method.clone());
        }

        if let MethodHandle::Instance(instance) = method {
            let open = self.import_method(&instance.method, context)?;
            let arguments = instance
                .arguments
                .iter()
                .map(|argument| self.import_type(argument, context))
                .collect::<Result<Vec<_>>>()?;
            return Ok(MethodHandle::Instance(GenericInstanceMethod::new(
                &self.module,
                open,
                arguments,
            )));
        }

        let declaring = method.declaring_type().ok_or_else(|| {
            Error::InvalidArgument(format!("{} has no declaring type", method.name()))
        })?;
        let declaring = self.import_type(&declaring, context)?;
        let mut own_context = ImportGenericContext::new();
        if let Some(definition) = method.as_definition() {
            if let Some(declaring) = definition.declaring_type() {
                own_context.push_if_generic(GenericOwnerRef::Type(Arc::downgrade(&declaring)))?;
            }
            own_context.push_if_generic(GenericOwnerRef::Method(Arc::downgrade(&definition)))?;
        }
        let signature = self.import_signature(&method.signature()?, &mut own_context)?;

        trace!(name = %method.full_name(), "imported method");
        Ok(MethodHandle::Reference(MethodReference::new(
            &self.module,
            &method.name(),
            declaring,
            signature,
        )))
    }

    /// Import a field, producing a `MemberRef` shaped handle.
    ///
    /// # Errors
    /// See [`MetadataImporter::import_type`]; a dropped field definition is
    /// [`Error::InvalidArgument`].
    pub fn import_field(
        &self,
        field: &FieldHandle,
        context: &mut ImportGenericContext,
    ) -> Result<FieldHandle> {
        if self.is_local(field.module()) {
            return Ok(field.clone());
        }

        let (Some(declaring), Some(field_type)) = (field.declaring_type(), field.field_type())
        else {
            return Err(Error::InvalidArgument(format!(
                "field {} has been dropped or has no declaring type",
                field.name()
            )));
        };

        let mut own_context = ImportGenericContext::new();
        if let FieldHandle::Definition(definition) = field {
            if let Some(declaring) = definition.upgrade().and_then(|field| field.declaring_type()) {
                own_context.push_if_generic(GenericOwnerRef::Type(Arc::downgrade(&declaring)))?;
            }
        }

        Ok(FieldHandle::Reference(FieldReference::new(
            &self.module,
            &field.name(),
            self.import_type(&declaring, context)?,
            self.import_type(&field_type, &mut own_context)?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        image::ModuleKind,
        typesystem::{
            AssemblyVersion, FieldDefinition, MethodDefinition, ModuleDefinition,
            ParameterDefinition, TypeAttributes, TypeDefinition,
        },
    };

    fn library() -> (ModuleDefinitionRc, TypeDefinitionRc) {
        let module = ModuleDefinition::create_assembly(
            AssemblyNameReference::new("Library", AssemblyVersion::new(1, 2, 0, 0)),
            "Library.dll",
            ModuleKind::Dll,
        );
        let definition = TypeDefinition::new("Library", "Util", TypeAttributes::PUBLIC, None);
        module.add_type(definition.clone()).unwrap();
        (module, definition)
    }

    fn application() -> ModuleDefinitionRc {
        ModuleDefinition::create_assembly(
            AssemblyNameReference::new("Application", AssemblyVersion::new(1, 0, 0, 0)),
            "Application.exe",
            ModuleKind::Console,
        )
    }

    #[test]
    fn foreign_definitions_become_references() {
        let (_library, util) = library();
        let target = application();

        let imported = MetadataImporter::new(&target)
            .import_type(&TypeSignature::class(&util), &mut ImportGenericContext::new())
            .unwrap();

        let reference = imported.handle().and_then(TypeHandle::as_reference).unwrap();
        assert_eq!(reference.full_name(), "Library.Util");
        assert_eq!(reference.assembly_name().unwrap().name, "Library");
        assert!(Arc::ptr_eq(&reference.module().unwrap(), &target));
        assert_eq!(target.assembly_references().unwrap().len(), 1);
    }

    #[test]
    fn assembly_references_are_shared() {
        let (_library, util) = library();
        let target = application();
        let importer = MetadataImporter::new(&target);

        importer
            .import_type(&TypeSignature::class(&util), &mut ImportGenericContext::new())
            .unwrap();
        importer
            .import_type(
                &TypeSignature::sz_array(TypeSignature::class(&util)),
                &mut ImportGenericContext::new(),
            )
            .unwrap();

        assert_eq!(target.assembly_references().unwrap().len(), 1);
    }

    #[test]
    fn module_scoped_references_are_rejected() {
        let source = ModuleDefinition::create("Loose.netmodule", ModuleKind::NetModule);
        let reference = TypeReference::new(&source, "Loose", "Thing", TypeReferenceScope::None);
        let target = application();

        let error = MetadataImporter::new(&target)
            .import_type(
                &TypeSignature::reference(&reference, false),
                &mut ImportGenericContext::new(),
            )
            .unwrap_err();
        assert!(matches!(error, Error::NotImplemented(_)));
    }

    #[test]
    fn generic_methods_keep_positional_parameters() {
        let (_library, util) = library();
        let method = MethodDefinition::new("Echo", 0x0016, TypeSignature::method_parameter(0));
        util.add_method(method.clone()).unwrap();
        method.add_generic_parameter("T").unwrap();
        method.add_parameter(ParameterDefinition::new(
            "value",
            0,
            TypeSignature::method_parameter(0),
        ));

        let target = application();
        let imported = MetadataImporter::new(&target)
            .import_method(&MethodHandle::definition(&method), &mut ImportGenericContext::new())
            .unwrap();

        let signature = imported.signature().unwrap();
        assert_eq!(signature.generic_parameter_count, 1);
        assert_eq!(signature.parameters, vec![TypeSignature::method_parameter(0)]);

        let instance = GenericInstanceMethod::new(&target, imported, vec![TypeSignature::I4]);
        let resolved = instance.resolved_signature().unwrap();
        assert_eq!(resolved.return_type, TypeSignature::I4);
        assert_eq!(resolved.parameters, vec![TypeSignature::I4]);
    }

    #[test]
    fn method_signatures_bind_to_the_source_method() {
        let (_library, util) = library();
        let echo = MethodDefinition::new("Echo", 0x0016, TypeSignature::method_parameter(0));
        util.add_method(echo.clone()).unwrap();
        echo.add_generic_parameter("T").unwrap();
        echo.add_parameter(ParameterDefinition::new(
            "value",
            0,
            TypeSignature::method_parameter(0),
        ));

        let target = application();
        let program = TypeDefinition::new("App", "Program", TypeAttributes::PUBLIC, None);
        target.add_type(program.clone()).unwrap();
        let caller = MethodDefinition::new("Caller", 0x0016, TypeSignature::Void);
        program.add_method(caller.clone()).unwrap();

        let mut context = ImportGenericContext::new();
        context.push(GenericOwnerRef::Method(Arc::downgrade(&caller)));
        let imported = MetadataImporter::new(&target)
            .import_method(&MethodHandle::definition(&echo), &mut context)
            .unwrap();

        let signature = imported.signature().unwrap();
        let TypeSignature::GenericParam(param) = &signature.return_type else {
            panic!("expected a generic parameter");
        };
        assert!(param.is_bound());
        assert_eq!(param.name(), "T");
        assert_eq!(signature.parameters, vec![TypeSignature::method_parameter(0)]);

        // the caller's context is left as it was
        assert!(context.pop().is_some());
        assert!(context.is_empty());
    }

    #[test]
    fn fields_of_generic_types_bind_to_the_source_type() {
        let (library, _util) = library();
        let bag = TypeDefinition::new("Library", "Bag`1", TypeAttributes::PUBLIC, None);
        library.add_type(bag.clone()).unwrap();
        bag.add_generic_parameter("T").unwrap();
        let item = FieldDefinition::new("item", 0x0006, TypeSignature::type_parameter(0));
        bag.add_field(item.clone()).unwrap();

        let target = application();
        let imported = MetadataImporter::new(&target)
            .import_field(&FieldHandle::definition(&item), &mut ImportGenericContext::new())
            .unwrap();

        let field_type = imported.field_type().unwrap();
        let TypeSignature::GenericParam(param) = &field_type else {
            panic!("expected a generic parameter");
        };
        assert!(param.is_bound());
        assert_eq!(field_type, TypeSignature::type_parameter(0));
    }

    #[test]
    fn parameters_bind_to_pushed_providers() {
        let target = application();
        let holder = TypeDefinition::new("App", "Holder`1", TypeAttributes::PUBLIC, None);
        target.add_type(holder.clone()).unwrap();
        holder.add_generic_parameter("T").unwrap();

        let importer = MetadataImporter::new(&target);
        let mut context = ImportGenericContext::new();
        context.push(GenericOwnerRef::Type(Arc::downgrade(&holder)));

        let imported = importer
            .import_type(
                &TypeSignature::sz_array(TypeSignature::type_parameter(0)),
                &mut context,
            )
            .unwrap();
        let TypeSignature::SzArray(element) = imported else {
            panic!("expected an array");
        };
        let TypeSignature::GenericParam(param) = *element else {
            panic!("expected a generic parameter");
        };
        assert!(param.is_bound());

        let missing = importer.import_type(&TypeSignature::type_parameter(3), &mut context);
        assert!(matches!(
            missing,
            Err(Error::UnboundGenericParameter { position: 3 })
        ));

        context.pop();
        assert!(context.is_empty());
    }

    #[test]
    fn local_handles_pass_through() {
        let (library, util) = library();
        let handle = TypeSignature::class(&util);

        let imported = MetadataImporter::new(&library)
            .import_type(&handle, &mut ImportGenericContext::new())
            .unwrap();
        assert!(imported.handle().unwrap().ptr_eq(handle.handle().unwrap()));
    }
}
