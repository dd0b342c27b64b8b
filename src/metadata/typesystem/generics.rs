use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        signatures::{MethodSignature, TypeSignature},
        token::Token,
        typesystem::{
            read_with, Backlink, Collection, CustomAttributeRc, Lazy, MethodDefinition,
            MethodDefinitionRc, MethodHandle, ModuleDefinition, ModuleDefinitionRc, Slot,
            TypeDefinition, TypeDefinitionRc,
        },
    },
    Result,
};

/// A reference to a `GenericParameter`
pub type GenericParameterRc = Arc<GenericParameter>;
/// A reference to a `GenericParameterConstraint`
pub type GenericParameterConstraintRc = Arc<GenericParameterConstraint>;
/// A reference to a `GenericInstanceMethod`
pub type GenericInstanceMethodRc = Arc<GenericInstanceMethod>;

/// Whether a generic parameter belongs to a type or a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericParameterKind {
    /// `!n`, declared by a type
    Type,
    /// `!!n`, declared by a method
    Method,
}

/// A non-owning link to the type or method that declares a generic parameter.
#[derive(Clone)]
pub enum GenericOwnerRef {
    /// Declared by a type
    Type(Weak<TypeDefinition>),
    /// Declared by a method
    Method(Weak<MethodDefinition>),
}

impl GenericOwnerRef {
    /// The kind of parameters this owner declares.
    #[must_use]
    pub fn kind(&self) -> GenericParameterKind {
        match self {
            GenericOwnerRef::Type(_) => GenericParameterKind::Type,
            GenericOwnerRef::Method(_) => GenericParameterKind::Method,
        }
    }

    /// The owner, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<GenericOwner> {
        match self {
            GenericOwnerRef::Type(owner) => owner.upgrade().map(GenericOwner::Type),
            GenericOwnerRef::Method(owner) => owner.upgrade().map(GenericOwner::Method),
        }
    }

    /// The parameter at `position` in the owner's list.
    ///
    /// # Errors
    /// Propagates errors from lazily reading the owner's parameter list.
    pub fn parameter(&self, position: u16) -> Result<Option<GenericParameterRc>> {
        match self.upgrade() {
            Some(owner) => Ok(owner
                .generic_parameters()?
                .get(usize::from(position))
                .cloned()),
            None => Ok(None),
        }
    }

    /// True if both links point at the same owner.
    #[must_use]
    pub fn ptr_eq(&self, other: &GenericOwnerRef) -> bool {
        match (self, other) {
            (GenericOwnerRef::Type(a), GenericOwnerRef::Type(b)) => Weak::ptr_eq(a, b),
            (GenericOwnerRef::Method(a), GenericOwnerRef::Method(b)) => Weak::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for GenericOwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(GenericOwner::Type(owner)) => write!(f, "Type({})", owner.full_name()),
            Some(GenericOwner::Method(owner)) => write!(f, "Method({})", owner.name),
            None => write!(f, "Dropped"),
        }
    }
}

/// A live generic parameter provider.
#[derive(Clone)]
pub enum GenericOwner {
    /// A generic type
    Type(TypeDefinitionRc),
    /// A generic method
    Method(MethodDefinitionRc),
}

impl GenericOwner {
    /// The provider's generic parameters.
    ///
    /// # Errors
    /// Propagates errors from lazily reading the parameter list.
    pub fn generic_parameters(&self) -> Result<Vec<GenericParameterRc>> {
        match self {
            GenericOwner::Type(owner) => owner.generic_parameters(),
            GenericOwner::Method(owner) => owner.generic_parameters(),
        }
    }

    /// The provider's metadata token.
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            GenericOwner::Type(owner) => owner.token,
            GenericOwner::Method(owner) => owner.token,
        }
    }

    /// A non-owning link to this provider.
    #[must_use]
    pub fn downgrade(&self) -> GenericOwnerRef {
        match self {
            GenericOwner::Type(owner) => GenericOwnerRef::Type(Arc::downgrade(owner)),
            GenericOwner::Method(owner) => GenericOwnerRef::Method(Arc::downgrade(owner)),
        }
    }
}

/// A generic parameter of a type or method (`GenericParam`).
///
/// Parameters are identified by position. A parameter without a name gets `!n` or `!!n`.
pub struct GenericParameter {
    /// The `GenericParam` token, null for parameters created in memory
    pub token: Token,
    /// Name
    pub name: String,
    /// Position in the owner's list
    pub position: u16,
    /// `GenericParamAttributes`
    pub flags: u16,
    /// Type or method parameter
    pub kind: GenericParameterKind,
    owner: Slot<Option<GenericOwnerRef>>,
    module: Backlink<ModuleDefinition>,
    constraints: Lazy<Collection<GenericParameterConstraintRc>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
}

fn synthesized_name(kind: GenericParameterKind, position: u16) -> String {
    match kind {
        GenericParameterKind::Type => format!("!{position}"),
        GenericParameterKind::Method => format!("!!{position}"),
    }
}

impl GenericParameter {
    pub(crate) fn from_metadata(
        token: Token,
        name: String,
        position: u16,
        flags: u16,
        owner: GenericOwnerRef,
        module: Weak<ModuleDefinition>,
    ) -> GenericParameterRc {
        let kind = owner.kind();
        Arc::new(GenericParameter {
            token,
            name: if name.is_empty() {
                synthesized_name(kind, position)
            } else {
                name
            },
            position,
            flags,
            kind,
            owner: Slot::new(Some(owner)),
            module: Backlink::new(module),
            constraints: Lazy::new(),
            custom_attributes: Lazy::new(),
        })
    }

    /// A parameter created in memory for a type or method that is being built.
    pub(crate) fn create(
        name: &str,
        position: u16,
        flags: u16,
        owner: GenericOwnerRef,
        module: Weak<ModuleDefinition>,
    ) -> GenericParameterRc {
        let kind = owner.kind();
        Arc::new(GenericParameter {
            token: Token::new(0),
            name: if name.is_empty() {
                synthesized_name(kind, position)
            } else {
                name.to_string()
            },
            position,
            flags,
            kind,
            owner: Slot::new(Some(owner)),
            module: Backlink::new(module),
            constraints: Lazy::ready(Collection::new()),
            custom_attributes: Lazy::ready(Collection::new()),
        })
    }

    /// The declaring type or method.
    pub fn owner(&self) -> Option<GenericOwnerRef> {
        self.owner.get()
    }

    /// The module of the declaring provider.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module.get()
    }

    /// Constraints on the parameter.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read constraint rows.
    pub fn constraints(&self) -> Result<Vec<GenericParameterConstraintRc>> {
        Ok(self
            .constraints
            .load(|| read_with(&self.module, |reader| reader.read_generic_constraints(self.token)))?
            .items())
    }

    /// Add a constraint.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read constraint rows.
    pub fn add_constraint(&self, constraint_type: TypeSignature) -> Result<()> {
        self.constraints
            .load(|| read_with(&self.module, |reader| reader.read_generic_constraints(self.token)))?
            .push(GenericParameterConstraint::new(constraint_type));
        Ok(())
    }

    /// Custom attributes on the parameter.
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

impl fmt::Debug for GenericParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericParameter")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("position", &self.position)
            .field("kind", &self.kind)
            .finish()
    }
}

/// One constraint of a generic parameter (`GenericParamConstraint`).
pub struct GenericParameterConstraint {
    /// The `GenericParamConstraint` token, null for constraints created in memory
    pub token: Token,
    /// The constraining type
    pub constraint_type: TypeSignature,
    module: Backlink<ModuleDefinition>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
}

impl GenericParameterConstraint {
    /// A new constraint.
    #[must_use]
    pub fn new(constraint_type: TypeSignature) -> GenericParameterConstraintRc {
        Arc::new(GenericParameterConstraint {
            token: Token::new(0),
            constraint_type,
            module: Backlink::default(),
            custom_attributes: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        constraint_type: TypeSignature,
        module: Weak<ModuleDefinition>,
    ) -> GenericParameterConstraintRc {
        Arc::new(GenericParameterConstraint {
            token,
            constraint_type,
            module: Backlink::new(module),
            custom_attributes: Lazy::new(),
        })
    }

    /// Custom attributes on the constraint.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn custom_attributes(&self) -> Result<Vec<CustomAttributeRc>> {
        Ok(self
            .custom_attributes
            .load(|| read_with(&self.module, |reader| reader.read_custom_attributes(self.token)))?
            .items())
    }
}

/// An instantiation of a generic method (`MethodSpec`).
pub struct GenericInstanceMethod {
    /// The `MethodSpec` token, null for instances created in memory
    pub token: Token,
    /// The open generic method
    pub method: MethodHandle,
    /// Method type arguments
    pub arguments: Vec<TypeSignature>,
    module: Backlink<ModuleDefinition>,
}

impl GenericInstanceMethod {
    /// Instantiate `method` with `arguments`, owned by `module`.
    #[must_use]
    pub fn new(
        module: &ModuleDefinitionRc,
        method: MethodHandle,
        arguments: Vec<TypeSignature>,
    ) -> GenericInstanceMethodRc {
        Self::from_metadata(Token::new(0), Arc::downgrade(module), method, arguments)
    }

    pub(crate) fn from_metadata(
        token: Token,
        module: Weak<ModuleDefinition>,
        method: MethodHandle,
        arguments: Vec<TypeSignature>,
    ) -> GenericInstanceMethodRc {
        Arc::new(GenericInstanceMethod {
            token,
            method,
            arguments,
            module: Backlink::new(module),
        })
    }

    /// The module that holds this instantiation.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module.get()
    }

    /// The method signature with `!n` replaced by the declaring type's arguments and `!!n`
    /// replaced by this instantiation's arguments.
    ///
    /// # Errors
    /// Returns an error if the open method definition was dropped.
    pub fn resolved_signature(&self) -> Result<MethodSignature> {
        let signature = self.method.signature()?;
        let type_arguments = match self.method.declaring_type() {
            Some(TypeSignature::GenericInst { arguments, .. }) => arguments,
            _ => Vec::new(),
        };

        Ok(signature.substitute(&type_arguments, &self.arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        signatures::{MethodSignature, TypeHandle},
        tables::TableId,
    };

    #[test]
    fn names_are_synthesized() {
        let owner = GenericOwnerRef::Method(Weak::new());
        let parameter = GenericParameter::from_metadata(
            Token::from_parts(TableId::GenericParam, 1),
            String::new(),
            2,
            0,
            owner,
            Weak::new(),
        );
        assert_eq!(parameter.name, "!!2");
        assert_eq!(parameter.kind, GenericParameterKind::Method);
        assert!(parameter.owner().unwrap().upgrade().is_none());
    }

    #[test]
    fn dropped_owner_has_no_parameters() {
        let owner = GenericOwnerRef::Type(Weak::new());
        assert!(owner.parameter(0).unwrap().is_none());
        assert_eq!(owner.kind(), GenericParameterKind::Type);
    }

    #[test]
    fn instance_substitutes_method_arguments() {
        let module = ModuleDefinition::create("Generic.dll", crate::metadata::image::ModuleKind::Dll);
        let list = crate::metadata::typesystem::TypeReference::new(
            &module,
            "System.Collections.Generic",
            "List`1",
            crate::metadata::typesystem::TypeReferenceScope::None,
        );

        let mut signature = MethodSignature::new(
            TypeSignature::Void,
            vec![
                TypeSignature::method_parameter(0),
                TypeSignature::generic_instance(
                    TypeSignature::Class(TypeHandle::reference(&list)),
                    vec![TypeSignature::method_parameter(0)],
                ),
            ],
        );
        signature.generic_parameter_count = 1;

        let open = crate::metadata::typesystem::MethodReference::new(
            &module,
            "M",
            TypeSignature::Object,
            signature,
        );
        let instance = GenericInstanceMethod::new(
            &module,
            MethodHandle::Reference(open),
            vec![TypeSignature::I4],
        );

        let resolved = instance.resolved_signature().unwrap();
        assert_eq!(resolved.parameters[0], TypeSignature::I4);
        assert_eq!(
            resolved.parameters[1],
            TypeSignature::generic_instance(
                TypeSignature::Class(TypeHandle::reference(&list)),
                vec![TypeSignature::I4],
            )
        );
    }
}
