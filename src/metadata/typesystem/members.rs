use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        signatures::{MethodSignature, TypeSignature},
        token::Token,
        typesystem::{
            Backlink, FieldDefinition, FieldDefinitionRc, GenericInstanceMethodRc,
            MethodDefinition, MethodDefinitionRc, ModuleDefinition, ModuleDefinitionRc,
        },
    },
    Result,
};

/// A reference to a `FieldReference`
pub type FieldReferenceRc = Arc<FieldReference>;
/// A reference to a `MethodReference`
pub type MethodReferenceRc = Arc<MethodReference>;

/// A field of another type, referenced through a `MemberRef` row.
pub struct FieldReference {
    /// The `MemberRef` token, null for references created in memory
    pub token: Token,
    /// Field name
    pub name: String,
    /// The type declaring the field, possibly a generic instantiation
    pub declaring_type: TypeSignature,
    /// The field type
    pub field_type: TypeSignature,
    module: Backlink<ModuleDefinition>,
}

impl FieldReference {
    /// A new field reference owned by `module`.
    #[must_use]
    pub fn new(
        module: &ModuleDefinitionRc,
        name: &str,
        declaring_type: TypeSignature,
        field_type: TypeSignature,
    ) -> FieldReferenceRc {
        Self::from_metadata(
            Token::new(0),
            Arc::downgrade(module),
            name.to_string(),
            declaring_type,
            field_type,
        )
    }

    pub(crate) fn from_metadata(
        token: Token,
        module: Weak<ModuleDefinition>,
        name: String,
        declaring_type: TypeSignature,
        field_type: TypeSignature,
    ) -> FieldReferenceRc {
        Arc::new(FieldReference {
            token,
            name,
            declaring_type,
            field_type,
            module: Backlink::new(module),
        })
    }

    /// The module that holds this reference.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module.get()
    }

    /// `DeclaringType::Name`
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.declaring_type.full_name(), self.name)
    }

    /// Find the field definition this reference denotes.
    ///
    /// # Errors
    /// Propagates decode failures hit while searching lazily read modules.
    pub fn resolve(&self) -> Result<Option<FieldDefinitionRc>> {
        match self.module() {
            Some(module) => module.resolver().resolve_field(self),
            None => Ok(None),
        }
    }
}

/// A method of another type, or a vararg call site, referenced through a `MemberRef` row.
pub struct MethodReference {
    /// The `MemberRef` token, null for references created in memory
    pub token: Token,
    /// Method name
    pub name: String,
    /// The type declaring the method, possibly a generic instantiation
    pub declaring_type: TypeSignature,
    /// The method signature
    pub signature: MethodSignature,
    module: Backlink<ModuleDefinition>,
}

impl MethodReference {
    /// A new method reference owned by `module`.
    #[must_use]
    pub fn new(
        module: &ModuleDefinitionRc,
        name: &str,
        declaring_type: TypeSignature,
        signature: MethodSignature,
    ) -> MethodReferenceRc {
        Self::from_metadata(
            Token::new(0),
            Arc::downgrade(module),
            name.to_string(),
            declaring_type,
            signature,
        )
    }

    pub(crate) fn from_metadata(
        token: Token,
        module: Weak<ModuleDefinition>,
        name: String,
        declaring_type: TypeSignature,
        signature: MethodSignature,
    ) -> MethodReferenceRc {
        Arc::new(MethodReference {
            token,
            name,
            declaring_type,
            signature,
            module: Backlink::new(module),
        })
    }

    /// The module that holds this reference.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module.get()
    }

    /// `DeclaringType::Name`
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.declaring_type.full_name(), self.name)
    }

    /// Find the method definition this reference denotes.
    ///
    /// # Errors
    /// Propagates decode failures hit while searching lazily read modules.
    pub fn resolve(&self) -> Result<Option<MethodDefinitionRc>> {
        match self.module() {
            Some(module) => module.resolver().resolve_method(self),
            None => Ok(None),
        }
    }
}

/// A decoded `MemberRef` row.
#[derive(Clone)]
pub enum MemberReference {
    /// The signature starts with the `FIELD` header
    Field(FieldReferenceRc),
    /// Any other signature
    Method(MethodReferenceRc),
}

impl MemberReference {
    /// The `MemberRef` token.
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            MemberReference::Field(field) => field.token,
            MemberReference::Method(method) => method.token,
        }
    }

    /// The member name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            MemberReference::Field(field) => &field.name,
            MemberReference::Method(method) => &method.name,
        }
    }
}

impl fmt::Debug for MemberReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberReference::Field(field) => write!(f, "FieldRef({})", field.full_name()),
            MemberReference::Method(method) => write!(f, "MethodRef({})", method.full_name()),
        }
    }
}

/// Anything that can stand where a method token is expected.
#[derive(Clone)]
pub enum MethodHandle {
    /// A method defined in some loaded module
    Definition(Weak<MethodDefinition>),
    /// A `MemberRef` method
    Reference(MethodReferenceRc),
    /// A `MethodSpec` instantiation
    Instance(GenericInstanceMethodRc),
}

impl MethodHandle {
    /// A handle to `method`.
    #[must_use]
    pub fn definition(method: &MethodDefinitionRc) -> Self {
        MethodHandle::Definition(Arc::downgrade(method))
    }

    /// The definition, if this handle points at a live one.
    pub fn as_definition(&self) -> Option<MethodDefinitionRc> {
        match self {
            MethodHandle::Definition(method) => method.upgrade(),
            _ => None,
        }
    }

    /// Method name.
    pub fn name(&self) -> String {
        match self {
            MethodHandle::Definition(method) => method
                .upgrade()
                .map(|method| method.name.clone())
                .unwrap_or_default(),
            MethodHandle::Reference(method) => method.name.clone(),
            MethodHandle::Instance(instance) => instance.method.name(),
        }
    }

    /// The declaring type.
    pub fn declaring_type(&self) -> Option<TypeSignature> {
        match self {
            MethodHandle::Definition(method) => method
                .upgrade()?
                .declaring_type()
                .map(|declaring| TypeSignature::class(&declaring)),
            MethodHandle::Reference(method) => Some(method.declaring_type.clone()),
            MethodHandle::Instance(instance) => instance.method.declaring_type(),
        }
    }

    /// The signature, before any generic substitution.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the definition was dropped.
    pub fn signature(&self) -> Result<MethodSignature> {
        match self {
            MethodHandle::Definition(method) => match method.upgrade() {
                Some(method) => Ok(method.signature()),
                None => Err(crate::Error::InvalidArgument(
                    "method definition has been dropped".to_string(),
                )),
            },
            MethodHandle::Reference(method) => Ok(method.signature.clone()),
            MethodHandle::Instance(instance) => instance.method.signature(),
        }
    }

    /// The module that owns the definition or reference.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        match self {
            MethodHandle::Definition(method) => method.upgrade()?.module(),
            MethodHandle::Reference(method) => method.module(),
            MethodHandle::Instance(instance) => instance.module(),
        }
    }

    /// `DeclaringType::Name`
    pub fn full_name(&self) -> String {
        let declaring = self
            .declaring_type()
            .map(|declaring| declaring.full_name())
            .unwrap_or_default();
        format!("{}::{}", declaring, self.name())
    }

    /// True if both handles are the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &MethodHandle) -> bool {
        match (self, other) {
            (MethodHandle::Definition(a), MethodHandle::Definition(b)) => Weak::ptr_eq(a, b),
            (MethodHandle::Reference(a), MethodHandle::Reference(b)) => Arc::ptr_eq(a, b),
            (MethodHandle::Instance(a), MethodHandle::Instance(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodHandle::Definition(_) => write!(f, "MethodDef({})", self.full_name()),
            MethodHandle::Reference(_) => write!(f, "MethodRef({})", self.full_name()),
            MethodHandle::Instance(_) => write!(f, "MethodSpec({})", self.full_name()),
        }
    }
}

/// Anything that can stand where a field token is expected.
#[derive(Clone)]
pub enum FieldHandle {
    /// A field defined in some loaded module
    Definition(Weak<FieldDefinition>),
    /// A `MemberRef` field
    Reference(FieldReferenceRc),
}

impl FieldHandle {
    /// A handle to `field`.
    #[must_use]
    pub fn definition(field: &FieldDefinitionRc) -> Self {
        FieldHandle::Definition(Arc::downgrade(field))
    }

    /// Field name.
    pub fn name(&self) -> String {
        match self {
            FieldHandle::Definition(field) => field
                .upgrade()
                .map(|field| field.name.clone())
                .unwrap_or_default(),
            FieldHandle::Reference(field) => field.name.clone(),
        }
    }

    /// The field type.
    pub fn field_type(&self) -> Option<TypeSignature> {
        match self {
            FieldHandle::Definition(field) => Some(field.upgrade()?.field_type.clone()),
            FieldHandle::Reference(field) => Some(field.field_type.clone()),
        }
    }

    /// The declaring type.
    pub fn declaring_type(&self) -> Option<TypeSignature> {
        match self {
            FieldHandle::Definition(field) => field
                .upgrade()?
                .declaring_type()
                .map(|declaring| TypeSignature::class(&declaring)),
            FieldHandle::Reference(field) => Some(field.declaring_type.clone()),
        }
    }

    /// The module that owns the definition or reference.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        match self {
            FieldHandle::Definition(field) => field.upgrade()?.module(),
            FieldHandle::Reference(field) => field.module(),
        }
    }
}

impl fmt::Debug for FieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let declaring = self
            .declaring_type()
            .map(|declaring| declaring.full_name())
            .unwrap_or_default();
        write!(f, "Field({}::{})", declaring, self.name())
    }
}
