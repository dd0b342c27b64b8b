use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        token::Token,
        typesystem::{
            AssemblyNameReferenceRc, Backlink, ModuleDefinition, ModuleDefinitionRc,
            ModuleReferenceRc, TypeDefinitionRc,
        },
    },
    Result,
};

/// A reference to a `TypeReference`
pub type TypeReferenceRc = Arc<TypeReference>;

/// Where a referenced type is defined (the `ResolutionScope` column).
#[derive(Clone)]
pub enum TypeReferenceScope {
    /// The module that holds the reference
    CurrentModule,
    /// Another module of the same assembly
    Module(ModuleReferenceRc),
    /// Another assembly
    Assembly(AssemblyNameReferenceRc),
    /// The reference is nested inside another referenced type
    DeclaringType(TypeReferenceRc),
    /// No scope; the type is looked up through the `ExportedType` table
    None,
}

impl fmt::Debug for TypeReferenceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeReferenceScope::CurrentModule => write!(f, "CurrentModule"),
            TypeReferenceScope::Module(module) => write!(f, "Module({})", module.name),
            TypeReferenceScope::Assembly(assembly) => write!(f, "Assembly({})", assembly.name),
            TypeReferenceScope::DeclaringType(declaring) => {
                write!(f, "DeclaringType({})", declaring.full_name())
            }
            TypeReferenceScope::None => write!(f, "None"),
        }
    }
}

/// A type used by, but not defined in, its module (a `TypeRef` row).
///
/// A reference only describes the shape of the type: name, namespace and scope. Finding
/// the definition is the job of [`TypeReference::resolve`].
pub struct TypeReference {
    /// The `TypeRef` token, null for references created in memory
    pub token: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Resolution scope
    pub scope: TypeReferenceScope,
    module: Backlink<ModuleDefinition>,
}

impl TypeReference {
    /// A new reference owned by `module`.
    #[must_use]
    pub fn new(
        module: &ModuleDefinitionRc,
        namespace: &str,
        name: &str,
        scope: TypeReferenceScope,
    ) -> TypeReferenceRc {
        Self::from_metadata(
            Token::new(0),
            Arc::downgrade(module),
            namespace.to_string(),
            name.to_string(),
            scope,
        )
    }

    pub(crate) fn from_metadata(
        token: Token,
        module: Weak<ModuleDefinition>,
        namespace: String,
        name: String,
        scope: TypeReferenceScope,
    ) -> TypeReferenceRc {
        Arc::new(TypeReference {
            token,
            namespace,
            name,
            scope,
            module: Backlink::new(module),
        })
    }

    /// The module that holds this reference.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module.get()
    }

    /// The enclosing type reference, for nested types.
    pub fn declaring_type(&self) -> Option<&TypeReferenceRc> {
        match &self.scope {
            TypeReferenceScope::DeclaringType(declaring) => Some(declaring),
            _ => None,
        }
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

    /// The assembly this reference points into, looking through nesting.
    pub fn assembly_name(&self) -> Option<AssemblyNameReferenceRc> {
        match &self.scope {
            TypeReferenceScope::Assembly(assembly) => Some(assembly.clone()),
            TypeReferenceScope::DeclaringType(declaring) => declaring.assembly_name(),
            _ => None,
        }
    }

    /// The scope of the outermost declaring reference.
    pub fn outer_scope(&self) -> TypeReferenceScope {
        match &self.scope {
            TypeReferenceScope::DeclaringType(declaring) => declaring.outer_scope(),
            other => other.clone(),
        }
    }

    /// Find the definition this reference denotes.
    ///
    /// Returns `None` if the owning module was dropped or the definition can not be found.
    ///
    /// # Errors
    /// Propagates decode failures hit while searching lazily read modules.
    pub fn resolve(&self) -> Result<Option<TypeDefinitionRc>> {
        match self.module() {
            Some(module) => module.resolver().resolve_type(self),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for TypeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeReference")
            .field("token", &self.token)
            .field("name", &self.full_name())
            .field("scope", &self.scope)
            .finish()
    }
}
