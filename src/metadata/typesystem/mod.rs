//! The lazily populated entity graph of one module.
//!
//! A [`ModuleDefinition`] owns its types, types own their members, members own their
//! parameters, attributes and generic parameters. Every link that points back up the tree
//! (a field's declaring type, a type's module) is a non-owning [`Backlink`], and every link
//! that points sideways into the graph from a signature goes through a weak handle, so the
//! graph never forms an ownership cycle.
//!
//! Entities that were read from metadata populate their collections on first access through
//! the module's [`crate::metadata::reader::MetadataReader`]. Entities created in memory start
//! out fully populated and never touch a reader.
//!
//! # Key Components
//!
//! - [`ModuleDefinition`] - the root, with read/write entry points
//! - [`TypeDefinition`] / [`TypeReference`] - types defined in and referenced by the module
//! - [`FieldDefinition`], [`MethodDefinition`], [`PropertyDefinition`], [`EventDefinition`]
//! - [`MemberReference`], [`MethodHandle`], [`FieldHandle`] - member references and handles
//! - [`GenericParameter`], [`GenericInstanceMethod`] - generics
//! - [`CustomAttribute`], [`SecurityDeclaration`] - attached blobs
//! - [`AssemblyDefinition`], [`AssemblyNameReference`], [`ModuleReference`], [`ExportedType`]
//!
//! # Examples
//!
//! ```rust
//! use dotmeta::prelude::*;
//!
//! let module = ModuleDefinition::create("Example.dll", ModuleKind::Dll);
//! let class = TypeDefinition::new("Example", "C", TypeAttributes::PUBLIC, None);
//! class.add_field(FieldDefinition::new("F", FieldAttributes::STATIC, TypeSignature::I4))?;
//! module.add_type(class)?;
//!
//! let written = module.write()?;
//! let copy = ModuleDefinition::read(written, ReaderParameters::default())?;
//! let class = copy.get_type("Example.C")?.unwrap();
//! assert_eq!(class.fields()?[0].name, "F");
//! # Ok::<(), dotmeta::Error>(())
//! ```

mod assembly;
mod attributes;
mod field;
mod flags;
mod generics;
mod lazy;
mod members;
mod method;
mod module;
mod property;
mod typedef;
mod typeref;

pub use assembly::{
    AssemblyDefinition, AssemblyDefinitionRc, AssemblyNameReference, AssemblyNameReferenceRc,
    AssemblyVersion, ExportedType, ExportedTypeRc, ExportedTypeScope, ModuleReference,
    ModuleReferenceRc,
};
pub use attributes::{
    CustomAttribute, CustomAttributeRc, ModuleAttributeContext, SecurityDeclaration,
    SecurityDeclarationRc,
};
pub use field::{FieldDefinition, FieldDefinitionRc};
pub use flags::{
    AssemblyFlags, AssemblyHashAlgorithm, EventAttributes, FieldAttributes,
    GenericParamAttributes, MethodAttributes, MethodImplAttributes, MethodSemanticsAttributes,
    PInvokeAttributes, ParamAttributes, PropertyAttributes, TypeAttributes,
};
pub use generics::{
    GenericInstanceMethod, GenericInstanceMethodRc, GenericOwner, GenericOwnerRef,
    GenericParameter, GenericParameterConstraint, GenericParameterConstraintRc,
    GenericParameterKind, GenericParameterRc,
};
pub use lazy::{Backlink, Collection, Lazy, Slot};
pub use members::{
    FieldHandle, FieldReference, FieldReferenceRc, MemberReference, MethodHandle,
    MethodReference, MethodReferenceRc,
};
pub use method::{
    MethodDefinition, MethodDefinitionRc, PInvokeInfo, ParameterDefinition,
    ParameterDefinitionRc,
};
pub use module::{MetadataEntity, ModuleDefinition, ModuleDefinitionRc, ReaderParameters, ReadingMode};
pub use property::{
    EventDefinition, EventDefinitionRc, PropertyDefinition, PropertyDefinitionRc, SemanticMethod,
};
pub use typedef::{ClassLayout, InterfaceImplementation, InterfaceImplementationRc, TypeDefinition, TypeDefinitionRc};
pub use typeref::{TypeReference, TypeReferenceRc, TypeReferenceScope};

use crate::{metadata::reader::MetadataReader, Error, Result};

/// Run `read` against the reader of the module behind `module`.
///
/// Entities created in memory have no reader; they yield the default value. An entity
/// that was read from metadata but outlived its module can not be populated anymore.
pub(crate) fn read_with<T, F>(module: &Backlink<ModuleDefinition>, read: F) -> Result<T>
where
    T: Default,
    F: FnOnce(&MetadataReader) -> Result<T>,
{
    let Some(module) = module.get() else {
        return Err(Error::InvalidArgument(
            "the module owning this entity has been dropped".to_string(),
        ));
    };

    match module.reader() {
        Some(reader) => read(reader),
        None => Ok(T::default()),
    }
}
