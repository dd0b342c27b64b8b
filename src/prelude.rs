//! # dotmeta Prelude
//!
//! The types needed for everyday reading and writing of module metadata, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotmeta operations
pub use crate::Error;

/// The result type used throughout dotmeta
pub use crate::Result;

// ================================================================================================
// Images and Tokens
// ================================================================================================

/// Stream bytes and header values exchanged with the PE layer
pub use crate::metadata::image::{
    ImageInfo, MetadataImage, MetadataStreams, ModuleAttributes, ModuleCharacteristics,
    ModuleKind, TargetArchitecture, TargetRuntime,
};

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Table identifiers and coded indices
pub use crate::metadata::tables::{CodedIndexType, TableId};

// ================================================================================================
// Entity Graph
// ================================================================================================

/// Modules and reading configuration
pub use crate::metadata::typesystem::{
    MetadataEntity, ModuleDefinition, ModuleDefinitionRc, ReaderParameters, ReadingMode,
};

/// Types and their members
pub use crate::metadata::typesystem::{
    ClassLayout, EventDefinition, EventDefinitionRc, FieldDefinition, FieldDefinitionRc,
    InterfaceImplementation, MethodDefinition, MethodDefinitionRc, PInvokeInfo,
    ParameterDefinition, ParameterDefinitionRc, PropertyDefinition, PropertyDefinitionRc,
    SemanticMethod, TypeDefinition, TypeDefinitionRc,
};

/// References and handles
pub use crate::metadata::typesystem::{
    FieldHandle, FieldReference, MemberReference, MethodHandle, MethodReference, TypeReference,
    TypeReferenceRc, TypeReferenceScope,
};

/// Generics
pub use crate::metadata::typesystem::{
    GenericInstanceMethod, GenericParameter, GenericParameterConstraint, GenericParameterKind,
    GenericParameterRc,
};

/// Assemblies, module references and exported types
pub use crate::metadata::typesystem::{
    AssemblyDefinition, AssemblyNameReference, AssemblyNameReferenceRc, AssemblyVersion,
    ExportedType, ExportedTypeScope, ModuleReference,
};

/// Attached attributes
pub use crate::metadata::typesystem::{CustomAttribute, SecurityDeclaration};

/// Flag constants
pub use crate::metadata::typesystem::{
    AssemblyFlags, AssemblyHashAlgorithm, EventAttributes, FieldAttributes,
    GenericParamAttributes, MethodAttributes, MethodImplAttributes, MethodSemanticsAttributes,
    PInvokeAttributes, ParamAttributes, PropertyAttributes, TypeAttributes,
};

// ================================================================================================
// Signatures
// ================================================================================================

/// Type, method and property signatures
pub use crate::metadata::signatures::{
    CallingConvention, MethodSignature, PropertySignature, TypeHandle, TypeSignature,
};

/// Attribute, constant and marshalling values
pub use crate::metadata::signatures::{
    ConstantValue, CustomAttributeArgument, CustomAttributeElement, CustomAttributeNamedArgument,
    CustomAttributeValue, MarshalInfo, SecurityAction, SecurityAttribute,
};

// ================================================================================================
// Writing, Importing and Resolving
// ================================================================================================

/// Entity graph serialization
pub use crate::metadata::builder::MetadataBuilder;

/// Cross-module import
pub use crate::metadata::importer::{ImportGenericContext, MetadataImporter};

/// Reference resolution
pub use crate::metadata::resolver::{AssemblyRegistry, AssemblyResolver, MetadataResolver};
