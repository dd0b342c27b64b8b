use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::typesystem::{
        GenericOwnerRef, GenericParameterKind, GenericParameterRc, ModuleDefinitionRc,
        TypeDefinition, TypeDefinitionRc, TypeReferenceRc, TypeReferenceScope,
    },
    Result,
};

#[allow(non_snake_case)]
/// All possible type tags of a signature blob (II.23.1.16)
pub mod ELEMENT_TYPE {
    /// Marks end of a list
    pub const END: u8 = 0x00;
    /// `void`
    pub const VOID: u8 = 0x01;
    /// `bool`
    pub const BOOLEAN: u8 = 0x02;
    /// `char`
    pub const CHAR: u8 = 0x03;
    /// `int8`
    pub const I1: u8 = 0x04;
    /// `unsigned int8`
    pub const U1: u8 = 0x05;
    /// `int16`
    pub const I2: u8 = 0x06;
    /// `unsigned int16`
    pub const U2: u8 = 0x07;
    /// `int32`
    pub const I4: u8 = 0x08;
    /// `unsigned int32`
    pub const U4: u8 = 0x09;
    /// `int64`
    pub const I8: u8 = 0x0a;
    /// `unsigned int64`
    pub const U8: u8 = 0x0b;
    /// `float32`
    pub const R4: u8 = 0x0c;
    /// `float64`
    pub const R8: u8 = 0x0d;
    /// `System.String`
    pub const STRING: u8 = 0x0e;
    /// Followed by type
    pub const PTR: u8 = 0x0f;
    /// Followed by type
    pub const BYREF: u8 = 0x10;
    /// Followed by `TypeDefOrRef` token
    pub const VALUETYPE: u8 = 0x11;
    /// Followed by `TypeDefOrRef` token
    pub const CLASS: u8 = 0x12;
    /// Generic parameter of a type, followed by its number
    pub const VAR: u8 = 0x13;
    /// type rank boundsCount bound1 ... loCount lo1 ...
    pub const ARRAY: u8 = 0x14;
    /// Generic type instantiation, followed by type and type-arg-count and type-args
    pub const GENERICINST: u8 = 0x15;
    /// `System.TypedReference`
    pub const TYPEDBYREF: u8 = 0x16;
    /// `System.IntPtr`
    pub const I: u8 = 0x18;
    /// `System.UIntPtr`
    pub const U: u8 = 0x19;
    /// Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    /// `System.Object`
    pub const OBJECT: u8 = 0x1c;
    /// Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    /// Generic parameter of a method, followed by its number
    pub const MVAR: u8 = 0x1e;
    /// Required modifier, followed by a `TypeDefOrRef` token
    pub const CMOD_REQD: u8 = 0x1f;
    /// Optional modifier, followed by a `TypeDefOrRef` token
    pub const CMOD_OPT: u8 = 0x20;
    /// Implemented within the CLI
    pub const INTERNAL: u8 = 0x21;
    /// Or'd with following element types
    pub const MODIFIER: u8 = 0x40;
    /// Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    /// Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
    /// Custom attribute argument of type `System.Type`
    pub const TYPE: u8 = 0x50;
    /// Custom attribute argument that is boxed into `System.Object`
    pub const BOXED: u8 = 0x51;
    /// Custom attribute named argument that targets a field
    pub const FIELD: u8 = 0x53;
    /// Custom attribute named argument that targets a property
    pub const PROPERTY: u8 = 0x54;
    /// Custom attribute argument of an enum type
    pub const ENUM: u8 = 0x55;
}

#[allow(non_snake_case)]
/// The leading byte of method, field, property, local and method-spec blobs (II.23.2)
pub mod SIGNATURE_HEADER {
    /// Managed default calling convention
    pub const DEFAULT: u8 = 0x00;
    /// Native `cdecl`
    pub const C: u8 = 0x01;
    /// Native `stdcall`
    pub const STDCALL: u8 = 0x02;
    /// Native `thiscall`
    pub const THISCALL: u8 = 0x03;
    /// Native `fastcall`
    pub const FASTCALL: u8 = 0x04;
    /// Managed varargs
    pub const VARARG: u8 = 0x05;
    /// Field signature
    pub const FIELD: u8 = 0x06;
    /// Local variable signature
    pub const LOCAL_SIG: u8 = 0x07;
    /// Property signature
    pub const PROPERTY: u8 = 0x08;
    /// Unmanaged calling convention encoded as modopts
    pub const UNMANAGED: u8 = 0x09;
    /// Generic method instantiation
    pub const GENERIC_INST: u8 = 0x0a;
    /// Native varargs
    pub const NATIVE_VARARG: u8 = 0x0b;
    /// Bits that hold the calling convention
    pub const CONVENTION_MASK: u8 = 0x0f;
    /// Method has generic parameters
    pub const GENERIC: u8 = 0x10;
    /// Method has a `this` pointer
    pub const HAS_THIS: u8 = 0x20;
    /// The `this` pointer is passed explicitly as first parameter
    pub const EXPLICIT_THIS: u8 = 0x40;
}

/// The calling convention of a method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    /// Managed default
    #[default]
    Default,
    /// Native `cdecl`
    C,
    /// Native `stdcall`
    StdCall,
    /// Native `thiscall`
    ThisCall,
    /// Native `fastcall`
    FastCall,
    /// Managed varargs
    VarArg,
    /// Unmanaged, with the convention carried in modifiers
    Unmanaged,
    /// Native varargs
    NativeVarArg,
}

impl CallingConvention {
    /// Decode the low nibble of a method signature header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for field, property, local and method-spec headers.
    pub fn from_header(header: u8) -> Result<Self> {
        match header & SIGNATURE_HEADER::CONVENTION_MASK {
            SIGNATURE_HEADER::DEFAULT => Ok(CallingConvention::Default),
            SIGNATURE_HEADER::C => Ok(CallingConvention::C),
            SIGNATURE_HEADER::STDCALL => Ok(CallingConvention::StdCall),
            SIGNATURE_HEADER::THISCALL => Ok(CallingConvention::ThisCall),
            SIGNATURE_HEADER::FASTCALL => Ok(CallingConvention::FastCall),
            SIGNATURE_HEADER::VARARG => Ok(CallingConvention::VarArg),
            SIGNATURE_HEADER::UNMANAGED => Ok(CallingConvention::Unmanaged),
            SIGNATURE_HEADER::NATIVE_VARARG => Ok(CallingConvention::NativeVarArg),
            other => Err(malformed_error!(
                "Signature header {:#04x} is not a method calling convention",
                other
            )),
        }
    }

    /// The low nibble to store in a method signature header.
    #[must_use]
    pub fn header_bits(self) -> u8 {
        match self {
            CallingConvention::Default => SIGNATURE_HEADER::DEFAULT,
            CallingConvention::C => SIGNATURE_HEADER::C,
            CallingConvention::StdCall => SIGNATURE_HEADER::STDCALL,
            CallingConvention::ThisCall => SIGNATURE_HEADER::THISCALL,
            CallingConvention::FastCall => SIGNATURE_HEADER::FASTCALL,
            CallingConvention::VarArg => SIGNATURE_HEADER::VARARG,
            CallingConvention::Unmanaged => SIGNATURE_HEADER::UNMANAGED,
            CallingConvention::NativeVarArg => SIGNATURE_HEADER::NATIVE_VARARG,
        }
    }
}

/// The target of a `CLASS` or `VALUETYPE` element: a type of this module or a reference.
#[derive(Clone)]
pub enum TypeHandle {
    /// A type defined in some loaded module
    Definition(Weak<TypeDefinition>),
    /// A `TypeRef` row
    Reference(TypeReferenceRc),
}

impl TypeHandle {
    /// A handle pointing at `definition`.
    #[must_use]
    pub fn definition(definition: &TypeDefinitionRc) -> Self {
        TypeHandle::Definition(Arc::downgrade(definition))
    }

    /// A handle pointing at `reference`.
    #[must_use]
    pub fn reference(reference: &TypeReferenceRc) -> Self {
        TypeHandle::Reference(reference.clone())
    }

    /// The definition, if this handle points at a live one.
    pub fn as_definition(&self) -> Option<TypeDefinitionRc> {
        match self {
            TypeHandle::Definition(definition) => definition.upgrade(),
            TypeHandle::Reference(_) => None,
        }
    }

    /// The reference, if this handle is one.
    pub fn as_reference(&self) -> Option<&TypeReferenceRc> {
        match self {
            TypeHandle::Definition(_) => None,
            TypeHandle::Reference(reference) => Some(reference),
        }
    }

    /// The module that owns the definition or reference.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        match self {
            TypeHandle::Definition(definition) => definition.upgrade()?.module(),
            TypeHandle::Reference(reference) => reference.module(),
        }
    }

    /// Namespace of the outermost declaring type.
    pub fn namespace(&self) -> String {
        match self {
            TypeHandle::Definition(definition) => definition
                .upgrade()
                .map(|definition| definition.namespace.clone())
                .unwrap_or_default(),
            TypeHandle::Reference(reference) => reference.namespace.clone(),
        }
    }

    /// Simple name.
    pub fn name(&self) -> String {
        match self {
            TypeHandle::Definition(definition) => definition
                .upgrade()
                .map(|definition| definition.name.clone())
                .unwrap_or_default(),
            TypeHandle::Reference(reference) => reference.name.clone(),
        }
    }

    /// Full name, nested types separated by `/`.
    pub fn full_name(&self) -> String {
        match self {
            TypeHandle::Definition(definition) => match definition.upgrade() {
                Some(definition) => definition.full_name(),
                None => String::from("<dropped>"),
            },
            TypeHandle::Reference(reference) => reference.full_name(),
        }
    }

    /// Name of the assembly declaring the type, or of its module when that module has no
    /// manifest.
    ///
    /// `None` if the handle does not record it: references into another module of the same
    /// assembly, references without a scope, and dropped definitions.
    pub fn scope_name(&self) -> Option<String> {
        match self {
            TypeHandle::Definition(definition) => declaring_scope(&definition.upgrade()?.module()?),
            TypeHandle::Reference(reference) => match reference.outer_scope() {
                TypeReferenceScope::Assembly(assembly) => Some(assembly.name.clone()),
                TypeReferenceScope::CurrentModule => declaring_scope(&reference.module()?),
                TypeReferenceScope::Module(_)
                | TypeReferenceScope::DeclaringType(_)
                | TypeReferenceScope::None => None,
            },
        }
    }

    /// True if both handles are the same object, not just the same name.
    #[must_use]
    pub fn ptr_eq(&self, other: &TypeHandle) -> bool {
        match (self, other) {
            (TypeHandle::Definition(a), TypeHandle::Definition(b)) => Weak::ptr_eq(a, b),
            (TypeHandle::Reference(a), TypeHandle::Reference(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// True if both handles have the same full name, wherever they are declared.
    #[must_use]
    pub fn same_name(&self, other: &TypeHandle) -> bool {
        self.ptr_eq(other) || self.full_name() == other.full_name()
    }
}

fn declaring_scope(module: &ModuleDefinitionRc) -> Option<String> {
    match module.assembly() {
        Ok(Some(assembly)) => Some(assembly.name.name.clone()),
        _ => Some(module.name.clone()),
    }
}

/// Handles are equal if they are the same object, or have the same full name and scope.
///
/// A side whose scope is not recorded matches any scope.
impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.full_name() != other.full_name() {
            return false;
        }

        match (self.scope_name(), other.scope_name()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
            _ => true,
        }
    }
}

impl Eq for TypeHandle {}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeHandle::Definition(_) => write!(f, "Definition({})", self.full_name()),
            TypeHandle::Reference(_) => write!(f, "Reference({})", self.full_name()),
        }
    }
}

/// A `VAR` or `MVAR` element.
///
/// A parameter read from metadata is bound to the type or method that declares it. One that was
/// created without such an owner (or whose number exceeds the owner's parameter list) stays an
/// unbound positional placeholder.
#[derive(Clone)]
pub struct GenericParamSig {
    /// Whether this is a type (`!n`) or a method (`!!n`) parameter
    pub kind: GenericParameterKind,
    /// Position in the owner's parameter list
    pub position: u16,
    /// The declaring type or method, if bound
    pub owner: Option<GenericOwnerRef>,
}

impl GenericParamSig {
    /// A positional placeholder that is not bound to any owner.
    #[must_use]
    pub fn unbound(kind: GenericParameterKind, position: u16) -> Self {
        GenericParamSig {
            kind,
            position,
            owner: None,
        }
    }

    /// True if the owner was known when this element was created.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.owner.is_some()
    }

    /// The bound `GenericParam` row.
    ///
    /// # Errors
    /// Propagates errors from lazily reading the owner's parameter list.
    pub fn parameter(&self) -> Result<Option<GenericParameterRc>> {
        match &self.owner {
            Some(owner) => owner.parameter(self.position),
            None => Ok(None),
        }
    }

    /// The name of the bound parameter, or `!n` / `!!n` for placeholders.
    pub fn name(&self) -> String {
        if let Ok(Some(parameter)) = self.parameter() {
            return parameter.name.clone();
        }

        match self.kind {
            GenericParameterKind::Type => format!("!{}", self.position),
            GenericParameterKind::Method => format!("!!{}", self.position),
        }
    }
}

impl fmt::Debug for GenericParamSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericParamSig")
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// One dimension of a general array; either bound may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArrayDimension {
    /// The lower bound
    pub lower_bound: Option<i32>,
    /// The upper bound (inclusive)
    pub upper_bound: Option<i32>,
}

/// A general (`ARRAY`) array type.
#[derive(Debug, Clone, PartialEq)]
pub struct ArraySignature {
    /// Element type
    pub element: Box<TypeSignature>,
    /// Number of dimensions
    pub rank: u32,
    /// The first dimensions; may be shorter than `rank`
    pub dimensions: Vec<ArrayDimension>,
}

/// A type as it appears in a signature blob.
#[derive(Debug, Clone, Default)]
pub enum TypeSignature {
    /// void
    #[default]
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// System.String
    String,
    /// System.TypedReference
    TypedByRef,
    /// signed integer, sized to executing platform
    I,
    /// unsigned integer, sized to executing platform
    U,
    /// System.Object
    Object,
    /// A reference type
    Class(TypeHandle),
    /// A value type
    ValueType(TypeHandle),
    /// Unmanaged pointer
    Ptr(Box<TypeSignature>),
    /// Managed pointer
    ByRef(Box<TypeSignature>),
    /// Pinned local variable
    Pinned(Box<TypeSignature>),
    /// First vararg parameter of a call site
    Sentinel(Box<TypeSignature>),
    /// Single dimension, zero based array
    SzArray(Box<TypeSignature>),
    /// General array
    Array(ArraySignature),
    /// Instantiation of a generic type
    GenericInst {
        /// The open generic type (`Class` or `ValueType`)
        generic: Box<TypeSignature>,
        /// Type arguments
        arguments: Vec<TypeSignature>,
    },
    /// Type or method generic parameter
    GenericParam(GenericParamSig),
    /// Function pointer
    FnPtr(Box<MethodSignature>),
    /// A custom modifier applied to a type
    Modified {
        /// `modreq` if true, `modopt` otherwise
        required: bool,
        /// The modifier type
        modifier: Box<TypeSignature>,
        /// The modified type
        base: Box<TypeSignature>,
    },
}

impl TypeSignature {
    /// `CLASS` pointing at a type definition.
    #[must_use]
    pub fn class(definition: &TypeDefinitionRc) -> Self {
        TypeSignature::Class(TypeHandle::definition(definition))
    }

    /// `VALUETYPE` pointing at a type definition.
    #[must_use]
    pub fn value_type(definition: &TypeDefinitionRc) -> Self {
        TypeSignature::ValueType(TypeHandle::definition(definition))
    }

    /// `CLASS` or `VALUETYPE` pointing at a type reference.
    #[must_use]
    pub fn reference(reference: &TypeReferenceRc, is_value_type: bool) -> Self {
        if is_value_type {
            TypeSignature::ValueType(TypeHandle::reference(reference))
        } else {
            TypeSignature::Class(TypeHandle::reference(reference))
        }
    }

    /// `SZARRAY` of `element`.
    #[must_use]
    pub fn sz_array(element: TypeSignature) -> Self {
        TypeSignature::SzArray(Box::new(element))
    }

    /// `BYREF` to `element`.
    #[must_use]
    pub fn by_ref(element: TypeSignature) -> Self {
        TypeSignature::ByRef(Box::new(element))
    }

    /// Instantiation of `generic` with `arguments`.
    #[must_use]
    pub fn generic_instance(generic: TypeSignature, arguments: Vec<TypeSignature>) -> Self {
        TypeSignature::GenericInst {
            generic: Box::new(generic),
            arguments,
        }
    }

    /// Unbound `!position` placeholder.
    #[must_use]
    pub fn type_parameter(position: u16) -> Self {
        TypeSignature::GenericParam(GenericParamSig::unbound(
            GenericParameterKind::Type,
            position,
        ))
    }

    /// Unbound `!!position` placeholder.
    #[must_use]
    pub fn method_parameter(position: u16) -> Self {
        TypeSignature::GenericParam(GenericParamSig::unbound(
            GenericParameterKind::Method,
            position,
        ))
    }

    /// The element type tag of the outermost constructor.
    #[must_use]
    pub fn element_type(&self) -> u8 {
        match self {
            TypeSignature::Void => ELEMENT_TYPE::VOID,
            TypeSignature::Boolean => ELEMENT_TYPE::BOOLEAN,
            TypeSignature::Char => ELEMENT_TYPE::CHAR,
            TypeSignature::I1 => ELEMENT_TYPE::I1,
            TypeSignature::U1 => ELEMENT_TYPE::U1,
            TypeSignature::I2 => ELEMENT_TYPE::I2,
            TypeSignature::U2 => ELEMENT_TYPE::U2,
            TypeSignature::I4 => ELEMENT_TYPE::I4,
            TypeSignature::U4 => ELEMENT_TYPE::U4,
            TypeSignature::I8 => ELEMENT_TYPE::I8,
            TypeSignature::U8 => ELEMENT_TYPE::U8,
            TypeSignature::R4 => ELEMENT_TYPE::R4,
            TypeSignature::R8 => ELEMENT_TYPE::R8,
            TypeSignature::String => ELEMENT_TYPE::STRING,
            TypeSignature::TypedByRef => ELEMENT_TYPE::TYPEDBYREF,
            TypeSignature::I => ELEMENT_TYPE::I,
            TypeSignature::U => ELEMENT_TYPE::U,
            TypeSignature::Object => ELEMENT_TYPE::OBJECT,
            TypeSignature::Class(_) => ELEMENT_TYPE::CLASS,
            TypeSignature::ValueType(_) => ELEMENT_TYPE::VALUETYPE,
            TypeSignature::Ptr(_) => ELEMENT_TYPE::PTR,
            TypeSignature::ByRef(_) => ELEMENT_TYPE::BYREF,
            TypeSignature::Pinned(_) => ELEMENT_TYPE::PINNED,
            TypeSignature::Sentinel(_) => ELEMENT_TYPE::SENTINEL,
            TypeSignature::SzArray(_) => ELEMENT_TYPE::SZARRAY,
            TypeSignature::Array(_) => ELEMENT_TYPE::ARRAY,
            TypeSignature::GenericInst { .. } => ELEMENT_TYPE::GENERICINST,
            TypeSignature::GenericParam(param) => match param.kind {
                GenericParameterKind::Type => ELEMENT_TYPE::VAR,
                GenericParameterKind::Method => ELEMENT_TYPE::MVAR,
            },
            TypeSignature::FnPtr(_) => ELEMENT_TYPE::FNPTR,
            TypeSignature::Modified { required, .. } => {
                if *required {
                    ELEMENT_TYPE::CMOD_REQD
                } else {
                    ELEMENT_TYPE::CMOD_OPT
                }
            }
        }
    }

    /// Map a single-byte element type back to its primitive.
    #[must_use]
    pub fn primitive(element_type: u8) -> Option<Self> {
        Some(match element_type {
            ELEMENT_TYPE::VOID => TypeSignature::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSignature::Boolean,
            ELEMENT_TYPE::CHAR => TypeSignature::Char,
            ELEMENT_TYPE::I1 => TypeSignature::I1,
            ELEMENT_TYPE::U1 => TypeSignature::U1,
            ELEMENT_TYPE::I2 => TypeSignature::I2,
            ELEMENT_TYPE::U2 => TypeSignature::U2,
            ELEMENT_TYPE::I4 => TypeSignature::I4,
            ELEMENT_TYPE::U4 => TypeSignature::U4,
            ELEMENT_TYPE::I8 => TypeSignature::I8,
            ELEMENT_TYPE::U8 => TypeSignature::U8,
            ELEMENT_TYPE::R4 => TypeSignature::R4,
            ELEMENT_TYPE::R8 => TypeSignature::R8,
            ELEMENT_TYPE::STRING => TypeSignature::String,
            ELEMENT_TYPE::TYPEDBYREF => TypeSignature::TypedByRef,
            ELEMENT_TYPE::I => TypeSignature::I,
            ELEMENT_TYPE::U => TypeSignature::U,
            ELEMENT_TYPE::OBJECT => TypeSignature::Object,
            _ => return None,
        })
    }

    /// The `System` name of a primitive, such as `Int32` for `I4`.
    #[must_use]
    pub fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            TypeSignature::Void => "Void",
            TypeSignature::Boolean => "Boolean",
            TypeSignature::Char => "Char",
            TypeSignature::I1 => "SByte",
            TypeSignature::U1 => "Byte",
            TypeSignature::I2 => "Int16",
            TypeSignature::U2 => "UInt16",
            TypeSignature::I4 => "Int32",
            TypeSignature::U4 => "UInt32",
            TypeSignature::I8 => "Int64",
            TypeSignature::U8 => "UInt64",
            TypeSignature::R4 => "Single",
            TypeSignature::R8 => "Double",
            TypeSignature::String => "String",
            TypeSignature::TypedByRef => "TypedReference",
            TypeSignature::I => "IntPtr",
            TypeSignature::U => "UIntPtr",
            TypeSignature::Object => "Object",
            _ => return None,
        })
    }

    /// The `CLASS` / `VALUETYPE` handle, looking through generic instantiations.
    pub fn handle(&self) -> Option<&TypeHandle> {
        match self {
            TypeSignature::Class(handle) | TypeSignature::ValueType(handle) => Some(handle),
            TypeSignature::GenericInst { generic, .. } => generic.handle(),
            _ => None,
        }
    }

    /// True if any `VAR` or `MVAR` appears in this type.
    #[must_use]
    pub fn contains_generic_parameter(&self) -> bool {
        match self {
            TypeSignature::GenericParam(_) => true,
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::Pinned(inner)
            | TypeSignature::Sentinel(inner)
            | TypeSignature::SzArray(inner) => inner.contains_generic_parameter(),
            TypeSignature::Array(array) => array.element.contains_generic_parameter(),
            TypeSignature::GenericInst { generic, arguments } => {
                generic.contains_generic_parameter()
                    || arguments.iter().any(TypeSignature::contains_generic_parameter)
            }
            TypeSignature::FnPtr(method) => {
                method.return_type.contains_generic_parameter()
                    || method
                        .parameters
                        .iter()
                        .any(TypeSignature::contains_generic_parameter)
            }
            TypeSignature::Modified { modifier, base, .. } => {
                modifier.contains_generic_parameter() || base.contains_generic_parameter()
            }
            _ => false,
        }
    }

    /// Replace `!n` by `type_arguments[n]` and `!!n` by `method_arguments[n]`.
    ///
    /// Parameters without a matching argument are kept as they are.
    #[must_use]
    pub fn substitute(
        &self,
        type_arguments: &[TypeSignature],
        method_arguments: &[TypeSignature],
    ) -> TypeSignature {
        let recurse = |inner: &TypeSignature| {
            Box::new(inner.substitute(type_arguments, method_arguments))
        };

        match self {
            TypeSignature::GenericParam(param) => {
                let arguments = match param.kind {
                    GenericParameterKind::Type => type_arguments,
                    GenericParameterKind::Method => method_arguments,
                };
                arguments
                    .get(usize::from(param.position))
                    .cloned()
                    .unwrap_or_else(|| self.clone())
            }
            TypeSignature::Ptr(inner) => TypeSignature::Ptr(recurse(inner.as_ref())),
            TypeSignature::ByRef(inner) => TypeSignature::ByRef(recurse(inner.as_ref())),
            TypeSignature::Pinned(inner) => TypeSignature::Pinned(recurse(inner.as_ref())),
            TypeSignature::Sentinel(inner) => TypeSignature::Sentinel(recurse(inner.as_ref())),
            TypeSignature::SzArray(inner) => TypeSignature::SzArray(recurse(inner.as_ref())),
            TypeSignature::Array(array) => TypeSignature::Array(ArraySignature {
                element: recurse(array.element.as_ref()),
                rank: array.rank,
                dimensions: array.dimensions.clone(),
            }),
            TypeSignature::GenericInst { generic, arguments } => TypeSignature::GenericInst {
                generic: recurse(generic.as_ref()),
                arguments: arguments
                    .iter()
                    .map(|argument| argument.substitute(type_arguments, method_arguments))
                    .collect(),
            },
            TypeSignature::FnPtr(method) => {
                TypeSignature::FnPtr(Box::new(method.substitute(type_arguments, method_arguments)))
            }
            TypeSignature::Modified {
                required,
                modifier,
                base,
            } => TypeSignature::Modified {
                required: *required,
                modifier: recurse(modifier.as_ref()),
                base: recurse(base.as_ref()),
            },
            _ => self.clone(),
        }
    }

    /// Display name, such as `System.Collections.Generic.List`1<System.Int32>`.
    pub fn full_name(&self) -> String {
        if let Some(name) = self.primitive_name() {
            return format!("System.{name}");
        }

        match self {
            TypeSignature::Class(handle) | TypeSignature::ValueType(handle) => handle.full_name(),
            TypeSignature::Ptr(inner) => format!("{}*", inner.full_name()),
            TypeSignature::ByRef(inner) => format!("{}&", inner.full_name()),
            TypeSignature::Pinned(inner) => format!("{} pinned", inner.full_name()),
            TypeSignature::Sentinel(inner) => format!("...{}", inner.full_name()),
            TypeSignature::SzArray(inner) => format!("{}[]", inner.full_name()),
            TypeSignature::Array(array) => {
                let mut dimensions = Vec::with_capacity(array.rank as usize);
                for index in 0..array.rank as usize {
                    let dimension = array.dimensions.get(index).copied().unwrap_or_default();
                    dimensions.push(match (dimension.lower_bound, dimension.upper_bound) {
                        (Some(lower), Some(upper)) => format!("{lower}...{upper}"),
                        (Some(lower), None) => format!("{lower}..."),
                        (None, Some(upper)) => format!("0...{upper}"),
                        (None, None) => String::new(),
                    });
                }
                format!("{}[{}]", array.element.full_name(), dimensions.join(","))
            }
            TypeSignature::GenericInst { generic, arguments } => {
                let arguments: Vec<String> =
                    arguments.iter().map(TypeSignature::full_name).collect();
                format!("{}<{}>", generic.full_name(), arguments.join(","))
            }
            TypeSignature::GenericParam(param) => param.name(),
            TypeSignature::FnPtr(method) => {
                let parameters: Vec<String> = method
                    .parameters
                    .iter()
                    .map(TypeSignature::full_name)
                    .collect();
                format!(
                    "method {} *({})",
                    method.return_type.full_name(),
                    parameters.join(",")
                )
            }
            TypeSignature::Modified {
                required,
                modifier,
                base,
            } => format!(
                "{} {}({})",
                base.full_name(),
                if *required { "modreq" } else { "modopt" },
                modifier.full_name()
            ),
            _ => String::new(),
        }
    }
}

impl TypeSignature {
    /// Structural equality with type handles compared by full name only, ignoring the
    /// assembly that declares them.
    #[must_use]
    pub fn same_shape(&self, other: &TypeSignature) -> bool {
        self.equals_with(other, &TypeHandle::same_name)
    }

    fn equals_with(
        &self,
        other: &TypeSignature,
        same_handle: &dyn Fn(&TypeHandle, &TypeHandle) -> bool,
    ) -> bool {
        match (self, other) {
            (TypeSignature::Class(a), TypeSignature::Class(b))
            | (TypeSignature::ValueType(a), TypeSignature::ValueType(b)) => same_handle(a, b),
            (TypeSignature::Ptr(a), TypeSignature::Ptr(b))
            | (TypeSignature::ByRef(a), TypeSignature::ByRef(b))
            | (TypeSignature::Pinned(a), TypeSignature::Pinned(b))
            | (TypeSignature::Sentinel(a), TypeSignature::Sentinel(b))
            | (TypeSignature::SzArray(a), TypeSignature::SzArray(b)) => {
                a.equals_with(b, same_handle)
            }
            (TypeSignature::Array(a), TypeSignature::Array(b)) => {
                a.rank == b.rank
                    && a.dimensions == b.dimensions
                    && a.element.equals_with(&b.element, same_handle)
            }
            (
                TypeSignature::GenericInst {
                    generic: generic_a,
                    arguments: arguments_a,
                },
                TypeSignature::GenericInst {
                    generic: generic_b,
                    arguments: arguments_b,
                },
            ) => {
                generic_a.equals_with(generic_b, same_handle)
                    && arguments_a.len() == arguments_b.len()
                    && arguments_a
                        .iter()
                        .zip(arguments_b)
                        .all(|(a, b)| a.equals_with(b, same_handle))
            }
            (TypeSignature::GenericParam(a), TypeSignature::GenericParam(b)) => {
                a.kind == b.kind && a.position == b.position
            }
            (TypeSignature::FnPtr(a), TypeSignature::FnPtr(b)) => a.equals_with(b, same_handle),
            (
                TypeSignature::Modified {
                    required: required_a,
                    modifier: modifier_a,
                    base: base_a,
                },
                TypeSignature::Modified {
                    required: required_b,
                    modifier: modifier_b,
                    base: base_b,
                },
            ) => {
                required_a == required_b
                    && modifier_a.equals_with(modifier_b, same_handle)
                    && base_a.equals_with(base_b, same_handle)
            }
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl PartialEq for TypeSignature {
    fn eq(&self, other: &Self) -> bool {
        self.equals_with(other, &<TypeHandle as PartialEq>::eq)
    }
}

impl Eq for TypeSignature {}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// A method signature (II.23.2.1 - II.23.2.3), also used for function pointers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodSignature {
    /// The method has a `this` pointer
    pub has_this: bool,
    /// The `this` pointer is the first explicit parameter
    pub explicit_this: bool,
    /// Calling convention
    pub calling_convention: CallingConvention,
    /// Number of generic parameters
    pub generic_parameter_count: u32,
    /// Return type
    pub return_type: TypeSignature,
    /// Parameter types; the first vararg parameter is wrapped in `Sentinel`
    pub parameters: Vec<TypeSignature>,
}

impl MethodSignature {
    /// A static method returning `return_type`.
    #[must_use]
    pub fn new(return_type: TypeSignature, parameters: Vec<TypeSignature>) -> Self {
        MethodSignature {
            return_type,
            parameters,
            ..MethodSignature::default()
        }
    }

    /// Substitute generic parameters in return and parameter types.
    #[must_use]
    pub fn substitute(
        &self,
        type_arguments: &[TypeSignature],
        method_arguments: &[TypeSignature],
    ) -> MethodSignature {
        MethodSignature {
            has_this: self.has_this,
            explicit_this: self.explicit_this,
            calling_convention: self.calling_convention,
            generic_parameter_count: self.generic_parameter_count,
            return_type: self
                .return_type
                .substitute(type_arguments, method_arguments),
            parameters: self
                .parameters
                .iter()
                .map(|parameter| parameter.substitute(type_arguments, method_arguments))
                .collect(),
        }
    }

    fn equals_with(
        &self,
        other: &MethodSignature,
        same_handle: &dyn Fn(&TypeHandle, &TypeHandle) -> bool,
    ) -> bool {
        self.has_this == other.has_this
            && self.explicit_this == other.explicit_this
            && self.calling_convention == other.calling_convention
            && self.generic_parameter_count == other.generic_parameter_count
            && self.return_type.equals_with(&other.return_type, same_handle)
            && self.parameters.len() == other.parameters.len()
            && self
                .parameters
                .iter()
                .zip(&other.parameters)
                .all(|(a, b)| a.equals_with(b, same_handle))
    }

    /// The header byte that starts this signature's blob.
    #[must_use]
    pub fn header(&self) -> u8 {
        let mut header = self.calling_convention.header_bits();
        if self.has_this {
            header |= SIGNATURE_HEADER::HAS_THIS;
        }
        if self.explicit_this {
            header |= SIGNATURE_HEADER::EXPLICIT_THIS;
        }
        if self.generic_parameter_count > 0 {
            header |= SIGNATURE_HEADER::GENERIC;
        }
        header
    }
}

/// A property signature (II.23.2.5).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertySignature {
    /// The property is an instance property
    pub has_this: bool,
    /// The property type
    pub property_type: TypeSignature,
    /// Index parameters
    pub parameters: Vec<TypeSignature>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        image::ModuleKind,
        typesystem::{AssemblyNameReference, AssemblyVersion, ModuleDefinition, TypeReference},
    };

    #[test]
    fn structural_equality() {
        assert_eq!(TypeSignature::I4, TypeSignature::I4);
        assert_ne!(TypeSignature::I4, TypeSignature::U4);
        assert_eq!(
            TypeSignature::sz_array(TypeSignature::String),
            TypeSignature::sz_array(TypeSignature::String)
        );
        assert_ne!(
            TypeSignature::sz_array(TypeSignature::String),
            TypeSignature::by_ref(TypeSignature::String)
        );
        assert_eq!(
            TypeSignature::type_parameter(1),
            TypeSignature::type_parameter(1)
        );
        assert_ne!(
            TypeSignature::type_parameter(1),
            TypeSignature::method_parameter(1)
        );
    }

    #[test]
    fn value_types_differ_from_classes() {
        let module = ModuleDefinition::create("Shapes.dll", ModuleKind::Dll);
        let point = TypeDefinition::new("Shapes", "Point", 0, None);
        module.add_type(point.clone()).unwrap();

        assert_eq!(TypeSignature::value_type(&point), TypeSignature::value_type(&point));
        assert_ne!(TypeSignature::class(&point), TypeSignature::value_type(&point));
        assert!(!TypeSignature::class(&point).same_shape(&TypeSignature::value_type(&point)));
        assert_ne!(
            TypeSignature::sz_array(TypeSignature::class(&point)),
            TypeSignature::sz_array(TypeSignature::value_type(&point))
        );
    }

    #[test]
    fn handles_compare_their_scope() {
        let module = ModuleDefinition::create_assembly(
            AssemblyNameReference::new("Shapes", AssemblyVersion::new(1, 0, 0, 0)),
            "Shapes.dll",
            ModuleKind::Dll,
        );
        let point = TypeDefinition::new("Shapes", "Point", 0, None);
        module.add_type(point.clone()).unwrap();
        let other = module
            .add_assembly_reference(AssemblyNameReference::new("Other", AssemblyVersion::new(1, 0, 0, 0)))
            .unwrap();

        let definition = TypeHandle::definition(&point);
        let local = TypeReference::new(&module, "Shapes", "Point", TypeReferenceScope::CurrentModule);
        let foreign = TypeReference::new(&module, "Shapes", "Point", TypeReferenceScope::Assembly(other));
        let unscoped = TypeReference::new(&module, "Shapes", "Point", TypeReferenceScope::None);

        assert_eq!(definition.scope_name().as_deref(), Some("Shapes"));
        assert_eq!(TypeHandle::reference(&foreign).scope_name().as_deref(), Some("Other"));
        assert_eq!(definition, TypeHandle::reference(&local));
        assert_ne!(definition, TypeHandle::reference(&foreign));
        assert_eq!(definition, TypeHandle::reference(&unscoped));

        // matching by name alone ignores the assembly
        assert!(definition.same_name(&TypeHandle::reference(&foreign)));
        assert!(TypeSignature::class(&point)
            .same_shape(&TypeSignature::reference(&foreign, false)));
        assert_ne!(
            TypeSignature::class(&point),
            TypeSignature::reference(&foreign, false)
        );
    }

    #[test]
    fn substitution() {
        let open = TypeSignature::sz_array(TypeSignature::method_parameter(0));
        let closed = open.substitute(&[], &[TypeSignature::I4]);
        assert_eq!(closed, TypeSignature::sz_array(TypeSignature::I4));
        assert!(open.contains_generic_parameter());
        assert!(!closed.contains_generic_parameter());

        let untouched = TypeSignature::type_parameter(3).substitute(&[TypeSignature::I4], &[]);
        assert_eq!(untouched, TypeSignature::type_parameter(3));
    }

    #[test]
    fn names() {
        assert_eq!(TypeSignature::I4.full_name(), "System.Int32");
        assert_eq!(
            TypeSignature::sz_array(TypeSignature::method_parameter(0)).full_name(),
            "!!0[]"
        );

        let array = TypeSignature::Array(ArraySignature {
            element: Box::new(TypeSignature::I4),
            rank: 2,
            dimensions: vec![ArrayDimension {
                lower_bound: Some(0),
                upper_bound: Some(4),
            }],
        });
        assert_eq!(array.to_string(), "System.Int32[0...4,]");
    }

    #[test]
    fn method_header() {
        let mut signature = MethodSignature::new(TypeSignature::Void, vec![]);
        assert_eq!(signature.header(), 0x00);

        signature.has_this = true;
        signature.generic_parameter_count = 1;
        assert_eq!(signature.header(), 0x30);
        assert_eq!(
            CallingConvention::from_header(0x30).unwrap(),
            CallingConvention::Default
        );
        assert!(CallingConvention::from_header(SIGNATURE_HEADER::FIELD).is_err());
    }
}
