//! Flag values of the metadata table columns (II.23.1).
//!
//! The plain attribute columns are exposed as constant modules matching their column width.
//! Method semantics and P/Invoke attributes are combined and matched as sets, so they are
//! `bitflags` types.

use bitflags::bitflags;

#[allow(non_snake_case)]
/// All possible flags for `TypeAttributes`
pub mod TypeAttributes {
    /// Mask for the visibility bits
    pub const VISIBILITY_MASK: u32 = 0x0000_0007;
    /// Top-level type, not visible outside the assembly
    pub const NOT_PUBLIC: u32 = 0x0000_0000;
    /// Top-level type, visible outside the assembly
    pub const PUBLIC: u32 = 0x0000_0001;
    /// Nested type, public
    pub const NESTED_PUBLIC: u32 = 0x0000_0002;
    /// Nested type, private
    pub const NESTED_PRIVATE: u32 = 0x0000_0003;
    /// Nested type, family
    pub const NESTED_FAMILY: u32 = 0x0000_0004;
    /// Nested type, assembly
    pub const NESTED_ASSEMBLY: u32 = 0x0000_0005;
    /// Nested type, family and assembly
    pub const NESTED_FAM_AND_ASSEM: u32 = 0x0000_0006;
    /// Nested type, family or assembly
    pub const NESTED_FAM_OR_ASSEM: u32 = 0x0000_0007;
    /// Mask for the layout bits
    pub const LAYOUT_MASK: u32 = 0x0000_0018;
    /// Fields are laid out by the runtime
    pub const AUTO_LAYOUT: u32 = 0x0000_0000;
    /// Fields are laid out in declaration order
    pub const SEQUENTIAL_LAYOUT: u32 = 0x0000_0008;
    /// Fields carry explicit offsets
    pub const EXPLICIT_LAYOUT: u32 = 0x0000_0010;
    /// Type is an interface
    pub const INTERFACE: u32 = 0x0000_0020;
    /// Type is abstract
    pub const ABSTRACT: u32 = 0x0000_0080;
    /// Type can not be derived from
    pub const SEALED: u32 = 0x0000_0100;
    /// Name has a special meaning
    pub const SPECIAL_NAME: u32 = 0x0000_0400;
    /// Type is imported
    pub const IMPORT: u32 = 0x0000_1000;
    /// Type is serializable
    pub const SERIALIZABLE: u32 = 0x0000_2000;
    /// Strings are marshalled as Unicode
    pub const UNICODE_CLASS: u32 = 0x0001_0000;
    /// Static fields may be initialized lazily
    pub const BEFORE_FIELD_INIT: u32 = 0x0010_0000;
    /// Runtime treats the name specially
    pub const RTSPECIAL_NAME: u32 = 0x0000_0800;
    /// Type has security declarations
    pub const HAS_SECURITY: u32 = 0x0004_0000;
}

#[allow(non_snake_case)]
/// All possible flags for `FieldAttributes`
pub mod FieldAttributes {
    /// Mask for the access bits
    pub const FIELD_ACCESS_MASK: u16 = 0x0007;
    /// Accessible only by the parent type
    pub const PRIVATE: u16 = 0x0001;
    /// Accessible by anyone in the assembly
    pub const ASSEMBLY: u16 = 0x0003;
    /// Accessible by type and sub-types
    pub const FAMILY: u16 = 0x0004;
    /// Accessible by anyone
    pub const PUBLIC: u16 = 0x0006;
    /// Defined on type, else per instance
    pub const STATIC: u16 = 0x0010;
    /// Field can only be initialized
    pub const INIT_ONLY: u16 = 0x0020;
    /// Value is a compile time constant
    pub const LITERAL: u16 = 0x0040;
    /// Not serialized when the type is remoted
    pub const NOT_SERIALIZED: u16 = 0x0080;
    /// Field has an RVA
    pub const HAS_FIELD_RVA: u16 = 0x0100;
    /// Name has a special meaning
    pub const SPECIAL_NAME: u16 = 0x0200;
    /// Runtime treats the name specially
    pub const RTSPECIAL_NAME: u16 = 0x0400;
    /// Field has marshalling information
    pub const HAS_FIELD_MARSHAL: u16 = 0x1000;
    /// Field has a default value
    pub const HAS_DEFAULT: u16 = 0x8000;
}

#[allow(non_snake_case)]
/// All possible flags for `MethodAttributes`
pub mod MethodAttributes {
    /// Mask for the access bits
    pub const MEMBER_ACCESS_MASK: u16 = 0x0007;
    /// Accessible only by the parent type
    pub const PRIVATE: u16 = 0x0001;
    /// Accessible by anyone in the assembly
    pub const ASSEMBLY: u16 = 0x0003;
    /// Accessible by type and sub-types
    pub const FAMILY: u16 = 0x0004;
    /// Accessible by anyone
    pub const PUBLIC: u16 = 0x0006;
    /// Defined on type, else per instance
    pub const STATIC: u16 = 0x0010;
    /// Method can not be overridden
    pub const FINAL: u16 = 0x0020;
    /// Method is virtual
    pub const VIRTUAL: u16 = 0x0040;
    /// Method hides by name and signature
    pub const HIDE_BY_SIG: u16 = 0x0080;
    /// Method always gets a new vtable slot
    pub const NEW_SLOT: u16 = 0x0100;
    /// Method is abstract
    pub const ABSTRACT: u16 = 0x0400;
    /// Name has a special meaning
    pub const SPECIAL_NAME: u16 = 0x0800;
    /// Runtime treats the name specially
    pub const RTSPECIAL_NAME: u16 = 0x1000;
    /// Implementation is forwarded through P/Invoke
    pub const PINVOKE_IMPL: u16 = 0x2000;
    /// Method has security declarations
    pub const HAS_SECURITY: u16 = 0x4000;
}

#[allow(non_snake_case)]
/// All possible flags for `MethodImplAttributes`
pub mod MethodImplAttributes {
    /// Method body is CIL
    pub const IL: u16 = 0x0000;
    /// Method body is native code
    pub const NATIVE: u16 = 0x0001;
    /// Method is implemented by the runtime
    pub const RUNTIME: u16 = 0x0003;
    /// Method must not be inlined
    pub const NO_INLINING: u16 = 0x0008;
    /// Method is single threaded through its body
    pub const SYNCHRONIZED: u16 = 0x0020;
    /// Signature is exported exactly as declared
    pub const PRESERVE_SIG: u16 = 0x0080;
    /// Method is implemented inside the runtime
    pub const INTERNAL_CALL: u16 = 0x1000;
}

#[allow(non_snake_case)]
/// All possible flags for `ParamAttributes`
pub mod ParamAttributes {
    /// Parameter is `[In]`
    pub const IN: u16 = 0x0001;
    /// Parameter is `[Out]`
    pub const OUT: u16 = 0x0002;
    /// Parameter is optional
    pub const OPTIONAL: u16 = 0x0010;
    /// Parameter has a default value
    pub const HAS_DEFAULT: u16 = 0x1000;
    /// Parameter has marshalling information
    pub const HAS_FIELD_MARSHAL: u16 = 0x2000;
}

#[allow(non_snake_case)]
/// All possible flags for `PropertyAttributes`
pub mod PropertyAttributes {
    /// Name has a special meaning
    pub const SPECIAL_NAME: u16 = 0x0200;
    /// Runtime treats the name specially
    pub const RTSPECIAL_NAME: u16 = 0x0400;
    /// Property has a default value
    pub const HAS_DEFAULT: u16 = 0x1000;
}

#[allow(non_snake_case)]
/// All possible flags for `EventAttributes`
pub mod EventAttributes {
    /// Name has a special meaning
    pub const SPECIAL_NAME: u16 = 0x0200;
    /// Runtime treats the name specially
    pub const RTSPECIAL_NAME: u16 = 0x0400;
}

#[allow(non_snake_case)]
/// All possible flags for `GenericParamAttributes`
pub mod GenericParamAttributes {
    /// Mask for the variance bits
    pub const VARIANCE_MASK: u16 = 0x0003;
    /// Parameter is covariant
    pub const COVARIANT: u16 = 0x0001;
    /// Parameter is contravariant
    pub const CONTRAVARIANT: u16 = 0x0002;
    /// Parameter must be a reference type
    pub const REFERENCE_TYPE_CONSTRAINT: u16 = 0x0004;
    /// Parameter must be a non-nullable value type
    pub const NOT_NULLABLE_VALUE_TYPE_CONSTRAINT: u16 = 0x0008;
    /// Parameter must have a default constructor
    pub const DEFAULT_CONSTRUCTOR_CONSTRAINT: u16 = 0x0010;
}

#[allow(non_snake_case)]
/// All possible flags for `AssemblyFlags`
pub mod AssemblyFlags {
    /// The assembly reference holds the full public key
    pub const PUBLIC_KEY: u32 = 0x0001;
    /// The assembly can be retargeted at runtime
    pub const RETARGETABLE: u32 = 0x0100;
    /// JIT tracking is disabled
    pub const DISABLE_JIT_COMPILE_OPTIMIZER: u32 = 0x4000;
    /// JIT tracking is enabled
    pub const ENABLE_JIT_COMPILE_TRACKING: u32 = 0x8000;
}

#[allow(non_snake_case)]
/// All possible values for `AssemblyHashAlgorithm`
pub mod AssemblyHashAlgorithm {
    /// No hash
    pub const NONE: u32 = 0x0000;
    /// MD5
    pub const MD5: u32 = 0x8003;
    /// SHA-1
    pub const SHA1: u32 = 0x8004;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// The role of a method for a property or event (`MethodSemantics.Semantics`)
    pub struct MethodSemanticsAttributes: u16 {
        /// Property setter
        const SETTER = 0x0001;
        /// Property getter
        const GETTER = 0x0002;
        /// Other accessor of a property or event
        const OTHER = 0x0004;
        /// Event `add` accessor
        const ADD_ON = 0x0008;
        /// Event `remove` accessor
        const REMOVE_ON = 0x0010;
        /// Event `raise` accessor
        const FIRE = 0x0020;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// The `MappingFlags` of an `ImplMap` row
    pub struct PInvokeAttributes: u16 {
        /// Use the member name as specified
        const NO_MANGLE = 0x0001;
        /// Marshal strings as ANSI
        const CHAR_SET_ANSI = 0x0002;
        /// Marshal strings as Unicode
        const CHAR_SET_UNICODE = 0x0004;
        /// Let the runtime choose the character set
        const CHAR_SET_AUTO = 0x0006;
        /// Enable best fit mapping
        const BEST_FIT_ENABLED = 0x0010;
        /// Disable best fit mapping
        const BEST_FIT_DISABLED = 0x0020;
        /// Record the last Win32 error
        const SUPPORTS_LAST_ERROR = 0x0040;
        /// Platform default calling convention
        const CALL_CONV_WINAPI = 0x0100;
        /// `cdecl`
        const CALL_CONV_CDECL = 0x0200;
        /// `stdcall`
        const CALL_CONV_STDCALL = 0x0300;
        /// `thiscall`
        const CALL_CONV_THISCALL = 0x0400;
        /// `fastcall`
        const CALL_CONV_FASTCALL = 0x0500;
        /// Throw on unmappable characters
        const THROW_ON_UNMAPPABLE_ENABLED = 0x1000;
        /// Do not throw on unmappable characters
        const THROW_ON_UNMAPPABLE_DISABLED = 0x2000;

        // Keep unknown bits on round trips
        const _ = !0;
    }
}
