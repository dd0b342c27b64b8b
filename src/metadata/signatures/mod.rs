//! Encoding and decoding of the blobs stored in the `#Blob` heap.
//!
//! Signatures describe the types of fields, methods, properties, locals, type specifications and
//! generic method instantiations (ECMA-335 II.23.2). Besides those, this module handles the
//! other structured blobs the metadata tables point to:
//!
//! - custom attribute values (II.23.3)
//! - security permission sets (II.22.11)
//! - field marshalling descriptors (II.23.4)
//! - constant values (II.22.9)
//!
//! Decoding is driven by a context trait, so that tokens and generic parameter numbers can be
//! bound to entities of the module being read. [`UnboundContext`] decodes blobs that are not
//! attached to a module.
//!
//! # Examples
//!
//! ```rust
//! use dotmeta::metadata::signatures::{SignatureReader, TypeSignature, UnboundContext};
//!
//! let mut context = UnboundContext;
//! let field = SignatureReader::new(&[0x06, 0x1D, 0x08], &mut context)
//!     .read_field_signature()?;
//! assert_eq!(field, TypeSignature::sz_array(TypeSignature::I4));
//! # Ok::<(), dotmeta::Error>(())
//! ```

mod constants;
mod customattributes;
mod marshal;
mod reader;
mod security;
mod types;
mod writer;

pub use constants::ConstantValue;
pub use customattributes::{
    read_custom_attribute, write_custom_attribute, AttributeContext, CustomAttributeArgument,
    CustomAttributeElement, CustomAttributeNamedArgument, CustomAttributeValue, TypeName,
};
pub use marshal::{MarshalInfo, NATIVE_TYPE};
pub use reader::{SignatureContext, SignatureReader, TypeTokenTarget, UnboundContext};
pub use security::{
    read_security_declaration, write_security_declaration, SecurityAction, SecurityAttribute,
};
pub use types::{
    ArrayDimension, ArraySignature, CallingConvention, GenericParamSig, MethodSignature,
    PropertySignature, TypeHandle, TypeSignature, ELEMENT_TYPE, SIGNATURE_HEADER,
};
pub use writer::{SignatureWriter, TypeTokens};
