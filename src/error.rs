use thiserror::Error;

use crate::metadata::{tables::CodedIndexType, token::Token};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into two families, which callers can tell apart with
/// [`Error::is_malformed_input`] and [`Error::is_misuse`]:
///
/// ## Malformed input
/// - [`Error::Malformed`] - Corrupted table, heap or signature content
/// - [`Error::OutOfBounds`] - A read went past the end of a heap or table
/// - [`Error::UnsupportedCodedIndex`] - A coded index carried a tag outside its table set
/// - [`Error::UnsupportedElementType`] - A signature contained an unknown element type
/// - [`Error::RecursionLimit`] - Signature nesting exceeded the decoder's depth limit
/// - [`Error::NotSupported`] - A structurally valid but unsupported construct
///
/// ## API misuse
/// - [`Error::InvalidArgument`] - A required argument was empty or inconsistent
/// - [`Error::ForeignMember`] - A member of another module reached the builder
/// - [`Error::NotImplemented`] - The importer was asked to clone an unsupported shape
/// - [`Error::UnboundGenericParameter`] - A generic placeholder had no context to bind to
///
/// Resolution failures (assembly, type or member not found) are never reported
/// through this type, the resolver returns `None` for them.
///
/// # Examples
///
/// ```rust
/// use dotmeta::{Error, metadata::tables::CodedIndexType};
///
/// let err = CodedIndexType::CustomAttributeType.decompress(0x0000_0001).unwrap_err();
/// assert!(matches!(err, Error::UnsupportedCodedIndex { .. }));
/// assert!(err.is_malformed_input());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The metadata is damaged and could not be decoded.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while decoding a heap or table.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A coded index carried a tag that is not part of its table set.
    #[error("Unsupported coded index {value:#x} for {kind:?}")]
    UnsupportedCodedIndex {
        /// The coded index scheme that was being decoded
        kind: CodedIndexType,
        /// The raw value that failed to decode
        value: u32,
    },

    /// A token was used in a coded index slot that cannot hold its table.
    #[error("Token {token} can not be encoded as {kind:?}")]
    TokenNotEncodable {
        /// The coded index scheme that was being encoded
        kind: CodedIndexType,
        /// The token that could not be encoded
        token: Token,
    },

    /// A signature contained an element type tag that is not recognized.
    #[error("Unsupported element type {0:#04x}")]
    UnsupportedElementType(u8),

    /// Signature nesting exceeded the maximum depth allowed.
    ///
    /// The associated value shows the recursion limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The metadata uses a construct this library does not handle.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// An argument passed to the API was null, empty or inconsistent.
    #[error("Invalid argument - {0}")]
    InvalidArgument(String),

    /// A member declared in another module was handed to the metadata builder.
    ///
    /// References have to be imported into the module being written first.
    #[error("Member '{0}' is declared in another module and needs to be imported")]
    ForeignMember(String),

    /// The importer was asked to clone a reference shape it can not express.
    #[error("Not implemented - {0}")]
    NotImplemented(String),

    /// A generic parameter could not be bound because no provider was in scope.
    #[error("Generic parameter !{position} has no provider in the current context")]
    UnboundGenericParameter {
        /// The position of the parameter in its provider's list
        position: u16,
    },

    /// The type required to decode a value could not be found.
    ///
    /// Used when a custom attribute blob references an enum whose underlying
    /// type can not be determined.
    #[error("Failed to find type - {0}")]
    TypeNotFound(String),
}

impl Error {
    /// Returns true if this error was caused by corrupt or unsupported input data.
    #[must_use]
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Error::Malformed { .. }
                | Error::OutOfBounds
                | Error::UnsupportedCodedIndex { .. }
                | Error::UnsupportedElementType(_)
                | Error::RecursionLimit(_)
                | Error::NotSupported(_)
                | Error::TypeNotFound(_)
        )
    }

    /// Returns true if this error was caused by how the API was used.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::ForeignMember(_)
                | Error::NotImplemented(_)
                | Error::UnboundGenericParameter { .. }
                | Error::TokenNotEncodable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_disjoint() {
        let malformed = malformed_error!("broken row {}", 3);
        assert!(malformed.is_malformed_input());
        assert!(!malformed.is_misuse());

        let misuse = Error::ForeignMember("System.Int32".to_string());
        assert!(misuse.is_misuse());
        assert!(!misuse.is_malformed_input());
    }

    #[test]
    fn malformed_records_location() {
        match malformed_error!("bad") {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad");
                assert!(file.ends_with("error.rs"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
