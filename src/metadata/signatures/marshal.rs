use crate::{
    file::{
        io::{write_compressed_uint, write_ser_string},
        parser::Parser,
    },
    Result,
};

#[allow(non_snake_case)]
/// Native type tags of a marshalling descriptor (II.23.4)
pub mod NATIVE_TYPE {
    /// Boolean - 4-byte integer value
    pub const BOOLEAN: u8 = 0x02;
    /// Signed 8-bit integer
    pub const I1: u8 = 0x03;
    /// Unsigned 8-bit integer
    pub const U1: u8 = 0x04;
    /// Signed 16-bit integer
    pub const I2: u8 = 0x05;
    /// Unsigned 16-bit integer
    pub const U2: u8 = 0x06;
    /// Signed 32-bit integer
    pub const I4: u8 = 0x07;
    /// Unsigned 32-bit integer
    pub const U4: u8 = 0x08;
    /// Signed 64-bit integer
    pub const I8: u8 = 0x09;
    /// Unsigned 64-bit integer
    pub const U8: u8 = 0x0a;
    /// 32-bit float
    pub const R4: u8 = 0x0b;
    /// 64-bit float
    pub const R8: u8 = 0x0c;
    /// OLE `BSTR`
    pub const BSTR: u8 = 0x13;
    /// ANSI string pointer
    pub const LPSTR: u8 = 0x14;
    /// Unicode string pointer
    pub const LPWSTR: u8 = 0x15;
    /// Platform string pointer
    pub const LPTSTR: u8 = 0x16;
    /// Fixed length string buffer inside a structure
    pub const FIXEDSYSSTRING: u8 = 0x17;
    /// `IUnknown` pointer
    pub const IUNKNOWN: u8 = 0x19;
    /// `IDispatch` pointer
    pub const IDISPATCH: u8 = 0x1a;
    /// C style structure
    pub const STRUCT: u8 = 0x1b;
    /// COM interface
    pub const INTERFACE: u8 = 0x1c;
    /// COM `SAFEARRAY`
    pub const SAFEARRAY: u8 = 0x1d;
    /// Fixed length array inside a structure
    pub const FIXEDARRAY: u8 = 0x1e;
    /// Platform sized signed integer
    pub const INT: u8 = 0x1f;
    /// Platform sized unsigned integer
    pub const UINT: u8 = 0x20;
    /// `VARIANT_BOOL`
    pub const VARIANTBOOL: u8 = 0x25;
    /// Function pointer
    pub const FUNC: u8 = 0x26;
    /// Marshal as whatever the value turns out to be
    pub const ASANY: u8 = 0x28;
    /// C style array
    pub const ARRAY: u8 = 0x2a;
    /// Pointer to a C style structure
    pub const LPSTRUCT: u8 = 0x2b;
    /// User supplied marshaler
    pub const CUSTOMMARSHALER: u8 = 0x2c;
    /// `HRESULT`
    pub const ERROR: u8 = 0x2d;
    /// UTF-8 string pointer
    pub const LPUTF8STR: u8 = 0x30;
    /// Marks an absent element type
    pub const MAX: u8 = 0x50;
}

/// A `FieldMarshal` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalInfo {
    /// A native type without parameters
    Native(u8),
    /// `NATIVE_TYPE::ARRAY`
    Array {
        /// Element native type
        element_type: Option<u8>,
        /// Index of the parameter that carries the element count
        size_parameter_index: Option<u32>,
        /// Fixed element count
        size: Option<u32>,
        /// Multiplier applied to the parameter count
        size_parameter_multiplier: Option<u32>,
    },
    /// `NATIVE_TYPE::SAFEARRAY`
    SafeArray {
        /// `VARENUM` of the elements
        element_type: Option<u32>,
        /// Name of the user defined element type
        user_defined_sub_type: Option<String>,
    },
    /// `NATIVE_TYPE::FIXEDARRAY`
    FixedArray {
        /// Element count
        size: Option<u32>,
        /// Element native type
        element_type: Option<u8>,
    },
    /// `NATIVE_TYPE::FIXEDSYSSTRING`
    FixedSysString {
        /// Buffer length in characters
        size: Option<u32>,
    },
    /// `NATIVE_TYPE::CUSTOMMARSHALER`
    CustomMarshaler {
        /// GUID of the marshaler, usually empty
        guid: String,
        /// Unmanaged type name, usually empty
        unmanaged_type: String,
        /// Fully qualified name of the marshaler type
        managed_type: String,
        /// Argument passed to the marshaler
        cookie: String,
    },
}

impl MarshalInfo {
    /// The leading native type.
    #[must_use]
    pub fn native_type(&self) -> u8 {
        match self {
            MarshalInfo::Native(native) => *native,
            MarshalInfo::Array { .. } => NATIVE_TYPE::ARRAY,
            MarshalInfo::SafeArray { .. } => NATIVE_TYPE::SAFEARRAY,
            MarshalInfo::FixedArray { .. } => NATIVE_TYPE::FIXEDARRAY,
            MarshalInfo::FixedSysString { .. } => NATIVE_TYPE::FIXEDSYSSTRING,
            MarshalInfo::CustomMarshaler { .. } => NATIVE_TYPE::CUSTOMMARSHALER,
        }
    }

    /// Decode a marshalling descriptor blob.
    ///
    /// Optional trailing parameters that are not present in the blob stay `None`.
    ///
    /// # Errors
    /// Returns an error if the blob is empty or truncated inside a parameter.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        let native = parser.read_le::<u8>()?;

        Ok(match native {
            NATIVE_TYPE::ARRAY => {
                let element_type = if parser.has_more_data() {
                    Some(parser.read_le::<u8>()?).filter(|element| *element != NATIVE_TYPE::MAX)
                } else {
                    None
                };
                MarshalInfo::Array {
                    element_type,
                    size_parameter_index: read_optional_uint(&mut parser)?,
                    size: read_optional_uint(&mut parser)?,
                    size_parameter_multiplier: read_optional_uint(&mut parser)?,
                }
            }
            NATIVE_TYPE::SAFEARRAY => {
                let element_type = read_optional_uint(&mut parser)?;
                let user_defined_sub_type = if parser.has_more_data() {
                    parser.read_ser_string()?
                } else {
                    None
                };
                MarshalInfo::SafeArray {
                    element_type,
                    user_defined_sub_type,
                }
            }
            NATIVE_TYPE::FIXEDARRAY => {
                let size = read_optional_uint(&mut parser)?;
                let element_type = if parser.has_more_data() {
                    Some(parser.read_le::<u8>()?)
                } else {
                    None
                };
                MarshalInfo::FixedArray { size, element_type }
            }
            NATIVE_TYPE::FIXEDSYSSTRING => MarshalInfo::FixedSysString {
                size: read_optional_uint(&mut parser)?,
            },
            NATIVE_TYPE::CUSTOMMARSHALER => MarshalInfo::CustomMarshaler {
                guid: parser.read_ser_string()?.unwrap_or_default(),
                unmanaged_type: parser.read_ser_string()?.unwrap_or_default(),
                managed_type: parser.read_ser_string()?.unwrap_or_default(),
                cookie: parser.read_ser_string()?.unwrap_or_default(),
            },
            other => MarshalInfo::Native(other),
        })
    }

    /// Encode the descriptor for the `#Blob` heap.
    ///
    /// Parameters are positional: a `None` followed by a present parameter is written as zero
    /// (or `NATIVE_TYPE::MAX` for an element type).
    ///
    /// # Errors
    /// Returns an error if a size does not fit the compressed integer encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.native_type()];

        match self {
            MarshalInfo::Native(_) => {}
            MarshalInfo::Array {
                element_type,
                size_parameter_index,
                size,
                size_parameter_multiplier,
            } => {
                let trailing = [*size_parameter_index, *size, *size_parameter_multiplier];
                let present = trailing.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
                if element_type.is_some() || present > 0 {
                    out.push(element_type.unwrap_or(NATIVE_TYPE::MAX));
                }
                for value in &trailing[..present] {
                    write_compressed_uint(&mut out, value.unwrap_or(0))?;
                }
            }
            MarshalInfo::SafeArray {
                element_type,
                user_defined_sub_type,
            } => {
                if element_type.is_some() || user_defined_sub_type.is_some() {
                    write_compressed_uint(&mut out, element_type.unwrap_or(0))?;
                }
                if let Some(name) = user_defined_sub_type {
                    write_ser_string(&mut out, Some(name))?;
                }
            }
            MarshalInfo::FixedArray { size, element_type } => {
                if size.is_some() || element_type.is_some() {
                    write_compressed_uint(&mut out, size.unwrap_or(0))?;
                }
                if let Some(element_type) = element_type {
                    out.push(*element_type);
                }
            }
            MarshalInfo::FixedSysString { size } => {
                if let Some(size) = size {
                    write_compressed_uint(&mut out, *size)?;
                }
            }
            MarshalInfo::CustomMarshaler {
                guid,
                unmanaged_type,
                managed_type,
                cookie,
            } => {
                for value in [guid, unmanaged_type, managed_type, cookie] {
                    write_ser_string(&mut out, Some(value))?;
                }
            }
        }

        Ok(out)
    }
}

fn read_optional_uint(parser: &mut Parser<'_>) -> Result<Option<u32>> {
    if parser.has_more_data() {
        Ok(Some(parser.read_compressed_uint()?))
    } else {
        Ok(None)
    }
}
