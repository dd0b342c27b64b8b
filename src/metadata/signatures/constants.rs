use crate::{
    file::{io::write_le, parser::Parser},
    metadata::signatures::ELEMENT_TYPE,
    Error::UnsupportedElementType,
    Result,
};

/// The value of a `Constant` row: a field default, parameter default or enum literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// bool
    Boolean(bool),
    /// UTF-16 code unit
    Char(u16),
    /// signed 8bit integer
    I1(i8),
    /// unsigned 8bit integer
    U1(u8),
    /// signed 16bit integer
    I2(i16),
    /// unsigned 16bit integer
    U2(u16),
    /// signed 32bit integer
    I4(i32),
    /// unsigned 32bit integer
    U4(u32),
    /// signed 64bit integer
    I8(i64),
    /// unsigned 64bit integer
    U8(u64),
    /// 32bit floating-point
    R4(f32),
    /// 64bit floating-point
    R8(f64),
    /// A string literal
    String(String),
    /// The null reference
    Null,
}

impl ConstantValue {
    /// The element type stored in the `Type` column.
    #[must_use]
    pub fn element_type(&self) -> u8 {
        match self {
            ConstantValue::Boolean(_) => ELEMENT_TYPE::BOOLEAN,
            ConstantValue::Char(_) => ELEMENT_TYPE::CHAR,
            ConstantValue::I1(_) => ELEMENT_TYPE::I1,
            ConstantValue::U1(_) => ELEMENT_TYPE::U1,
            ConstantValue::I2(_) => ELEMENT_TYPE::I2,
            ConstantValue::U2(_) => ELEMENT_TYPE::U2,
            ConstantValue::I4(_) => ELEMENT_TYPE::I4,
            ConstantValue::U4(_) => ELEMENT_TYPE::U4,
            ConstantValue::I8(_) => ELEMENT_TYPE::I8,
            ConstantValue::U8(_) => ELEMENT_TYPE::U8,
            ConstantValue::R4(_) => ELEMENT_TYPE::R4,
            ConstantValue::R8(_) => ELEMENT_TYPE::R8,
            ConstantValue::String(_) => ELEMENT_TYPE::STRING,
            ConstantValue::Null => ELEMENT_TYPE::CLASS,
        }
    }

    /// Decode a constant blob given the row's element type.
    ///
    /// # Errors
    /// Returns an error if the blob is too short or the element type can not hold a constant.
    pub fn parse(element_type: u8, data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        Ok(match element_type {
            ELEMENT_TYPE::BOOLEAN => ConstantValue::Boolean(parser.read_le::<u8>()? != 0),
            ELEMENT_TYPE::CHAR => ConstantValue::Char(parser.read_le::<u16>()?),
            ELEMENT_TYPE::I1 => ConstantValue::I1(parser.read_le::<i8>()?),
            ELEMENT_TYPE::U1 => ConstantValue::U1(parser.read_le::<u8>()?),
            ELEMENT_TYPE::I2 => ConstantValue::I2(parser.read_le::<i16>()?),
            ELEMENT_TYPE::U2 => ConstantValue::U2(parser.read_le::<u16>()?),
            ELEMENT_TYPE::I4 => ConstantValue::I4(parser.read_le::<i32>()?),
            ELEMENT_TYPE::U4 => ConstantValue::U4(parser.read_le::<u32>()?),
            ELEMENT_TYPE::I8 => ConstantValue::I8(parser.read_le::<i64>()?),
            ELEMENT_TYPE::U8 => ConstantValue::U8(parser.read_le::<u64>()?),
            ELEMENT_TYPE::R4 => ConstantValue::R4(parser.read_le::<f32>()?),
            ELEMENT_TYPE::R8 => ConstantValue::R8(parser.read_le::<f64>()?),
            ELEMENT_TYPE::STRING => ConstantValue::String(parser.read_utf16_to_end()?),
            ELEMENT_TYPE::CLASS => ConstantValue::Null,
            other => return Err(UnsupportedElementType(other)),
        })
    }

    /// Encode the value for the `#Blob` heap.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        match self {
            ConstantValue::Boolean(value) => write_le(&mut out, u8::from(*value)),
            ConstantValue::Char(value) | ConstantValue::U2(value) => write_le(&mut out, *value),
            ConstantValue::I1(value) => write_le(&mut out, *value),
            ConstantValue::U1(value) => write_le(&mut out, *value),
            ConstantValue::I2(value) => write_le(&mut out, *value),
            ConstantValue::I4(value) => write_le(&mut out, *value),
            ConstantValue::U4(value) => write_le(&mut out, *value),
            ConstantValue::I8(value) => write_le(&mut out, *value),
            ConstantValue::U8(value) => write_le(&mut out, *value),
            ConstantValue::R4(value) => write_le(&mut out, *value),
            ConstantValue::R8(value) => write_le(&mut out, *value),
            ConstantValue::String(value) => {
                for unit in value.encode_utf16() {
                    write_le(&mut out, unit);
                }
            }
            ConstantValue::Null => write_le(&mut out, 0_u32),
        }
        out
    }
}
