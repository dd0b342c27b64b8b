use std::fmt;

use crate::{
    file::{
        io::{write_le, write_ser_string},
        parser::Parser,
    },
    metadata::signatures::{TypeSignature, ELEMENT_TYPE},
    Error::{NotSupported, RecursionLimit, UnsupportedElementType},
    Result,
};

/// Maximum nesting of boxed values and arrays inside one attribute blob
const MAX_RECURSION_DEPTH: usize = 50;

/// The prolog every custom attribute blob starts with
const PROLOG: u16 = 0x0001;

/// A decoded value inside a custom attribute blob.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttributeElement {
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
    /// A string, `None` for the null string
    String(Option<String>),
    /// A `System.Type` value, `None` for null
    Type(Option<TypeSignature>),
    /// A single dimension array, `None` for the null array
    Array(Option<Vec<CustomAttributeArgument>>),
    /// A value passed as `System.Object`, with its runtime type
    Boxed(Box<CustomAttributeArgument>),
}

/// A typed custom attribute argument; enum values keep the enum type and an integer element.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeArgument {
    /// The declared type of the argument
    pub arg_type: TypeSignature,
    /// The value
    pub value: CustomAttributeElement,
}

impl CustomAttributeArgument {
    /// Create an argument.
    #[must_use]
    pub fn new(arg_type: TypeSignature, value: CustomAttributeElement) -> Self {
        CustomAttributeArgument { arg_type, value }
    }
}

/// A named field or property assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeNamedArgument {
    /// Field or property name
    pub name: String,
    /// `true` for a field, `false` for a property
    pub is_field: bool,
    /// The assigned value
    pub argument: CustomAttributeArgument,
}

/// The fully decoded value of a custom attribute blob.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomAttributeValue {
    /// Constructor arguments, in order
    pub fixed_arguments: Vec<CustomAttributeArgument>,
    /// Named field and property assignments
    pub named_arguments: Vec<CustomAttributeNamedArgument>,
}

/// The module level lookups needed to decode and encode attribute blobs.
pub trait AttributeContext {
    /// The integral type underlying an enum.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] if the enum can not be resolved.
    fn enum_underlying_type(&mut self, enum_type: &TypeSignature) -> Result<TypeSignature>;

    /// The type named by a serialized (reflection style) type name.
    ///
    /// # Errors
    /// Returns an error if the name can not be parsed.
    fn type_from_name(&mut self, name: &str) -> Result<TypeSignature>;

    /// The serialized name of a type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for types that have no serialized form.
    fn type_name(&mut self, signature: &TypeSignature) -> Result<String>;

    /// A core library type such as `System.Type`.
    ///
    /// # Errors
    /// Returns an error if the core library can not be referenced.
    fn system_type(&mut self, namespace: &str, name: &str) -> Result<TypeSignature>;
}

/// True if `signature` is `System.Type`.
fn is_system_type(signature: &TypeSignature) -> bool {
    match signature {
        TypeSignature::Class(handle) => handle.full_name() == "System.Type",
        _ => false,
    }
}

/// Decode a custom attribute blob against the constructor's parameter types.
///
/// # Errors
/// Returns an error if the blob is malformed or an enum type can not be resolved.
pub fn read_custom_attribute<C: AttributeContext + ?Sized>(
    data: &[u8],
    parameters: &[TypeSignature],
    context: &mut C,
) -> Result<CustomAttributeValue> {
    if data.is_empty() && parameters.is_empty() {
        return Ok(CustomAttributeValue::default());
    }

    let mut reader = AttributeBlobReader {
        parser: Parser::new(data),
        context,
        depth: 0,
    };

    let prolog = reader.parser.read_le::<u16>()?;
    if prolog != PROLOG {
        return Err(malformed_error!(
            "Custom attribute - invalid prolog {:#06x}",
            prolog
        ));
    }

    let mut value = CustomAttributeValue::default();
    for parameter in parameters {
        let element = reader.read_element(parameter)?;
        value
            .fixed_arguments
            .push(CustomAttributeArgument::new(parameter.clone(), element));
    }

    if reader.parser.has_more_data() {
        let count = reader.parser.read_le::<u16>()?;
        value.named_arguments = reader.read_named_arguments(u32::from(count))?;
    }

    Ok(value)
}

/// Decode `count` named arguments from a security attribute's property blob.
pub(crate) fn read_named_arguments<C: AttributeContext + ?Sized>(
    parser: Parser<'_>,
    count: u32,
    context: &mut C,
) -> Result<Vec<CustomAttributeNamedArgument>> {
    let mut reader = AttributeBlobReader {
        parser,
        context,
        depth: 0,
    };
    reader.read_named_arguments(count)
}

struct AttributeBlobReader<'a, C: AttributeContext + ?Sized> {
    parser: Parser<'a>,
    context: &'a mut C,
    depth: usize,
}

impl<C: AttributeContext + ?Sized> AttributeBlobReader<'_, C> {
    fn read_named_arguments(&mut self, count: u32) -> Result<Vec<CustomAttributeNamedArgument>> {
        let mut named = Vec::with_capacity((count as usize).min(self.parser.remaining()));
        for _ in 0..count {
            let kind = self.parser.read_le::<u8>()?;
            let is_field = match kind {
                ELEMENT_TYPE::FIELD => true,
                ELEMENT_TYPE::PROPERTY => false,
                other => {
                    return Err(malformed_error!(
                        "Named argument - expected FIELD or PROPERTY, got {:#04x}",
                        other
                    ))
                }
            };

            let arg_type = self.read_field_or_prop_type()?;
            let name = self
                .parser
                .read_ser_string()?
                .ok_or_else(|| malformed_error!("Named argument without a name"))?;
            let value = self.read_element(&arg_type)?;

            named.push(CustomAttributeNamedArgument {
                name,
                is_field,
                argument: CustomAttributeArgument::new(arg_type, value),
            });
        }

        Ok(named)
    }

    fn read_field_or_prop_type(&mut self) -> Result<TypeSignature> {
        let tag = self.parser.read_le::<u8>()?;
        match tag {
            ELEMENT_TYPE::BOOLEAN..=ELEMENT_TYPE::STRING => {
                TypeSignature::primitive(tag).ok_or(UnsupportedElementType(tag))
            }
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::sz_array(self.read_field_or_prop_type()?)),
            ELEMENT_TYPE::TYPE => self.context.system_type("System", "Type"),
            ELEMENT_TYPE::BOXED => Ok(TypeSignature::Object),
            ELEMENT_TYPE::ENUM => {
                let name = self
                    .parser
                    .read_ser_string()?
                    .ok_or_else(|| malformed_error!("Enum argument without a type name"))?;
                match self.context.type_from_name(&name)? {
                    TypeSignature::Class(handle) => Ok(TypeSignature::ValueType(handle)),
                    other => Ok(other),
                }
            }
            other => Err(UnsupportedElementType(other)),
        }
    }

    fn read_element(&mut self, arg_type: &TypeSignature) -> Result<CustomAttributeElement> {
        self.depth += 1;
        if self.depth > MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let result = self.read_element_inner(arg_type);
        self.depth -= 1;
        result
    }

    fn read_element_inner(&mut self, arg_type: &TypeSignature) -> Result<CustomAttributeElement> {
        Ok(match arg_type {
            TypeSignature::Boolean => CustomAttributeElement::Boolean(self.parser.read_le::<u8>()? != 0),
            TypeSignature::Char => CustomAttributeElement::Char(self.parser.read_le::<u16>()?),
            TypeSignature::I1 => CustomAttributeElement::I1(self.parser.read_le::<i8>()?),
            TypeSignature::U1 => CustomAttributeElement::U1(self.parser.read_le::<u8>()?),
            TypeSignature::I2 => CustomAttributeElement::I2(self.parser.read_le::<i16>()?),
            TypeSignature::U2 => CustomAttributeElement::U2(self.parser.read_le::<u16>()?),
            TypeSignature::I4 => CustomAttributeElement::I4(self.parser.read_le::<i32>()?),
            TypeSignature::U4 => CustomAttributeElement::U4(self.parser.read_le::<u32>()?),
            TypeSignature::I8 => CustomAttributeElement::I8(self.parser.read_le::<i64>()?),
            TypeSignature::U8 => CustomAttributeElement::U8(self.parser.read_le::<u64>()?),
            TypeSignature::R4 => CustomAttributeElement::R4(self.parser.read_le::<f32>()?),
            TypeSignature::R8 => CustomAttributeElement::R8(self.parser.read_le::<f64>()?),
            TypeSignature::String => CustomAttributeElement::String(self.parser.read_ser_string()?),
            TypeSignature::Object => {
                let inner_type = self.read_field_or_prop_type()?;
                let inner = self.read_element(&inner_type)?;
                CustomAttributeElement::Boxed(Box::new(CustomAttributeArgument::new(
                    inner_type, inner,
                )))
            }
            TypeSignature::SzArray(element_type) => {
                let count = self.parser.read_le::<u32>()?;
                if count == u32::MAX {
                    CustomAttributeElement::Array(None)
                } else {
                    let mut items =
                        Vec::with_capacity((count as usize).min(self.parser.remaining()));
                    for _ in 0..count {
                        let value = self.read_element(element_type)?;
                        items.push(CustomAttributeArgument::new(
                            element_type.as_ref().clone(),
                            value,
                        ));
                    }
                    CustomAttributeElement::Array(Some(items))
                }
            }
            signature if is_system_type(signature) => {
                match self.parser.read_ser_string()? {
                    Some(name) => {
                        CustomAttributeElement::Type(Some(self.context.type_from_name(&name)?))
                    }
                    None => CustomAttributeElement::Type(None),
                }
            }
            TypeSignature::Class(_) | TypeSignature::ValueType(_) => {
                let underlying = self.context.enum_underlying_type(arg_type)?;
                if TypeSignature::primitive(underlying.element_type()).is_none()
                    || matches!(underlying, TypeSignature::String | TypeSignature::Object)
                {
                    return Err(malformed_error!(
                        "Enum {} has a non-integral underlying type {}",
                        arg_type,
                        underlying
                    ));
                }
                self.read_element(&underlying)?
            }
            TypeSignature::GenericInst { .. } | TypeSignature::GenericParam(_) => {
                return Err(NotSupported(format!(
                    "custom attribute argument of type {arg_type}"
                )))
            }
            other => return Err(UnsupportedElementType(other.element_type())),
        })
    }
}

/// Encode a custom attribute value, prolog included.
///
/// # Errors
/// Returns an error if a type has no serialized name or a string is too long.
pub fn write_custom_attribute<C: AttributeContext + ?Sized>(
    value: &CustomAttributeValue,
    context: &mut C,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_le(&mut out, PROLOG);

    for argument in &value.fixed_arguments {
        write_element(&mut out, &argument.value, context)?;
    }

    let count = u16::try_from(value.named_arguments.len()).map_err(|_| {
        malformed_error!("Too many named arguments - {}", value.named_arguments.len())
    })?;
    write_le(&mut out, count);
    write_named_arguments(&mut out, &value.named_arguments, context)?;

    Ok(out)
}

/// Append named arguments without a count prefix.
pub(crate) fn write_named_arguments<C: AttributeContext + ?Sized>(
    out: &mut Vec<u8>,
    named: &[CustomAttributeNamedArgument],
    context: &mut C,
) -> Result<()> {
    for argument in named {
        out.push(if argument.is_field {
            ELEMENT_TYPE::FIELD
        } else {
            ELEMENT_TYPE::PROPERTY
        });
        write_field_or_prop_type(out, &argument.argument.arg_type, context)?;
        write_ser_string(out, Some(&argument.name))?;
        write_element(out, &argument.argument.value, context)?;
    }

    Ok(())
}

fn write_field_or_prop_type<C: AttributeContext + ?Sized>(
    out: &mut Vec<u8>,
    arg_type: &TypeSignature,
    context: &mut C,
) -> Result<()> {
    match arg_type {
        TypeSignature::Object => out.push(ELEMENT_TYPE::BOXED),
        TypeSignature::SzArray(element_type) => {
            out.push(ELEMENT_TYPE::SZARRAY);
            write_field_or_prop_type(out, element_type, context)?;
        }
        signature if is_system_type(signature) => out.push(ELEMENT_TYPE::TYPE),
        TypeSignature::Class(_) | TypeSignature::ValueType(_) => {
            out.push(ELEMENT_TYPE::ENUM);
            let name = context.type_name(arg_type)?;
            write_ser_string(out, Some(&name))?;
        }
        primitive => {
            let tag = primitive.element_type();
            if !(ELEMENT_TYPE::BOOLEAN..=ELEMENT_TYPE::STRING).contains(&tag) {
                return Err(NotSupported(format!(
                    "custom attribute argument of type {arg_type}"
                )));
            }
            out.push(tag);
        }
    }

    Ok(())
}

fn write_element<C: AttributeContext + ?Sized>(
    out: &mut Vec<u8>,
    value: &CustomAttributeElement,
    context: &mut C,
) -> Result<()> {
    match value {
        CustomAttributeElement::Boolean(value) => write_le(out, u8::from(*value)),
        CustomAttributeElement::Char(value) | CustomAttributeElement::U2(value) => {
            write_le(out, *value);
        }
        CustomAttributeElement::I1(value) => write_le(out, *value),
        CustomAttributeElement::U1(value) => write_le(out, *value),
        CustomAttributeElement::I2(value) => write_le(out, *value),
        CustomAttributeElement::I4(value) => write_le(out, *value),
        CustomAttributeElement::U4(value) => write_le(out, *value),
        CustomAttributeElement::I8(value) => write_le(out, *value),
        CustomAttributeElement::U8(value) => write_le(out, *value),
        CustomAttributeElement::R4(value) => write_le(out, *value),
        CustomAttributeElement::R8(value) => write_le(out, *value),
        CustomAttributeElement::String(value) => write_ser_string(out, value.as_deref())?,
        CustomAttributeElement::Type(value) => match value {
            Some(signature) => {
                let name = context.type_name(signature)?;
                write_ser_string(out, Some(&name))?;
            }
            None => write_ser_string(out, None)?,
        },
        CustomAttributeElement::Array(items) => match items {
            Some(items) => {
                let count = u32::try_from(items.len())
                    .map_err(|_| malformed_error!("Array of {} items is too long", items.len()))?;
                write_le(out, count);
                for item in items {
                    write_element(out, &item.value, context)?;
                }
            }
            None => write_le(out, u32::MAX),
        },
        CustomAttributeElement::Boxed(inner) => {
            write_field_or_prop_type(out, &inner.arg_type, context)?;
            write_element(out, &inner.value, context)?;
        }
    }

    Ok(())
}

/// A reflection style type name such as `Ns.Outer+Inner[], Assembly, Version=1.0.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeName {
    /// Namespace of the outermost type
    pub namespace: String,
    /// Name of the outermost type
    pub name: String,
    /// Names of nested types, outermost first
    pub nested: Vec<String>,
    /// Array suffixes, innermost first; `None` is `[]`, `Some(rank)` a general array
    pub arrays: Vec<Option<u32>>,
    /// Assembly qualifier, if any
    pub assembly: Option<String>,
}

impl TypeName {
    /// Parse a serialized type name.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for generic instantiations, pointers and
    /// by-ref types, and [`crate::Error::Malformed`] for empty or unbalanced names.
    pub fn parse(input: &str) -> Result<Self> {
        let mut depth = 0_i32;
        let mut split = None;
        for (index, character) in input.char_indices() {
            match character {
                '[' => depth += 1,
                ']' => depth -= 1,
                ',' if depth == 0 => {
                    split = Some(index);
                    break;
                }
                _ => {}
            }
        }

        let (type_part, assembly) = match split {
            Some(index) => (&input[..index], Some(input[index + 1..].trim().to_string())),
            None => (input, None),
        };
        let type_part = type_part.trim();

        if (type_part.contains('`') && type_part.contains("[["))
            || type_part.ends_with('&')
            || type_part.ends_with('*')
        {
            return Err(NotSupported(format!("type name {input}")));
        }

        let (base, mut suffix) = match type_part.find('[') {
            Some(index) => (&type_part[..index], &type_part[index..]),
            None => (type_part, ""),
        };

        let mut arrays = Vec::new();
        while !suffix.is_empty() {
            let close = suffix
                .find(']')
                .ok_or_else(|| malformed_error!("Unbalanced brackets in type name {}", input))?;
            let inner = &suffix[1..close];
            if inner.is_empty() {
                arrays.push(None);
            } else if inner == "*" {
                arrays.push(Some(1));
            } else if inner.chars().all(|c| c == ',') {
                arrays.push(Some(inner.len() as u32 + 1));
            } else {
                return Err(NotSupported(format!("type name {input}")));
            }
            suffix = &suffix[close + 1..];
        }

        let mut parts = base.split('+');
        let outer = parts.next().unwrap_or_default();
        if outer.is_empty() {
            return Err(malformed_error!("Empty type name"));
        }

        let (namespace, name) = match outer.rfind('.') {
            Some(index) => (outer[..index].to_string(), outer[index + 1..].to_string()),
            None => (String::new(), outer.to_string()),
        };

        Ok(TypeName {
            namespace,
            name,
            nested: parts.map(str::to_string).collect(),
            arrays,
            assembly: assembly.filter(|assembly| !assembly.is_empty()),
        })
    }

    /// Namespace and name of the outermost type joined with a dot.
    #[must_use]
    pub fn outer_full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.outer_full_name())?;
        for nested in &self.nested {
            write!(f, "+{nested}")?;
        }
        for array in &self.arrays {
            match array {
                None => f.write_str("[]")?,
                Some(1) => f.write_str("[*]")?,
                Some(rank) => write!(f, "[{}]", ",".repeat((*rank as usize).saturating_sub(1)))?,
            }
        }
        if let Some(assembly) = &self.assembly {
            write!(f, ", {assembly}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::TypeHandle;
    use crate::Error;

    /// Treats every named type as an `int32` enum and formats types by their tag.
    struct FlatContext;

    impl AttributeContext for FlatContext {
        fn enum_underlying_type(&mut self, _enum_type: &TypeSignature) -> Result<TypeSignature> {
            Ok(TypeSignature::I4)
        }

        fn type_from_name(&mut self, name: &str) -> Result<TypeSignature> {
            match name {
                "System.Int32" => Ok(TypeSignature::I4),
                _ => Ok(TypeSignature::Class(TypeHandle::Definition(
                    std::sync::Weak::new(),
                ))),
            }
        }

        fn type_name(&mut self, signature: &TypeSignature) -> Result<String> {
            Ok(signature.full_name())
        }

        fn system_type(&mut self, _namespace: &str, _name: &str) -> Result<TypeSignature> {
            Ok(TypeSignature::Object)
        }
    }

    #[test]
    fn fixed_and_named_arguments() {
        // ctor(string, int32) with "a", 7 and property Count = 2u
        let blob = [
            0x01, 0x00, // prolog
            0x01, b'a', // "a"
            0x07, 0x00, 0x00, 0x00, // 7
            0x01, 0x00, // one named argument
            0x54, 0x09, 0x05, b'C', b'o', b'u', b'n', b't', 0x02, 0x00, 0x00, 0x00,
        ];
        let value = read_custom_attribute(
            &blob,
            &[TypeSignature::String, TypeSignature::I4],
            &mut FlatContext,
        )
        .unwrap();

        assert_eq!(
            value.fixed_arguments[0].value,
            CustomAttributeElement::String(Some("a".to_string()))
        );
        assert_eq!(value.fixed_arguments[1].value, CustomAttributeElement::I4(7));
        assert_eq!(value.named_arguments.len(), 1);
        assert_eq!(value.named_arguments[0].name, "Count");
        assert!(!value.named_arguments[0].is_field);
        assert_eq!(
            value.named_arguments[0].argument.value,
            CustomAttributeElement::U4(2)
        );

        let encoded = write_custom_attribute(&value, &mut FlatContext).unwrap();
        assert_eq!(encoded, blob);
    }

    #[test]
    fn boxed_and_null_values() {
        let value = CustomAttributeValue {
            fixed_arguments: vec![
                CustomAttributeArgument::new(
                    TypeSignature::Object,
                    CustomAttributeElement::Boxed(Box::new(CustomAttributeArgument::new(
                        TypeSignature::I2,
                        CustomAttributeElement::I2(-1),
                    ))),
                ),
                CustomAttributeArgument::new(
                    TypeSignature::String,
                    CustomAttributeElement::String(None),
                ),
                CustomAttributeArgument::new(
                    TypeSignature::sz_array(TypeSignature::I4),
                    CustomAttributeElement::Array(None),
                ),
            ],
            named_arguments: vec![],
        };

        let encoded = write_custom_attribute(&value, &mut FlatContext).unwrap();
        assert_eq!(
            encoded,
            vec![0x01, 0x00, 0x06, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00]
        );

        let parameters: Vec<_> = value
            .fixed_arguments
            .iter()
            .map(|argument| argument.arg_type.clone())
            .collect();
        let decoded = read_custom_attribute(&encoded, &parameters, &mut FlatContext).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn enums_use_underlying_type() {
        let enum_type = TypeSignature::ValueType(TypeHandle::Definition(std::sync::Weak::new()));
        let blob = [0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00];
        let value = read_custom_attribute(&blob, &[enum_type], &mut FlatContext).unwrap();
        assert_eq!(value.fixed_arguments[0].value, CustomAttributeElement::I4(3));
    }

    #[test]
    fn bad_prolog() {
        let result = read_custom_attribute(&[0x02, 0x00], &[], &mut FlatContext);
        assert!(matches!(result, Err(Error::Malformed { .. })));
        assert!(read_custom_attribute(&[], &[], &mut FlatContext).is_ok());
    }

    #[test]
    fn type_names() {
        let name = TypeName::parse("Ns.Outer+Inner[][,], Lib, Version=1.0.0.0").unwrap();
        assert_eq!(name.namespace, "Ns");
        assert_eq!(name.name, "Outer");
        assert_eq!(name.nested, vec!["Inner".to_string()]);
        assert_eq!(name.arrays, vec![None, Some(2)]);
        assert_eq!(name.assembly.as_deref(), Some("Lib, Version=1.0.0.0"));
        assert_eq!(name.to_string(), "Ns.Outer+Inner[][,], Lib, Version=1.0.0.0");

        let plain = TypeName::parse("Program").unwrap();
        assert!(plain.namespace.is_empty());
        assert_eq!(plain.to_string(), "Program");

        assert!(matches!(
            TypeName::parse("System.Collections.Generic.List`1[[System.Int32]]"),
            Err(Error::NotSupported(_))
        ));
        assert!(TypeName::parse("").is_err());
    }
}
