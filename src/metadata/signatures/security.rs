use crate::{
    file::{
        io::{write_compressed_uint, write_le, write_ser_string},
        parser::Parser,
    },
    metadata::signatures::{
        customattributes::{read_named_arguments, write_named_arguments},
        AttributeContext, CustomAttributeArgument, CustomAttributeElement,
        CustomAttributeNamedArgument, TypeSignature,
    },
    Result,
};

/// Namespace of the attribute that carries a legacy XML permission set
const PERMISSION_SET_NAMESPACE: &str = "System.Security.Permissions";
/// Name of the attribute that carries a legacy XML permission set
const PERMISSION_SET_NAME: &str = "PermissionSetAttribute";

/// The `Action` column of a `DeclSecurity` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityAction {
    /// Request
    Request,
    /// Demand
    Demand,
    /// Assert
    Assert,
    /// Deny
    Deny,
    /// PermitOnly
    PermitOnly,
    /// LinkDemand
    LinkDemand,
    /// InheritanceDemand
    InheritanceDemand,
    /// RequestMinimum
    RequestMinimum,
    /// RequestOptional
    RequestOptional,
    /// RequestRefuse
    RequestRefuse,
    /// PreJitGrant
    PreJitGrant,
    /// PreJitDeny
    PreJitDeny,
    /// NonCasDemand
    NonCasDemand,
    /// NonCasLinkDemand
    NonCasLinkDemand,
    /// NonCasInheritance
    NonCasInheritance,
    /// A value outside the known range
    Other(u16),
}

impl From<u16> for SecurityAction {
    fn from(value: u16) -> Self {
        match value {
            1 => SecurityAction::Request,
            2 => SecurityAction::Demand,
            3 => SecurityAction::Assert,
            4 => SecurityAction::Deny,
            5 => SecurityAction::PermitOnly,
            6 => SecurityAction::LinkDemand,
            7 => SecurityAction::InheritanceDemand,
            8 => SecurityAction::RequestMinimum,
            9 => SecurityAction::RequestOptional,
            10 => SecurityAction::RequestRefuse,
            11 => SecurityAction::PreJitGrant,
            12 => SecurityAction::PreJitDeny,
            13 => SecurityAction::NonCasDemand,
            14 => SecurityAction::NonCasLinkDemand,
            15 => SecurityAction::NonCasInheritance,
            other => SecurityAction::Other(other),
        }
    }
}

impl From<SecurityAction> for u16 {
    fn from(action: SecurityAction) -> Self {
        match action {
            SecurityAction::Request => 1,
            SecurityAction::Demand => 2,
            SecurityAction::Assert => 3,
            SecurityAction::Deny => 4,
            SecurityAction::PermitOnly => 5,
            SecurityAction::LinkDemand => 6,
            SecurityAction::InheritanceDemand => 7,
            SecurityAction::RequestMinimum => 8,
            SecurityAction::RequestOptional => 9,
            SecurityAction::RequestRefuse => 10,
            SecurityAction::PreJitGrant => 11,
            SecurityAction::PreJitDeny => 12,
            SecurityAction::NonCasDemand => 13,
            SecurityAction::NonCasLinkDemand => 14,
            SecurityAction::NonCasInheritance => 15,
            SecurityAction::Other(value) => value,
        }
    }
}

/// One permission attribute of a security declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityAttribute {
    /// The permission attribute type
    pub attribute_type: TypeSignature,
    /// Property and field assignments
    pub named_arguments: Vec<CustomAttributeNamedArgument>,
}

impl SecurityAttribute {
    /// The XML text of a legacy permission set, if this attribute carries one.
    #[must_use]
    pub fn permission_set_xml(&self) -> Option<&str> {
        if self.attribute_type.full_name()
            != format!("{PERMISSION_SET_NAMESPACE}.{PERMISSION_SET_NAME}")
        {
            return None;
        }

        match self.named_arguments.as_slice() {
            [CustomAttributeNamedArgument {
                name,
                is_field: false,
                argument:
                    CustomAttributeArgument {
                        value: CustomAttributeElement::String(Some(xml)),
                        ..
                    },
            }] if name == "XML" => Some(xml),
            _ => None,
        }
    }
}

/// Decode a `DeclSecurity` permission blob.
///
/// The binary form (leading `.`) yields one attribute per entry. The legacy form is a
/// UTF-16 XML permission set, which is returned as a single `PermissionSetAttribute`
/// whose `XML` property holds the text.
///
/// # Errors
/// Returns an error if the blob is malformed.
pub fn read_security_declaration<C: AttributeContext + ?Sized>(
    data: &[u8],
    context: &mut C,
) -> Result<Vec<SecurityAttribute>> {
    let mut parser = Parser::new(data);
    if data.first() != Some(&b'.') {
        let xml = parser.read_utf16_to_end()?;
        let attribute_type = context.system_type(PERMISSION_SET_NAMESPACE, PERMISSION_SET_NAME)?;
        return Ok(vec![SecurityAttribute {
            attribute_type,
            named_arguments: vec![CustomAttributeNamedArgument {
                name: "XML".to_string(),
                is_field: false,
                argument: CustomAttributeArgument::new(
                    TypeSignature::String,
                    CustomAttributeElement::String(Some(xml)),
                ),
            }],
        }]);
    }

    parser.read_le::<u8>()?;
    let count = parser.read_compressed_uint()?;
    let mut attributes = Vec::with_capacity((count as usize).min(parser.remaining()));
    for _ in 0..count {
        let name = parser
            .read_ser_string()?
            .ok_or_else(|| malformed_error!("Security attribute without a type name"))?;
        let attribute_type = context.type_from_name(&name)?;

        let length = parser.read_compressed_uint()? as usize;
        let mut properties = Parser::new(parser.read_bytes(length)?);
        let named_count = properties.read_compressed_uint()?;
        let named_arguments = read_named_arguments(properties, named_count, context)?;

        attributes.push(SecurityAttribute {
            attribute_type,
            named_arguments,
        });
    }

    Ok(attributes)
}

/// Encode a list of permission attributes.
///
/// A single `PermissionSetAttribute` with an `XML` property is written in the legacy XML form,
/// everything else in the binary form.
///
/// # Errors
/// Returns an error if a type has no serialized name.
pub fn write_security_declaration<C: AttributeContext + ?Sized>(
    attributes: &[SecurityAttribute],
    context: &mut C,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    if let [attribute] = attributes {
        if let Some(xml) = attribute.permission_set_xml() {
            for unit in xml.encode_utf16() {
                write_le(&mut out, unit);
            }
            return Ok(out);
        }
    }

    out.push(b'.');
    let count = u32::try_from(attributes.len())
        .map_err(|_| malformed_error!("Too many security attributes"))?;
    write_compressed_uint(&mut out, count)?;

    for attribute in attributes {
        let name = context.type_name(&attribute.attribute_type)?;
        write_ser_string(&mut out, Some(&name))?;

        let mut properties = Vec::new();
        let named_count = u32::try_from(attribute.named_arguments.len())
            .map_err(|_| malformed_error!("Too many named arguments"))?;
        write_compressed_uint(&mut properties, named_count)?;
        write_named_arguments(&mut properties, &attribute.named_arguments, context)?;

        let length = u32::try_from(properties.len())
            .map_err(|_| malformed_error!("Security attribute blob is too long"))?;
        write_compressed_uint(&mut out, length)?;
        out.extend_from_slice(&properties);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::{TypeHandle, TypeSignature};

    /// Names every type `Perm` and returns `int32` for it.
    struct NamingContext;

    impl AttributeContext for NamingContext {
        fn enum_underlying_type(&mut self, _enum_type: &TypeSignature) -> Result<TypeSignature> {
            Ok(TypeSignature::I4)
        }

        fn type_from_name(&mut self, _name: &str) -> Result<TypeSignature> {
            Ok(TypeSignature::Class(TypeHandle::Definition(
                std::sync::Weak::new(),
            )))
        }

        fn type_name(&mut self, _signature: &TypeSignature) -> Result<String> {
            Ok("Perm".to_string())
        }

        fn system_type(&mut self, _namespace: &str, _name: &str) -> Result<TypeSignature> {
            Ok(TypeSignature::Object)
        }
    }

    #[test]
    fn actions() {
        assert_eq!(SecurityAction::from(2), SecurityAction::Demand);
        assert_eq!(u16::from(SecurityAction::LinkDemand), 6);
        assert_eq!(SecurityAction::from(99), SecurityAction::Other(99));
    }

    #[test]
    fn binary_form() {
        let attributes = vec![SecurityAttribute {
            attribute_type: TypeSignature::Class(TypeHandle::Definition(std::sync::Weak::new())),
            named_arguments: vec![CustomAttributeNamedArgument {
                name: "Unrestricted".to_string(),
                is_field: false,
                argument: CustomAttributeArgument::new(
                    TypeSignature::Boolean,
                    CustomAttributeElement::Boolean(true),
                ),
            }],
        }];

        let blob = write_security_declaration(&attributes, &mut NamingContext).unwrap();
        assert_eq!(&blob[..3], &[b'.', 0x01, 0x04]);
        assert_eq!(&blob[3..7], b"Perm");

        let decoded = read_security_declaration(&blob, &mut NamingContext).unwrap();
        assert_eq!(decoded, attributes);
    }

    #[test]
    fn legacy_xml_form() {
        let xml = "<PermissionSet/>";
        let blob: Vec<u8> = xml.encode_utf16().flat_map(u16::to_le_bytes).collect();

        let decoded = read_security_declaration(&blob, &mut NamingContext).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].named_arguments[0].name, "XML");
        assert_eq!(
            decoded[0].named_arguments[0].argument.value,
            CustomAttributeElement::String(Some(xml.to_string()))
        );
    }
}
