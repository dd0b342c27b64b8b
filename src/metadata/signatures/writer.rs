use crate::{
    file::io::{write_compressed_int, write_compressed_uint},
    metadata::{
        signatures::{
            ArraySignature, MethodSignature, PropertySignature, TypeHandle, TypeSignature,
            SIGNATURE_HEADER,
        },
        tables::CodedIndexType,
        token::Token,
    },
    Result,
};

/// Supplies the `TypeDefOrRef` tokens an encoded signature refers to.
pub trait TypeTokens {
    /// The `TypeDef` or `TypeRef` token for a handle.
    ///
    /// # Errors
    /// Returns an error if the handle can not be expressed in the module being written.
    fn type_handle_token(&mut self, handle: &TypeHandle) -> Result<Token>;

    /// The `TypeSpec` token for a constructed type.
    ///
    /// # Errors
    /// Returns an error if the type can not be expressed in the module being written.
    fn type_spec_token(&mut self, signature: &TypeSignature) -> Result<Token>;
}

/// Encoder producing the blob forms read by [`crate::metadata::signatures::SignatureReader`].
pub struct SignatureWriter<'a, T: TypeTokens + ?Sized> {
    out: Vec<u8>,
    tokens: &'a mut T,
}

impl<'a, T: TypeTokens + ?Sized> SignatureWriter<'a, T> {
    /// Create an empty writer.
    pub fn new(tokens: &'a mut T) -> Self {
        SignatureWriter {
            out: Vec::new(),
            tokens,
        }
    }

    /// The encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Append a single type.
    ///
    /// # Errors
    /// Returns an error if a referenced type has no token or a value exceeds its encoding.
    pub fn write_type(&mut self, signature: &TypeSignature) -> Result<()> {
        let element_type = signature.element_type();
        self.out.push(element_type);

        match signature {
            TypeSignature::Class(handle) | TypeSignature::ValueType(handle) => {
                let token = self.tokens.type_handle_token(handle)?;
                self.write_type_token(token)?;
            }
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::Pinned(inner)
            | TypeSignature::Sentinel(inner)
            | TypeSignature::SzArray(inner) => self.write_type(inner)?,
            TypeSignature::Array(array) => self.write_array(array)?,
            TypeSignature::GenericInst { generic, arguments } => {
                self.write_type(generic)?;
                self.write_count(arguments.len())?;
                for argument in arguments {
                    self.write_type(argument)?;
                }
            }
            TypeSignature::GenericParam(param) => {
                write_compressed_uint(&mut self.out, u32::from(param.position))?;
            }
            TypeSignature::FnPtr(method) => self.write_method_signature(method)?,
            TypeSignature::Modified { modifier, base, .. } => {
                let token = match modifier.as_ref() {
                    TypeSignature::Class(handle) | TypeSignature::ValueType(handle) => {
                        self.tokens.type_handle_token(handle)?
                    }
                    other => self.tokens.type_spec_token(other)?,
                };
                self.write_type_token(token)?;
                self.write_type(base)?;
            }
            _ => {}
        }

        Ok(())
    }

    fn write_type_token(&mut self, token: Token) -> Result<()> {
        let coded = CodedIndexType::TypeDefOrRef.compress(token)?;
        write_compressed_uint(&mut self.out, coded)
    }

    fn write_count(&mut self, count: usize) -> Result<()> {
        let count = u32::try_from(count)
            .map_err(|_| malformed_error!("Count {} does not fit a signature", count))?;
        write_compressed_uint(&mut self.out, count)
    }

    #[allow(clippy::cast_sign_loss)]
    fn write_array(&mut self, array: &ArraySignature) -> Result<()> {
        self.write_type(&array.element)?;
        write_compressed_uint(&mut self.out, array.rank)?;

        let sized: Vec<_> = array
            .dimensions
            .iter()
            .take_while(|dimension| dimension.upper_bound.is_some())
            .collect();
        self.write_count(sized.len())?;
        for dimension in sized {
            let lower = dimension.lower_bound.unwrap_or(0);
            let upper = dimension.upper_bound.unwrap_or(lower);
            let size = i64::from(upper) - i64::from(lower) + 1;
            let size = u32::try_from(size)
                .map_err(|_| malformed_error!("Array dimension {}...{} is empty", lower, upper))?;
            write_compressed_uint(&mut self.out, size)?;
        }

        let bounded: Vec<_> = array
            .dimensions
            .iter()
            .map_while(|dimension| dimension.lower_bound)
            .collect();
        self.write_count(bounded.len())?;
        for lower in bounded {
            write_compressed_int(&mut self.out, lower)?;
        }

        Ok(())
    }

    /// Append a method signature (`MethodDefSig`, `MethodRefSig` or a function pointer).
    ///
    /// # Errors
    /// Returns an error if a parameter type can not be encoded.
    pub fn write_method_signature(&mut self, method: &MethodSignature) -> Result<()> {
        self.out.push(method.header());
        if method.generic_parameter_count > 0 {
            write_compressed_uint(&mut self.out, method.generic_parameter_count)?;
        }

        self.write_count(method.parameters.len())?;
        self.write_type(&method.return_type)?;
        for parameter in &method.parameters {
            self.write_type(parameter)?;
        }

        Ok(())
    }

    /// Append a `FieldSig`.
    ///
    /// # Errors
    /// Returns an error if the field type can not be encoded.
    pub fn write_field_signature(&mut self, field_type: &TypeSignature) -> Result<()> {
        self.out.push(SIGNATURE_HEADER::FIELD);
        self.write_type(field_type)
    }

    /// Append a `PropertySig`.
    ///
    /// # Errors
    /// Returns an error if a type can not be encoded.
    pub fn write_property_signature(&mut self, property: &PropertySignature) -> Result<()> {
        let mut header = SIGNATURE_HEADER::PROPERTY;
        if property.has_this {
            header |= SIGNATURE_HEADER::HAS_THIS;
        }
        self.out.push(header);

        self.write_count(property.parameters.len())?;
        self.write_type(&property.property_type)?;
        for parameter in &property.parameters {
            self.write_type(parameter)?;
        }

        Ok(())
    }

    /// Append a `LocalVarSig`.
    ///
    /// # Errors
    /// Returns an error if a type can not be encoded.
    pub fn write_local_variables(&mut self, locals: &[TypeSignature]) -> Result<()> {
        self.out.push(SIGNATURE_HEADER::LOCAL_SIG);
        self.write_count(locals.len())?;
        for local in locals {
            self.write_type(local)?;
        }

        Ok(())
    }

    /// Append a `MethodSpec` instantiation.
    ///
    /// # Errors
    /// Returns an error if a type argument can not be encoded.
    pub fn write_method_spec(&mut self, arguments: &[TypeSignature]) -> Result<()> {
        self.out.push(SIGNATURE_HEADER::GENERIC_INST);
        self.write_count(arguments.len())?;
        for argument in arguments {
            self.write_type(argument)?;
        }

        Ok(())
    }
}
