use crate::{
    file::parser::Parser,
    metadata::{
        signatures::{
            ArrayDimension, ArraySignature, CallingConvention, GenericParamSig, MethodSignature,
            PropertySignature, TypeHandle, TypeSignature, ELEMENT_TYPE, SIGNATURE_HEADER,
        },
        token::Token,
        typesystem::GenericParameterKind,
    },
    Error::{RecursionLimit, UnsupportedElementType},
    Result,
};

/// Maximum nesting of types inside a single signature
const MAX_RECURSION_DEPTH: usize = 50;

/// What a `TypeDefOrRef` token inside a signature stands for.
pub enum TypeTokenTarget {
    /// A `TypeDef` or `TypeRef` row
    Handle(TypeHandle),
    /// A `TypeSpec` row, already decoded
    Spec(TypeSignature),
}

/// Binds the tokens and generic parameter numbers found in a blob to entities.
pub trait SignatureContext {
    /// Map a `TypeDefOrRef` token to its target.
    ///
    /// # Errors
    /// Returns an error if the token is out of range or its row can not be decoded.
    fn resolve_type_token(&mut self, token: Token) -> Result<TypeTokenTarget>;

    /// Produce the element for `!position` or `!!position`.
    fn generic_parameter(&mut self, kind: GenericParameterKind, position: u16) -> GenericParamSig;
}

/// Decoder for type, method, field, property, local and method-spec blobs (II.23.2).
///
/// # Example
///
/// ```rust
/// use dotmeta::metadata::signatures::{SignatureReader, TypeSignature, UnboundContext};
///
/// let mut context = UnboundContext;
/// let mut reader = SignatureReader::new(&[0x20, 0x01, 0x01, 0x0E], &mut context);
/// let signature = reader.read_method_signature().unwrap();
/// assert!(signature.has_this);
/// assert_eq!(signature.parameters, vec![TypeSignature::String]);
/// ```
pub struct SignatureReader<'a, C: SignatureContext + ?Sized> {
    parser: Parser<'a>,
    context: &'a mut C,
    depth: usize,
}

impl<'a, C: SignatureContext + ?Sized> SignatureReader<'a, C> {
    /// Create a reader over one blob.
    pub fn new(data: &'a [u8], context: &'a mut C) -> Self {
        SignatureReader {
            parser: Parser::new(data),
            context,
            depth: 0,
        }
    }

    /// True while unread bytes are left in the blob.
    pub fn has_more_data(&self) -> bool {
        self.parser.has_more_data()
    }

    /// Read a single type.
    ///
    /// # Errors
    /// Returns an error on truncated blobs, unknown element types, excessive nesting or
    /// tokens the context can not resolve.
    pub fn read_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth > MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let result = self.read_type_inner();
        self.depth -= 1;
        result
    }

    fn read_type_inner(&mut self) -> Result<TypeSignature> {
        let element_type = self.parser.read_le::<u8>()?;
        if let Some(primitive) = TypeSignature::primitive(element_type) {
            return Ok(primitive);
        }

        match element_type {
            ELEMENT_TYPE::CLASS => Ok(match self.read_type_token()? {
                TypeTokenTarget::Handle(handle) => TypeSignature::Class(handle),
                TypeTokenTarget::Spec(signature) => signature,
            }),
            ELEMENT_TYPE::VALUETYPE => Ok(match self.read_type_token()? {
                TypeTokenTarget::Handle(handle) => TypeSignature::ValueType(handle),
                TypeTokenTarget::Spec(signature) => signature,
            }),
            ELEMENT_TYPE::PTR => Ok(TypeSignature::Ptr(Box::new(self.read_type()?))),
            ELEMENT_TYPE::BYREF => Ok(TypeSignature::ByRef(Box::new(self.read_type()?))),
            ELEMENT_TYPE::PINNED => Ok(TypeSignature::Pinned(Box::new(self.read_type()?))),
            ELEMENT_TYPE::SENTINEL => Ok(TypeSignature::Sentinel(Box::new(self.read_type()?))),
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::SzArray(Box::new(self.read_type()?))),
            ELEMENT_TYPE::ARRAY => self.read_array(),
            ELEMENT_TYPE::GENERICINST => {
                let generic = self.read_type()?;
                if !matches!(
                    generic,
                    TypeSignature::Class(_) | TypeSignature::ValueType(_)
                ) {
                    return Err(malformed_error!(
                        "GENERICINST - instantiated type is not a class or value type - {}",
                        generic
                    ));
                }

                let count = self.parser.read_compressed_uint()?;
                let mut arguments = Vec::with_capacity((count as usize).min(self.parser.remaining()));
                for _ in 0..count {
                    arguments.push(self.read_type()?);
                }

                Ok(TypeSignature::GenericInst {
                    generic: Box::new(generic),
                    arguments,
                })
            }
            ELEMENT_TYPE::VAR => {
                let position = self.read_generic_position()?;
                Ok(TypeSignature::GenericParam(
                    self.context
                        .generic_parameter(GenericParameterKind::Type, position),
                ))
            }
            ELEMENT_TYPE::MVAR => {
                let position = self.read_generic_position()?;
                Ok(TypeSignature::GenericParam(
                    self.context
                        .generic_parameter(GenericParameterKind::Method, position),
                ))
            }
            ELEMENT_TYPE::FNPTR => Ok(TypeSignature::FnPtr(Box::new(
                self.read_method_signature()?,
            ))),
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                let modifier = match self.read_type_token()? {
                    TypeTokenTarget::Handle(handle) => TypeSignature::Class(handle),
                    TypeTokenTarget::Spec(signature) => signature,
                };

                Ok(TypeSignature::Modified {
                    required: element_type == ELEMENT_TYPE::CMOD_REQD,
                    modifier: Box::new(modifier),
                    base: Box::new(self.read_type()?),
                })
            }
            other => Err(UnsupportedElementType(other)),
        }
    }

    fn read_type_token(&mut self) -> Result<TypeTokenTarget> {
        let token = self.parser.read_compressed_token()?;
        self.context.resolve_type_token(token)
    }

    fn read_generic_position(&mut self) -> Result<u16> {
        let position = self.parser.read_compressed_uint()?;
        u16::try_from(position)
            .map_err(|_| malformed_error!("Generic parameter number {} is too large", position))
    }

    fn read_array(&mut self) -> Result<TypeSignature> {
        let element = self.read_type()?;
        let rank = self.parser.read_compressed_uint()?;

        let size_count = self.parser.read_compressed_uint()? as usize;
        let mut sizes = Vec::with_capacity(size_count.min(self.parser.remaining()));
        for _ in 0..size_count {
            sizes.push(self.parser.read_compressed_uint()?);
        }

        let bound_count = self.parser.read_compressed_uint()? as usize;
        let mut lower_bounds = Vec::with_capacity(bound_count.min(self.parser.remaining()));
        for _ in 0..bound_count {
            lower_bounds.push(self.parser.read_compressed_int()?);
        }

        let mut dimensions = Vec::with_capacity(size_count.max(bound_count));
        for index in 0..size_count.max(bound_count) {
            let lower_bound = lower_bounds.get(index).copied();
            let upper_bound = match sizes.get(index) {
                Some(&size) => {
                    let size = i32::try_from(size)
                        .map_err(|_| malformed_error!("Array size {} is too large", size))?;
                    Some(
                        lower_bound
                            .unwrap_or(0)
                            .checked_add(size - 1)
                            .ok_or_else(|| malformed_error!("Array bounds overflow"))?,
                    )
                }
                None => None,
            };

            dimensions.push(ArrayDimension {
                lower_bound,
                upper_bound,
            });
        }

        Ok(TypeSignature::Array(ArraySignature {
            element: Box::new(element),
            rank,
            dimensions,
        }))
    }

    /// Read a `MethodDefSig`, `MethodRefSig` or `StandAloneMethodSig`.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or the header is not a method header.
    pub fn read_method_signature(&mut self) -> Result<MethodSignature> {
        let header = self.parser.read_le::<u8>()?;
        let calling_convention = CallingConvention::from_header(header)?;

        let generic_parameter_count = if header & SIGNATURE_HEADER::GENERIC != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };

        let parameter_count = self.parser.read_compressed_uint()?;
        let return_type = self.read_type()?;

        let mut parameters =
            Vec::with_capacity((parameter_count as usize).min(self.parser.remaining()));
        for _ in 0..parameter_count {
            parameters.push(self.read_type()?);
        }

        Ok(MethodSignature {
            has_this: header & SIGNATURE_HEADER::HAS_THIS != 0,
            explicit_this: header & SIGNATURE_HEADER::EXPLICIT_THIS != 0,
            calling_convention,
            generic_parameter_count,
            return_type,
            parameters,
        })
    }

    /// Read a `FieldSig` and return the field type.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or does not start with the field header.
    pub fn read_field_signature(&mut self) -> Result<TypeSignature> {
        let header = self.parser.read_le::<u8>()?;
        if header != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "FieldSig - invalid header {:#04x}",
                header
            ));
        }

        self.read_type()
    }

    /// Read a `PropertySig`.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or does not start with the property header.
    pub fn read_property_signature(&mut self) -> Result<PropertySignature> {
        let header = self.parser.read_le::<u8>()?;
        if header & SIGNATURE_HEADER::CONVENTION_MASK != SIGNATURE_HEADER::PROPERTY {
            return Err(malformed_error!(
                "PropertySig - invalid header {:#04x}",
                header
            ));
        }

        let parameter_count = self.parser.read_compressed_uint()?;
        let property_type = self.read_type()?;

        let mut parameters =
            Vec::with_capacity((parameter_count as usize).min(self.parser.remaining()));
        for _ in 0..parameter_count {
            parameters.push(self.read_type()?);
        }

        Ok(PropertySignature {
            has_this: header & SIGNATURE_HEADER::HAS_THIS != 0,
            property_type,
            parameters,
        })
    }

    /// Read a `LocalVarSig`.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or does not start with the locals header.
    pub fn read_local_variables(&mut self) -> Result<Vec<TypeSignature>> {
        let header = self.parser.read_le::<u8>()?;
        if header != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "LocalVarSig - invalid header {:#04x}",
                header
            ));
        }

        let count = self.parser.read_compressed_uint()?;
        let mut locals = Vec::with_capacity((count as usize).min(self.parser.remaining()));
        for _ in 0..count {
            locals.push(self.read_type()?);
        }

        Ok(locals)
    }

    /// Read a `MethodSpec` instantiation and return its type arguments.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or does not start with the instantiation header.
    pub fn read_method_spec(&mut self) -> Result<Vec<TypeSignature>> {
        let header = self.parser.read_le::<u8>()?;
        if header != SIGNATURE_HEADER::GENERIC_INST {
            return Err(malformed_error!(
                "MethodSpec - invalid header {:#04x}",
                header
            ));
        }

        let count = self.parser.read_compressed_uint()?;
        let mut arguments = Vec::with_capacity((count as usize).min(self.parser.remaining()));
        for _ in 0..count {
            arguments.push(self.read_type()?);
        }

        Ok(arguments)
    }
}

/// A context for blobs read outside of a module.
///
/// Every type token becomes a handle to a dropped definition, and generic parameters stay
/// unbound placeholders.
pub struct UnboundContext;

impl SignatureContext for UnboundContext {
    fn resolve_type_token(&mut self, _token: Token) -> Result<TypeTokenTarget> {
        Ok(TypeTokenTarget::Handle(TypeHandle::Definition(
            std::sync::Weak::new(),
        )))
    }

    fn generic_parameter(&mut self, kind: GenericParameterKind, position: u16) -> GenericParamSig {
        GenericParamSig::unbound(kind, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[derive(Default)]
    struct RecordingContext {
        tokens: Vec<Token>,
    }

    impl SignatureContext for RecordingContext {
        fn resolve_type_token(&mut self, token: Token) -> Result<TypeTokenTarget> {
            self.tokens.push(token);
            if token.table() == 0x1B {
                return Ok(TypeTokenTarget::Spec(TypeSignature::sz_array(
                    TypeSignature::I4,
                )));
            }
            Ok(TypeTokenTarget::Handle(TypeHandle::Definition(
                std::sync::Weak::new(),
            )))
        }

        fn generic_parameter(
            &mut self,
            kind: GenericParameterKind,
            position: u16,
        ) -> GenericParamSig {
            GenericParamSig::unbound(kind, position)
        }
    }

    fn read_type(data: &[u8]) -> Result<TypeSignature> {
        let mut context = RecordingContext::default();
        SignatureReader::new(data, &mut context).read_type()
    }

    #[test]
    fn primitives() {
        assert_eq!(read_type(&[0x08]).unwrap(), TypeSignature::I4);
        assert_eq!(read_type(&[0x0E]).unwrap(), TypeSignature::String);
        assert_eq!(read_type(&[0x1C]).unwrap(), TypeSignature::Object);
        assert_eq!(
            read_type(&[0x1D, 0x1D, 0x05]).unwrap(),
            TypeSignature::sz_array(TypeSignature::sz_array(TypeSignature::U1))
        );
    }

    #[test]
    fn class_tokens_are_resolved() {
        let mut context = RecordingContext::default();
        let signature = SignatureReader::new(&[0x12, 0x49], &mut context)
            .read_type()
            .unwrap();
        assert!(matches!(signature, TypeSignature::Class(_)));
        assert_eq!(context.tokens, vec![Token::new(0x0100_0012)]);
    }

    #[test]
    fn type_specs_are_inlined() {
        // CLASS TypeSpec[1]
        let signature = read_type(&[0x12, 0x06]).unwrap();
        assert_eq!(signature, TypeSignature::sz_array(TypeSignature::I4));
    }

    #[test]
    fn arrays_keep_missing_bounds() {
        // int32[0...3, 1...] : rank 2, one size (4), two lower bounds (0, 1)
        let signature = read_type(&[0x14, 0x08, 0x02, 0x01, 0x04, 0x02, 0x00, 0x02]).unwrap();
        match signature {
            TypeSignature::Array(array) => {
                assert_eq!(array.rank, 2);
                assert_eq!(
                    array.dimensions,
                    vec![
                        ArrayDimension {
                            lower_bound: Some(0),
                            upper_bound: Some(3)
                        },
                        ArrayDimension {
                            lower_bound: Some(1),
                            upper_bound: None
                        },
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        // int32[,] : rank 2, no sizes, no bounds
        match read_type(&[0x14, 0x08, 0x02, 0x00, 0x00]).unwrap() {
            TypeSignature::Array(array) => assert!(array.dimensions.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn generic_instances() {
        // List`1<!!0> with List as TypeRef 1
        let signature = read_type(&[0x15, 0x12, 0x05, 0x01, 0x1E, 0x00]).unwrap();
        match signature {
            TypeSignature::GenericInst { arguments, .. } => {
                assert_eq!(arguments, vec![TypeSignature::method_parameter(0)]);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(read_type(&[0x15, 0x08, 0x01, 0x08]).is_err());
    }

    #[test]
    fn modifiers_wrap_the_base_type() {
        // modreq(TypeRef 1) int32
        match read_type(&[0x1F, 0x05, 0x08]).unwrap() {
            TypeSignature::Modified { required, base, .. } => {
                assert!(required);
                assert_eq!(*base, TypeSignature::I4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn method_signatures() {
        let mut context = RecordingContext::default();
        // instance generic<1> void (!!0, int32)
        let signature = SignatureReader::new(&[0x30, 0x01, 0x02, 0x01, 0x1E, 0x00, 0x08], &mut context)
            .read_method_signature()
            .unwrap();
        assert!(signature.has_this);
        assert_eq!(signature.generic_parameter_count, 1);
        assert_eq!(signature.return_type, TypeSignature::Void);
        assert_eq!(
            signature.parameters,
            vec![TypeSignature::method_parameter(0), TypeSignature::I4]
        );
    }

    #[test]
    fn vararg_sentinel() {
        let mut context = RecordingContext::default();
        let signature = SignatureReader::new(&[0x05, 0x02, 0x01, 0x08, 0x41, 0x0E], &mut context)
            .read_method_signature()
            .unwrap();
        assert_eq!(signature.calling_convention, CallingConvention::VarArg);
        assert_eq!(
            signature.parameters[1],
            TypeSignature::Sentinel(Box::new(TypeSignature::String))
        );
    }

    #[test]
    fn other_blobs() {
        let mut context = RecordingContext::default();
        assert_eq!(
            SignatureReader::new(&[0x06, 0x08], &mut context)
                .read_field_signature()
                .unwrap(),
            TypeSignature::I4
        );

        let property = SignatureReader::new(&[0x28, 0x01, 0x0E, 0x08], &mut context)
            .read_property_signature()
            .unwrap();
        assert!(property.has_this);
        assert_eq!(property.parameters, vec![TypeSignature::I4]);

        let locals = SignatureReader::new(&[0x07, 0x02, 0x45, 0x10, 0x08, 0x16], &mut context)
            .read_local_variables()
            .unwrap();
        assert_eq!(
            locals,
            vec![
                TypeSignature::Pinned(Box::new(TypeSignature::by_ref(TypeSignature::I4))),
                TypeSignature::TypedByRef
            ]
        );

        let arguments = SignatureReader::new(&[0x0A, 0x01, 0x0E], &mut context)
            .read_method_spec()
            .unwrap();
        assert_eq!(arguments, vec![TypeSignature::String]);

        assert!(SignatureReader::new(&[0x07, 0x00], &mut context)
            .read_field_signature()
            .is_err());
    }

    #[test]
    fn errors() {
        assert!(matches!(
            read_type(&[0x21]),
            Err(Error::UnsupportedElementType(0x21))
        ));
        assert!(matches!(read_type(&[0x1D]), Err(Error::OutOfBounds)));

        let nested = vec![0x1D; MAX_RECURSION_DEPTH + 1];
        assert!(matches!(read_type(&nested), Err(Error::RecursionLimit(_))));
    }
}
