use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    metadata::{
        signatures::{CallingConvention, ConstantValue, MarshalInfo, MethodSignature, TypeSignature},
        token::Token,
        typesystem::{
            read_with, Backlink, Collection, CustomAttributeRc, GenericOwnerRef,
            GenericParameter, GenericParameterRc, Lazy, MethodAttributes, MethodHandle,
            MethodSemanticsAttributes, ModuleDefinition, ModuleDefinitionRc, ModuleReferenceRc,
            PInvokeAttributes, ParamAttributes, SecurityDeclarationRc, Slot, TypeDefinition,
            TypeDefinitionRc,
        },
    },
    Result,
};

/// A reference to a `MethodDefinition`
pub type MethodDefinitionRc = Arc<MethodDefinition>;
/// A reference to a `ParameterDefinition`
pub type ParameterDefinitionRc = Arc<ParameterDefinition>;

/// Platform invoke information of a method (`ImplMap`).
#[derive(Debug, Clone)]
pub struct PInvokeInfo {
    /// Marshalling and calling convention flags
    pub flags: PInvokeAttributes,
    /// Name of the native export
    pub entry_point: String,
    /// The native library
    pub module: ModuleReferenceRc,
}

/// A method of a type (`MethodDef`).
///
/// The signature is not stored as a blob: return type and parameter types live on the
/// method and its [`ParameterDefinition`]s, and [`MethodDefinition::signature`] composes them.
pub struct MethodDefinition {
    /// The `MethodDef` token, null for methods created in memory
    pub token: Token,
    /// Name
    pub name: String,
    flags: Slot<u16>,
    impl_flags: Slot<u16>,
    rva: Slot<u32>,
    has_this: Slot<bool>,
    explicit_this: Slot<bool>,
    calling_convention: Slot<CallingConvention>,
    generic_arity: Slot<u32>,
    return_type: Slot<TypeSignature>,
    return_parameter: Slot<Option<ParameterDefinitionRc>>,
    parameters: Collection<ParameterDefinitionRc>,
    declaring_type: Backlink<TypeDefinition>,
    module: Backlink<ModuleDefinition>,
    generic_parameters: Lazy<Collection<GenericParameterRc>>,
    overrides: Lazy<Collection<MethodHandle>>,
    pinvoke: Lazy<Slot<Option<PInvokeInfo>>>,
    semantics: Lazy<Slot<MethodSemanticsAttributes>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
    security_declarations: Lazy<Collection<SecurityDeclarationRc>>,
}

impl MethodDefinition {
    /// A new method without parameters. Instance methods get `has_this`.
    #[must_use]
    pub fn new(name: &str, flags: u16, return_type: TypeSignature) -> MethodDefinitionRc {
        Arc::new(MethodDefinition {
            token: Token::new(0),
            name: name.to_string(),
            flags: Slot::new(flags),
            impl_flags: Slot::new(0),
            rva: Slot::new(0),
            has_this: Slot::new(flags & MethodAttributes::STATIC == 0),
            explicit_this: Slot::new(false),
            calling_convention: Slot::new(CallingConvention::Default),
            generic_arity: Slot::new(0),
            return_type: Slot::new(return_type),
            return_parameter: Slot::new(None),
            parameters: Collection::new(),
            declaring_type: Backlink::default(),
            module: Backlink::default(),
            generic_parameters: Lazy::ready(Collection::new()),
            overrides: Lazy::ready(Collection::new()),
            pinvoke: Lazy::ready(Slot::new(None)),
            semantics: Lazy::ready(Slot::new(MethodSemanticsAttributes::empty())),
            custom_attributes: Lazy::ready(Collection::new()),
            security_declarations: Lazy::ready(Collection::new()),
        })
    }

    /// A method read from a `MethodDef` row. Signature data and parameters are filled in
    /// by the reader through [`MethodDefinition::apply_signature`] and
    /// [`MethodDefinition::add_parameter`] before the method is published.
    pub(crate) fn from_metadata(
        token: Token,
        name: String,
        flags: u16,
        impl_flags: u16,
        rva: u32,
        declaring_type: Weak<TypeDefinition>,
        module: Weak<ModuleDefinition>,
    ) -> MethodDefinitionRc {
        Arc::new(MethodDefinition {
            token,
            name,
            flags: Slot::new(flags),
            impl_flags: Slot::new(impl_flags),
            rva: Slot::new(rva),
            has_this: Slot::new(false),
            explicit_this: Slot::new(false),
            calling_convention: Slot::new(CallingConvention::Default),
            generic_arity: Slot::new(0),
            return_type: Slot::new(TypeSignature::Void),
            return_parameter: Slot::new(None),
            parameters: Collection::new(),
            declaring_type: Backlink::new(declaring_type),
            module: Backlink::new(module),
            generic_parameters: Lazy::new(),
            overrides: Lazy::new(),
            pinvoke: Lazy::new(),
            semantics: Lazy::new(),
            custom_attributes: Lazy::new(),
            security_declarations: Lazy::new(),
        })
    }

    /// Copy the calling convention, arity and return type of `signature`.
    pub(crate) fn apply_signature(&self, signature: &MethodSignature) {
        self.has_this.set(signature.has_this);
        self.explicit_this.set(signature.explicit_this);
        self.calling_convention.set(signature.calling_convention);
        self.generic_arity.set(signature.generic_parameter_count);
        self.return_type.set(signature.return_type.clone());
    }

    /// `MethodAttributes`
    pub fn flags(&self) -> u16 {
        self.flags.get()
    }

    /// Replace the `MethodAttributes`.
    pub fn set_flags(&self, flags: u16) {
        self.flags.set(flags);
    }

    /// `MethodImplAttributes`
    pub fn impl_flags(&self) -> u16 {
        self.impl_flags.get()
    }

    /// Replace the `MethodImplAttributes`.
    pub fn set_impl_flags(&self, flags: u16) {
        self.impl_flags.set(flags);
    }

    /// RVA of the method body, 0 if there is none.
    pub fn rva(&self) -> u32 {
        self.rva.get()
    }

    /// Replace the body RVA.
    pub fn set_rva(&self, rva: u32) {
        self.rva.set(rva);
    }

    /// True for static methods.
    pub fn is_static(&self) -> bool {
        self.flags() & MethodAttributes::STATIC != 0
    }

    /// True for virtual methods.
    pub fn is_virtual(&self) -> bool {
        self.flags() & MethodAttributes::VIRTUAL != 0
    }

    /// True for abstract methods.
    pub fn is_abstract(&self) -> bool {
        self.flags() & MethodAttributes::ABSTRACT != 0
    }

    /// True for `.ctor` and `.cctor`.
    pub fn is_constructor(&self) -> bool {
        self.flags() & MethodAttributes::RTSPECIAL_NAME != 0
            && (self.name == ".ctor" || self.name == ".cctor")
    }

    /// Whether the signature carries a `this` pointer.
    pub fn has_this(&self) -> bool {
        self.has_this.get()
    }

    /// Set whether the signature carries a `this` pointer.
    pub fn set_has_this(&self, has_this: bool) {
        self.has_this.set(has_this);
    }

    /// Set the calling convention.
    pub fn set_calling_convention(&self, convention: CallingConvention) {
        self.calling_convention.set(convention);
    }

    /// Return type.
    pub fn return_type(&self) -> TypeSignature {
        self.return_type.get()
    }

    /// Replace the return type.
    pub fn set_return_type(&self, return_type: TypeSignature) {
        self.return_type.set(return_type);
    }

    /// The `Param` row with sequence 0, which carries attributes of the return value.
    pub fn return_parameter(&self) -> Option<ParameterDefinitionRc> {
        self.return_parameter.get()
    }

    /// Set the return value parameter row.
    pub fn set_return_parameter(self: &Arc<Self>, parameter: Option<ParameterDefinitionRc>) {
        if let Some(parameter) = &parameter {
            parameter.attach(self);
        }
        self.return_parameter.set(parameter);
    }

    /// The parameters, in signature order.
    pub fn parameters(&self) -> Vec<ParameterDefinitionRc> {
        self.parameters.items()
    }

    /// Append a parameter.
    pub fn add_parameter(self: &Arc<Self>, parameter: ParameterDefinitionRc) {
        parameter.attach(self);
        self.parameters.push(parameter);
    }

    /// Remove a parameter. Returns false if it does not belong to this method.
    pub fn remove_parameter(&self, parameter: &ParameterDefinitionRc) -> bool {
        self.parameters.remove_item(parameter)
    }

    /// The signature composed from the method's current state.
    pub fn signature(&self) -> MethodSignature {
        let generic_parameter_count = match self.generic_parameters.get() {
            Some(parameters) => parameters.len() as u32,
            None => self.generic_arity.get(),
        };

        MethodSignature {
            has_this: self.has_this(),
            explicit_this: self.explicit_this.get(),
            calling_convention: self.calling_convention.get(),
            generic_parameter_count,
            return_type: self.return_type(),
            parameters: self
                .parameters
                .items()
                .iter()
                .map(|parameter| parameter.parameter_type())
                .collect(),
        }
    }

    /// The declaring type.
    pub fn declaring_type(&self) -> Option<TypeDefinitionRc> {
        self.declaring_type.get()
    }

    pub(crate) fn attach(&self, declaring_type: &TypeDefinitionRc) {
        self.declaring_type.set(declaring_type);
        self.module.set_weak(declaring_type.module_link());
    }

    pub(crate) fn detach(&self) {
        self.declaring_type.set_weak(Weak::new());
    }

    /// The module, through the declaring type if needed.
    pub fn module(&self) -> Option<ModuleDefinitionRc> {
        self.module
            .get()
            .or_else(|| self.declaring_type()?.module())
    }

    /// `DeclaringType::Name`
    pub fn full_name(&self) -> String {
        match self.declaring_type() {
            Some(declaring) => format!("{}::{}", declaring.full_name(), self.name),
            None => self.name.clone(),
        }
    }

    /// Generic parameters declared by the method.
    ///
    /// # Errors
    /// Propagates decode failures of the `GenericParam` rows.
    pub fn generic_parameters(&self) -> Result<Vec<GenericParameterRc>> {
        Ok(self
            .generic_parameters
            .load(|| {
                read_with(&self.module, |reader| {
                    reader.read_generic_parameters(self.token)
                })
            })?
            .items())
    }

    /// Declare a new generic parameter at the next position.
    ///
    /// # Errors
    /// Propagates decode failures of the existing `GenericParam` rows.
    pub fn add_generic_parameter(self: &Arc<Self>, name: &str) -> Result<GenericParameterRc> {
        let parameters = self.generic_parameters.load(|| {
            read_with(&self.module, |reader| {
                reader.read_generic_parameters(self.token)
            })
        })?;

        let parameter = GenericParameter::create(
            name,
            parameters.len() as u16,
            0,
            GenericOwnerRef::Method(Arc::downgrade(self)),
            self.module.weak(),
        );
        parameters.push(parameter.clone());
        Ok(parameter)
    }

    /// Methods this method explicitly implements (`MethodImpl`).
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodImpl` rows. Returns
    /// [`crate::Error::NotSupported`] if the module has a `MethodImpl` row whose body is a
    /// `MemberRef`.
    pub fn overrides(&self) -> Result<Vec<MethodHandle>> {
        Ok(self
            .overrides
            .load(|| read_with(&self.module, |reader| reader.read_overrides(self.token)))?
            .items())
    }

    /// Add an explicitly implemented method.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodImpl` rows.
    pub fn add_override(&self, method: MethodHandle) -> Result<()> {
        self.overrides
            .load(|| read_with(&self.module, |reader| reader.read_overrides(self.token)))?
            .push(method);
        Ok(())
    }

    /// Platform invoke information (`ImplMap`).
    ///
    /// # Errors
    /// Propagates decode failures of the `ImplMap` row.
    pub fn pinvoke(&self) -> Result<Option<PInvokeInfo>> {
        self.pinvoke
            .load_value(|| read_with(&self.module, |reader| reader.read_pinvoke(self.token)))
    }

    /// Set or clear platform invoke information; `PinvokeImpl` follows.
    ///
    /// # Errors
    /// Propagates decode failures of the `ImplMap` row.
    pub fn set_pinvoke(&self, info: Option<PInvokeInfo>) -> Result<()> {
        let flags = self.flags();
        self.set_flags(if info.is_some() {
            flags | MethodAttributes::PINVOKE_IMPL
        } else {
            flags & !MethodAttributes::PINVOKE_IMPL
        });
        self.pinvoke.store(
            || read_with(&self.module, |reader| reader.read_pinvoke(self.token)),
            info,
        )
    }

    /// The roles this method plays for properties and events.
    ///
    /// # Errors
    /// Propagates decode failures of the `MethodSemantics` rows.
    pub fn semantics(&self) -> Result<MethodSemanticsAttributes> {
        self.semantics
            .load_value(|| read_with(&self.module, |reader| reader.read_semantics(self.token)))
    }

    pub(crate) fn add_semantics(&self, role: MethodSemanticsAttributes) -> Result<()> {
        let current = self.semantics()?;
        self.semantics.store(|| Ok(current), current | role)
    }

    /// Custom attributes on the method.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn custom_attributes(&self) -> Result<Vec<CustomAttributeRc>> {
        Ok(self
            .custom_attributes
            .load(|| read_with(&self.module, |reader| reader.read_custom_attributes(self.token)))?
            .items())
    }

    /// Attach a custom attribute.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn add_custom_attribute(&self, attribute: CustomAttributeRc) -> Result<()> {
        self.custom_attributes
            .load(|| read_with(&self.module, |reader| reader.read_custom_attributes(self.token)))?
            .push(attribute);
        Ok(())
    }

    /// Declarative security on the method.
    ///
    /// # Errors
    /// Propagates decode failures of the `DeclSecurity` rows.
    pub fn security_declarations(&self) -> Result<Vec<SecurityDeclarationRc>> {
        Ok(self
            .security_declarations
            .load(|| {
                read_with(&self.module, |reader| {
                    reader.read_security_declarations(self.token)
                })
            })?
            .items())
    }

    /// Attach a security declaration.
    ///
    /// # Errors
    /// Propagates decode failures of the `DeclSecurity` rows.
    pub fn add_security_declaration(&self, declaration: SecurityDeclarationRc) -> Result<()> {
        self.security_declarations
            .load(|| {
                read_with(&self.module, |reader| {
                    reader.read_security_declarations(self.token)
                })
            })?
            .push(declaration);
        Ok(())
    }
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("token", &self.token)
            .field("name", &self.full_name())
            .field("flags", &format_args!("{:#06x}", self.flags()))
            .field("parameters", &self.parameters.len())
            .finish()
    }
}

/// A parameter of a method (`Param`).
pub struct ParameterDefinition {
    /// The `Param` token, null for parameters without a row
    pub token: Token,
    /// Name, may be empty
    pub name: String,
    flags: Slot<u16>,
    parameter_type: Slot<TypeSignature>,
    method: Backlink<MethodDefinition>,
    module: Backlink<ModuleDefinition>,
    constant: Lazy<Slot<Option<ConstantValue>>>,
    marshal_info: Lazy<Slot<Option<MarshalInfo>>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
}

impl ParameterDefinition {
    /// A new parameter; attach it with [`MethodDefinition::add_parameter`].
    #[must_use]
    pub fn new(name: &str, flags: u16, parameter_type: TypeSignature) -> ParameterDefinitionRc {
        Arc::new(ParameterDefinition {
            token: Token::new(0),
            name: name.to_string(),
            flags: Slot::new(flags),
            parameter_type: Slot::new(parameter_type),
            method: Backlink::default(),
            module: Backlink::default(),
            constant: Lazy::ready(Slot::new(None)),
            marshal_info: Lazy::ready(Slot::new(None)),
            custom_attributes: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        name: String,
        flags: u16,
        parameter_type: TypeSignature,
        module: Weak<ModuleDefinition>,
    ) -> ParameterDefinitionRc {
        Arc::new(ParameterDefinition {
            token,
            name,
            flags: Slot::new(flags),
            parameter_type: Slot::new(parameter_type),
            method: Backlink::default(),
            module: Backlink::new(module),
            constant: Lazy::new(),
            marshal_info: Lazy::new(),
            custom_attributes: Lazy::new(),
        })
    }

    fn attach(&self, method: &MethodDefinitionRc) {
        self.method.set(method);
        if self.module.get().is_none() {
            self.module.set_weak(method.module.weak());
        }
    }

    /// `ParamAttributes`
    pub fn flags(&self) -> u16 {
        self.flags.get()
    }

    /// Replace the `ParamAttributes`.
    pub fn set_flags(&self, flags: u16) {
        self.flags.set(flags);
    }

    /// The parameter type.
    pub fn parameter_type(&self) -> TypeSignature {
        self.parameter_type.get()
    }

    /// Replace the parameter type.
    pub fn set_parameter_type(&self, parameter_type: TypeSignature) {
        self.parameter_type.set(parameter_type);
    }

    /// The method declaring this parameter.
    pub fn method(&self) -> Option<MethodDefinitionRc> {
        self.method.get()
    }

    /// Zero based position in the method's parameter list; `None` for the return parameter.
    pub fn index(&self) -> Option<usize> {
        let method = self.method()?;
        method
            .parameters()
            .iter()
            .position(|candidate| std::ptr::eq(candidate.as_ref(), self))
    }

    /// The default value from the `Constant` table.
    ///
    /// # Errors
    /// Propagates decode failures of the `Constant` row.
    pub fn constant(&self) -> Result<Option<ConstantValue>> {
        self.constant
            .load_value(|| read_with(&self.module, |reader| reader.read_constant(self.token)))
    }

    /// Set or clear the default value; `HasDefault` follows.
    ///
    /// # Errors
    /// Propagates decode failures of the `Constant` row.
    pub fn set_constant(&self, value: Option<ConstantValue>) -> Result<()> {
        let flags = self.flags();
        self.set_flags(if value.is_some() {
            flags | ParamAttributes::HAS_DEFAULT
        } else {
            flags & !ParamAttributes::HAS_DEFAULT
        });
        self.constant.store(
            || read_with(&self.module, |reader| reader.read_constant(self.token)),
            value,
        )
    }

    /// The marshalling descriptor from the `FieldMarshal` table.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldMarshal` row.
    pub fn marshal_info(&self) -> Result<Option<MarshalInfo>> {
        self.marshal_info
            .load_value(|| read_with(&self.module, |reader| reader.read_marshal_info(self.token)))
    }

    /// Set or clear the marshalling descriptor; `HasFieldMarshal` follows.
    ///
    /// # Errors
    /// Propagates decode failures of the `FieldMarshal` row.
    pub fn set_marshal_info(&self, value: Option<MarshalInfo>) -> Result<()> {
        let flags = self.flags();
        self.set_flags(if value.is_some() {
            flags | ParamAttributes::HAS_FIELD_MARSHAL
        } else {
            flags & !ParamAttributes::HAS_FIELD_MARSHAL
        });
        self.marshal_info.store(
            || read_with(&self.module, |reader| reader.read_marshal_info(self.token)),
            value,
        )
    }

    /// Custom attributes on the parameter.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn custom_attributes(&self) -> Result<Vec<CustomAttributeRc>> {
        Ok(self
            .custom_attributes
            .load(|| read_with(&self.module, |reader| reader.read_custom_attributes(self.token)))?
            .items())
    }

    /// Attach a custom attribute.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn add_custom_attribute(&self, attribute: CustomAttributeRc) -> Result<()> {
        self.custom_attributes
            .load(|| read_with(&self.module, |reader| reader.read_custom_attributes(self.token)))?
            .push(attribute);
        Ok(())
    }

}

impl fmt::Debug for ParameterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterDefinition")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("type", &self.parameter_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::GenericParameterKind;

    #[test]
    fn signature_is_composed() {
        let method = MethodDefinition::new("M", MethodAttributes::PUBLIC, TypeSignature::Void);
        method.add_parameter(ParameterDefinition::new("a", 0, TypeSignature::I4));
        method.add_parameter(ParameterDefinition::new("b", 0, TypeSignature::String));

        let generic = method.add_generic_parameter("T").unwrap();
        assert_eq!(generic.kind, GenericParameterKind::Method);
        assert_eq!(generic.position, 0);

        let signature = method.signature();
        assert!(signature.has_this);
        assert_eq!(signature.generic_parameter_count, 1);
        assert_eq!(
            signature.parameters,
            vec![TypeSignature::I4, TypeSignature::String]
        );

        let second = method.parameters()[1].clone();
        assert_eq!(second.index(), Some(1));
        assert!(Arc::ptr_eq(&second.method().unwrap(), &method));
    }

    #[test]
    fn static_methods_have_no_this() {
        let method = MethodDefinition::new(
            "S",
            MethodAttributes::STATIC | MethodAttributes::PUBLIC,
            TypeSignature::I4,
        );
        assert!(!method.signature().has_this);
        assert!(method.is_static());
    }

    #[test]
    fn pinvoke_sets_flag() {
        let method = MethodDefinition::new("Beep", MethodAttributes::STATIC, TypeSignature::Void);
        let library = crate::metadata::typesystem::ModuleReference::new("kernel32.dll");
        method
            .set_pinvoke(Some(PInvokeInfo {
                flags: PInvokeAttributes::empty(),
                entry_point: "Beep".to_string(),
                module: library,
            }))
            .unwrap();
        assert_ne!(method.flags() & MethodAttributes::PINVOKE_IMPL, 0);
        assert_eq!(method.pinvoke().unwrap().unwrap().entry_point, "Beep");
    }

}
