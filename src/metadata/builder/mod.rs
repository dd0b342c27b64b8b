//! Serialization of a module's entity graph into metadata tables and heaps.
//!
//! Building runs in two phases. [`MetadataBuilder::new`] walks the types depth first and
//! assigns `TypeDef`, `Field` and `MethodDef` row ids, so that any definition can be named by
//! token before its row exists. [`MetadataBuilder::build`] then walks the graph again and
//! emits every row, creating `TypeRef`, `MemberRef`, `TypeSpec` and `MethodSpec` rows on
//! demand. Those four are deduplicated on their composed row values: two reference objects
//! that describe the same entity share one row.
//!
//! Between the phases an external body writer can request tokens for the members and
//! string literals its instructions use, through [`MetadataBuilder::method_token`],
//! [`MetadataBuilder::field_token`], [`MetadataBuilder::type_token`] and
//! [`MetadataBuilder::user_string_token`].
//!
//! # Key Components
//!
//! - [`MetadataBuilder`] - token assignment, row emission and serialization
//! - `heaps` - interning buffers for `#Strings`, `#Blob`, `#GUID` and `#US`
//! - `tables` - row buffers and the `#~` stream writer
//!
//! # Examples
//!
//! ```rust
//! use dotmeta::prelude::*;
//!
//! let module = ModuleDefinition::create("Example.dll", ModuleKind::Dll);
//! let mut builder = MetadataBuilder::new(&module)?;
//! let token = builder.user_string_token("Hello")?;
//! assert!(token.is_user_string());
//!
//! let image = builder.build()?;
//! assert_eq!(image.row_count(TableId::Module), 1);
//! # Ok::<(), dotmeta::Error>(())
//! ```

mod heaps;
pub(crate) mod tables;

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, trace};

use crate::{
    metadata::{
        image::{MetadataImage, MetadataStreams},
        signatures::{
            write_custom_attribute, write_security_declaration, SignatureWriter, TypeHandle,
            TypeSignature, TypeTokens,
        },
        tables::{CodedIndexType, TableId},
        token::Token,
        typesystem::{
            AssemblyNameReference, AssemblyNameReferenceRc, CustomAttributeRc, EventDefinitionRc,
            ExportedTypeRc, ExportedTypeScope, FieldDefinition, FieldDefinitionRc, FieldHandle,
            GenericParameterRc, MethodDefinition, MethodDefinitionRc, MethodHandle,
            ModuleAttributeContext, ModuleDefinition, ModuleDefinitionRc, ModuleReferenceRc,
            ParameterDefinitionRc, PropertyDefinitionRc, SecurityDeclarationRc, SemanticMethod,
            TypeDefinition, TypeDefinitionRc, TypeReferenceRc, TypeReferenceScope,
        },
    },
    Error, Result,
};

use heaps::{BlobHeapBuffer, GuidHeapBuffer, StringHeapBuffer, UserStringHeapBuffer};
use tables::TableBuffers;

/// A type with the members that phase one assigned row ids to.
struct TypeEntry {
    definition: TypeDefinitionRc,
    fields: Vec<FieldDefinitionRc>,
    methods: Vec<MethodDefinitionRc>,
    field_list: u32,
    method_list: u32,
}

/// Writes one module into a fresh set of tables and heaps.
pub struct MetadataBuilder {
    module: ModuleDefinitionRc,
    tables: TableBuffers,
    strings: StringHeapBuffer,
    blobs: BlobHeapBuffer,
    guids: GuidHeapBuffer,
    user_strings: UserStringHeapBuffer,

    entries: Vec<TypeEntry>,
    types: HashMap<*const TypeDefinition, Token>,
    fields: HashMap<*const FieldDefinition, Token>,
    methods: HashMap<*const MethodDefinition, Token>,

    assembly_refs: HashMap<*const AssemblyNameReference, Token>,
    assembly_ref_names: HashMap<String, Token>,
    module_refs: HashMap<String, Token>,
    files: HashMap<String, Token>,

    type_refs: HashMap<(u32, u32, u32), Token>,
    member_refs: HashMap<(u32, u32, u32), Token>,
    type_specs: HashMap<u32, Token>,
    method_specs: HashMap<(u32, u32), Token>,

    generic_parameters: Vec<(Token, GenericParameterRc)>,
}

impl MetadataBuilder {
    /// Prepare a build of `module`, assigning row ids to all type, field and method
    /// definitions.
    ///
    /// # Errors
    /// Propagates decode failures of collections read on the way.
    pub fn new(module: &ModuleDefinition) -> Result<Self> {
        let mut builder = MetadataBuilder {
            module: module.this()?,
            tables: TableBuffers::new(),
            strings: StringHeapBuffer::new(),
            blobs: BlobHeapBuffer::new(),
            guids: GuidHeapBuffer::new(),
            user_strings: UserStringHeapBuffer::new(),
            entries: Vec::new(),
            types: HashMap::new(),
            fields: HashMap::new(),
            methods: HashMap::new(),
            assembly_refs: HashMap::new(),
            assembly_ref_names: HashMap::new(),
            module_refs: HashMap::new(),
            files: HashMap::new(),
            type_refs: HashMap::new(),
            member_refs: HashMap::new(),
            type_specs: HashMap::new(),
            method_specs: HashMap::new(),
            generic_parameters: Vec::new(),
        };

        for definition in module.types()? {
            builder.attach_tokens(definition)?;
        }
        debug!(
            module = %module.name,
            types = builder.types.len(),
            fields = builder.fields.len(),
            methods = builder.methods.len(),
            "assigned definition tokens"
        );

        builder.emit_references()?;
        Ok(builder)
    }

    fn attach_tokens(&mut self, definition: TypeDefinitionRc) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let rid = self.entries.len() as u32 + 1;
        self.types.insert(
            Arc::as_ptr(&definition),
            Token::from_parts(TableId::TypeDef, rid),
        );

        let field_list = self.fields.len() as u32 + 1;
        let fields = definition.fields()?;
        for (index, field) in fields.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let token = Token::from_parts(TableId::Field, field_list + index as u32);
            self.fields.insert(Arc::as_ptr(field), token);
        }

        let method_list = self.methods.len() as u32 + 1;
        let methods = definition.methods()?;
        for (index, method) in methods.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let token = Token::from_parts(TableId::MethodDef, method_list + index as u32);
            self.methods.insert(Arc::as_ptr(method), token);
        }

        let nested = definition.nested_types()?;
        self.entries.push(TypeEntry {
            definition,
            fields,
            methods,
            field_list,
            method_list,
        });

        for nested in nested {
            self.attach_tokens(nested)?;
        }
        Ok(())
    }

    /// The `AssemblyRef` and `ModuleRef` rows of the module's own lists come first, in
    /// list order.
    fn emit_references(&mut self) -> Result<()> {
        for reference in self.module.assembly_references()? {
            self.assembly_ref_token(&reference)?;
        }
        for reference in self.module.module_references()? {
            self.module_ref_token(&reference)?;
        }
        Ok(())
    }

    /// Emit all rows and serialize tables and heaps.
    ///
    /// # Errors
    /// Returns [`Error::ForeignMember`] if the graph points at a member of another module,
    /// [`Error::InvalidArgument`] for definitions that were never added to the module,
    /// and propagates decode failures of collections read on the way.
    pub fn build(mut self) -> Result<MetadataImage> {
        self.emit_module()?;
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            self.emit_type(entry)?;
        }
        self.emit_exported_types()?;
        self.emit_generic_parameters()?;

        let entry_point = match self.module.entry_point()? {
            Some(method) => self.method_definition_token(&method)?,
            None => Token::new(0),
        };

        self.tables.sort();
        debug!(
            types = self.tables.len(TableId::TypeDef),
            type_refs = self.tables.len(TableId::TypeRef),
            member_refs = self.tables.len(TableId::MemberRef),
            type_specs = self.tables.len(TableId::TypeSpec),
            custom_attributes = self.tables.len(TableId::CustomAttribute),
            generic_parameters = self.tables.len(TableId::GenericParam),
            "emitted rows"
        );

        let tables =
            self.tables
                .serialize(self.strings.len(), self.guids.len(), self.blobs.len())?;
        let streams = MetadataStreams {
            tables,
            strings: self.strings.into_bytes(),
            blob: self.blobs.into_bytes(),
            guid: self.guids.into_bytes(),
            user_strings: self.user_strings.into_bytes(),
        };
        debug!(
            tables = streams.tables.len(),
            strings = streams.strings.len(),
            blob = streams.blob.len(),
            guid = streams.guid.len(),
            user_strings = streams.user_strings.len(),
            "serialized streams"
        );

        let mut info = self.module.info().clone();
        info.entry_point = entry_point;
        MetadataImage::new(streams, info)
    }

    fn emit_module(&mut self) -> Result<()> {
        let name = self.strings.add(&self.module.name)?;
        let mvid = self.guids.add(self.module.mvid);
        let token = self.tables.push(TableId::Module, vec![0, name, mvid, 0, 0]);
        self.emit_custom_attributes(token, self.module.custom_attributes()?)?;

        if let Some(assembly) = self.module.assembly()? {
            let name = &assembly.name;
            let row = vec![
                name.hash_algorithm,
                u32::from(name.version.major),
                u32::from(name.version.minor),
                u32::from(name.version.build),
                u32::from(name.version.revision),
                name.flags,
                self.blobs.add(&name.public_key_or_token)?,
                self.strings.add(&name.name)?,
                self.strings.add(&name.culture)?,
            ];
            let token = self.tables.push(TableId::Assembly, row);
            self.emit_custom_attributes(token, assembly.custom_attributes()?)?;
            self.emit_security_declarations(token, assembly.security_declarations()?)?;
        }
        Ok(())
    }

    fn emit_type(&mut self, entry: &TypeEntry) -> Result<()> {
        let definition = &entry.definition;
        let extends = match definition.base_type()? {
            Some(base) => {
                let token = self.type_token(&base)?;
                CodedIndexType::TypeDefOrRef.compress(token)?
            }
            None => 0,
        };
        let row = vec![
            definition.flags(),
            self.strings.add(&definition.name)?,
            self.strings.add(&definition.namespace)?,
            extends,
            entry.field_list,
            entry.method_list,
        ];
        let token = self.tables.push(TableId::TypeDef, row);
        debug_assert_eq!(Some(&token), self.types.get(&Arc::as_ptr(definition)));

        if let Some(enclosing) = definition.declaring_type() {
            let enclosing = self.type_definition_token(&enclosing)?;
            self.tables.push(
                TableId::NestedClass,
                vec![token.row(), enclosing.row()],
            );
        }

        for interface in definition.interfaces()? {
            let interface_token = self.type_token(&interface.interface)?;
            let row = vec![
                token.row(),
                CodedIndexType::TypeDefOrRef.compress(interface_token)?,
            ];
            let implementation = self.tables.push(TableId::InterfaceImpl, row);
            self.emit_custom_attributes(implementation, interface.custom_attributes()?)?;
        }

        if let Some(layout) = definition.layout()? {
            self.tables.push(
                TableId::ClassLayout,
                vec![
                    u32::from(layout.packing_size),
                    layout.class_size,
                    token.row(),
                ],
            );
        }

        for parameter in definition.generic_parameters()? {
            self.generic_parameters.push((token, parameter));
        }
        self.emit_custom_attributes(token, definition.custom_attributes()?)?;
        self.emit_security_declarations(token, definition.security_declarations()?)?;

        for field in &entry.fields {
            self.emit_field(field)?;
        }
        for method in &entry.methods {
            self.emit_method(token, method)?;
        }

        let properties = definition.properties()?;
        if !properties.is_empty() {
            let first = self.tables.next_rid(TableId::Property);
            self.tables
                .push(TableId::PropertyMap, vec![token.row(), first]);
            for property in &properties {
                self.emit_property(property)?;
            }
        }

        let events = definition.events()?;
        if !events.is_empty() {
            let first = self.tables.next_rid(TableId::Event);
            self.tables.push(TableId::EventMap, vec![token.row(), first]);
            for event in &events {
                self.emit_event(event)?;
            }
        }
        Ok(())
    }

    fn emit_field(&mut self, field: &FieldDefinitionRc) -> Result<()> {
        let signature = self.signature_blob(|writer| writer.write_field_signature(&field.field_type))?;
        let row = vec![
            u32::from(field.flags()),
            self.strings.add(&field.name)?,
            signature,
        ];
        let token = self.tables.push(TableId::Field, row);
        debug_assert_eq!(Some(&token), self.fields.get(&Arc::as_ptr(field)));

        if let Some(constant) = field.constant()? {
            self.emit_constant(token, constant.element_type(), &constant.to_bytes())?;
        }
        if let Some(marshal) = field.marshal_info()? {
            self.emit_marshal(token, &marshal.to_bytes()?)?;
        }
        if let Some(offset) = field.offset()? {
            self.tables
                .push(TableId::FieldLayout, vec![offset, token.row()]);
        }
        if let Some(rva) = field.rva()? {
            self.tables.push(TableId::FieldRVA, vec![rva, token.row()]);
        }
        self.emit_custom_attributes(token, field.custom_attributes()?)
    }

    fn emit_method(&mut self, owner: Token, method: &MethodDefinitionRc) -> Result<()> {
        let signature_value = method.signature();
        let signature =
            self.signature_blob(|writer| writer.write_method_signature(&signature_value))?;
        let row = vec![
            method.rva(),
            u32::from(method.impl_flags()),
            u32::from(method.flags()),
            self.strings.add(&method.name)?,
            signature,
            self.tables.next_rid(TableId::Param),
        ];
        let token = self.tables.push(TableId::MethodDef, row);
        debug_assert_eq!(Some(&token), self.methods.get(&Arc::as_ptr(method)));

        if let Some(parameter) = method.return_parameter() {
            self.emit_parameter(&parameter, 0)?;
        }
        for (index, parameter) in method.parameters().iter().enumerate() {
            let sequence = u16::try_from(index + 1)
                .map_err(|_| malformed_error!("{} has too many parameters", method.name))?;
            self.emit_parameter(parameter, sequence)?;
        }

        if let Some(pinvoke) = method.pinvoke()? {
            let row = vec![
                u32::from(pinvoke.flags.bits()),
                CodedIndexType::MemberForwarded.compress(token)?,
                self.strings.add(&pinvoke.entry_point)?,
                self.module_ref_token(&pinvoke.module)?.row(),
            ];
            self.tables.push(TableId::ImplMap, row);
        }

        for overridden in method.overrides()? {
            let declaration = self.method_token(&overridden)?;
            let row = vec![
                owner.row(),
                CodedIndexType::MethodDefOrRef.compress(token)?,
                CodedIndexType::MethodDefOrRef.compress(declaration)?,
            ];
            self.tables.push(TableId::MethodImpl, row);
        }

        for parameter in method.generic_parameters()? {
            self.generic_parameters.push((token, parameter));
        }
        self.emit_custom_attributes(token, method.custom_attributes()?)?;
        self.emit_security_declarations(token, method.security_declarations()?)
    }

    fn emit_parameter(&mut self, parameter: &ParameterDefinitionRc, sequence: u16) -> Result<()> {
        let row = vec![
            u32::from(parameter.flags()),
            u32::from(sequence),
            self.strings.add(&parameter.name)?,
        ];
        let token = self.tables.push(TableId::Param, row);

        if let Some(constant) = parameter.constant()? {
            self.emit_constant(token, constant.element_type(), &constant.to_bytes())?;
        }
        if let Some(marshal) = parameter.marshal_info()? {
            self.emit_marshal(token, &marshal.to_bytes()?)?;
        }
        self.emit_custom_attributes(token, parameter.custom_attributes()?)
    }

    fn emit_property(&mut self, property: &PropertyDefinitionRc) -> Result<()> {
        let signature_value = property.signature();
        let signature =
            self.signature_blob(|writer| writer.write_property_signature(&signature_value))?;
        let row = vec![
            u32::from(property.flags()),
            self.strings.add(&property.name)?,
            signature,
        ];
        let token = self.tables.push(TableId::Property, row);

        self.emit_semantics(token, &property.accessors()?)?;
        if let Some(constant) = property.constant()? {
            self.emit_constant(token, constant.element_type(), &constant.to_bytes())?;
        }
        self.emit_custom_attributes(token, property.custom_attributes()?)
    }

    fn emit_event(&mut self, event: &EventDefinitionRc) -> Result<()> {
        let event_type = self.type_token(&event.event_type())?;
        let row = vec![
            u32::from(event.flags()),
            self.strings.add(&event.name)?,
            CodedIndexType::TypeDefOrRef.compress(event_type)?,
        ];
        let token = self.tables.push(TableId::Event, row);

        self.emit_semantics(token, &event.accessors()?)?;
        self.emit_custom_attributes(token, event.custom_attributes()?)
    }

    fn emit_semantics(&mut self, owner: Token, accessors: &[SemanticMethod]) -> Result<()> {
        let association = CodedIndexType::HasSemantics.compress(owner)?;
        for accessor in accessors {
            let method = self.method_definition_token(&accessor.method)?;
            self.tables.push(
                TableId::MethodSemantics,
                vec![u32::from(accessor.semantics.bits()), method.row(), association],
            );
        }
        Ok(())
    }

    fn emit_constant(&mut self, owner: Token, element_type: u8, value: &[u8]) -> Result<()> {
        let row = vec![
            u32::from(element_type),
            CodedIndexType::HasConstant.compress(owner)?,
            self.blobs.add(value)?,
        ];
        self.tables.push(TableId::Constant, row);
        Ok(())
    }

    fn emit_marshal(&mut self, owner: Token, value: &[u8]) -> Result<()> {
        let row = vec![
            CodedIndexType::HasFieldMarshal.compress(owner)?,
            self.blobs.add(value)?,
        ];
        self.tables.push(TableId::FieldMarshal, row);
        Ok(())
    }

    fn emit_custom_attributes(
        &mut self,
        owner: Token,
        attributes: Vec<CustomAttributeRc>,
    ) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }

        let parent = CodedIndexType::HasCustomAttribute.compress(owner)?;
        for attribute in attributes {
            let constructor = self.method_token(&attribute.constructor)?;
            let value = match attribute.blob() {
                Some(blob) => blob.to_vec(),
                None => write_custom_attribute(
                    &attribute.value()?,
                    &mut ModuleAttributeContext::new(&self.module),
                )?,
            };
            let row = vec![
                parent,
                CodedIndexType::CustomAttributeType.compress(constructor)?,
                self.blobs.add(&value)?,
            ];
            self.tables.push(TableId::CustomAttribute, row);
        }
        Ok(())
    }

    fn emit_security_declarations(
        &mut self,
        owner: Token,
        declarations: Vec<SecurityDeclarationRc>,
    ) -> Result<()> {
        for declaration in declarations {
            let value = match declaration.blob() {
                Some(blob) => blob.to_vec(),
                None => write_security_declaration(
                    &declaration.attributes()?,
                    &mut ModuleAttributeContext::new(&self.module),
                )?,
            };
            let row = vec![
                u32::from(u16::from(declaration.action)),
                CodedIndexType::HasDeclSecurity.compress(owner)?,
                self.blobs.add(&value)?,
            ];
            self.tables.push(TableId::DeclSecurity, row);
        }
        Ok(())
    }

    fn emit_exported_types(&mut self) -> Result<()> {
        let exported = self.module.exported_types()?;
        let tokens: HashMap<*const _, Token> = exported
            .iter()
            .enumerate()
            .map(|(index, exported)| {
                #[allow(clippy::cast_possible_truncation)]
                let token = Token::from_parts(TableId::ExportedType, index as u32 + 1);
                (Arc::as_ptr(exported), token)
            })
            .collect();

        for exported_type in &exported {
            let implementation = match &exported_type.scope {
                ExportedTypeScope::Assembly(assembly) => self.assembly_ref_token(assembly)?,
                ExportedTypeScope::Module(module) => self.file_token(module)?,
                ExportedTypeScope::DeclaringType(declaring) => *tokens
                    .get(&Arc::as_ptr(declaring))
                    .ok_or_else(|| Self::unlisted_exported_type(declaring))?,
            };
            let row = vec![
                exported_type.flags,
                exported_type.type_def_id,
                self.strings.add(&exported_type.name)?,
                self.strings.add(&exported_type.namespace)?,
                CodedIndexType::Implementation.compress(implementation)?,
            ];
            self.tables.push(TableId::ExportedType, row);
        }
        Ok(())
    }

    fn unlisted_exported_type(exported: &ExportedTypeRc) -> Error {
        Error::InvalidArgument(format!(
            "exported type {} is not in the module's exported type list",
            exported.full_name()
        ))
    }

    fn file_token(&mut self, module: &ModuleReferenceRc) -> Result<Token> {
        if let Some(token) = self.files.get(&module.name) {
            return Ok(*token);
        }

        let row = vec![0, self.strings.add(&module.name)?, 0];
        let token = self.tables.push(TableId::File, row);
        self.files.insert(module.name.clone(), token);
        Ok(token)
    }

    /// `GenericParam` rows are ordered by owner coded index, then by number, no matter in
    /// which order their owners were visited.
    fn emit_generic_parameters(&mut self) -> Result<()> {
        let mut parameters = std::mem::take(&mut self.generic_parameters)
            .into_iter()
            .map(|(owner, parameter)| {
                let coded = CodedIndexType::TypeOrMethodDef.compress(owner)?;
                Ok((coded, parameter))
            })
            .collect::<Result<Vec<_>>>()?;
        parameters.sort_by_key(|(owner, parameter)| (*owner, parameter.position));

        let mut emitted = Vec::with_capacity(parameters.len());
        for (owner, parameter) in parameters {
            let row = vec![
                u32::from(parameter.position),
                u32::from(parameter.flags),
                owner,
                self.strings.add(&parameter.name)?,
            ];
            emitted.push((self.tables.push(TableId::GenericParam, row), parameter));
        }

        for (token, parameter) in &emitted {
            self.emit_custom_attributes(*token, parameter.custom_attributes()?)?;
            for constraint in parameter.constraints()? {
                let constraint_type = self.type_token(&constraint.constraint_type)?;
                let row = vec![
                    token.row(),
                    CodedIndexType::TypeDefOrRef.compress(constraint_type)?,
                ];
                let constraint_token = self.tables.push(TableId::GenericParamConstraint, row);
                self.emit_custom_attributes(constraint_token, constraint.custom_attributes()?)?;
            }
        }

        debug!(generic_parameters = emitted.len(), "emitted generic parameters");
        Ok(())
    }

    fn signature_blob<F>(&mut self, write: F) -> Result<u32>
    where
        F: FnOnce(&mut SignatureWriter<'_, Self>) -> Result<()>,
    {
        let mut writer = SignatureWriter::new(self);
        write(&mut writer)?;
        let bytes = writer.into_bytes();
        self.blobs.add(&bytes)
    }

    fn belongs_here(&self, module: Option<ModuleDefinitionRc>) -> bool {
        module.is_some_and(|module| Arc::ptr_eq(&module, &self.module))
    }

    /// The error for a definition with no assigned token.
    fn unassigned(&self, module: Option<ModuleDefinitionRc>, name: String) -> Error {
        if module.is_none() || self.belongs_here(module) {
            Error::InvalidArgument(format!("{name} has not been added to the module"))
        } else {
            Error::ForeignMember(name)
        }
    }

    fn type_definition_token(&self, definition: &TypeDefinitionRc) -> Result<Token> {
        match self.types.get(&Arc::as_ptr(definition)) {
            Some(token) => Ok(*token),
            None => Err(self.unassigned(definition.module(), definition.full_name())),
        }
    }

    fn method_definition_token(&self, method: &MethodDefinitionRc) -> Result<Token> {
        match self.methods.get(&Arc::as_ptr(method)) {
            Some(token) => Ok(*token),
            None => Err(self.unassigned(method.module(), method.full_name())),
        }
    }

    fn assembly_ref_token(&mut self, reference: &AssemblyNameReferenceRc) -> Result<Token> {
        if let Some(token) = self.assembly_refs.get(&Arc::as_ptr(reference)) {
            return Ok(*token);
        }

        let full_name = reference.full_name();
        let token = match self.assembly_ref_names.get(&full_name) {
            Some(token) => *token,
            None => {
                let row = vec![
                    u32::from(reference.version.major),
                    u32::from(reference.version.minor),
                    u32::from(reference.version.build),
                    u32::from(reference.version.revision),
                    reference.flags,
                    self.blobs.add(&reference.public_key_or_token)?,
                    self.strings.add(&reference.name)?,
                    self.strings.add(&reference.culture)?,
                    self.blobs.add(&reference.hash_value)?,
                ];
                let token = self.tables.push(TableId::AssemblyRef, row);
                self.assembly_ref_names.insert(full_name, token);
                token
            }
        };
        self.assembly_refs.insert(Arc::as_ptr(reference), token);
        Ok(token)
    }

    fn module_ref_token(&mut self, reference: &ModuleReferenceRc) -> Result<Token> {
        if let Some(token) = self.module_refs.get(&reference.name) {
            return Ok(*token);
        }

        let row = vec![self.strings.add(&reference.name)?];
        let token = self.tables.push(TableId::ModuleRef, row);
        self.module_refs.insert(reference.name.clone(), token);
        Ok(token)
    }

    fn type_reference_token(&mut self, reference: &TypeReferenceRc) -> Result<Token> {
        if !self.belongs_here(reference.module()) {
            return Err(Error::ForeignMember(reference.full_name()));
        }

        let scope = match &reference.scope {
            TypeReferenceScope::CurrentModule => Token::from_parts(TableId::Module, 1),
            TypeReferenceScope::Module(module) => self.module_ref_token(module)?,
            TypeReferenceScope::Assembly(assembly) => self.assembly_ref_token(assembly)?,
            TypeReferenceScope::DeclaringType(declaring) => {
                self.type_reference_token(declaring)?
            }
            TypeReferenceScope::None => Token::new(0),
        };
        let key = (
            CodedIndexType::ResolutionScope.compress(scope)?,
            self.strings.add(&reference.name)?,
            self.strings.add(&reference.namespace)?,
        );

        if let Some(token) = self.type_refs.get(&key) {
            trace!(name = %reference.full_name(), token = %token, "reused TypeRef row");
            return Ok(*token);
        }
        let token = self.tables.push(TableId::TypeRef, vec![key.0, key.1, key.2]);
        self.type_refs.insert(key, token);
        Ok(token)
    }

    /// The `TypeDefOrRef` token of any type: `TypeDef`/`TypeRef` for plain class and value
    /// types, a `TypeSpec` for everything else.
    ///
    /// # Errors
    /// Returns [`Error::ForeignMember`] for types of another module.
    pub fn type_token(&mut self, signature: &TypeSignature) -> Result<Token> {
        match signature {
            TypeSignature::Class(handle) | TypeSignature::ValueType(handle) => {
                self.type_handle_token(handle)
            }
            other => self.type_spec_token(other),
        }
    }

    /// The `MethodDef`, `MemberRef` or `MethodSpec` token of a method.
    ///
    /// # Errors
    /// Returns [`Error::ForeignMember`] for methods of another module.
    pub fn method_token(&mut self, method: &MethodHandle) -> Result<Token> {
        match method {
            MethodHandle::Definition(weak) => match weak.upgrade() {
                Some(definition) => self.method_definition_token(&definition),
                None => Err(Error::InvalidArgument(
                    "method definition has been dropped".to_string(),
                )),
            },
            MethodHandle::Reference(reference) => {
                if !self.belongs_here(reference.module()) {
                    return Err(Error::ForeignMember(reference.full_name()));
                }
                let signature = &reference.signature;
                let blob = self.signature_blob(|writer| writer.write_method_signature(signature))?;
                self.member_reference_token(&reference.declaring_type, &reference.name, blob)
            }
            MethodHandle::Instance(instance) => {
                if !self.belongs_here(instance.module()) {
                    return Err(Error::ForeignMember(method.full_name()));
                }
                let open = self.method_token(&instance.method)?;
                let key = (
                    CodedIndexType::MethodDefOrRef.compress(open)?,
                    self.signature_blob(|writer| writer.write_method_spec(&instance.arguments))?,
                );

                if let Some(token) = self.method_specs.get(&key) {
                    trace!(method = %method.full_name(), token = %token, "reused MethodSpec row");
                    return Ok(*token);
                }
                let token = self.tables.push(TableId::MethodSpec, vec![key.0, key.1]);
                self.method_specs.insert(key, token);
                Ok(token)
            }
        }
    }

    /// The `Field` or `MemberRef` token of a field.
    ///
    /// # Errors
    /// Returns [`Error::ForeignMember`] for fields of another module.
    pub fn field_token(&mut self, field: &FieldHandle) -> Result<Token> {
        match field {
            FieldHandle::Definition(weak) => {
                let Some(definition) = weak.upgrade() else {
                    return Err(Error::InvalidArgument(
                        "field definition has been dropped".to_string(),
                    ));
                };
                match self.fields.get(&Arc::as_ptr(&definition)) {
                    Some(token) => Ok(*token),
                    None => Err(self.unassigned(definition.module(), definition.full_name())),
                }
            }
            FieldHandle::Reference(reference) => {
                if !self.belongs_here(reference.module()) {
                    return Err(Error::ForeignMember(reference.full_name()));
                }
                let field_type = &reference.field_type;
                let blob = self.signature_blob(|writer| writer.write_field_signature(field_type))?;
                self.member_reference_token(&reference.declaring_type, &reference.name, blob)
            }
        }
    }

    fn member_reference_token(
        &mut self,
        declaring_type: &TypeSignature,
        name: &str,
        signature: u32,
    ) -> Result<Token> {
        let parent = self.type_token(declaring_type)?;
        let key = (
            CodedIndexType::MemberRefParent.compress(parent)?,
            self.strings.add(name)?,
            signature,
        );

        if let Some(token) = self.member_refs.get(&key) {
            trace!(name, token = %token, "reused MemberRef row");
            return Ok(*token);
        }
        let token = self.tables.push(TableId::MemberRef, vec![key.0, key.1, key.2]);
        self.member_refs.insert(key, token);
        Ok(token)
    }

    /// The `#US` token of a string literal, for `ldstr` operands.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] once the heap outgrows the 24-bit offset range.
    pub fn user_string_token(&mut self, value: &str) -> Result<Token> {
        Ok(Token::user_string(self.user_strings.add(value)?))
    }
}

impl TypeTokens for MetadataBuilder {
    fn type_handle_token(&mut self, handle: &TypeHandle) -> Result<Token> {
        match handle {
            TypeHandle::Definition(weak) => match weak.upgrade() {
                Some(definition) => self.type_definition_token(&definition),
                None => Err(Error::InvalidArgument(
                    "type definition has been dropped".to_string(),
                )),
            },
            TypeHandle::Reference(reference) => self.type_reference_token(reference),
        }
    }

    fn type_spec_token(&mut self, signature: &TypeSignature) -> Result<Token> {
        let blob = self.signature_blob(|writer| writer.write_type(signature))?;
        if let Some(token) = self.type_specs.get(&blob) {
            trace!(name = %signature.full_name(), token = %token, "reused TypeSpec row");
            return Ok(*token);
        }

        let token = self.tables.push(TableId::TypeSpec, vec![blob]);
        self.type_specs.insert(blob, token);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        image::ModuleKind,
        signatures::MethodSignature,
        typesystem::{
            AssemblyVersion, FieldAttributes, FieldReference, MethodAttributes,
            MethodReference, TypeAttributes, TypeReference,
        },
    };

    fn console_reference(module: &ModuleDefinitionRc) -> TypeReferenceRc {
        let corlib = module.corlib_reference().unwrap();
        TypeReference::new(
            module,
            "System",
            "Console",
            TypeReferenceScope::Assembly(corlib),
        )
    }

    #[test]
    fn structurally_equal_references_share_a_row() {
        let module = ModuleDefinition::create("Dedup.dll", ModuleKind::Dll);
        let first = console_reference(&module);
        let second = console_reference(&module);

        let mut builder = MetadataBuilder::new(&module).unwrap();
        let a = builder.type_token(&TypeSignature::reference(&first, false)).unwrap();
        let b = builder.type_token(&TypeSignature::reference(&second, false)).unwrap();
        assert_eq!(a, b);
        assert_eq!(builder.tables.len(TableId::TypeRef), 1);

        let write_line = |reference: &TypeReferenceRc| {
            MethodHandle::Reference(MethodReference::new(
                &module,
                "WriteLine",
                TypeSignature::reference(reference, false),
                MethodSignature::new(TypeSignature::Void, vec![TypeSignature::String]),
            ))
        };
        let a = builder.method_token(&write_line(&first)).unwrap();
        let b = builder.method_token(&write_line(&second)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.table_id(), Some(TableId::MemberRef));
        assert_eq!(builder.tables.len(TableId::MemberRef), 1);
    }

    #[test]
    fn constructed_types_become_type_specs() {
        let module = ModuleDefinition::create("Specs.dll", ModuleKind::Dll);
        let mut builder = MetadataBuilder::new(&module).unwrap();

        let array = TypeSignature::sz_array(TypeSignature::I4);
        let a = builder.type_token(&array).unwrap();
        let b = builder.type_token(&array.clone()).unwrap();
        assert_eq!(a, Token::from_parts(TableId::TypeSpec, 1));
        assert_eq!(a, b);
    }

    #[test]
    fn foreign_members_are_rejected() {
        let other = ModuleDefinition::create("Other.dll", ModuleKind::Dll);
        let foreign = TypeDefinition::new("Other", "Thing", TypeAttributes::PUBLIC, None);
        other.add_type(foreign.clone()).unwrap();
        let foreign_field = FieldDefinition::new("Value", FieldAttributes::PUBLIC, TypeSignature::I4);
        foreign.add_field(foreign_field.clone()).unwrap();

        let module = ModuleDefinition::create("Main.dll", ModuleKind::Dll);
        let mut builder = MetadataBuilder::new(&module).unwrap();

        let result = builder.type_token(&TypeSignature::class(&foreign));
        assert!(matches!(result, Err(Error::ForeignMember(_))));

        let result = builder.field_token(&FieldHandle::definition(&foreign_field));
        assert!(matches!(result, Err(Error::ForeignMember(_))));

        let reference = TypeReference::new(&other, "System", "Object", TypeReferenceScope::None);
        let result = builder.field_token(&FieldHandle::Reference(FieldReference::new(
            &other,
            "Empty",
            TypeSignature::reference(&reference, false),
            TypeSignature::I4,
        )));
        assert!(matches!(result, Err(Error::ForeignMember(_))));
    }

    #[test]
    fn definitions_have_tokens_before_build() {
        let module = ModuleDefinition::create("Tokens.dll", ModuleKind::Dll);
        let class = TypeDefinition::new("Tokens", "C", TypeAttributes::PUBLIC, None);
        module.add_type(class.clone()).unwrap();
        let method = MethodDefinition::new("M", MethodAttributes::PUBLIC, TypeSignature::Void);
        class.add_method(method.clone()).unwrap();

        let mut builder = MetadataBuilder::new(&module).unwrap();
        assert_eq!(
            builder.method_token(&MethodHandle::definition(&method)).unwrap(),
            Token::from_parts(TableId::MethodDef, 1)
        );
        assert_eq!(
            builder.type_token(&TypeSignature::class(&class)).unwrap(),
            Token::from_parts(TableId::TypeDef, 2)
        );
    }

    #[test]
    fn user_strings_are_interned() {
        let module = ModuleDefinition::create("Strings.dll", ModuleKind::Dll);
        let mut builder = MetadataBuilder::new(&module).unwrap();
        let hello = builder.user_string_token("Hello").unwrap();
        assert_eq!(hello, Token::user_string(1));
        assert_eq!(builder.user_string_token("Hello").unwrap(), hello);

        let image = builder.build().unwrap();
        let strings = image.user_strings().unwrap();
        assert_eq!(strings.get(hello.row() as usize).unwrap(), "Hello");
    }

    #[test]
    fn assembly_references_are_written_in_list_order() {
        let module = ModuleDefinition::create_assembly(
            AssemblyNameReference::new("Refs", AssemblyVersion::new(1, 0, 0, 0)),
            "Refs.dll",
            ModuleKind::Dll,
        );
        module
            .add_assembly_reference(AssemblyNameReference::new(
                "First",
                AssemblyVersion::new(1, 0, 0, 0),
            ))
            .unwrap();
        module
            .add_assembly_reference(AssemblyNameReference::new(
                "Second",
                AssemblyVersion::new(2, 0, 0, 0),
            ))
            .unwrap();

        let image = MetadataBuilder::new(&module).unwrap().build().unwrap();
        assert_eq!(image.row_count(TableId::AssemblyRef), 2);
        assert_eq!(image.row_count(TableId::Assembly), 1);
    }
}
