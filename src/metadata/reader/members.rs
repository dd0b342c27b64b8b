//! Fields, methods, parameters, properties, events and member references.

use std::sync::Arc;

use tracing::debug;

use crate::{
    metadata::{
        cache::{add_to_range, Range},
        reader::{GenericContext, MetadataReader},
        signatures::{MethodSignature, TypeHandle, TypeSignature},
        tables::{CodedIndexType, TableId},
        token::Token,
        typesystem::{
            EventDefinition, EventDefinitionRc, FieldDefinition, FieldDefinitionRc,
            FieldReference, GenericInstanceMethod, GenericInstanceMethodRc, MemberReference,
            MethodDefinition, MethodDefinitionRc, MethodHandle, MethodReference,
            MethodSemanticsAttributes, PInvokeAttributes, PInvokeInfo, ParameterDefinition,
            ParameterDefinitionRc, PropertyDefinition, PropertyDefinitionRc, SemanticMethod,
            TypeDefinitionRc,
        },
    },
    Error, Result,
};

/// Generic parameters of the local type a member reference points into, if any.
fn member_context(declaring_type: &TypeSignature) -> GenericContext {
    match declaring_type.handle().and_then(TypeHandle::as_definition) {
        Some(definition) => GenericContext::for_type(&definition),
        None => GenericContext::none(),
    }
}

impl MetadataReader {
    pub(crate) fn read_fields(&self, token: Token) -> Result<Vec<FieldDefinitionRc>> {
        let definition = self.get_type(token.row())?;
        let _guard = self.enter(Some(GenericContext::for_type(&definition)))?;

        let range = self.list_range(
            TableId::TypeDef,
            4,
            token.row(),
            TableId::Field,
            TableId::FieldPtr,
        )?;
        let mut fields = Vec::with_capacity(range.length as usize);
        for logical in range.rows() {
            let rid = self.resolve_pointer(TableId::FieldPtr, logical)?;
            fields.push(self.field_row(rid, &definition)?);
        }

        debug!(owner = %definition.full_name(), fields = fields.len(), "read fields");
        Ok(fields)
    }

    fn field_row(&self, rid: u32, declaring_type: &TypeDefinitionRc) -> Result<FieldDefinitionRc> {
        if let Some(field) = self.cache.fields.get(rid) {
            return Ok(field);
        }

        let row = self.row(TableId::Field, rid)?;
        let name = self.string(row[1])?;
        let field_type = self.read_signature(row[2], |reader| reader.read_field_signature())?;
        let field = FieldDefinition::from_metadata(
            Token::from_parts(TableId::Field, rid),
            name,
            row[0] as u16,
            field_type,
            Arc::downgrade(declaring_type),
            self.module_weak(),
        );
        Ok(self.cache.fields.set(rid, field))
    }

    /// The field of `Field` row `rid`, read through its declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no type lists the row.
    pub fn get_field(&self, rid: u32) -> Result<FieldDefinitionRc> {
        if let Some(field) = self.cache.fields.get(rid) {
            return Ok(field);
        }

        let owner = {
            let _guard = self.enter(None)?;
            let logical = self.logical_row(TableId::FieldPtr, rid)?;
            self.binary_range_search(TableId::TypeDef, 4, logical, TableId::Field, TableId::FieldPtr)?
        };
        let owner = owner.ok_or_else(|| malformed_error!("Field row {} has no declaring type", rid))?;
        self.get_type(owner)?.fields()?;

        self.cache
            .fields
            .get(rid)
            .ok_or_else(|| malformed_error!("Field row {} was not read with its type", rid))
    }

    pub(crate) fn read_methods(&self, token: Token) -> Result<Vec<MethodDefinitionRc>> {
        let definition = self.get_type(token.row())?;
        let _guard = self.enter(Some(GenericContext::for_type(&definition)))?;

        let range = self.list_range(
            TableId::TypeDef,
            5,
            token.row(),
            TableId::MethodDef,
            TableId::MethodPtr,
        )?;
        let mut methods = Vec::with_capacity(range.length as usize);
        for logical in range.rows() {
            let rid = self.resolve_pointer(TableId::MethodPtr, logical)?;
            methods.push(self.method_row(rid, &definition)?);
        }

        debug!(owner = %definition.full_name(), methods = methods.len(), "read methods");
        Ok(methods)
    }

    fn method_row(&self, rid: u32, declaring_type: &TypeDefinitionRc) -> Result<MethodDefinitionRc> {
        if let Some(method) = self.cache.methods.get(rid) {
            return Ok(method);
        }

        let row = self.row(TableId::MethodDef, rid)?;
        let method = MethodDefinition::from_metadata(
            Token::from_parts(TableId::MethodDef, rid),
            self.string(row[3])?,
            row[2] as u16,
            row[1] as u16,
            row[0],
            Arc::downgrade(declaring_type),
            self.module_weak(),
        );

        let signature = {
            let _guard = self.enter(Some(GenericContext::for_method(&method)))?;
            self.read_signature(row[4], |reader| reader.read_method_signature())?
        };
        method.apply_signature(&signature);
        self.read_parameters(rid, &method, &signature)?;

        Ok(self.cache.methods.set(rid, method))
    }

    /// Attach the `Param` rows of method `rid`. Parameters without a row get a nameless one.
    fn read_parameters(
        &self,
        rid: u32,
        method: &MethodDefinitionRc,
        signature: &MethodSignature,
    ) -> Result<()> {
        let range = self.list_range(
            TableId::MethodDef,
            5,
            rid,
            TableId::Param,
            TableId::ParamPtr,
        )?;

        let mut parameters: Vec<Option<ParameterDefinitionRc>> =
            vec![None; signature.parameters.len()];
        let mut return_parameter = None;
        for logical in range.rows() {
            let param_rid = self.resolve_pointer(TableId::ParamPtr, logical)?;
            let row = self.row(TableId::Param, param_rid)?;
            let sequence = row[1] as usize;

            let parameter_type = match sequence {
                0 => signature.return_type.clone(),
                _ => signature
                    .parameters
                    .get(sequence - 1)
                    .cloned()
                    .ok_or_else(|| {
                        malformed_error!(
                            "Param row {} has sequence {} but method row {} takes {} parameters",
                            param_rid,
                            sequence,
                            rid,
                            signature.parameters.len()
                        )
                    })?,
            };

            let parameter = ParameterDefinition::from_metadata(
                Token::from_parts(TableId::Param, param_rid),
                self.string(row[2])?,
                row[0] as u16,
                parameter_type,
                self.module_weak(),
            );
            let parameter = self.cache.parameters.set(param_rid, parameter);
            match sequence {
                0 => return_parameter = Some(parameter),
                _ => parameters[sequence - 1] = Some(parameter),
            }
        }

        for (parameter, parameter_type) in parameters.into_iter().zip(&signature.parameters) {
            let parameter = parameter
                .unwrap_or_else(|| ParameterDefinition::new("", 0, parameter_type.clone()));
            method.add_parameter(parameter);
        }
        if return_parameter.is_some() {
            method.set_return_parameter(return_parameter);
        }
        Ok(())
    }

    /// The method of `MethodDef` row `rid`, read through its declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no type lists the row.
    pub fn get_method(&self, rid: u32) -> Result<MethodDefinitionRc> {
        if let Some(method) = self.cache.methods.get(rid) {
            return Ok(method);
        }

        let owner = {
            let _guard = self.enter(None)?;
            let logical = self.logical_row(TableId::MethodPtr, rid)?;
            self.binary_range_search(
                TableId::TypeDef,
                5,
                logical,
                TableId::MethodDef,
                TableId::MethodPtr,
            )?
        };
        let owner =
            owner.ok_or_else(|| malformed_error!("MethodDef row {} has no declaring type", rid))?;
        self.get_type(owner)?.methods()?;

        self.cache
            .methods
            .get(rid)
            .ok_or_else(|| malformed_error!("MethodDef row {} was not read with its type", rid))
    }

    /// The parameter of `Param` row `rid`, read through its method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no method lists the row.
    pub fn get_parameter(&self, rid: u32) -> Result<ParameterDefinitionRc> {
        if let Some(parameter) = self.cache.parameters.get(rid) {
            return Ok(parameter);
        }

        let owner = {
            let _guard = self.enter(None)?;
            let logical = self.logical_row(TableId::ParamPtr, rid)?;
            self.binary_range_search(TableId::MethodDef, 5, logical, TableId::Param, TableId::ParamPtr)?
        };
        let owner = owner.ok_or_else(|| malformed_error!("Param row {} has no method", rid))?;
        self.get_method(owner)?;

        self.cache
            .parameters
            .get(rid)
            .ok_or_else(|| malformed_error!("Param row {} was not read with its method", rid))
    }

    fn load_property_ranges(&self) -> Result<()> {
        self.cache.property_ranges.ensure(|map| {
            self.scan(TableId::PropertyMap, |rid, row| {
                let range = self.list_range(
                    TableId::PropertyMap,
                    1,
                    rid,
                    TableId::Property,
                    TableId::PropertyPtr,
                )?;
                if range.length > 0 {
                    map.entry(row[0]).or_default().push(range);
                }
                Ok(())
            })
        })
    }

    fn load_event_ranges(&self) -> Result<()> {
        self.cache.event_ranges.ensure(|map| {
            self.scan(TableId::EventMap, |rid, row| {
                let range =
                    self.list_range(TableId::EventMap, 1, rid, TableId::Event, TableId::EventPtr)?;
                if range.length > 0 {
                    map.entry(row[0]).or_default().push(range);
                }
                Ok(())
            })
        })
    }

    pub(crate) fn read_properties(&self, token: Token) -> Result<Vec<PropertyDefinitionRc>> {
        self.load_property_ranges()?;
        let definition = self.get_type(token.row())?;
        let properties = self.cache.property_ranges.consume(&token.row(), |ranges| {
            let _guard = self.enter(Some(GenericContext::for_type(&definition)))?;
            let mut properties = Vec::new();
            for logical in ranges.iter().flat_map(Range::rows) {
                let rid = self.resolve_pointer(TableId::PropertyPtr, logical)?;
                properties.push(self.property_row(rid, &definition)?);
            }
            Ok(properties)
        })?;

        let properties = properties.unwrap_or_default();
        debug!(owner = %definition.full_name(), properties = properties.len(), "read properties");
        Ok(properties)
    }

    fn property_row(
        &self,
        rid: u32,
        declaring_type: &TypeDefinitionRc,
    ) -> Result<PropertyDefinitionRc> {
        if let Some(property) = self.cache.properties.get(rid) {
            return Ok(property);
        }

        let row = self.row(TableId::Property, rid)?;
        let signature = self.read_signature(row[2], |reader| reader.read_property_signature())?;
        let property = PropertyDefinition::from_metadata(
            Token::from_parts(TableId::Property, rid),
            self.string(row[1])?,
            row[0] as u16,
            signature,
            Arc::downgrade(declaring_type),
            self.module_weak(),
        );
        Ok(self.cache.properties.set(rid, property))
    }

    /// The property of `Property` row `rid`, read through its declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no `PropertyMap` row lists the property.
    pub fn get_property(&self, rid: u32) -> Result<PropertyDefinitionRc> {
        if let Some(property) = self.cache.properties.get(rid) {
            return Ok(property);
        }

        let parent = {
            let _guard = self.enter(None)?;
            let logical = self.logical_row(TableId::PropertyPtr, rid)?;
            match self.binary_range_search(
                TableId::PropertyMap,
                1,
                logical,
                TableId::Property,
                TableId::PropertyPtr,
            )? {
                Some(map_row) => self.row(TableId::PropertyMap, map_row)?[0],
                None => return Err(malformed_error!("Property row {} has no declaring type", rid)),
            }
        };
        self.get_type(parent)?.properties()?;

        self.cache
            .properties
            .get(rid)
            .ok_or_else(|| malformed_error!("Property row {} was not read with its type", rid))
    }

    pub(crate) fn read_events(&self, token: Token) -> Result<Vec<EventDefinitionRc>> {
        self.load_event_ranges()?;
        let definition = self.get_type(token.row())?;
        let events = self.cache.event_ranges.consume(&token.row(), |ranges| {
            let _guard = self.enter(Some(GenericContext::for_type(&definition)))?;
            let mut events = Vec::new();
            for logical in ranges.iter().flat_map(Range::rows) {
                let rid = self.resolve_pointer(TableId::EventPtr, logical)?;
                events.push(self.event_row(rid, &definition)?);
            }
            Ok(events)
        })?;

        let events = events.unwrap_or_default();
        debug!(owner = %definition.full_name(), events = events.len(), "read events");
        Ok(events)
    }

    fn event_row(&self, rid: u32, declaring_type: &TypeDefinitionRc) -> Result<EventDefinitionRc> {
        if let Some(event) = self.cache.events.get(rid) {
            return Ok(event);
        }

        let row = self.row(TableId::Event, rid)?;
        let event_type = self
            .type_signature(self.coded(CodedIndexType::TypeDefOrRef, row[2])?)?
            .ok_or_else(|| malformed_error!("Event row {} has no type", rid))?;
        let event = EventDefinition::from_metadata(
            Token::from_parts(TableId::Event, rid),
            self.string(row[1])?,
            row[0] as u16,
            event_type,
            Arc::downgrade(declaring_type),
            self.module_weak(),
        );
        Ok(self.cache.events.set(rid, event))
    }

    /// The event of `Event` row `rid`, read through its declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no `EventMap` row lists the event.
    pub fn get_event(&self, rid: u32) -> Result<EventDefinitionRc> {
        if let Some(event) = self.cache.events.get(rid) {
            return Ok(event);
        }

        let parent = {
            let _guard = self.enter(None)?;
            let logical = self.logical_row(TableId::EventPtr, rid)?;
            match self.binary_range_search(
                TableId::EventMap,
                1,
                logical,
                TableId::Event,
                TableId::EventPtr,
            )? {
                Some(map_row) => self.row(TableId::EventMap, map_row)?[0],
                None => return Err(malformed_error!("Event row {} has no declaring type", rid)),
            }
        };
        self.get_type(parent)?.events()?;

        self.cache
            .events
            .get(rid)
            .ok_or_else(|| malformed_error!("Event row {} was not read with its type", rid))
    }

    /// The field or method reference of `MemberRef` row `rid`.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for members of a `ModuleRef` or vararg `MethodDef`
    /// parent, and [`crate::Error::Malformed`] for undecodable rows.
    pub fn get_member_reference(&self, rid: u32) -> Result<MemberReference> {
        if let Some(reference) = self.cache.member_references.get(rid) {
            return Ok(reference);
        }

        let _guard = self.enter(Some(GenericContext::none()))?;
        let row = self.row(TableId::MemberRef, rid)?;
        let parent = self.coded(CodedIndexType::MemberRefParent, row[0])?;
        let declaring_type = match parent.table_id() {
            Some(TableId::TypeDef) => TypeSignature::class(&self.get_type(parent.row())?),
            Some(TableId::TypeRef) => {
                TypeSignature::reference(&self.get_type_reference(parent.row())?, false)
            }
            Some(TableId::TypeSpec) => self.get_type_spec(parent.row())?,
            Some(TableId::ModuleRef | TableId::MethodDef) => {
                return Err(Error::NotSupported(format!(
                    "MemberRef row {rid} is declared by {parent}"
                )))
            }
            _ => return Err(malformed_error!("MemberRef row {} has parent {}", rid, parent)),
        };

        let name = self.string(row[1])?;
        let is_field = self.blob(row[2])?.first() == Some(&0x06);
        let token = Token::from_parts(TableId::MemberRef, rid);

        let _context = self.enter(Some(member_context(&declaring_type)))?;
        let reference = if is_field {
            let field_type = self.read_signature(row[2], |reader| reader.read_field_signature())?;
            MemberReference::Field(FieldReference::from_metadata(
                token,
                self.module_weak(),
                name,
                declaring_type,
                field_type,
            ))
        } else {
            let signature = self.read_signature(row[2], |reader| reader.read_method_signature())?;
            MemberReference::Method(MethodReference::from_metadata(
                token,
                self.module_weak(),
                name,
                declaring_type,
                signature,
            ))
        };

        Ok(self.cache.member_references.set(rid, reference))
    }

    /// The generic method instantiation of `MethodSpec` row `rid`.
    ///
    /// # Errors
    /// Returns an error if the row, its method or its blob can not be decoded.
    pub fn get_method_spec(&self, rid: u32) -> Result<GenericInstanceMethodRc> {
        if let Some(instance) = self.cache.method_specs.get(rid) {
            return Ok(instance);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::MethodSpec, rid)?;
        let method = self.method_handle_for(self.coded(CodedIndexType::MethodDefOrRef, row[0])?)?;
        let arguments = self.read_signature(row[1], |reader| reader.read_method_spec())?;

        let instance = GenericInstanceMethod::from_metadata(
            Token::from_parts(TableId::MethodSpec, rid),
            self.module_weak(),
            method,
            arguments,
        );
        if instance
            .arguments
            .iter()
            .any(TypeSignature::contains_generic_parameter)
        {
            return Ok(instance);
        }
        Ok(self.cache.method_specs.set(rid, instance))
    }

    /// The method named by a `MethodDef`, `MemberRef` or `MethodSpec` token.
    pub(crate) fn method_handle_for(&self, token: Token) -> Result<MethodHandle> {
        match token.table_id() {
            Some(TableId::MethodDef) if !token.is_null() => {
                Ok(MethodHandle::definition(&self.get_method(token.row())?))
            }
            Some(TableId::MemberRef) if !token.is_null() => {
                match self.get_member_reference(token.row())? {
                    MemberReference::Method(method) => Ok(MethodHandle::Reference(method)),
                    MemberReference::Field(_) => {
                        Err(malformed_error!("{} names a field, not a method", token))
                    }
                }
            }
            Some(TableId::MethodSpec) if !token.is_null() => {
                Ok(MethodHandle::Instance(self.get_method_spec(token.row())?))
            }
            _ => Err(malformed_error!("Token {} can not name a method", token)),
        }
    }

    /// Declarations overridden by the `MethodDef` `token`, from the `MethodImpl` table.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] if any `MethodImpl` row of the module has a body that is
    /// not a `MethodDef` of this module.
    pub(crate) fn read_overrides(&self, token: Token) -> Result<Vec<MethodHandle>> {
        self.cache.overrides.ensure(|map| {
            self.scan(TableId::MethodImpl, |rid, row| {
                let body = self.coded(CodedIndexType::MethodDefOrRef, row[1])?;
                if body.table_id() != Some(TableId::MethodDef) {
                    return Err(Error::NotSupported(format!(
                        "MethodImpl row {rid} has body {body}, which is not a MethodDef"
                    )));
                }
                add_to_range(map, body.row(), rid);
                Ok(())
            })
        })?;

        let method = self.get_method(token.row())?;
        let overrides = self.cache.overrides.consume(&token.row(), |ranges| {
            let _guard = self.enter(Some(GenericContext::for_method(&method)))?;
            let mut overrides = Vec::new();
            for rid in ranges.iter().flat_map(Range::rows) {
                let row = self.row(TableId::MethodImpl, rid)?;
                let declaration = self.coded(CodedIndexType::MethodDefOrRef, row[2])?;
                overrides.push(self.method_handle_for(declaration)?);
            }
            Ok(overrides)
        })?;
        Ok(overrides.unwrap_or_default())
    }

    pub(crate) fn read_pinvoke(&self, token: Token) -> Result<Option<PInvokeInfo>> {
        self.cache.pinvokes.ensure(|map| {
            self.scan(TableId::ImplMap, |rid, row| {
                let forwarded = self.coded(CodedIndexType::MemberForwarded, row[1])?;
                if forwarded.table_id() == Some(TableId::MethodDef) {
                    map.insert(forwarded.row(), rid);
                }
                Ok(())
            })
        })?;
        self.cache.pinvokes.consume(&token.row(), |rid| {
            let _guard = self.enter(None)?;
            let row = self.row(TableId::ImplMap, rid)?;
            Ok(PInvokeInfo {
                flags: PInvokeAttributes::from_bits_retain(row[0] as u16),
                entry_point: self.string(row[2])?,
                module: self.get_module_reference(row[3])?,
            })
        })
    }

    pub(crate) fn read_semantics(&self, token: Token) -> Result<MethodSemanticsAttributes> {
        self.cache.method_semantics.ensure(|map| {
            self.scan(TableId::MethodSemantics, |_, row| {
                *map.entry(row[1]).or_default() |= row[0] as u16;
                Ok(())
            })
        })?;

        let semantics = self.cache.method_semantics.consume(&token.row(), |bits| {
            Ok(MethodSemanticsAttributes::from_bits_retain(bits))
        })?;
        Ok(semantics.unwrap_or_default())
    }

    /// Accessor methods of a property or event.
    pub(crate) fn read_accessors(&self, token: Token) -> Result<Vec<SemanticMethod>> {
        self.cache.semantics.ensure(|map| {
            self.scan(TableId::MethodSemantics, |rid, row| {
                let association = self.coded(CodedIndexType::HasSemantics, row[2])?;
                add_to_range(map, association, rid);
                Ok(())
            })
        })?;
        let accessors = self.cache.semantics.consume(&token, |ranges| {
            let _guard = self.enter(None)?;
            let mut accessors = Vec::new();
            for rid in ranges.iter().flat_map(Range::rows) {
                let row = self.row(TableId::MethodSemantics, rid)?;
                accessors.push(SemanticMethod {
                    semantics: MethodSemanticsAttributes::from_bits_retain(row[0] as u16),
                    method: self.get_method(row[1])?,
                });
            }
            Ok(accessors)
        })?;
        Ok(accessors.unwrap_or_default())
    }

    pub(crate) fn read_entry_point(&self, token: Token) -> Result<Option<MethodDefinitionRc>> {
        match token.table_id() {
            Some(TableId::MethodDef) if !token.is_null() => Ok(Some(self.get_method(token.row())?)),
            _ => Ok(None),
        }
    }
}
