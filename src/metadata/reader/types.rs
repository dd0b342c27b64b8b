//! Module, assembly and type level rows.

use std::sync::Arc;

use tracing::debug;

use crate::{
    metadata::{
        cache::add_to_range,
        reader::{GenericContext, MetadataReader},
        signatures::TypeSignature,
        tables::{CodedIndexType, TableId},
        token::Token,
        typesystem::{
            AssemblyDefinition, AssemblyDefinitionRc, AssemblyHashAlgorithm,
            AssemblyNameReference, AssemblyNameReferenceRc, AssemblyVersion, ClassLayout,
            ExportedType, ExportedTypeRc, ExportedTypeScope, GenericOwnerRef, GenericParameter,
            GenericParameterConstraint, GenericParameterConstraintRc, GenericParameterRc,
            InterfaceImplementation, InterfaceImplementationRc, ModuleReference,
            ModuleReferenceRc, TypeDefinition, TypeDefinitionRc, TypeReference, TypeReferenceRc,
            TypeReferenceScope,
        },
    },
    Result,
};

impl MetadataReader {
    /// Name and mvid of the `Module` row.
    pub(crate) fn read_module_header(&self) -> Result<(String, uguid::Guid)> {
        let _guard = self.enter(None)?;
        let row = self.row(TableId::Module, 1)?;
        Ok((self.string(row[1])?, self.guid(row[2])?))
    }

    /// The `Assembly` row, if the module carries a manifest.
    pub(crate) fn read_assembly(&self) -> Result<Option<AssemblyDefinitionRc>> {
        if self.rows(TableId::Assembly) == 0 {
            return Ok(None);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::Assembly, 1)?;
        let token = Token::from_parts(TableId::Assembly, 1);
        let name = AssemblyNameReference {
            token,
            name: self.string(row[7])?,
            culture: self.string(row[8])?,
            version: AssemblyVersion::new(
                row[1] as u16,
                row[2] as u16,
                row[3] as u16,
                row[4] as u16,
            ),
            flags: row[5],
            public_key_or_token: self.blob(row[6])?.to_vec(),
            hash_value: Vec::new(),
            hash_algorithm: row[0],
        };

        Ok(Some(AssemblyDefinition::from_metadata(
            token,
            name,
            self.module_weak(),
        )))
    }

    /// Top-level types in table order; nested types hang off their declaring type.
    pub(crate) fn read_types(&self) -> Result<Vec<TypeDefinitionRc>> {
        let count = self.rows(TableId::TypeDef);
        let mut types = Vec::new();
        for rid in 1..=count {
            let definition = self.get_type(rid)?;
            if definition.declaring_type().is_none() {
                types.push(definition);
            }
        }

        debug!(rows = count, top_level = types.len(), "read types");
        Ok(types)
    }

    /// The type of `TypeDef` row `rid`, wired to its declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist or the nesting is cyclic.
    pub fn get_type(&self, rid: u32) -> Result<TypeDefinitionRc> {
        if let Some(definition) = self.cache.types.get(rid) {
            return Ok(definition);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::TypeDef, rid)?;
        let definition = TypeDefinition::from_metadata(
            Token::from_parts(TableId::TypeDef, rid),
            self.string(row[2])?,
            self.string(row[1])?,
            row[0],
            self.module_weak(),
        );
        // publish first: nested type lookups come back here for the same row
        let definition = self.cache.types.set(rid, definition);

        self.load_nesting()?;
        self.cache.declaring_types.consume(&rid, |enclosing| {
            let declaring = self.get_type(enclosing)?;

            let mut current = Some(declaring.clone());
            while let Some(candidate) = current {
                if Arc::ptr_eq(&candidate, &definition) {
                    return Err(malformed_error!("TypeDef row {} is nested in itself", rid));
                }
                current = candidate.declaring_type();
            }
            definition.set_declaring_type(Arc::downgrade(&declaring));
            Ok(())
        })?;

        Ok(definition)
    }

    fn load_nesting(&self) -> Result<()> {
        self.cache.nested_types.ensure(|map| {
            self.scan(TableId::NestedClass, |_, row| {
                map.entry(row[1]).or_default().push(row[0]);
                Ok(())
            })
        })?;
        self.cache.declaring_types.ensure(|map| {
            self.scan(TableId::NestedClass, |_, row| {
                map.insert(row[0], row[1]);
                Ok(())
            })
        })
    }

    pub(crate) fn read_nested_types(&self, token: Token) -> Result<Vec<TypeDefinitionRc>> {
        self.load_nesting()?;
        let nested = self.cache.nested_types.consume(&token.row(), |nested| {
            nested.into_iter().map(|rid| self.get_type(rid)).collect::<Result<Vec<_>>>()
        })?;
        Ok(nested.unwrap_or_default())
    }

    pub(crate) fn read_base_type(&self, token: Token) -> Result<Option<TypeSignature>> {
        let definition = self.get_type(token.row())?;
        let _guard = self.enter(Some(GenericContext::for_type(&definition)))?;
        let row = self.row(TableId::TypeDef, token.row())?;
        let extends = self.coded(CodedIndexType::TypeDefOrRef, row[3])?;
        self.type_signature(extends)
    }

    pub(crate) fn read_interfaces(&self, token: Token) -> Result<Vec<InterfaceImplementationRc>> {
        self.cache.interfaces.ensure(|map| {
            self.scan(TableId::InterfaceImpl, |rid, row| {
                add_to_range(map, row[0], rid);
                Ok(())
            })
        })?;
        let definition = self.get_type(token.row())?;
        let interfaces = self.cache.interfaces.consume(&token.row(), |ranges| {
            let _guard = self.enter(Some(GenericContext::for_type(&definition)))?;
            let mut interfaces = Vec::new();
            for rid in ranges.iter().flat_map(|range| range.rows()) {
                interfaces.push(self.interface_row(rid)?);
            }
            Ok(interfaces)
        })?;
        Ok(interfaces.unwrap_or_default())
    }

    /// Decode one `InterfaceImpl` row under the current generic context.
    pub(crate) fn interface_row(&self, rid: u32) -> Result<InterfaceImplementationRc> {
        let row = self.row(TableId::InterfaceImpl, rid)?;
        let interface = self
            .type_signature(self.coded(CodedIndexType::TypeDefOrRef, row[1])?)?
            .ok_or_else(|| malformed_error!("InterfaceImpl row {} names no interface", rid))?;

        Ok(InterfaceImplementation::from_metadata(
            Token::from_parts(TableId::InterfaceImpl, rid),
            interface,
            self.module_weak(),
        ))
    }

    pub(crate) fn read_class_layout(&self, token: Token) -> Result<Option<ClassLayout>> {
        self.cache.class_layouts.ensure(|map| {
            self.scan(TableId::ClassLayout, |rid, row| {
                map.insert(row[2], rid);
                Ok(())
            })
        })?;
        self.cache.class_layouts.consume(&token.row(), |rid| {
            let _guard = self.enter(None)?;
            let row = self.row(TableId::ClassLayout, rid)?;
            Ok(ClassLayout {
                packing_size: row[0] as u16,
                class_size: row[1],
            })
        })
    }

    fn load_generic_parameter_ranges(&self) -> Result<()> {
        self.cache.generic_parameter_ranges.ensure(|map| {
            self.scan(TableId::GenericParam, |rid, row| {
                let owner = self.coded(CodedIndexType::TypeOrMethodDef, row[2])?;
                add_to_range(map, owner, rid);
                Ok(())
            })
        })
    }

    /// Generic parameters of a `TypeDef` or `MethodDef`, ordered by position.
    pub(crate) fn read_generic_parameters(&self, owner: Token) -> Result<Vec<GenericParameterRc>> {
        self.load_generic_parameter_ranges()?;
        let parameters = self.cache.generic_parameter_ranges.consume(&owner, |ranges| {
            let owner_ref = match owner.table_id() {
                Some(TableId::TypeDef) => {
                    GenericOwnerRef::Type(Arc::downgrade(&self.get_type(owner.row())?))
                }
                Some(TableId::MethodDef) => {
                    GenericOwnerRef::Method(Arc::downgrade(&self.get_method(owner.row())?))
                }
                _ => return Err(malformed_error!("Token {} can not own generic parameters", owner)),
            };

            let _guard = self.enter(None)?;
            let mut parameters = Vec::new();
            for rid in ranges.iter().flat_map(|range| range.rows()) {
                if let Some(parameter) = self.cache.generic_parameters.get(rid) {
                    parameters.push(parameter);
                    continue;
                }

                let row = self.row(TableId::GenericParam, rid)?;
                let parameter = GenericParameter::from_metadata(
                    Token::from_parts(TableId::GenericParam, rid),
                    self.string(row[3])?,
                    row[0] as u16,
                    row[1] as u16,
                    owner_ref.clone(),
                    self.module_weak(),
                );
                parameters.push(self.cache.generic_parameters.set(rid, parameter));
            }

            parameters.sort_by_key(|parameter| parameter.position);
            Ok(parameters)
        })?;
        Ok(parameters.unwrap_or_default())
    }

    /// The generic parameter of `GenericParam` row `rid`, read through its owner.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row or its owner does not exist.
    pub fn get_generic_parameter(&self, rid: u32) -> Result<GenericParameterRc> {
        if let Some(parameter) = self.cache.generic_parameters.get(rid) {
            return Ok(parameter);
        }

        let owner = {
            let _guard = self.enter(None)?;
            let row = self.row(TableId::GenericParam, rid)?;
            self.coded(CodedIndexType::TypeOrMethodDef, row[2])?
        };
        match owner.table_id() {
            Some(TableId::TypeDef) => self.get_type(owner.row())?.generic_parameters()?,
            Some(TableId::MethodDef) => self.get_method(owner.row())?.generic_parameters()?,
            _ => return Err(malformed_error!("GenericParam row {} has no owner", rid)),
        };

        self.cache
            .generic_parameters
            .get(rid)
            .ok_or_else(|| malformed_error!("GenericParam row {} is not listed by {}", rid, owner))
    }

    pub(crate) fn read_generic_constraints(
        &self,
        token: Token,
    ) -> Result<Vec<GenericParameterConstraintRc>> {
        self.cache.generic_constraints.ensure(|map| {
            self.scan(TableId::GenericParamConstraint, |rid, row| {
                add_to_range(map, row[0], rid);
                Ok(())
            })
        })?;
        let constraints = self.cache.generic_constraints.consume(&token.row(), |ranges| {
            let context = self.constraint_context(token.row())?;
            let _guard = self.enter(Some(context))?;
            ranges
                .iter()
                .flat_map(|range| range.rows())
                .map(|rid| self.constraint_row(rid))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(constraints.unwrap_or_default())
    }

    /// The generic context of the provider owning `GenericParam` row `rid`.
    pub(crate) fn constraint_context(&self, rid: u32) -> Result<GenericContext> {
        let owner = {
            let _guard = self.enter(None)?;
            let row = self.row(TableId::GenericParam, rid)?;
            self.coded(CodedIndexType::TypeOrMethodDef, row[2])?
        };
        self.generic_owner_context(owner)
    }

    /// Decode one `GenericParamConstraint` row under the current generic context.
    pub(crate) fn constraint_row(&self, rid: u32) -> Result<GenericParameterConstraintRc> {
        let row = self.row(TableId::GenericParamConstraint, rid)?;
        let constraint = self
            .type_signature(self.coded(CodedIndexType::TypeDefOrRef, row[1])?)?
            .ok_or_else(|| malformed_error!("GenericParamConstraint row {} is empty", rid))?;

        Ok(GenericParameterConstraint::from_metadata(
            Token::from_parts(TableId::GenericParamConstraint, rid),
            constraint,
            self.module_weak(),
        ))
    }

    /// The reference of `TypeRef` row `rid`.
    ///
    /// # Errors
    /// Returns an error if the row or its resolution scope can not be decoded. A reference
    /// that is its own declaring type ends in [`crate::Error::RecursionLimit`].
    pub fn get_type_reference(&self, rid: u32) -> Result<TypeReferenceRc> {
        if let Some(reference) = self.cache.type_references.get(rid) {
            return Ok(reference);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::TypeRef, rid)?;
        let name = self.string(row[1])?;
        let namespace = self.string(row[2])?;

        let scope_token = self.coded(CodedIndexType::ResolutionScope, row[0])?;
        let scope = if scope_token.is_null() {
            TypeReferenceScope::None
        } else {
            match scope_token.table_id() {
                Some(TableId::Module) => TypeReferenceScope::CurrentModule,
                Some(TableId::ModuleRef) => {
                    TypeReferenceScope::Module(self.get_module_reference(scope_token.row())?)
                }
                Some(TableId::AssemblyRef) => {
                    TypeReferenceScope::Assembly(self.get_assembly_reference(scope_token.row())?)
                }
                Some(TableId::TypeRef) => {
                    TypeReferenceScope::DeclaringType(self.get_type_reference(scope_token.row())?)
                }
                _ => {
                    return Err(malformed_error!(
                        "TypeRef row {} has scope {}",
                        rid,
                        scope_token
                    ))
                }
            }
        };

        let reference = TypeReference::from_metadata(
            Token::from_parts(TableId::TypeRef, rid),
            self.module_weak(),
            namespace,
            name,
            scope,
        );
        Ok(self.cache.type_references.set(rid, reference))
    }

    /// The decoded signature of `TypeSpec` row `rid`.
    ///
    /// Specifications that mention `VAR` or `MVAR` are decoded against the current generic
    /// context every time; all others are decoded once.
    ///
    /// # Errors
    /// Returns an error if the row or its blob can not be decoded.
    pub fn get_type_spec(&self, rid: u32) -> Result<TypeSignature> {
        if let Some(signature) = self.cache.type_specs.get(rid) {
            return Ok(signature);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::TypeSpec, rid)?;
        let signature = self.read_signature(row[0], |reader| reader.read_type())?;
        if signature.contains_generic_parameter() {
            return Ok(signature);
        }
        Ok(self.cache.type_specs.set(rid, signature))
    }

    pub(crate) fn read_assembly_references(&self) -> Result<Vec<AssemblyNameReferenceRc>> {
        (1..=self.rows(TableId::AssemblyRef))
            .map(|rid| self.get_assembly_reference(rid))
            .collect()
    }

    /// The name of `AssemblyRef` row `rid`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist.
    pub fn get_assembly_reference(&self, rid: u32) -> Result<AssemblyNameReferenceRc> {
        if let Some(reference) = self.cache.assembly_references.get(rid) {
            return Ok(reference);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::AssemblyRef, rid)?;
        let reference = Arc::new(AssemblyNameReference {
            token: Token::from_parts(TableId::AssemblyRef, rid),
            name: self.string(row[6])?,
            culture: self.string(row[7])?,
            version: AssemblyVersion::new(
                row[0] as u16,
                row[1] as u16,
                row[2] as u16,
                row[3] as u16,
            ),
            flags: row[4],
            public_key_or_token: self.blob(row[5])?.to_vec(),
            hash_value: self.blob(row[8])?.to_vec(),
            hash_algorithm: AssemblyHashAlgorithm::NONE,
        });
        Ok(self.cache.assembly_references.set(rid, reference))
    }

    pub(crate) fn read_module_references(&self) -> Result<Vec<ModuleReferenceRc>> {
        (1..=self.rows(TableId::ModuleRef))
            .map(|rid| self.get_module_reference(rid))
            .collect()
    }

    /// The reference of `ModuleRef` row `rid`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist.
    pub fn get_module_reference(&self, rid: u32) -> Result<ModuleReferenceRc> {
        if let Some(reference) = self.cache.module_references.get(rid) {
            return Ok(reference);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::ModuleRef, rid)?;
        let reference = Arc::new(ModuleReference {
            token: Token::from_parts(TableId::ModuleRef, rid),
            name: self.string(row[0])?,
        });
        Ok(self.cache.module_references.set(rid, reference))
    }

    pub(crate) fn read_exported_types(&self) -> Result<Vec<ExportedTypeRc>> {
        (1..=self.rows(TableId::ExportedType))
            .map(|rid| self.get_exported_type(rid))
            .collect()
    }

    /// The exported type of `ExportedType` row `rid`.
    ///
    /// `File` implementations are exposed as module references carrying the `File` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not exist or has no implementation.
    pub fn get_exported_type(&self, rid: u32) -> Result<ExportedTypeRc> {
        if let Some(exported) = self.cache.exported_types.get(rid) {
            return Ok(exported);
        }

        let _guard = self.enter(None)?;
        let row = self.row(TableId::ExportedType, rid)?;
        let implementation = self.coded(CodedIndexType::Implementation, row[4])?;
        let scope = if implementation.is_null() {
            return Err(malformed_error!(
                "ExportedType row {} has no implementation",
                rid
            ));
        } else {
            match implementation.table_id() {
                Some(TableId::File) => {
                    let file = self.row(TableId::File, implementation.row())?;
                    ExportedTypeScope::Module(Arc::new(ModuleReference {
                        token: implementation,
                        name: self.string(file[1])?,
                    }))
                }
                Some(TableId::AssemblyRef) => ExportedTypeScope::Assembly(
                    self.get_assembly_reference(implementation.row())?,
                ),
                Some(TableId::ExportedType) => ExportedTypeScope::DeclaringType(
                    self.get_exported_type(implementation.row())?,
                ),
                _ => {
                    return Err(malformed_error!(
                        "ExportedType row {} is implemented by {}",
                        rid,
                        implementation
                    ))
                }
            }
        };

        let exported = Arc::new(ExportedType {
            token: Token::from_parts(TableId::ExportedType, rid),
            flags: row[0],
            type_def_id: row[1],
            namespace: self.string(row[3])?,
            name: self.string(row[2])?,
            scope,
        });
        Ok(self.cache.exported_types.set(rid, exported))
    }
}
