use std::{
    fmt,
    sync::{Arc, Weak},
};

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::{
    metadata::{
        builder::MetadataBuilder,
        image::{ImageInfo, MetadataImage, ModuleKind},
        importer::{ImportGenericContext, MetadataImporter},
        reader::MetadataReader,
        resolver::{AssemblyResolver, MetadataResolver},
        signatures::TypeSignature,
        tables::TableId,
        token::Token,
        typesystem::{
            attributes::CORLIB_NAMES, read_with, AssemblyDefinition, AssemblyDefinitionRc,
            AssemblyNameReference, AssemblyNameReferenceRc, AssemblyVersion, Backlink,
            Collection, CustomAttributeRc, EventDefinitionRc, ExportedTypeRc, FieldDefinitionRc,
            FieldHandle, GenericInstanceMethodRc, GenericParameterConstraintRc,
            GenericParameterRc, InterfaceImplementationRc, Lazy, MemberReference,
            MethodDefinitionRc, MethodHandle, ModuleReference, ModuleReferenceRc,
            ParameterDefinitionRc, PropertyDefinitionRc, SecurityDeclarationRc, Slot,
            TypeDefinition, TypeDefinitionRc, TypeReferenceRc,
        },
    },
    Error, Result,
};

/// A reference to a `ModuleDefinition`
pub type ModuleDefinitionRc = Arc<ModuleDefinition>;

/// How much of the metadata is decoded when a module is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingMode {
    /// Collections are decoded on first access
    #[default]
    Deferred,
    /// Every collection of the whole graph is decoded right after load
    Immediate,
}

/// Options for [`ModuleDefinition::read`].
#[derive(Clone, Default)]
pub struct ReaderParameters {
    /// Deferred or immediate decoding
    pub reading_mode: ReadingMode,
    /// Finds referenced assemblies when references are resolved
    pub assembly_resolver: Option<Arc<dyn AssemblyResolver>>,
}

impl ReaderParameters {
    /// Default parameters: deferred reading, no assembly resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reading mode.
    #[must_use]
    pub fn with_reading_mode(mut self, reading_mode: ReadingMode) -> Self {
        self.reading_mode = reading_mode;
        self
    }

    /// Set the assembly resolver.
    #[must_use]
    pub fn with_assembly_resolver(mut self, resolver: Arc<dyn AssemblyResolver>) -> Self {
        self.assembly_resolver = Some(resolver);
        self
    }
}

impl fmt::Debug for ReaderParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderParameters")
            .field("reading_mode", &self.reading_mode)
            .field("assembly_resolver", &self.assembly_resolver.is_some())
            .finish()
    }
}

/// Whatever a token can name.
#[derive(Clone)]
pub enum MetadataEntity {
    /// The `Module` row
    Module(ModuleDefinitionRc),
    /// A `TypeRef` row
    TypeReference(TypeReferenceRc),
    /// A `TypeDef` row
    Type(TypeDefinitionRc),
    /// A `Field` row
    Field(FieldDefinitionRc),
    /// A `MethodDef` row
    Method(MethodDefinitionRc),
    /// A `Param` row
    Parameter(ParameterDefinitionRc),
    /// An `InterfaceImpl` row
    InterfaceImplementation(InterfaceImplementationRc),
    /// A `MemberRef` row
    MemberReference(MemberReference),
    /// A `CustomAttribute` row
    CustomAttribute(CustomAttributeRc),
    /// A `DeclSecurity` row
    SecurityDeclaration(SecurityDeclarationRc),
    /// An `Event` row
    Event(EventDefinitionRc),
    /// A `Property` row
    Property(PropertyDefinitionRc),
    /// A `ModuleRef` row
    ModuleReference(ModuleReferenceRc),
    /// A `TypeSpec` row, decoded
    TypeSpecification(TypeSignature),
    /// The `Assembly` row
    Assembly(AssemblyDefinitionRc),
    /// An `AssemblyRef` row
    AssemblyReference(AssemblyNameReferenceRc),
    /// An `ExportedType` row
    ExportedType(ExportedTypeRc),
    /// A `GenericParam` row
    GenericParameter(GenericParameterRc),
    /// A `MethodSpec` row
    MethodSpecification(GenericInstanceMethodRc),
    /// A `GenericParamConstraint` row
    GenericParameterConstraint(GenericParameterConstraintRc),
    /// A `#US` heap entry
    UserString(String),
}

impl fmt::Debug for MetadataEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataEntity::Module(module) => write!(f, "Module({})", module.name),
            MetadataEntity::TypeReference(reference) => write!(f, "{reference:?}"),
            MetadataEntity::Type(definition) => write!(f, "{definition:?}"),
            MetadataEntity::Field(field) => write!(f, "{field:?}"),
            MetadataEntity::Method(method) => write!(f, "{method:?}"),
            MetadataEntity::Parameter(parameter) => write!(f, "{parameter:?}"),
            MetadataEntity::InterfaceImplementation(interface) => write!(f, "{interface:?}"),
            MetadataEntity::MemberReference(member) => write!(f, "{member:?}"),
            MetadataEntity::CustomAttribute(attribute) => write!(f, "{attribute:?}"),
            MetadataEntity::SecurityDeclaration(declaration) => write!(f, "{declaration:?}"),
            MetadataEntity::Event(event) => write!(f, "{event:?}"),
            MetadataEntity::Property(property) => write!(f, "{property:?}"),
            MetadataEntity::ModuleReference(module) => write!(f, "{module:?}"),
            MetadataEntity::TypeSpecification(signature) => write!(f, "TypeSpec({signature})"),
            MetadataEntity::Assembly(assembly) => write!(f, "Assembly({})", assembly.name),
            MetadataEntity::AssemblyReference(name) => write!(f, "AssemblyRef({name})"),
            MetadataEntity::ExportedType(exported) => write!(f, "{exported:?}"),
            MetadataEntity::GenericParameter(parameter) => write!(f, "{parameter:?}"),
            MetadataEntity::MethodSpecification(instance) => {
                write!(f, "MethodSpec({:?})", instance.method)
            }
            MetadataEntity::GenericParameterConstraint(constraint) => {
                write!(f, "Constraint({})", constraint.constraint_type)
            }
            MetadataEntity::UserString(value) => write!(f, "UserString({value:?})"),
        }
    }
}

/// The root of a module's entity graph.
///
/// A module is either created empty with [`ModuleDefinition::create`], or read from a
/// [`MetadataImage`] with [`ModuleDefinition::read`]. Both can be mutated and written back
/// with [`ModuleDefinition::write`].
pub struct ModuleDefinition {
    /// Module name, e.g. `Example.dll`
    pub name: String,
    /// Module version id
    pub mvid: uguid::Guid,
    info: ImageInfo,
    this: Weak<ModuleDefinition>,
    reader: Option<Arc<MetadataReader>>,
    resolver: MetadataResolver,
    assembly: Lazy<Slot<Option<AssemblyDefinitionRc>>>,
    types: Lazy<Collection<TypeDefinitionRc>>,
    assembly_references: Lazy<Collection<AssemblyNameReferenceRc>>,
    module_references: Lazy<Collection<ModuleReferenceRc>>,
    exported_types: Lazy<Collection<ExportedTypeRc>>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
    entry_point: Lazy<Slot<Option<MethodDefinitionRc>>>,
    own_link: Backlink<ModuleDefinition>,
}

impl ModuleDefinition {
    /// An empty module holding only the `<Module>` type.
    #[must_use]
    pub fn create(name: &str, kind: ModuleKind) -> ModuleDefinitionRc {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        let hash = hasher.finalize();
        let mut mvid = [0_u8; 16];
        mvid.copy_from_slice(&hash[..16]);

        let module = Arc::new_cyclic(|this: &Weak<ModuleDefinition>| ModuleDefinition {
            name: name.to_string(),
            mvid: uguid::Guid::from_bytes(mvid),
            info: ImageInfo {
                kind,
                ..ImageInfo::default()
            },
            this: this.clone(),
            reader: None,
            resolver: MetadataResolver::new(None),
            assembly: Lazy::ready(Slot::new(None)),
            types: Lazy::ready(Collection::new()),
            assembly_references: Lazy::ready(Collection::new()),
            module_references: Lazy::ready(Collection::new()),
            exported_types: Lazy::ready(Collection::new()),
            custom_attributes: Lazy::ready(Collection::new()),
            entry_point: Lazy::ready(Slot::new(None)),
            own_link: Backlink::new(this.clone()),
        });

        let global = TypeDefinition::new("", "<Module>", 0, None);
        global.set_module(Arc::downgrade(&module));
        if let Some(types) = module.types.get() {
            types.push(global);
        }

        module
    }

    /// A module that is the main module of a new assembly.
    #[must_use]
    pub fn create_assembly(
        name: AssemblyNameReference,
        module_name: &str,
        kind: ModuleKind,
    ) -> ModuleDefinitionRc {
        let module = Self::create(module_name, kind);
        let assembly = AssemblyDefinition::new(name);
        assembly.set_main_module(Arc::downgrade(&module));
        if let Some(slot) = module.assembly.get() {
            slot.set(Some(assembly));
        }
        module
    }

    /// Read a module from its metadata streams.
    ///
    /// # Errors
    /// Returns an error if the `Module` row is missing or malformed. With
    /// [`ReadingMode::Immediate`] any decode failure in the whole graph is returned here.
    pub fn read(image: MetadataImage, parameters: ReaderParameters) -> Result<ModuleDefinitionRc> {
        let info = image.info().clone();
        let reader = Arc::new(MetadataReader::new(image)?);
        let (name, mvid) = reader.read_module_header()?;

        let module = Arc::new_cyclic(|this: &Weak<ModuleDefinition>| {
            reader.set_module(this.clone());
            ModuleDefinition {
                name,
                mvid,
                info,
                this: this.clone(),
                reader: Some(reader),
                resolver: MetadataResolver::new(parameters.assembly_resolver.clone()),
                assembly: Lazy::new(),
                types: Lazy::new(),
                assembly_references: Lazy::new(),
                module_references: Lazy::new(),
                exported_types: Lazy::new(),
                custom_attributes: Lazy::new(),
                entry_point: Lazy::new(),
                own_link: Backlink::new(this.clone()),
            }
        });

        debug!(module = %module.name, mode = ?parameters.reading_mode, "read module");

        if parameters.reading_mode == ReadingMode::Immediate {
            module.load_all()?;
        }
        Ok(module)
    }

    /// Serialize the current graph into metadata streams.
    ///
    /// # Errors
    /// Returns [`Error::ForeignMember`] if a signature or attribute points at a definition of
    /// another module, and propagates decode failures of collections read on the way.
    pub fn write(&self) -> Result<MetadataImage> {
        MetadataBuilder::new(self)?.build()
    }

    /// The strong reference to this module.
    pub(crate) fn this(&self) -> Result<ModuleDefinitionRc> {
        self.this
            .upgrade()
            .ok_or_else(|| Error::InvalidArgument("module is being dropped".to_string()))
    }

    pub(crate) fn reader(&self) -> Option<&MetadataReader> {
        self.reader.as_deref()
    }

    /// The resolver used by the `resolve` methods of references in this module.
    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    /// Values carried through from the PE layer.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Module kind.
    pub fn kind(&self) -> ModuleKind {
        self.info.kind
    }

    /// The assembly manifest, if this is the main module of an assembly.
    ///
    /// # Errors
    /// Propagates decode failures of the `Assembly` row.
    pub fn assembly(&self) -> Result<Option<AssemblyDefinitionRc>> {
        self.assembly
            .load_value(|| read_with(&self.own_link, MetadataReader::read_assembly))
    }

    /// Attach or remove the assembly manifest.
    ///
    /// # Errors
    /// Propagates decode failures of the `Assembly` row.
    pub fn set_assembly(&self, assembly: Option<AssemblyDefinitionRc>) -> Result<()> {
        if let Some(assembly) = &assembly {
            assembly.set_main_module(self.this.clone());
        }
        self.assembly.store(
            || read_with(&self.own_link, MetadataReader::read_assembly),
            assembly,
        )
    }

    fn type_list(&self) -> Result<&Collection<TypeDefinitionRc>> {
        self.types
            .load(|| read_with(&self.own_link, MetadataReader::read_types))
    }

    /// Top-level types, `<Module>` first.
    ///
    /// # Errors
    /// Propagates decode failures of the `TypeDef` rows.
    pub fn types(&self) -> Result<Vec<TypeDefinitionRc>> {
        Ok(self.type_list()?.items())
    }

    /// All types, nested types following their declaring type.
    ///
    /// # Errors
    /// Propagates decode failures of the `TypeDef` and `NestedClass` rows.
    pub fn get_types(&self) -> Result<Vec<TypeDefinitionRc>> {
        fn collect(types: Vec<TypeDefinitionRc>, out: &mut Vec<TypeDefinitionRc>) -> Result<()> {
            for definition in types {
                let nested = definition.nested_types()?;
                out.push(definition);
                collect(nested, out)?;
            }
            Ok(())
        }

        let mut all = Vec::new();
        collect(self.types()?, &mut all)?;
        Ok(all)
    }

    /// Find a type by full name; nested types are separated by `/`.
    ///
    /// # Errors
    /// Propagates decode failures of the `TypeDef` and `NestedClass` rows.
    pub fn get_type(&self, full_name: &str) -> Result<Option<TypeDefinitionRc>> {
        let mut parts = full_name.split('/');
        let outer = parts.next().unwrap_or_default();
        let Some(mut current) = self
            .types()?
            .into_iter()
            .find(|definition| definition.full_name() == outer)
        else {
            return Ok(None);
        };

        for nested in parts {
            match current
                .nested_types()?
                .into_iter()
                .find(|definition| definition.name == nested)
            {
                Some(found) => current = found,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Add a top-level type.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for nested types and types already in the module.
    pub fn add_type(&self, definition: TypeDefinitionRc) -> Result<()> {
        let types = self.type_list()?;
        if definition.declaring_type().is_some() || types.contains_item(&definition) {
            return Err(Error::InvalidArgument(format!(
                "type '{}' can not be added to the module",
                definition.full_name()
            )));
        }

        definition.set_module(self.this.clone());
        types.push(definition);
        Ok(())
    }

    /// Remove a top-level type. Returns false if it is not a top-level type of this module.
    ///
    /// # Errors
    /// Propagates decode failures of the `TypeDef` rows.
    pub fn remove_type(&self, definition: &TypeDefinitionRc) -> Result<bool> {
        Ok(self.type_list()?.remove_item(definition))
    }

    fn assembly_reference_list(&self) -> Result<&Collection<AssemblyNameReferenceRc>> {
        self.assembly_references
            .load(|| read_with(&self.own_link, MetadataReader::read_assembly_references))
    }

    /// Referenced assemblies.
    ///
    /// # Errors
    /// Propagates decode failures of the `AssemblyRef` rows.
    pub fn assembly_references(&self) -> Result<Vec<AssemblyNameReferenceRc>> {
        Ok(self.assembly_reference_list()?.items())
    }

    /// Add an assembly reference.
    ///
    /// # Errors
    /// Propagates decode failures of the `AssemblyRef` rows.
    pub fn add_assembly_reference(&self, name: AssemblyNameReference) -> Result<AssemblyNameReferenceRc> {
        let reference = Arc::new(name);
        self.assembly_reference_list()?.push(reference.clone());
        Ok(reference)
    }

    /// The existing reference with the same full name, or a new one.
    ///
    /// # Errors
    /// Propagates decode failures of the `AssemblyRef` rows.
    pub fn find_or_add_assembly_reference(
        &self,
        name: AssemblyNameReference,
    ) -> Result<AssemblyNameReferenceRc> {
        let full_name = name.full_name();
        let existing = self
            .assembly_references()?
            .into_iter()
            .find(|reference| reference.full_name() == full_name);

        match existing {
            Some(existing) => Ok(existing),
            None => self.add_assembly_reference(name),
        }
    }

    /// The reference to the core library, added as `mscorlib 4.0.0.0` if there is none.
    ///
    /// # Errors
    /// Propagates decode failures of the `AssemblyRef` rows.
    pub fn corlib_reference(&self) -> Result<AssemblyNameReferenceRc> {
        let existing = self
            .assembly_references()?
            .into_iter()
            .find(|reference| CORLIB_NAMES.contains(&reference.name.as_str()));
        if let Some(existing) = existing {
            return Ok(existing);
        }

        self.add_assembly_reference(
            AssemblyNameReference::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0))
                .with_public_key_token(&[0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]),
        )
    }

    fn module_reference_list(&self) -> Result<&Collection<ModuleReferenceRc>> {
        self.module_references
            .load(|| read_with(&self.own_link, MetadataReader::read_module_references))
    }

    /// Referenced modules and native libraries.
    ///
    /// # Errors
    /// Propagates decode failures of the `ModuleRef` rows.
    pub fn module_references(&self) -> Result<Vec<ModuleReferenceRc>> {
        Ok(self.module_reference_list()?.items())
    }

    /// The existing module reference called `name`, or a new one.
    ///
    /// # Errors
    /// Propagates decode failures of the `ModuleRef` rows.
    pub fn find_or_add_module_reference(&self, name: &str) -> Result<ModuleReferenceRc> {
        let list = self.module_reference_list()?;
        if let Some(existing) = list.items().into_iter().find(|module| module.name == name) {
            return Ok(existing);
        }

        let reference = ModuleReference::new(name);
        list.push(reference.clone());
        Ok(reference)
    }

    fn exported_type_list(&self) -> Result<&Collection<ExportedTypeRc>> {
        self.exported_types
            .load(|| read_with(&self.own_link, MetadataReader::read_exported_types))
    }

    /// Types exported or forwarded by this assembly.
    ///
    /// # Errors
    /// Propagates decode failures of the `ExportedType` rows.
    pub fn exported_types(&self) -> Result<Vec<ExportedTypeRc>> {
        Ok(self.exported_type_list()?.items())
    }

    /// Add an exported type.
    ///
    /// # Errors
    /// Propagates decode failures of the `ExportedType` rows.
    pub fn add_exported_type(&self, exported: ExportedTypeRc) -> Result<()> {
        self.exported_type_list()?.push(exported);
        Ok(())
    }

    /// Custom attributes on the module.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn custom_attributes(&self) -> Result<Vec<CustomAttributeRc>> {
        Ok(self
            .custom_attributes
            .load(|| {
                read_with(&self.own_link, |reader| {
                    reader.read_custom_attributes(Token::from_parts(TableId::Module, 1))
                })
            })?
            .items())
    }

    /// Attach a custom attribute to the module.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn add_custom_attribute(&self, attribute: CustomAttributeRc) -> Result<()> {
        self.custom_attributes
            .load(|| {
                read_with(&self.own_link, |reader| {
                    reader.read_custom_attributes(Token::from_parts(TableId::Module, 1))
                })
            })?
            .push(attribute);
        Ok(())
    }

    /// The method the runtime starts with.
    ///
    /// # Errors
    /// Propagates decode failures of the entry point row.
    pub fn entry_point(&self) -> Result<Option<MethodDefinitionRc>> {
        let token = self.info.entry_point;
        self.entry_point
            .load_value(|| read_with(&self.own_link, |reader| reader.read_entry_point(token)))
    }

    /// Set or clear the entry point.
    ///
    /// # Errors
    /// Propagates decode failures of the entry point row.
    pub fn set_entry_point(&self, method: Option<MethodDefinitionRc>) -> Result<()> {
        let token = self.info.entry_point;
        self.entry_point.store(
            || read_with(&self.own_link, |reader| reader.read_entry_point(token)),
            method,
        )
    }

    /// The entity named by `token`.
    ///
    /// Modules created in memory have no rows; only the module token resolves for them.
    ///
    /// # Errors
    /// Returns an error if the row exists but can not be decoded.
    pub fn lookup_token(&self, token: Token) -> Result<Option<MetadataEntity>> {
        if token == Token::from_parts(TableId::Module, 1) {
            return Ok(Some(MetadataEntity::Module(self.this()?)));
        }

        match self.reader() {
            Some(reader) => reader.lookup_token(token),
            None => Ok(None),
        }
    }

    /// Import a type from another module, producing references owned by this one.
    ///
    /// # Errors
    /// See [`MetadataImporter::import_type`].
    pub fn import_type(&self, signature: &TypeSignature) -> Result<TypeSignature> {
        MetadataImporter::new(&self.this()?).import_type(signature, &mut ImportGenericContext::new())
    }

    /// Import a method from another module.
    ///
    /// # Errors
    /// See [`MetadataImporter::import_method`].
    pub fn import_method(&self, method: &MethodHandle) -> Result<MethodHandle> {
        MetadataImporter::new(&self.this()?).import_method(method, &mut ImportGenericContext::new())
    }

    /// Import a field from another module.
    ///
    /// # Errors
    /// See [`MetadataImporter::import_field`].
    pub fn import_field(&self, field: &FieldHandle) -> Result<FieldHandle> {
        MetadataImporter::new(&self.this()?).import_field(field, &mut ImportGenericContext::new())
    }

    /// Decode every lazy collection reachable from the module.
    pub(crate) fn load_all(&self) -> Result<()> {
        if let Some(assembly) = self.assembly()? {
            assembly.custom_attributes()?;
            assembly.security_declarations()?;
        }
        self.assembly_references()?;
        self.module_references()?;
        self.exported_types()?;
        self.custom_attributes()?;
        self.entry_point()?;

        let types = self.types()?;
        debug!(module = %self.name, types = types.len(), "loading the whole module");
        for definition in types {
            definition.load_all()?;
        }
        Ok(())
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("mvid", &self.mvid)
            .field("kind", &self.info.kind)
            .field("read", &self.reader.is_some())
            .finish()
    }
}
