//! Assembly identity, module references and exported types.

use std::{
    fmt::{self, Write},
    sync::{Arc, Weak},
};

use sha1::{Digest, Sha1};

use crate::{
    metadata::{
        token::Token,
        typesystem::{
            read_with, AssemblyFlags, AssemblyHashAlgorithm, Backlink, Collection,
            CustomAttributeRc, Lazy, ModuleDefinition, ModuleDefinitionRc,
            SecurityDeclarationRc,
        },
    },
    Error, Result,
};

/// A reference to an `AssemblyNameReference`
pub type AssemblyNameReferenceRc = Arc<AssemblyNameReference>;
/// A reference to an `AssemblyDefinition`
pub type AssemblyDefinitionRc = Arc<AssemblyDefinition>;
/// A reference to a `ModuleReference`
pub type ModuleReferenceRc = Arc<ModuleReference>;
/// A reference to an `ExportedType`
pub type ExportedTypeRc = Arc<ExportedType>;

/// A four part assembly version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version from its four parts.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse `major[.minor[.build[.revision]]]`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for more than four parts or non-numeric parts.
    pub fn parse(version: &str) -> Result<Self> {
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() > 4 {
            return Err(Error::InvalidArgument(format!(
                "Invalid version format: {version}"
            )));
        }

        let mut components = [0_u16; 4];
        for (index, part) in parts.iter().enumerate() {
            components[index] = part.trim().parse::<u16>().map_err(|_| {
                Error::InvalidArgument(format!("Invalid version component: {part}"))
            })?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// The identity of an assembly, as stored in an `AssemblyRef` row or the `Assembly` row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssemblyNameReference {
    /// The `AssemblyRef` token, null for names created in memory
    pub token: Token,
    /// Simple name
    pub name: String,
    /// Culture, empty for culture neutral assemblies
    pub culture: String,
    /// Version
    pub version: AssemblyVersion,
    /// `AssemblyFlags`
    pub flags: u32,
    /// The full public key if `AssemblyFlags::PUBLIC_KEY` is set, the token otherwise
    pub public_key_or_token: Vec<u8>,
    /// Hash of the referenced assembly, rarely present
    pub hash_value: Vec<u8>,
    /// Hash algorithm, only meaningful for the `Assembly` row
    pub hash_algorithm: u32,
}

impl AssemblyNameReference {
    /// A culture neutral name without a public key.
    #[must_use]
    pub fn new(name: &str, version: AssemblyVersion) -> Self {
        AssemblyNameReference {
            name: name.to_string(),
            version,
            hash_algorithm: AssemblyHashAlgorithm::NONE,
            ..AssemblyNameReference::default()
        }
    }

    /// Set the public key token.
    #[must_use]
    pub fn with_public_key_token(mut self, token: &[u8]) -> Self {
        self.flags &= !AssemblyFlags::PUBLIC_KEY;
        self.public_key_or_token = token.to_vec();
        self
    }

    /// Set the full public key.
    #[must_use]
    pub fn with_public_key(mut self, key: &[u8]) -> Self {
        self.flags |= AssemblyFlags::PUBLIC_KEY;
        self.public_key_or_token = key.to_vec();
        self
    }

    /// Set the culture.
    #[must_use]
    pub fn with_culture(mut self, culture: &str) -> Self {
        self.culture = culture.to_string();
        self
    }

    /// True if [`AssemblyNameReference::public_key_or_token`] holds a full key.
    #[must_use]
    pub fn has_public_key(&self) -> bool {
        self.flags & AssemblyFlags::PUBLIC_KEY != 0
    }

    /// The public key token: the stored token, or the last 8 bytes of the SHA-1 hash of the
    /// full key in reverse order.
    #[must_use]
    pub fn public_key_token(&self) -> Vec<u8> {
        if !self.has_public_key() || self.public_key_or_token.is_empty() {
            return self.public_key_or_token.clone();
        }

        let mut hasher = Sha1::new();
        hasher.update(&self.public_key_or_token);
        let hash = hasher.finalize();
        hash[hash.len() - 8..].iter().rev().copied().collect()
    }

    /// The display name: `Name, Version=a.b.c.d, Culture=neutral, PublicKeyToken=null`.
    #[must_use]
    pub fn full_name(&self) -> String {
        let mut result = String::with_capacity(self.name.len() + 80);
        result.push_str(&self.name);
        let _ = write!(result, ", Version={}", self.version);

        let culture = if self.culture.is_empty() {
            "neutral"
        } else {
            &self.culture
        };
        let _ = write!(result, ", Culture={culture}");

        result.push_str(", PublicKeyToken=");
        let token = self.public_key_token();
        if token.is_empty() {
            result.push_str("null");
        } else {
            for byte in token {
                let _ = write!(result, "{byte:02x}");
            }
        }

        if self.flags & AssemblyFlags::RETARGETABLE != 0 {
            result.push_str(", Retargetable=Yes");
        }

        result
    }

    /// Parse a display name as produced by [`AssemblyNameReference::full_name`].
    ///
    /// Missing parts keep their defaults; unknown parts are ignored.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty name, a bad version or a
    /// public key token that is not 8 hex encoded bytes.
    pub fn parse(full_name: &str) -> Result<Self> {
        let mut parts = full_name.split(',').map(str::trim);
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "Assembly name cannot be empty".to_string(),
            ));
        }

        let mut result = AssemblyNameReference::new(name, AssemblyVersion::default());
        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };

            match key.trim() {
                "Version" => result.version = AssemblyVersion::parse(value.trim())?,
                "Culture" => {
                    let value = value.trim();
                    if !value.eq_ignore_ascii_case("neutral") {
                        result.culture = value.to_string();
                    }
                }
                "PublicKeyToken" => {
                    let value = value.trim();
                    if !value.eq_ignore_ascii_case("null") && !value.is_empty() {
                        let token = decode_hex(value)?;
                        if token.len() != 8 {
                            return Err(Error::InvalidArgument(format!(
                                "PublicKeyToken must be 8 bytes, got '{value}'"
                            )));
                        }
                        result.public_key_or_token = token;
                    }
                }
                "Retargetable" => {
                    if value.trim().eq_ignore_ascii_case("yes") {
                        result.flags |= AssemblyFlags::RETARGETABLE;
                    }
                }
                _ => {}
            }
        }

        Ok(result)
    }

    /// True if both names denote the same assembly: same name, version, culture and token.
    #[must_use]
    pub fn matches(&self, other: &AssemblyNameReference) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.version == other.version
            && self.culture.eq_ignore_ascii_case(&other.culture)
            && self.public_key_token() == other.public_key_token()
    }
}

impl fmt::Display for AssemblyNameReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    if value.len() % 2 != 0 || !value.is_ascii() {
        return Err(Error::InvalidArgument(format!("Invalid hex string '{value}'")));
    }

    (0..value.len())
        .step_by(2)
        .map(|index| {
            u8::from_str_radix(&value[index..index + 2], 16)
                .map_err(|_| Error::InvalidArgument(format!("Invalid hex string '{value}'")))
        })
        .collect()
}

/// The manifest of the assembly a module belongs to (the `Assembly` row).
pub struct AssemblyDefinition {
    /// The `Assembly` token
    pub token: Token,
    /// Identity of the assembly
    pub name: AssemblyNameReference,
    main_module: Backlink<ModuleDefinition>,
    custom_attributes: Lazy<Collection<CustomAttributeRc>>,
    security_declarations: Lazy<Collection<SecurityDeclarationRc>>,
}

impl AssemblyDefinition {
    /// A manifest created in memory. The main module is set when the assembly is attached
    /// to one.
    #[must_use]
    pub fn new(name: AssemblyNameReference) -> AssemblyDefinitionRc {
        Arc::new(AssemblyDefinition {
            token: Token::new(0),
            name,
            main_module: Backlink::default(),
            custom_attributes: Lazy::ready(Collection::new()),
            security_declarations: Lazy::ready(Collection::new()),
        })
    }

    pub(crate) fn from_metadata(
        token: Token,
        name: AssemblyNameReference,
        module: Weak<ModuleDefinition>,
    ) -> AssemblyDefinitionRc {
        Arc::new(AssemblyDefinition {
            token,
            name,
            main_module: Backlink::new(module),
            custom_attributes: Lazy::new(),
            security_declarations: Lazy::new(),
        })
    }

    /// The module holding the manifest.
    pub fn main_module(&self) -> Option<ModuleDefinitionRc> {
        self.main_module.get()
    }

    pub(crate) fn set_main_module(&self, module: Weak<ModuleDefinition>) {
        self.main_module.set_weak(module);
    }

    /// Custom attributes on the assembly.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn custom_attributes(&self) -> Result<Vec<CustomAttributeRc>> {
        Ok(self
            .custom_attributes
            .load(|| {
                read_with(&self.main_module, |reader| {
                    reader.read_custom_attributes(self.token)
                })
            })?
            .items())
    }

    /// Attach a custom attribute to the assembly.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read attribute rows.
    pub fn add_custom_attribute(&self, attribute: CustomAttributeRc) -> Result<()> {
        self.custom_attributes
            .load(|| {
                read_with(&self.main_module, |reader| {
                    reader.read_custom_attributes(self.token)
                })
            })?
            .push(attribute);
        Ok(())
    }

    /// Declarative security on the assembly.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read `DeclSecurity` rows.
    pub fn security_declarations(&self) -> Result<Vec<SecurityDeclarationRc>> {
        Ok(self
            .security_declarations
            .load(|| {
                read_with(&self.main_module, |reader| {
                    reader.read_security_declarations(self.token)
                })
            })?
            .items())
    }

    /// Attach a security declaration to the assembly.
    ///
    /// # Errors
    /// Propagates decode failures of the lazily read `DeclSecurity` rows.
    pub fn add_security_declaration(&self, declaration: SecurityDeclarationRc) -> Result<()> {
        self.security_declarations
            .load(|| {
                read_with(&self.main_module, |reader| {
                    reader.read_security_declarations(self.token)
                })
            })?
            .push(declaration);
        Ok(())
    }
}

/// A reference to another module of the same assembly, or a native library (`ModuleRef`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    /// The `ModuleRef` token, null for references created in memory
    pub token: Token,
    /// File name of the module
    pub name: String,
}

impl ModuleReference {
    /// A reference to the module or library `name`.
    #[must_use]
    pub fn new(name: &str) -> ModuleReferenceRc {
        Arc::new(ModuleReference {
            token: Token::new(0),
            name: name.to_string(),
        })
    }
}

/// Where an exported type lives (the `Implementation` column).
#[derive(Debug, Clone)]
pub enum ExportedTypeScope {
    /// Another assembly; the row is a type forwarder
    Assembly(AssemblyNameReferenceRc),
    /// Another module of this assembly (a `File` row)
    Module(ModuleReferenceRc),
    /// Nested inside another exported type
    DeclaringType(ExportedTypeRc),
}

/// A type exported by this assembly but defined elsewhere (`ExportedType`).
#[derive(Debug, Clone)]
pub struct ExportedType {
    /// The `ExportedType` token, null for rows created in memory
    pub token: Token,
    /// `TypeAttributes` of the exported type
    pub flags: u32,
    /// Hint: the `TypeDef` row id in the defining module
    pub type_def_id: u32,
    /// Namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Where the type is defined
    pub scope: ExportedTypeScope,
}

impl ExportedType {
    const FORWARDER: u32 = 0x0020_0000;

    /// A new exported type.
    #[must_use]
    pub fn new(namespace: &str, name: &str, flags: u32, scope: ExportedTypeScope) -> ExportedTypeRc {
        Arc::new(ExportedType {
            token: Token::new(0),
            flags,
            type_def_id: 0,
            namespace: namespace.to_string(),
            name: name.to_string(),
            scope,
        })
    }

    /// A type forwarder to `assembly`.
    #[must_use]
    pub fn forwarder(namespace: &str, name: &str, assembly: AssemblyNameReferenceRc) -> ExportedTypeRc {
        Self::new(
            namespace,
            name,
            Self::FORWARDER,
            ExportedTypeScope::Assembly(assembly),
        )
    }

    /// True if the `IsTypeForwarder` bit is set.
    #[must_use]
    pub fn is_forwarder(&self) -> bool {
        self.flags & Self::FORWARDER != 0
    }

    /// Full name, with `/` between nested type names.
    #[must_use]
    pub fn full_name(&self) -> String {
        if let ExportedTypeScope::DeclaringType(declaring) = &self.scope {
            return format!("{}/{}", declaring.full_name(), self.name);
        }

        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// The assembly the type is forwarded to, looking through nesting.
    #[must_use]
    pub fn assembly_name(&self) -> Option<AssemblyNameReferenceRc> {
        match &self.scope {
            ExportedTypeScope::Assembly(assembly) => Some(assembly.clone()),
            ExportedTypeScope::DeclaringType(declaring) => declaring.assembly_name(),
            ExportedTypeScope::Module(_) => None,
        }
    }
}
