//! ECMA-335 metadata: streams, tables, signatures and the entity graph built on them.
//!
//! Reading goes bottom up. [`image::MetadataImage`] holds the raw streams and the table
//! layout, [`streams`] decodes the heaps, [`tables`] describes rows and coded indices, and
//! [`reader`] turns rows into [`typesystem`] entities on first access. Writing goes the
//! other way through [`builder`], which assigns tokens, interns heap content and
//! serializes a fresh image.
//!
//! # Key Components
//!
//! - [`image`] - stream bytes, header values and table offsets
//! - [`streams`] - `#Strings`, `#Blob`, `#GUID` and `#US` heaps
//! - [`tables`] - table ids, column schemas, coded indices and the `#~` header
//! - [`token`] - table/row references
//! - [`signatures`] - type, method, field, property, attribute and marshalling blobs
//! - [`typesystem`] - the lazily populated entity graph rooted at a module
//! - [`reader`] - row decoding into entities
//! - [`builder`] - entity graph serialization
//! - [`importer`] - cross-module reference import
//! - [`resolver`] - reference to definition resolution across assemblies
//!
//! # Examples
//!
//! ```rust
//! use dotmeta::prelude::*;
//!
//! let module = ModuleDefinition::create("Example.dll", ModuleKind::Dll);
//! let image = module.write()?;
//!
//! let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
//! assert_eq!(copy.name, "Example.dll");
//! assert_eq!(copy.types()?[0].name, "<Module>");
//! # Ok::<(), dotmeta::Error>(())
//! ```

/// Serialization of an entity graph into metadata streams
pub mod builder;
/// Token-keyed caches shared by the reader
pub(crate) mod cache;
/// Raw metadata streams and image header values
pub mod image;
/// Importing foreign types and members into a module
pub mod importer;
/// Row decoding into entities
pub(crate) mod reader;
/// Resolution of references to their definitions
pub mod resolver;
/// Signature, attribute, constant and marshalling blobs
pub mod signatures;
/// Metadata heaps
pub mod streams;
/// Metadata tables
pub mod tables;
/// Metadata tokens
pub mod token;
/// The entity graph
pub mod typesystem;
