// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # dotmeta
//!
//! Reading, editing and re-emitting the ECMA-335 metadata of .NET modules.
//!
//! `dotmeta` works on the metadata streams of a module (`#~`, `#Strings`, `#Blob`, `#GUID`
//! and `#US`) and exposes them as a graph of definitions and references: types, fields,
//! methods, properties, events, generic parameters, custom attributes and so on. The graph
//! is populated lazily from the tables on first access, can be edited in memory, and is
//! serialized back into a fresh set of streams with all tokens reassigned.
//!
//! Locating the metadata inside a PE file and laying it back out is left to the caller:
//! [`metadata::image::MetadataStreams`] is the hand-over point. Method bodies are carried
//! through by RVA only.
//!
//! ## Features
//!
//! - **Lazy reading** - entities decode their rows on first access, or all at once with
//!   [`ReadingMode::Immediate`](metadata::typesystem::ReadingMode)
//! - **All tables** - the 45 tables of the `#~` stream, including the `*Ptr` indirections
//! - **Full signatures** - types, methods, fields, properties, generic instances, custom
//!   attributes, security declarations, marshalling descriptors and constants
//! - **Cross-module work** - importing foreign types and members, resolving references
//!   through a pluggable [`AssemblyResolver`](metadata::resolver::AssemblyResolver)
//! - **Deterministic writing** - structurally equal references share one row
//!
//! ## Quick Start
//!
//! ```rust
//! use dotmeta::prelude::*;
//!
//! let module = ModuleDefinition::create_assembly(
//!     AssemblyNameReference::new("Example", AssemblyVersion::new(1, 0, 0, 0)),
//!     "Example.dll",
//!     ModuleKind::Dll,
//! );
//! let class = TypeDefinition::new("Example", "Greeter", TypeAttributes::PUBLIC, None);
//! module.add_type(class.clone())?;
//! class.add_method(MethodDefinition::new(
//!     "Greet",
//!     MethodAttributes::PUBLIC,
//!     TypeSignature::Void,
//! ))?;
//!
//! let image = module.write()?;
//! let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
//! let greeter = copy.get_type("Example.Greeter")?.unwrap();
//! assert_eq!(greeter.methods()?[0].name, "Greet");
//! # Ok::<(), dotmeta::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - re-exports of the commonly used types
//! - [`metadata`] - streams, tables, signatures, the entity graph, reader and builder
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Standards Compliance
//!
//! `dotmeta` implements partition II of the **ECMA-335 specification** (6th edition).
//!
//! - [ECMA-335 Standard](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use dotmeta::prelude::*;
///
/// let module = ModuleDefinition::create("Example.dll", ModuleKind::Dll);
/// assert_eq!(module.types()?.len(), 1);
/// # Ok::<(), dotmeta::Error>(())
/// ```
pub mod prelude;

/// Metadata streams, tables, signatures and the entity graph
pub mod metadata;

/// `dotmeta` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotmeta` Error type
///
/// ```rust
/// use dotmeta::{prelude::*, Error};
///
/// let streams = MetadataStreams::default();
/// match MetadataImage::new(streams, ImageInfo::default()) {
///     Err(error @ Error::OutOfBounds) => assert!(error.is_malformed_input()),
///     other => panic!("{:?}", other.err()),
/// }
/// ```
pub use error::Error;

pub use metadata::streams::{Blob, Guid, Strings, UserStrings};
pub use metadata::tables::TablesHeader;
