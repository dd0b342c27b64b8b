//! Metadata tables: identifiers, coded indices, row layouts and the `#~` header.
//!
//! # Key Components
//!
//! - [`TableId`] - the 45 table kinds and their token bytes
//! - [`CodedIndexType`] - tag/row packing for multi-table references
//! - [`TableInfo`] - per-module row counts and the index widths they imply
//! - [`columns`] - the physical column layout of every table
//! - [`TablesHeader`] - parsing and emission of the tables stream header
//!
//! Row layout is described once, by [`columns`]. The metadata reader uses it to compute
//! row sizes and column offsets, the builder uses it to serialize rows, so both sides agree
//! on the physical layout by construction.

mod codedindex;
mod header;
mod schema;
mod tableid;
mod tableinfo;

pub use codedindex::CodedIndexType;
pub use header::{TablesHeader, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS};
pub use schema::{columns, sort_key, Column};
pub use tableid::TableId;
pub use tableinfo::TableInfo;
