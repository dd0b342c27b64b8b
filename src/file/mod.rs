//! Byte-level primitives shared by the metadata reader and builder.
//!
//! - [`io`] - little-endian reads and writes, compressed integer encoding
//! - [`parser`] - a cursor over one blob used by the signature decoders

pub mod io;
pub mod parser;
