//! Readers for the metadata heaps.
//!
//! All heaps are addressed by an index stored in a table row. The index is relative to the
//! start of the heap and, except for `#GUID`, is a byte offset.
//!
//! - [`Strings`] - `#Strings`, null-terminated UTF-8 identifiers
//! - [`Blob`] - `#Blob`, length prefixed signatures and values
//! - [`Guid`] - `#GUID`, 16-byte module version ids
//! - [`UserStrings`] - `#US`, UTF-16 literals

mod blob;
mod guid;
mod strings;
mod userstrings;

pub use blob::Blob;
pub use guid::Guid;
pub use strings::Strings;
pub use userstrings::UserStrings;
