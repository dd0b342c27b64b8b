//! Factories for hand-assembled metadata images used by the unit tests.
//!
//! [`image_with_rows`] collects raw rows through a [`TestRows`] and serializes them with
//! fixed heaps:
//!
//! - `#Strings`: `Test` at 1, `System` at 6, `Object` at 13
//! - `#Blob`: a field signature of `int32` at 1, a `void()` method signature at 4, a
//!   `void(int32)` method signature at 8
//! - `#GUID`: one entry

use crate::metadata::{
    builder::tables::{Row, TableBuffers},
    image::{ImageInfo, MetadataImage, MetadataStreams},
    tables::TableId,
};

/// String heap offsets of [`image_with_rows`].
pub const NAME_TEST: u32 = 1;
pub const NAME_SYSTEM: u32 = 6;
pub const NAME_OBJECT: u32 = 13;

/// Blob heap offsets of [`image_with_rows`].
pub const SIG_FIELD_I4: u32 = 1;
pub const SIG_METHOD_VOID: u32 = 4;
pub const SIG_METHOD_I4_ARG: u32 = 8;

/// Rows collected for one test image.
pub struct TestRows {
    tables: TableBuffers,
}

impl TestRows {
    pub fn add(&mut self, table: TableId, row: Row) {
        self.tables.push(table, row);
    }
}

/// Row constructors in column order.
pub struct RowWriter;

impl RowWriter {
    pub fn module(name: u32) -> Row {
        vec![0, name, 1, 0, 0]
    }

    pub fn type_ref(scope: u32, name: u32, namespace: u32) -> Row {
        vec![scope, name, namespace]
    }

    pub fn type_def(flags: u32, name: u32, field_list: u32, method_list: u32) -> Row {
        vec![flags, name, 0, 0, field_list, method_list]
    }

    pub fn field(flags: u32, name: u32, signature: u32) -> Row {
        vec![flags, name, signature]
    }

    pub fn method_def(flags: u32, name: u32, signature: u32, param_list: u32) -> Row {
        vec![0, 0, flags, name, signature, param_list]
    }

    pub fn param(flags: u32, sequence: u32, name: u32) -> Row {
        vec![flags, sequence, name]
    }

    /// A row of `FieldPtr`, `MethodPtr`, `ParamPtr`, `EventPtr` or `PropertyPtr`.
    pub fn pointer(target: u32) -> Row {
        vec![target]
    }
}

/// Build an image from the rows `fill` adds, in table order.
pub fn image_with_rows<F>(fill: F) -> MetadataImage
where
    F: FnOnce(&mut TestRows),
{
    let mut rows = TestRows {
        tables: TableBuffers::new(),
    };
    fill(&mut rows);

    let mut strings = b"\0Test\0System\0Object\0".to_vec();
    strings.resize(strings.len().next_multiple_of(4), 0);
    let blob = vec![0, 0x02, 0x06, 0x08, 0x03, 0x00, 0x00, 0x01, 0x04, 0x00, 0x01, 0x01, 0x08];
    let guid = vec![0x42; 16];

    let tables = rows
        .tables
        .serialize(strings.len(), guid.len(), blob.len())
        .unwrap();
    let streams = MetadataStreams {
        tables,
        strings,
        blob,
        guid,
        user_strings: vec![0, 0, 0, 0],
    };
    MetadataImage::new(streams, ImageInfo::default()).unwrap()
}
