//! Row buffers for all tables and their serialization into a `#~` stream.

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::write_le_dyn,
    metadata::{
        tables::{
            columns, sort_key, TableId, TableInfo, TablesHeader, HEAP_LARGE_BLOB,
            HEAP_LARGE_GUID, HEAP_LARGE_STRINGS,
        },
        token::Token,
    },
    Result,
};

/// One row: a value per column, in [`columns`] order.
pub(crate) type Row = Vec<u32>;

/// The rows of every table, appended in emission order.
#[derive(Debug)]
pub(crate) struct TableBuffers {
    rows: Vec<Vec<Row>>,
}

impl TableBuffers {
    pub(crate) fn new() -> Self {
        TableBuffers {
            rows: vec![Vec::new(); TableId::COUNT],
        }
    }

    /// Append `row` to `table` and return its token.
    pub(crate) fn push(&mut self, table: TableId, row: Row) -> Token {
        debug_assert_eq!(row.len(), columns(table).len(), "{table:?}");
        let rows = &mut self.rows[table.index()];
        rows.push(row);
        #[allow(clippy::cast_possible_truncation)]
        Token::from_parts(table, rows.len() as u32)
    }

    /// The row id the next row of `table` will get.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn next_rid(&self, table: TableId) -> u32 {
        self.rows[table.index()].len() as u32 + 1
    }

    pub(crate) fn len(&self, table: TableId) -> usize {
        self.rows[table.index()].len()
    }

    /// Order every sorted table by its key column. The sort is stable, so rows of one
    /// owner keep their emission order.
    pub(crate) fn sort(&mut self) {
        for table in TableId::iter() {
            if let Some(key) = sort_key(table) {
                self.rows[table.index()].sort_by_key(|row| row[key]);
            }
        }
    }

    /// Serialize the header and all rows; the heap sizes pick the index widths.
    pub(crate) fn serialize(
        &self,
        strings_size: usize,
        guid_size: usize,
        blob_size: usize,
    ) -> Result<Vec<u8>> {
        let mut heap_sizes = 0;
        if strings_size > usize::from(u16::MAX) {
            heap_sizes |= HEAP_LARGE_STRINGS;
        }
        if guid_size / 16 > usize::from(u16::MAX) {
            heap_sizes |= HEAP_LARGE_GUID;
        }
        if blob_size > usize::from(u16::MAX) {
            heap_sizes |= HEAP_LARGE_BLOB;
        }

        let counts = self
            .rows
            .iter()
            .map(|rows| {
                u32::try_from(rows.len())
                    .map_err(|_| malformed_error!("Table has {} rows", rows.len()))
            })
            .collect::<Result<Vec<_>>>()?;
        let header = TablesHeader::new(counts, heap_sizes);
        let info = TableInfo::from_header(&header);

        let mut out = Vec::new();
        header.write(&mut out);
        for table in TableId::iter() {
            let layout = columns(table);
            for row in &self.rows[table.index()] {
                for (column, value) in layout.iter().zip(row) {
                    write_le_dyn(&mut out, *value, info.is_large_column(*column)).map_err(
                        |_| {
                            malformed_error!(
                                "Value {:#x} does not fit column {:?} of {:?}",
                                value,
                                column,
                                table
                            )
                        },
                    )?;
                }
            }
        }

        out.resize(out.len().next_multiple_of(4), 0);
        Ok(out)
    }
}
