use strum::{EnumCount, IntoEnumIterator};

use crate::metadata::tables::{
    columns, CodedIndexType, Column, TableId, TablesHeader, HEAP_LARGE_BLOB, HEAP_LARGE_GUID,
    HEAP_LARGE_STRINGS,
};

/// Row counts and derived column widths of one module's tables.
///
/// Everything that depends on table sizes is computed once here: heap index widths, table
/// index widths, coded index widths and the resulting row sizes.
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    rows: Vec<u32>,
    large_coded: Vec<bool>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

impl TableInfo {
    /// Derive widths from row counts (indexed by [`TableId::index`]) and heap size flags.
    #[must_use]
    pub fn new(rows: &[u32], heap_sizes: u8) -> Self {
        let mut counts = vec![0_u32; TableId::COUNT];
        for (slot, count) in counts.iter_mut().zip(rows) {
            *slot = *count;
        }

        let large_coded = CodedIndexType::iter()
            .map(|kind| kind.is_large(|table| counts[table.index()]))
            .collect();

        TableInfo {
            rows: counts,
            large_coded,
            is_large_index_str: heap_sizes & HEAP_LARGE_STRINGS != 0,
            is_large_index_guid: heap_sizes & HEAP_LARGE_GUID != 0,
            is_large_index_blob: heap_sizes & HEAP_LARGE_BLOB != 0,
        }
    }

    /// Derive widths from a parsed tables stream header.
    #[must_use]
    pub fn from_header(header: &TablesHeader) -> Self {
        Self::new(&header.rows, header.heap_sizes)
    }

    /// Widths for the given row counts and heap size flags.
    #[cfg(test)]
    pub fn new_test(
        valid_tables: &[(TableId, u32)],
        large_str: bool,
        large_blob: bool,
        large_guid: bool,
    ) -> Self {
        let mut rows = vec![0_u32; TableId::COUNT];
        for (table, count) in valid_tables {
            rows[table.index()] = *count;
        }

        let mut heap_sizes = 0;
        if large_str {
            heap_sizes |= HEAP_LARGE_STRINGS;
        }
        if large_guid {
            heap_sizes |= HEAP_LARGE_GUID;
        }
        if large_blob {
            heap_sizes |= HEAP_LARGE_BLOB;
        }

        Self::new(&rows, heap_sizes)
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table.index()]
    }

    /// Row counts of all tables, indexed by [`TableId::index`].
    #[must_use]
    pub fn all_rows(&self) -> &[u32] {
        &self.rows
    }

    /// True if `#Strings` indices are 4 bytes wide.
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.is_large_index_str
    }

    /// True if `#GUID` indices are 4 bytes wide.
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.is_large_index_guid
    }

    /// True if `#Blob` indices are 4 bytes wide.
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.is_large_index_blob
    }

    /// True if a row id of `table` needs four bytes.
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows(table) > u32::from(u16::MAX)
    }

    /// True if a coded index of `kind` needs four bytes.
    #[must_use]
    pub fn is_large_coded(&self, kind: CodedIndexType) -> bool {
        self.large_coded[kind as usize]
    }

    /// True if a value stored in `column` needs four bytes.
    #[must_use]
    pub fn is_large_column(&self, column: Column) -> bool {
        match column {
            Column::U16 => false,
            Column::U32 => true,
            Column::String => self.is_large_index_str,
            Column::Guid => self.is_large_index_guid,
            Column::Blob => self.is_large_index_blob,
            Column::Table(table) => self.is_large(table),
            Column::Coded(kind) => self.is_large_coded(kind),
        }
    }

    /// Width in bytes of `column`.
    #[must_use]
    pub fn column_size(&self, column: Column) -> usize {
        if self.is_large_column(column) {
            4
        } else {
            2
        }
    }

    /// Width in bytes of one row of `table`.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        columns(table)
            .iter()
            .map(|column| self.column_size(*column))
            .sum()
    }

    /// Byte offset of column `index` inside a row of `table`.
    #[must_use]
    pub fn column_offset(&self, table: TableId, index: usize) -> usize {
        columns(table)
            .iter()
            .take(index)
            .map(|column| self.column_size(*column))
            .sum()
    }
}
