use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::{read_le_at, write_le},
    metadata::tables::TableId,
    Result,
};

/// Heap size flag: `#Strings` indices are 4 bytes wide
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap size flag: `#GUID` indices are 4 bytes wide
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// Heap size flag: `#Blob` indices are 4 bytes wide
pub const HEAP_LARGE_BLOB: u8 = 0x04;
/// Heap size flag: four extra bytes follow the row counts
const HEAP_EXTRA_DATA: u8 = 0x40;

/// The header of the `#~` tables stream (ECMA-335 II.24.2.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablesHeader {
    /// Major version, 2 for everything this crate writes
    pub major_version: u8,
    /// Minor version
    pub minor_version: u8,
    /// Combination of the `HEAP_*` flags
    pub heap_sizes: u8,
    /// Bit vector of present tables
    pub valid: u64,
    /// Bit vector of tables that are sorted
    pub sorted: u64,
    /// Row count per table, indexed by [`TableId::index`]
    pub rows: Vec<u32>,
}

impl TablesHeader {
    /// The sorted mask emitted for every written module: `InterfaceImpl`, `Constant`,
    /// `CustomAttribute`, `FieldMarshal`, `DeclSecurity`, `ClassLayout`, `FieldLayout`,
    /// `MethodSemantics`, `MethodImpl`, `ImplMap`, `FieldRVA`, `NestedClass`,
    /// `GenericParam` and `GenericParamConstraint`.
    pub const SORTED_MASK: u64 = 0x0000_1600_3301_FA00;

    /// Create a header for the given row counts, deriving the valid mask from them.
    #[must_use]
    pub fn new(rows: Vec<u32>, heap_sizes: u8) -> Self {
        let valid = TableId::iter()
            .filter(|table| rows.get(table.index()).is_some_and(|count| *count > 0))
            .fold(0_u64, |mask, table| mask | (1 << table.index()));

        TablesHeader {
            major_version: 2,
            minor_version: 0,
            heap_sizes,
            valid,
            sorted: Self::SORTED_MASK,
            rows,
        }
    }

    /// Parse the header at the start of the tables stream.
    ///
    /// Returns the header and the offset of the first table row.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a truncated header, or
    /// [`crate::Error::NotSupported`] if the valid mask names tables outside `0x00..=0x2C`.
    pub fn read(data: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 4;
        let major_version = read_le_at::<u8>(data, &mut offset)?;
        let minor_version = read_le_at::<u8>(data, &mut offset)?;
        let heap_sizes = read_le_at::<u8>(data, &mut offset)?;
        offset += 1;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let sorted = read_le_at::<u64>(data, &mut offset)?;

        if valid >> TableId::COUNT != 0 {
            return Err(crate::Error::NotSupported(format!(
                "Tables stream references unknown tables - valid mask {valid:#018x}"
            )));
        }

        let mut rows = vec![0_u32; TableId::COUNT];
        for table in TableId::iter() {
            if valid & (1 << table.index()) != 0 {
                rows[table.index()] = read_le_at::<u32>(data, &mut offset)?;
            }
        }

        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            offset += 4;
        }

        Ok((
            TablesHeader {
                major_version,
                minor_version,
                heap_sizes,
                valid,
                sorted,
                rows,
            },
            offset,
        ))
    }

    /// Append the encoded header to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        write_le::<u32>(out, 0);
        write_le::<u8>(out, self.major_version);
        write_le::<u8>(out, self.minor_version);
        write_le::<u8>(out, self.heap_sizes & !HEAP_EXTRA_DATA);
        write_le::<u8>(out, 1);
        write_le::<u64>(out, self.valid);
        write_le::<u64>(out, self.sorted);
        for table in TableId::iter() {
            if self.valid & (1 << table.index()) != 0 {
                write_le::<u32>(out, self.rows[table.index()]);
            }
        }
    }
}
