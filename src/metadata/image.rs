//! The raw metadata of one module, as handed over by (or back to) the PE layer.
//!
//! Locating the metadata root inside a PE image, and laying the streams back out into
//! one, is the job of an external collaborator. This module defines the narrow interface
//! between the two: [`MetadataStreams`] holds the bytes of the five streams,
//! [`ImageInfo`] the few header values the object model needs (module kind, runtime,
//! architecture, characteristics, entry point). [`MetadataImage`] combines both and
//! precomputes row sizes and table offsets from the `#~` header.
//!
//! # Examples
//!
//! ```rust
//! use dotmeta::prelude::*;
//!
//! let module = ModuleDefinition::create("Example.dll", ModuleKind::Dll);
//! let image = module.write()?;
//! assert_eq!(image.row_count(TableId::Module), 1);
//! assert_eq!(image.row_count(TableId::TypeDef), 1);
//! # Ok::<(), dotmeta::Error>(())
//! ```

use bitflags::bitflags;
use strum::{EnumCount, IntoEnumIterator};

use crate::{
    metadata::{
        streams::{Blob, Guid, Strings, UserStrings},
        tables::{TableId, TableInfo, TablesHeader},
        token::Token,
    },
    Result,
};

/// What kind of image the module lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleKind {
    /// A class library
    #[default]
    Dll,
    /// A console application
    Console,
    /// A GUI application
    Windows,
    /// A module without an assembly manifest
    NetModule,
}

/// The runtime version the module targets, derived from the metadata root version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetRuntime {
    /// `v1.0.3705`
    Net1_0,
    /// `v1.1.4322`
    Net1_1,
    /// `v2.0.50727`
    Net2_0,
    /// `v4.0.30319`
    #[default]
    Net4_0,
}

/// The machine the image targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetArchitecture {
    /// x86, also used for AnyCPU images
    #[default]
    I386,
    /// x64
    AMD64,
    /// Itanium
    IA64,
    /// 32-bit ARM
    ARM,
    /// ARM Thumb-2
    ARMv7,
    /// 64-bit ARM
    ARM64,
}

bitflags! {
    /// PE optional header DLL characteristics relevant to managed images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleCharacteristics: u16 {
        /// Image can handle a high entropy 64-bit virtual address space
        const HIGH_ENTROPY_VA = 0x0020;
        /// Image can be relocated at load time
        const DYNAMIC_BASE = 0x0040;
        /// Image is NX compatible
        const NX_COMPAT = 0x0100;
        /// Image does not use structured exception handling
        const NO_SEH = 0x0400;
        /// Image must run inside an AppContainer
        const APP_CONTAINER = 0x1000;
        /// Image is terminal server aware
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

bitflags! {
    /// CLI header flags (`COMIMAGE_FLAGS_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleAttributes: u32 {
        /// Image contains only IL
        const IL_ONLY = 0x0000_0001;
        /// Image requires a 32-bit process
        const REQUIRED_32_BIT = 0x0000_0002;
        /// Image is strong name signed
        const STRONG_NAME_SIGNED = 0x0000_0008;
        /// Image prefers a 32-bit process
        const PREFERRED_32_BIT = 0x0002_0000;
    }
}

/// Values decoded by the PE layer that the object model carries through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Module kind
    pub kind: ModuleKind,
    /// Target runtime
    pub runtime: TargetRuntime,
    /// Target machine
    pub architecture: TargetArchitecture,
    /// DLL characteristics
    pub characteristics: ModuleCharacteristics,
    /// CLI header flags
    pub attributes: ModuleAttributes,
    /// Entry point method token, null for libraries
    pub entry_point: Token,
}

impl Default for ImageInfo {
    fn default() -> Self {
        ImageInfo {
            kind: ModuleKind::Dll,
            runtime: TargetRuntime::Net4_0,
            architecture: TargetArchitecture::I386,
            characteristics: ModuleCharacteristics::DYNAMIC_BASE
                | ModuleCharacteristics::NX_COMPAT
                | ModuleCharacteristics::NO_SEH
                | ModuleCharacteristics::TERMINAL_SERVER_AWARE,
            attributes: ModuleAttributes::IL_ONLY,
            entry_point: Token::new(0),
        }
    }
}

/// The bytes of the five metadata streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStreams {
    /// `#~`
    pub tables: Vec<u8>,
    /// `#Strings`
    pub strings: Vec<u8>,
    /// `#Blob`
    pub blob: Vec<u8>,
    /// `#GUID`
    pub guid: Vec<u8>,
    /// `#US`
    pub user_strings: Vec<u8>,
}

/// One module's metadata streams plus the derived table layout.
pub struct MetadataImage {
    streams: MetadataStreams,
    info: ImageInfo,
    header: TablesHeader,
    table_info: TableInfo,
    table_offsets: Vec<usize>,
}

impl MetadataImage {
    /// Parse the tables stream header and compute the position of every table.
    ///
    /// # Errors
    /// Returns an error if the header is malformed or the declared tables do not fit in
    /// the tables stream.
    pub fn new(streams: MetadataStreams, info: ImageInfo) -> Result<Self> {
        let (header, mut offset) = TablesHeader::read(&streams.tables)?;
        let table_info = TableInfo::from_header(&header);

        let mut table_offsets = vec![0_usize; TableId::COUNT];
        for table in TableId::iter() {
            table_offsets[table.index()] = offset;
            let size = table_info.row_size(table) * table_info.rows(table) as usize;
            offset = offset
                .checked_add(size)
                .ok_or_else(|| malformed_error!("Table {:?} overflows", table))?;
        }

        if offset > streams.tables.len() {
            return Err(malformed_error!(
                "Tables stream is {} bytes, rows need {}",
                streams.tables.len(),
                offset
            ));
        }

        // validate the heaps once, lookups later only bound-check
        Strings::from(&streams.strings)?;
        Blob::from(&streams.blob)?;
        Guid::from(&streams.guid)?;
        UserStrings::from(&streams.user_strings)?;

        Ok(MetadataImage {
            streams,
            info,
            header,
            table_info,
            table_offsets,
        })
    }

    /// The values decoded by the PE layer.
    #[must_use]
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// The raw stream bytes.
    #[must_use]
    pub fn streams(&self) -> &MetadataStreams {
        &self.streams
    }

    /// Consume the image and return its streams.
    #[must_use]
    pub fn into_streams(self) -> MetadataStreams {
        self.streams
    }

    /// The parsed `#~` header.
    #[must_use]
    pub fn header(&self) -> &TablesHeader {
        &self.header
    }

    /// Row counts and column widths.
    #[must_use]
    pub fn table_info(&self) -> &TableInfo {
        &self.table_info
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.table_info.rows(table)
    }

    /// Byte offset of row `rid` of `table` in the tables stream, `None` if out of range.
    #[must_use]
    pub fn row_offset(&self, table: TableId, rid: u32) -> Option<usize> {
        if rid == 0 || rid > self.row_count(table) {
            return None;
        }

        let row_size = self.table_info.row_size(table);
        Some(self.table_offsets[table.index()] + (rid as usize - 1) * row_size)
    }

    /// The bytes of the tables stream.
    #[must_use]
    pub fn tables_data(&self) -> &[u8] {
        &self.streams.tables
    }

    /// The `#Strings` heap.
    ///
    /// # Errors
    /// Never fails for an image constructed through [`MetadataImage::new`].
    pub fn strings(&self) -> Result<Strings<'_>> {
        Strings::from(&self.streams.strings)
    }

    /// The `#Blob` heap.
    ///
    /// # Errors
    /// Never fails for an image constructed through [`MetadataImage::new`].
    pub fn blobs(&self) -> Result<Blob<'_>> {
        Blob::from(&self.streams.blob)
    }

    /// The `#GUID` heap.
    ///
    /// # Errors
    /// Never fails for an image constructed through [`MetadataImage::new`].
    pub fn guids(&self) -> Result<Guid<'_>> {
        Guid::from(&self.streams.guid)
    }

    /// The `#US` heap.
    ///
    /// # Errors
    /// Never fails for an image constructed through [`MetadataImage::new`].
    pub fn user_strings(&self) -> Result<UserStrings<'_>> {
        UserStrings::from(&self.streams.user_strings)
    }
}
