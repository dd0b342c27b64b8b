//! Append-only heap buffers with content interning.
//!
//! Every buffer starts with the entry for index zero (an empty string, blob or user string)
//! and hands out the existing offset when identical content is added again.

use std::collections::HashMap;

use crate::{file::io::write_compressed_uint, Result};

/// Round `data` up to a four byte boundary with zero bytes.
fn pad(mut data: Vec<u8>) -> Vec<u8> {
    data.resize(data.len().next_multiple_of(4), 0);
    data
}

fn offset_of(data: &[u8]) -> Result<u32> {
    u32::try_from(data.len()).map_err(|_| malformed_error!("Heap exceeds 4GB"))
}

/// `#Strings`: null-terminated UTF-8.
#[derive(Debug)]
pub(crate) struct StringHeapBuffer {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringHeapBuffer {
    pub(crate) fn new() -> Self {
        StringHeapBuffer {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// The offset of `value`, appending it on first use. The empty string is index 0.
    pub(crate) fn add(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(offset) = self.index.get(value) {
            return Ok(*offset);
        }

        if value.as_bytes().contains(&0) {
            return Err(crate::Error::InvalidArgument(format!(
                "identifier {value:?} contains a null character"
            )));
        }

        let offset = offset_of(&self.data)?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.index.insert(value.to_string(), offset);
        Ok(offset)
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        pad(self.data)
    }
}

/// `#Blob`: compressed length followed by the bytes.
#[derive(Debug)]
pub(crate) struct BlobHeapBuffer {
    data: Vec<u8>,
    index: HashMap<Vec<u8>, u32>,
}

impl BlobHeapBuffer {
    pub(crate) fn new() -> Self {
        BlobHeapBuffer {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// The offset of `value`, appending it on first use. The empty blob is index 0.
    pub(crate) fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(offset) = self.index.get(value) {
            return Ok(*offset);
        }

        let length = u32::try_from(value.len())
            .map_err(|_| malformed_error!("Blob of {} bytes is too large", value.len()))?;
        let offset = offset_of(&self.data)?;
        write_compressed_uint(&mut self.data, length)?;
        self.data.extend_from_slice(value);
        self.index.insert(value.to_vec(), offset);
        Ok(offset)
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        pad(self.data)
    }
}

/// `#GUID`: 16-byte entries addressed by 1-based index.
#[derive(Debug)]
pub(crate) struct GuidHeapBuffer {
    data: Vec<u8>,
    index: HashMap<[u8; 16], u32>,
}

impl GuidHeapBuffer {
    pub(crate) fn new() -> Self {
        GuidHeapBuffer {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The index of `value`; the nil GUID is index 0.
    pub(crate) fn add(&mut self, value: uguid::Guid) -> u32 {
        let bytes = value.to_bytes();
        if bytes == [0; 16] {
            return 0;
        }
        if let Some(index) = self.index.get(&bytes) {
            return *index;
        }

        self.data.extend_from_slice(&bytes);
        #[allow(clippy::cast_possible_truncation)]
        let index = (self.data.len() / 16) as u32;
        self.index.insert(bytes, index);
        index
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// `#US`: UTF-16 literals with a trailing flag byte.
#[derive(Debug)]
pub(crate) struct UserStringHeapBuffer {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl UserStringHeapBuffer {
    pub(crate) fn new() -> Self {
        UserStringHeapBuffer {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// The offset of `value`, appending it on first use.
    ///
    /// Unlike the other heaps, the empty string gets an entry of its own since offset zero
    /// can not be used by `ldstr`.
    pub(crate) fn add(&mut self, value: &str) -> Result<u32> {
        if let Some(offset) = self.index.get(value) {
            return Ok(*offset);
        }

        let units: Vec<u16> = value.encode_utf16().collect();
        let length = u32::try_from(units.len() * 2 + 1)
            .map_err(|_| malformed_error!("User string of {} chars is too long", units.len()))?;

        let offset = offset_of(&self.data)?;
        if offset > 0x00FF_FFFF {
            return Err(malformed_error!("#US heap exceeds the 24-bit token range"));
        }

        write_compressed_uint(&mut self.data, length)?;
        for unit in &units {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(u8::from(units.iter().any(|unit| needs_flag(*unit))));

        self.index.insert(value.to_string(), offset);
        Ok(offset)
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        pad(self.data)
    }
}

/// II.24.2.4: the flag is set if any char has a non-zero high byte, or is one of the
/// control and punctuation characters the runtime can not compare byte-wise.
fn needs_flag(unit: u16) -> bool {
    matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F) || unit > 0xFF
}
