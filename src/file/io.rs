//! Little-endian primitive access for table rows, heaps and signature blobs.
//!
//! Everything in a metadata image is little-endian. This module provides the bounds-checked
//! readers used by the table cursor and the heap readers, and the appending writers used by
//! the metadata builder. The [`crate::file::io::CilIO`] trait abstracts over the primitive
//! types that may appear in a row or a blob.
//!
//! # Compressed integers
//!
//! ECMA-335 II.23.2 defines a variable length encoding for unsigned and signed 32-bit
//! integers. [`crate::file::io::write_compressed_uint`] always picks the shortest form:
//!
//! | Value range            | Width | Leading bits |
//! |------------------------|-------|--------------|
//! | `0x00..=0x7F`          | 1     | `0`          |
//! | `0x80..=0x3FFF`        | 2     | `10`         |
//! | `0x4000..=0x1FFF_FFFF` | 4     | `110`        |
//!
//! The decoding side lives on [`crate::file::parser::Parser`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use crate::file::io::{read_le_at, write_compressed_uint};
//!
//! let mut blob = Vec::new();
//! write_compressed_uint(&mut blob, 0x3FFF)?;
//! assert_eq!(blob, [0xBF, 0xFF]);
//!
//! let data = [0x01, 0x00, 0x02, 0x00];
//! let mut offset = 0;
//! let first: u16 = read_le_at(&data, &mut offset)?;
//! assert_eq!(first, 1);
//! assert_eq!(offset, 2);
//! # Ok::<(), crate::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Largest value representable by the compressed unsigned integer encoding.
pub const MAX_COMPRESSED_UINT: u32 = 0x1FFF_FFFF;

/// Primitive types that can be read from and written to metadata byte buffers.
pub trait CilIO: Sized + Copy {
    /// The fixed-size byte array backing this type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode a value from its little-endian representation
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode a value into its little-endian representation
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing
/// the offset by the size of `T`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Reads either a 2-byte or a 4-byte little-endian index, promoting it to `u32`.
///
/// Heap and table indices inside a row use this, with `is_large` derived from the heap
/// size flags or the referenced tables' row counts.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Appends `value` in little-endian byte order.
pub fn write_le<T: CilIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Appends either a 2-byte or a 4-byte little-endian index.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `value` does not fit into two bytes while
/// `is_large` is false.
pub fn write_le_dyn(out: &mut Vec<u8>, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        write_le::<u32>(out, value);
    } else {
        let Ok(small) = u16::try_from(value) else {
            return Err(OutOfBounds);
        };
        write_le::<u16>(out, small);
    }

    Ok(())
}

/// Appends `value` using the shortest compressed unsigned integer form.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` exceeds [`MAX_COMPRESSED_UINT`].
#[allow(clippy::cast_possible_truncation)]
pub fn write_compressed_uint(out: &mut Vec<u8>, value: u32) -> Result<()> {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push(0x80 | (value >> 8) as u8);
        out.push(value as u8);
    } else if value <= MAX_COMPRESSED_UINT {
        out.push(0xC0 | (value >> 24) as u8);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    } else {
        return Err(malformed_error!(
            "Value {:#x} is too large for a compressed integer",
            value
        ));
    }

    Ok(())
}

/// Appends `value` using the compressed signed integer form (ECMA-335 II.23.2).
///
/// The magnitude is rotated left by one bit with the sign in bit zero. Negative values
/// are biased into the width they require, so the width of the emitted form is fixed by
/// the value range rather than the biased magnitude.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` is outside `-2^28..2^28`.
#[allow(clippy::cast_sign_loss)]
pub fn write_compressed_int(out: &mut Vec<u8>, value: i32) -> Result<()> {
    if value >= 0 {
        if value >= 0x1000_0000 {
            return Err(malformed_error!(
                "Value {} is too large for a compressed signed integer",
                value
            ));
        }
        return write_compressed_uint(out, (value as u32) << 1);
    }

    if value >= -0x40 {
        let biased = (value + 0x40) as u32;
        out.push(((biased << 1) | 1) as u8);
    } else if value >= -0x2000 {
        let encoded = (((value + 0x2000) as u32) << 1) | 1;
        out.push(0x80 | (encoded >> 8) as u8);
        out.push(encoded as u8);
    } else if value >= -0x1000_0000 {
        let encoded = (((value + 0x1000_0000) as u32) << 1) | 1;
        out.push(0xC0 | (encoded >> 24) as u8);
        out.push((encoded >> 16) as u8);
        out.push((encoded >> 8) as u8);
        out.push(encoded as u8);
    } else {
        return Err(malformed_error!(
            "Value {} is too small for a compressed signed integer",
            value
        ));
    }

    Ok(())
}

/// Appends a `SerString`: `0xFF` for `None`, otherwise the compressed length and UTF-8 bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the string is longer than a compressed length allows.
pub fn write_ser_string(out: &mut Vec<u8>, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            let length = u32::try_from(value.len())
                .map_err(|_| malformed_error!("String of {} bytes is too long", value.len()))?;
            write_compressed_uint(out, length)?;
            out.extend_from_slice(value.as_bytes());
        }
        None => out.push(0xFF),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_primitives() {
        assert_eq!(read_le_at::<u8>(&TEST_BUFFER, &mut 0).unwrap(), 0x01);
        assert_eq!(read_le_at::<u16>(&TEST_BUFFER, &mut 0).unwrap(), 0x0201);
        assert_eq!(read_le_at::<u32>(&TEST_BUFFER, &mut 0).unwrap(), 0x0403_0201);
        assert_eq!(read_le_at::<u64>(&TEST_BUFFER, &mut 0).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let value = read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0403);
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_dyn() {
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, false).unwrap(), 0x0201);
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, true).unwrap(), 0x0605_0403);
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_out_of_bounds() {
        let mut offset = 6;
        assert!(matches!(
            read_le_at::<u32>(&TEST_BUFFER, &mut offset),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(offset, 6);
    }

    #[test]
    fn write_dyn() {
        let mut out = Vec::new();
        write_le_dyn(&mut out, 0x0201, false).unwrap();
        write_le_dyn(&mut out, 0x0605_0403, true).unwrap();
        assert_eq!(out, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

        assert!(write_le_dyn(&mut out, 0x1_0000, false).is_err());
    }

    #[test]
    fn compressed_uint_widths() {
        let cases: [(u32, &[u8]); 6] = [
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x2E57, &[0xAE, 0x57]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
        ];

        for (value, expected) in cases {
            let mut out = Vec::new();
            write_compressed_uint(&mut out, value).unwrap();
            assert_eq!(out, expected, "value {value:#x}");
        }

        let mut out = Vec::new();
        write_compressed_uint(&mut out, MAX_COMPRESSED_UINT).unwrap();
        assert_eq!(out, [0xDF, 0xFF, 0xFF, 0xFF]);
        assert!(write_compressed_uint(&mut out, MAX_COMPRESSED_UINT + 1).is_err());
    }

    #[test]
    fn compressed_int_samples() {
        // ECMA-335 II.23.2 sample encodings
        let cases: [(i32, &[u8]); 8] = [
            (3, &[0x06]),
            (-3, &[0x7B]),
            (64, &[0x80, 0x80]),
            (-64, &[0x01]),
            (8192, &[0xC0, 0x00, 0x40, 0x00]),
            (-8192, &[0x80, 0x01]),
            (268_435_455, &[0xDF, 0xFF, 0xFF, 0xFE]),
            (-268_435_456, &[0xC0, 0x00, 0x00, 0x01]),
        ];

        for (value, expected) in cases {
            let mut out = Vec::new();
            write_compressed_int(&mut out, value).unwrap();
            assert_eq!(out, expected, "value {value}");
        }
    }

    #[test]
    fn ser_strings() {
        let mut out = Vec::new();
        write_ser_string(&mut out, Some("ab")).unwrap();
        write_ser_string(&mut out, None).unwrap();
        write_ser_string(&mut out, Some("")).unwrap();
        assert_eq!(out, vec![0x02, b'a', b'b', 0xFF, 0x00]);
    }
}
