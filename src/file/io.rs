//! Endian-aware typed reads from byte buffers.
//!
//! Provides the [`CilIO`] trait plus the bounds-checked helpers the
//! [`crate::file::parser::Parser`] is built on. All reads are little-endian;
//! the formats this crate consumes define no big-endian fields.

use crate::Result;

/// Conversion between a primitive type and its little-endian byte encoding.
///
/// Implemented for the fixed-width integer and float types that appear as
/// instruction operands and header fields.
pub trait CilIO: Sized {
    /// The byte array type holding the encoded value.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:literal),+ $(,)?) => {
        $(impl CilIO for $ty {
            type Bytes = [u8; $len];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$ty>::from_le_bytes(bytes)
            }

            fn to_le_bytes(self) -> Self::Bytes {
                <$ty>::to_le_bytes(self)
            }
        })+
    };
}

impl_cil_io!(
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
);

/// Read a `T` from the start of `data` in little-endian.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let size = std::mem::size_of::<T>();
    if data.len() < size {
        return Err(crate::Error::OutOfBounds);
    }

    match T::Bytes::try_from(&data[..size]) {
        Ok(bytes) => Ok(T::from_le_bytes(bytes)),
        Err(_) => Err(crate::Error::OutOfBounds),
    }
}

/// Read a `T` from `data` at `*offset`, advancing the offset on success.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let size = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(size) else {
        return Err(crate::Error::OutOfBounds);
    };
    if end > data.len() {
        return Err(crate::Error::OutOfBounds);
    }

    let value = read_le::<T>(&data[*offset..])?;
    *offset = end;
    Ok(value)
}

/// Append the little-endian encoding of `value` to `out`.
pub fn write_le<T: CilIO>(out: &mut Vec<u8>, value: T)
where
    T::Bytes: AsRef<[u8]>,
{
    out.extend_from_slice(value.to_le_bytes().as_ref());
}
