//! GGUF primitive readers and writers
//!
//! Little-endian scalar and string codecs shared by the loader, the writer,
//! and the test factory.

use std::io::{self, Cursor, Read, Write};

use super::types::{GGUFValue, GGUFValueType};
use crate::error::{CuantizarError, Result};

/// Read exactly `N` bytes, naming the field on truncation.
fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| CuantizarError::FormatError {
            reason: format!(
                "truncated while reading {what} at offset {}: {e}",
                cursor.position()
            ),
        })?;
    Ok(buf)
}

/// Read a single u8 from the cursor.
pub(crate) fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    Ok(read_array::<1>(cursor, "u8")?[0])
}

/// Read a single i8 from the cursor.
pub(crate) fn read_i8(cursor: &mut Cursor<&[u8]>) -> Result<i8> {
    Ok(i8::from_le_bytes(read_array(cursor, "i8")?))
}

/// Read a u16 (little-endian) from the cursor.
pub(crate) fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(cursor, "u16")?))
}

/// Read an i16 (little-endian) from the cursor.
pub(crate) fn read_i16(cursor: &mut Cursor<&[u8]>) -> Result<i16> {
    Ok(i16::from_le_bytes(read_array(cursor, "i16")?))
}

/// Read a u32 (little-endian) from the cursor.
pub(crate) fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(cursor, "u32")?))
}

/// Read an i32 (little-endian) from the cursor.
pub(crate) fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(cursor, "i32")?))
}

/// Read an f32 (little-endian) from the cursor.
pub(crate) fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32> {
    Ok(f32::from_le_bytes(read_array(cursor, "f32")?))
}

/// Read a bool from the cursor.
pub(crate) fn read_bool(cursor: &mut Cursor<&[u8]>) -> Result<bool> {
    Ok(read_array::<1>(cursor, "bool")?[0] != 0)
}

/// Read a u64 (little-endian) from the cursor.
pub(crate) fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(cursor, "u64")?))
}

/// Read an i64 (little-endian) from the cursor.
pub(crate) fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64> {
    Ok(i64::from_le_bytes(read_array(cursor, "i64")?))
}

/// Read an f64 (little-endian) from the cursor.
pub(crate) fn read_f64(cursor: &mut Cursor<&[u8]>) -> Result<f64> {
    Ok(f64::from_le_bytes(read_array(cursor, "f64")?))
}

/// Read a string: u64 length + UTF-8 bytes.
pub(crate) fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len_u64 = read_u64(cursor)?;
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if len_u64 > remaining {
        return Err(CuantizarError::FormatError {
            reason: format!(
                "string length {len_u64} at offset {} runs past end of file",
                cursor.position()
            ),
        });
    }
    let len = usize::try_from(len_u64).map_err(|_| CuantizarError::FormatError {
        reason: format!("string length {len_u64} exceeds platform usize limit"),
    })?;

    let mut bytes = vec![0u8; len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|e| CuantizarError::FormatError {
            reason: format!("truncated string: {e}"),
        })?;

    String::from_utf8(bytes).map_err(|e| CuantizarError::FormatError {
        reason: format!("string is not valid UTF-8: {e}"),
    })
}

// ============================================================================
// Writers
// ============================================================================

/// Write a string: u64 length + UTF-8 bytes.
pub(crate) fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(&(s.len() as u64).to_le_bytes())?;
    w.write_all(s.as_bytes())
}

/// Write a value payload (without its type tag).
pub(crate) fn write_value<W: Write>(w: &mut W, value: &GGUFValue) -> io::Result<()> {
    match value {
        GGUFValue::UInt8(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::Int8(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::UInt16(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::Int16(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::UInt32(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::Int32(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::Float32(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::Bool(v) => w.write_all(&[u8::from(*v)]),
        GGUFValue::String(s) => write_string(w, s),
        GGUFValue::Array {
            element_type,
            values,
        } => {
            w.write_all(&(*element_type as u32).to_le_bytes())?;
            w.write_all(&(values.len() as u64).to_le_bytes())?;
            for v in values {
                write_value(w, v)?;
            }
            Ok(())
        },
        GGUFValue::UInt64(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::Int64(v) => w.write_all(&v.to_le_bytes()),
        GGUFValue::Float64(v) => w.write_all(&v.to_le_bytes()),
    }
}

/// Write one metadata entry: key, type tag, payload.
pub(crate) fn write_kv<W: Write>(w: &mut W, key: &str, value: &GGUFValue) -> io::Result<()> {
    write_string(w, key)?;
    w.write_all(&(value.value_type() as u32).to_le_bytes())?;
    write_value(w, value)
}

/// Array element types that may appear inside an array
pub(crate) fn is_scalar_type(ty: GGUFValueType) -> bool {
    !matches!(ty, GGUFValueType::Array)
}
