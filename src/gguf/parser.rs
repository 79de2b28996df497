//! GGUF container parser
//!
//! Decodes the header, metadata table, and tensor directory from a byte
//! slice, then locates the aligned data section and validates every tensor
//! range against the file size. Array metadata payloads are skipped, not
//! materialized; only a summary survives.
//!
//! All cursor movement goes through [`Reader`], so a truncated or hostile
//! file surfaces as an error rather than a panic, and every byte-size
//! derivation uses checked u64 arithmetic.

use std::collections::HashMap;

use crate::error::{InferirError, Result};
use crate::reader::{align_up, Reader};

use super::types::{
    checked_add_u64, tensor_nbytes, ArraySummary, GGUFFile, GGUFHeader, GGUFValue, KV, TensorInfo,
    ValueType, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC,
};

/// Skip `count` array elements of `elem_type`, advancing the reader
///
/// Fixed-size elements skip in one bounds-checked jump; strings must be
/// walked one length prefix at a time.
fn skip_array_payload(r: &mut Reader<'_>, elem_type: ValueType, count: u64, key: &str) -> Result<()> {
    let elem_bytes: u64 = match elem_type {
        ValueType::UInt8 | ValueType::Int8 | ValueType::Bool => 1,
        ValueType::UInt16 | ValueType::Int16 => 2,
        ValueType::UInt32 | ValueType::Int32 | ValueType::Float32 => 4,
        ValueType::UInt64 | ValueType::Int64 | ValueType::Float64 => 8,
        ValueType::String => {
            for _ in 0..count {
                r.read_string()?;
            }
            return Ok(());
        },
        ValueType::Array => {
            return Err(InferirError::UnsupportedArrayOfArray {
                key: key.to_string(),
            });
        },
    };

    let total = super::types::checked_mul_u64(count, elem_bytes, &format!("array skip for {key}"))?;
    let total = usize::try_from(total).map_err(|_| InferirError::PastEOF {
        pos: r.pos(),
        needed: usize::MAX,
        size: r.size(),
    })?;
    r.skip(total)
}

/// Read one metadata value of the given type
fn read_value(r: &mut Reader<'_>, t: ValueType, key: &str) -> Result<GGUFValue> {
    Ok(match t {
        ValueType::UInt8 => GGUFValue::UInt8(r.read_u8()?),
        ValueType::Int8 => GGUFValue::Int8(r.read_i8()?),
        ValueType::UInt16 => GGUFValue::UInt16(r.read_u16()?),
        ValueType::Int16 => GGUFValue::Int16(r.read_i16()?),
        ValueType::UInt32 => GGUFValue::UInt32(r.read_u32()?),
        ValueType::Int32 => GGUFValue::Int32(r.read_i32()?),
        ValueType::Float32 => GGUFValue::Float32(r.read_f32()?),
        ValueType::Bool => GGUFValue::Bool(r.read_bool()?),
        ValueType::String => GGUFValue::String(r.read_string()?),
        ValueType::UInt64 => GGUFValue::UInt64(r.read_u64()?),
        ValueType::Int64 => GGUFValue::Int64(r.read_i64()?),
        ValueType::Float64 => GGUFValue::Float64(r.read_f64()?),
        ValueType::Array => {
            let elem_type = ValueType::from_u32(r.read_u32()?)?;
            let len = r.read_u64()?;
            skip_array_payload(r, elem_type, len, key)?;
            GGUFValue::Array(ArraySummary { elem_type, len })
        },
    })
}

/// Parse a GGUF file from raw bytes
///
/// # Errors
///
/// Returns an error for a bad magic, unknown value types, nested arrays,
/// any read past EOF, arithmetic overflow in a skip or byte-size
/// computation, or a tensor range that falls outside the file.
pub fn parse(data: &[u8]) -> Result<GGUFFile> {
    let mut r = Reader::new(data);

    let magic_bytes = r.read_bytes(4)?;
    let mut found = [0u8; 4];
    found.copy_from_slice(&magic_bytes);
    if u32::from_le_bytes(found) != GGUF_MAGIC {
        return Err(InferirError::BadMagic { found });
    }

    let header = GGUFHeader {
        version: r.read_u32()?,
        tensor_count: r.read_u64()?,
        metadata_kv_count: r.read_u64()?,
    };

    let mut metadata = Vec::new();
    let mut kv_index_by_key = HashMap::new();
    for _ in 0..header.metadata_kv_count {
        let key = r.read_string()?;
        let t = ValueType::from_u32(r.read_u32()?)?;
        let value = read_value(&mut r, t, &key)?;

        kv_index_by_key.insert(key.clone(), metadata.len());
        metadata.push(KV { key, value });
    }

    let mut tensors = Vec::new();
    let mut tensor_index_by_name = HashMap::new();
    for _ in 0..header.tensor_count {
        let name = r.read_string()?;
        let n_dims = r.read_u32()?;
        let mut dims = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            dims.push(r.read_u64()?);
        }
        let ggml_type = r.read_u32()?;
        let offset = r.read_u64()?;

        tensor_index_by_name.insert(name.clone(), tensors.len());
        tensors.push(TensorInfo {
            name,
            dims,
            ggml_type,
            offset,
        });
    }

    let mut alignment = GGUF_DEFAULT_ALIGNMENT;
    if let Some(&i) = kv_index_by_key.get("general.alignment") {
        if let Some(a) = metadata[i].value.as_u32() {
            alignment = a;
        }
    }

    let data_section_offset = align_up(r.pos(), alignment as usize);
    if data_section_offset > data.len() {
        return Err(InferirError::OutOfBounds {
            what: format!(
                "data section offset {data_section_offset} beyond file size {}",
                data.len()
            ),
        });
    }
    let data_section_offset = data_section_offset as u64;
    let file_size = data.len() as u64;

    // Every tensor with known type traits must fit inside the file.
    for t in &tensors {
        let abs_off = checked_add_u64(
            data_section_offset,
            t.offset,
            &format!("absolute offset of {}", t.name),
        )?;
        if abs_off > file_size {
            return Err(InferirError::OutOfBounds {
                what: format!("tensor {} offset {abs_off} beyond file size {file_size}", t.name),
            });
        }
        if let Some(nbytes) = tensor_nbytes(t)? {
            let end = checked_add_u64(abs_off, nbytes, &format!("end of tensor {}", t.name))?;
            if end > file_size {
                return Err(InferirError::OutOfBounds {
                    what: format!("tensor {} range [{abs_off}, {end}) beyond file size {file_size}", t.name),
                });
            }
        }
    }

    Ok(GGUFFile {
        header,
        metadata,
        tensors,
        data_section_offset,
        tensor_index_by_name,
        kv_index_by_key,
    })
}
