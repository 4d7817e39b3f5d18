//! Recursive marshaling of structs and fixed-length arrays.
//!
//! Both aggregates travel as `ForeignValue::Struct`, one value per member
//! or element, laid out at the offsets the descriptor computed. Padding
//! bytes are left zeroed on write and ignored on read.

use super::cvalue::ForeignValue;
use crate::error::{FfiError, FfiResult};
use crate::ffi::types::TypeDesc;

pub(super) fn count_mismatch(desc: &TypeDesc, got: usize) -> FfiError {
    let expected = match desc {
        TypeDesc::Struct(st) => st.members().len(),
        TypeDesc::Array(array) => array.length(),
        _ => 0,
    };
    FfiError::type_mismatch(
        format!("{} with {} values", desc, expected),
        format!("struct with {} values", got),
    )
}

/// Read every member of an aggregate descriptor from `bytes`.
pub(super) fn read_aggregate(desc: &TypeDesc, bytes: &[u8]) -> FfiResult<ForeignValue> {
    let values = match desc {
        TypeDesc::Struct(st) => st
            .fields()
            .map(|(offset, member)| ForeignValue::from_bytes(member, &bytes[offset..]))
            .collect::<FfiResult<Vec<_>>>()?,
        TypeDesc::Array(array) => {
            let stride = array.stride();
            (0..array.length())
                .map(|i| ForeignValue::from_bytes(array.element(), &bytes[i * stride..]))
                .collect::<FfiResult<Vec<_>>>()?
        }
        _ => {
            return Err(FfiError::type_mismatch(
                "struct or array",
                desc.to_string(),
            ))
        }
    };
    Ok(ForeignValue::Struct(values))
}

/// Write a `ForeignValue::Struct` through an aggregate descriptor. The
/// value count must match exactly.
pub(super) fn write_aggregate(
    desc: &TypeDesc,
    value: &ForeignValue,
    out: &mut [u8],
) -> FfiResult<()> {
    let values = match value {
        ForeignValue::Struct(values) => values,
        other => {
            return Err(FfiError::type_mismatch(
                desc.to_string(),
                other.tag_name(),
            ))
        }
    };
    match desc {
        TypeDesc::Struct(st) => {
            if values.len() != st.members().len() {
                return Err(count_mismatch(desc, values.len()));
            }
            for ((offset, member), value) in st.fields().zip(values) {
                value.write_into(member, &mut out[offset..])?;
            }
        }
        TypeDesc::Array(array) => {
            if values.len() != array.length() {
                return Err(count_mismatch(desc, values.len()));
            }
            let stride = array.stride();
            for (i, value) in values.iter().enumerate() {
                value.write_into(array.element(), &mut out[i * stride..])?;
            }
        }
        _ => {
            return Err(FfiError::type_mismatch(
                "struct or array",
                desc.to_string(),
            ))
        }
    }
    Ok(())
}
