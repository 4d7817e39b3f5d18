//! Declarative type descriptions supplied by the host.
//!
//! The host describes C types with a small tagged tree. It arrives as JSON
//! or any other serde format and is resolved into a [`TypeDesc`], which
//! computes the layout.

use super::types::{CAlias, FloatKind, TypeDesc};
use crate::error::{FfiError, FfiResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDescription {
    Void,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    LongDouble,
    ComplexFloat,
    ComplexDouble,
    ComplexLongDouble,
    Pointer,
    Array {
        element: Box<TypeDescription>,
        /// Signed so that a negative length from the host is caught here
        /// instead of wrapping.
        length: i64,
    },
    Struct {
        members: Vec<TypeDescription>,
    },
    Union {
        members: Vec<TypeDescription>,
    },
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Ssize,
    Uchar,
    Ushort,
    Uint,
    Ulong,
    UlongLong,
    Size,
    Time,
}

impl TypeDescription {
    pub fn from_json(text: &str) -> FfiResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| FfiError::unsupported_type(format!("invalid type description: {}", e)))
    }

    pub fn to_json(&self) -> String {
        // A tree of unit and struct variants always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl TypeDesc {
    /// Recursively resolve a host type description.
    pub fn from_description(desc: &TypeDescription) -> FfiResult<TypeDesc> {
        use TypeDescription as D;
        Ok(match desc {
            D::Void => TypeDesc::Void,
            D::Int8 => TypeDesc::I8,
            D::Int16 => TypeDesc::I16,
            D::Int32 => TypeDesc::I32,
            D::Int64 => TypeDesc::I64,
            D::Uint8 => TypeDesc::U8,
            D::Uint16 => TypeDesc::U16,
            D::Uint32 => TypeDesc::U32,
            D::Uint64 => TypeDesc::U64,
            D::Float => TypeDesc::FLOAT,
            D::Double => TypeDesc::DOUBLE,
            D::LongDouble => TypeDesc::LONG_DOUBLE,
            D::ComplexFloat => TypeDesc::Complex(FloatKind::Float),
            D::ComplexDouble => TypeDesc::Complex(FloatKind::Double),
            D::ComplexLongDouble => TypeDesc::Complex(FloatKind::LongDouble),
            D::Pointer => TypeDesc::Pointer,
            D::Array { element, length } => {
                let length = usize::try_from(*length).map_err(|_| {
                    FfiError::unsupported_type(format!("malformed array length {}", length))
                })?;
                let element = TypeDesc::from_description(element)?;
                TypeDesc::array(element, length)?
            }
            D::Struct { members } => {
                let members = members
                    .iter()
                    .map(TypeDesc::from_description)
                    .collect::<FfiResult<Vec<_>>>()?;
                TypeDesc::structure(members)?
            }
            D::Union { .. } => {
                return Err(FfiError::unsupported_type("union types are not supported"))
            }
            D::Char => CAlias::Char.resolve(),
            D::Short => CAlias::Short.resolve(),
            D::Int => CAlias::Int.resolve(),
            D::Long => CAlias::Long.resolve(),
            D::LongLong => CAlias::LongLong.resolve(),
            D::Ssize => CAlias::SSize.resolve(),
            D::Uchar => CAlias::UChar.resolve(),
            D::Ushort => CAlias::UShort.resolve(),
            D::Uint => CAlias::UInt.resolve(),
            D::Ulong => CAlias::ULong.resolve(),
            D::UlongLong => CAlias::ULongLong.resolve(),
            D::Size => CAlias::Size.resolve(),
            D::Time => CAlias::Time.resolve(),
        })
    }
}
