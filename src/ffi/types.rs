//! C type descriptors and platform layout calculation.
//!
//! A [`TypeDesc`] is a strict tree describing a C type. Sizes, alignments
//! and member offsets of composites are computed once, when the tree is
//! built, by replaying the platform's sequential struct layout: every
//! member lands on the next offset that satisfies its alignment, the
//! aggregate is aligned to its most-aligned member, and trailing padding
//! rounds the total size up to that alignment.

use crate::error::{FfiError, FfiResult};
use libffi::middle::Type;
use std::ffi::{c_char, c_int, c_long, c_longlong, c_short, c_void};
use std::fmt;
use std::mem::{align_of, size_of};

/// Width of an integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(IntWidth::W8),
            2 => Some(IntWidth::W16),
            4 => Some(IntWidth::W32),
            8 => Some(IntWidth::W64),
            _ => None,
        }
    }

    fn alignment(self) -> usize {
        match self {
            IntWidth::W8 => align_of::<i8>(),
            IntWidth::W16 => align_of::<i16>(),
            IntWidth::W32 => align_of::<i32>(),
            IntWidth::W64 => align_of::<i64>(),
        }
    }
}

/// Precision of a floating point (or complex component) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    /// `float`, 32 bits
    Float,
    /// `double`, 64 bits
    Double,
    /// `long double`, nominally 80 bits; storage is platform dependent
    LongDouble,
}

impl FloatKind {
    pub fn bits(self) -> u32 {
        match self {
            FloatKind::Float => 32,
            FloatKind::Double => 64,
            FloatKind::LongDouble => 80,
        }
    }

    pub fn size(self) -> usize {
        match self {
            FloatKind::Float => size_of::<f32>(),
            FloatKind::Double => size_of::<f64>(),
            FloatKind::LongDouble => LONG_DOUBLE_SIZE,
        }
    }

    pub fn alignment(self) -> usize {
        match self {
            FloatKind::Float => align_of::<f32>(),
            FloatKind::Double => align_of::<f64>(),
            FloatKind::LongDouble => LONG_DOUBLE_ALIGN,
        }
    }
}

#[cfg(target_arch = "x86_64")]
const LONG_DOUBLE_SIZE: usize = 16;
#[cfg(target_arch = "x86_64")]
const LONG_DOUBLE_ALIGN: usize = 16;

#[cfg(target_arch = "x86")]
const LONG_DOUBLE_SIZE: usize = 12;
#[cfg(target_arch = "x86")]
const LONG_DOUBLE_ALIGN: usize = 4;

#[cfg(all(
    target_arch = "aarch64",
    not(target_vendor = "apple"),
    not(target_os = "windows")
))]
const LONG_DOUBLE_SIZE: usize = 16;
#[cfg(all(
    target_arch = "aarch64",
    not(target_vendor = "apple"),
    not(target_os = "windows")
))]
const LONG_DOUBLE_ALIGN: usize = 16;

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    all(
        target_arch = "aarch64",
        not(target_vendor = "apple"),
        not(target_os = "windows")
    )
)))]
const LONG_DOUBLE_SIZE: usize = 8;
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    all(
        target_arch = "aarch64",
        not(target_vendor = "apple"),
        not(target_os = "windows")
    )
)))]
const LONG_DOUBLE_ALIGN: usize = align_of::<f64>();

/// Fixed-length array layout. The element descriptor is kept even when
/// `length` is zero, since it still decides the array's alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDesc {
    element: Box<TypeDesc>,
    length: usize,
    size: usize,
}

impl ArrayDesc {
    pub fn element(&self) -> &TypeDesc {
        &self.element
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Stride between consecutive elements.
    pub fn stride(&self) -> usize {
        self.element.size()
    }
}

/// Struct layout with eagerly computed offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDesc {
    members: Vec<TypeDesc>,
    offsets: Vec<usize>,
    size: usize,
    align: usize,
}

impl StructDesc {
    pub fn members(&self) -> &[TypeDesc] {
        &self.members
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Iterate `(offset, member)` pairs in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (usize, &TypeDesc)> {
        self.offsets.iter().copied().zip(self.members.iter())
    }
}

/// A runtime description of a C type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
    Void,
    Int { width: IntWidth, signed: bool },
    Float(FloatKind),
    Complex(FloatKind),
    Pointer,
    Array(ArrayDesc),
    Struct(StructDesc),
}

fn align_up(offset: usize, align: usize) -> FfiResult<usize> {
    debug_assert!(align.is_power_of_two());
    offset
        .checked_add(align - 1)
        .map(|n| n & !(align - 1))
        .ok_or_else(|| FfiError::unsupported_type("aggregate size overflows usize"))
}

impl TypeDesc {
    pub const I8: TypeDesc = TypeDesc::Int {
        width: IntWidth::W8,
        signed: true,
    };
    pub const I16: TypeDesc = TypeDesc::Int {
        width: IntWidth::W16,
        signed: true,
    };
    pub const I32: TypeDesc = TypeDesc::Int {
        width: IntWidth::W32,
        signed: true,
    };
    pub const I64: TypeDesc = TypeDesc::Int {
        width: IntWidth::W64,
        signed: true,
    };
    pub const U8: TypeDesc = TypeDesc::Int {
        width: IntWidth::W8,
        signed: false,
    };
    pub const U16: TypeDesc = TypeDesc::Int {
        width: IntWidth::W16,
        signed: false,
    };
    pub const U32: TypeDesc = TypeDesc::Int {
        width: IntWidth::W32,
        signed: false,
    };
    pub const U64: TypeDesc = TypeDesc::Int {
        width: IntWidth::W64,
        signed: false,
    };
    pub const FLOAT: TypeDesc = TypeDesc::Float(FloatKind::Float);
    pub const DOUBLE: TypeDesc = TypeDesc::Float(FloatKind::Double);
    pub const LONG_DOUBLE: TypeDesc = TypeDesc::Float(FloatKind::LongDouble);

    /// Integer type of the given byte width.
    pub fn int(bytes: usize, signed: bool) -> FfiResult<TypeDesc> {
        let width = IntWidth::from_bytes(bytes).ok_or_else(|| {
            FfiError::unsupported_type(format!("no {}-byte integer type", bytes))
        })?;
        Ok(TypeDesc::Int { width, signed })
    }

    /// Build an array descriptor. Fails if the total size overflows.
    pub fn array(element: TypeDesc, length: usize) -> FfiResult<TypeDesc> {
        let size = element.size().checked_mul(length).ok_or_else(|| {
            FfiError::unsupported_type(format!(
                "array of {} x {} overflows usize",
                length, element
            ))
        })?;
        Ok(TypeDesc::Array(ArrayDesc {
            element: Box::new(element),
            length,
            size,
        }))
    }

    /// Build a struct descriptor, computing member offsets, alignment and
    /// trailing padding.
    pub fn structure(members: Vec<TypeDesc>) -> FfiResult<TypeDesc> {
        let mut offsets = Vec::with_capacity(members.len());
        let mut offset = 0usize;
        let mut align = 1usize;

        for member in &members {
            let member_align = member.alignment();
            offset = align_up(offset, member_align)?;
            offsets.push(offset);
            offset = offset
                .checked_add(member.size())
                .ok_or_else(|| FfiError::unsupported_type("struct size overflows usize"))?;
            align = align.max(member_align);
        }

        let size = align_up(offset, align)?;
        Ok(TypeDesc::Struct(StructDesc {
            members,
            offsets,
            size,
            align,
        }))
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            TypeDesc::Void => 0,
            TypeDesc::Int { width, .. } => width.bytes(),
            TypeDesc::Float(kind) => kind.size(),
            TypeDesc::Complex(kind) => kind.size() * 2,
            TypeDesc::Pointer => size_of::<*const c_void>(),
            TypeDesc::Array(array) => array.size,
            TypeDesc::Struct(st) => st.size,
        }
    }

    /// Alignment in bytes (at least 1).
    pub fn alignment(&self) -> usize {
        match self {
            TypeDesc::Void => 1,
            TypeDesc::Int { width, .. } => width.alignment(),
            TypeDesc::Float(kind) | TypeDesc::Complex(kind) => kind.alignment(),
            TypeDesc::Pointer => align_of::<*const c_void>(),
            TypeDesc::Array(array) => array.element.alignment(),
            TypeDesc::Struct(st) => st.align,
        }
    }

    /// One offset per member (structs) or element (arrays); `None` for
    /// every other type.
    pub fn member_offsets(&self) -> Option<Vec<usize>> {
        match self {
            TypeDesc::Struct(st) => Some(st.offsets.clone()),
            TypeDesc::Array(array) => {
                let stride = array.stride();
                Some((0..array.length).map(|i| i * stride).collect())
            }
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeDesc::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, TypeDesc::Int { .. })
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, TypeDesc::Int { signed: true, .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeDesc::Float(_))
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, TypeDesc::Complex(_))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, TypeDesc::Array(_) | TypeDesc::Struct(_))
    }

    /// Parse a keyword type name such as `i32`, `double`, `ptr` or a C
    /// alias like `long` or `size_t`.
    pub fn from_keyword(name: &str) -> Option<TypeDesc> {
        let name = name.strip_prefix(':').unwrap_or(name);
        Some(match name {
            "void" => TypeDesc::Void,
            "i8" | "int8" => TypeDesc::I8,
            "i16" | "int16" => TypeDesc::I16,
            "i32" | "int32" => TypeDesc::I32,
            "i64" | "int64" => TypeDesc::I64,
            "u8" | "uint8" => TypeDesc::U8,
            "u16" | "uint16" => TypeDesc::U16,
            "u32" | "uint32" => TypeDesc::U32,
            "u64" | "uint64" => TypeDesc::U64,
            "float" | "f32" => TypeDesc::FLOAT,
            "double" | "f64" => TypeDesc::DOUBLE,
            "longdouble" | "long-double" => TypeDesc::LONG_DOUBLE,
            "complex-float" => TypeDesc::Complex(FloatKind::Float),
            "complex-double" => TypeDesc::Complex(FloatKind::Double),
            "complex-longdouble" => TypeDesc::Complex(FloatKind::LongDouble),
            "ptr" | "pointer" => TypeDesc::Pointer,
            _ => return CAlias::from_name(name).map(CAlias::resolve),
        })
    }

    /// Build the libffi type used for call preparation.
    pub fn to_ffi_type(&self) -> FfiResult<Type> {
        Ok(match self {
            TypeDesc::Void => Type::void(),
            TypeDesc::Int { width, signed } => match (width, signed) {
                (IntWidth::W8, true) => Type::i8(),
                (IntWidth::W16, true) => Type::i16(),
                (IntWidth::W32, true) => Type::i32(),
                (IntWidth::W64, true) => Type::i64(),
                (IntWidth::W8, false) => Type::u8(),
                (IntWidth::W16, false) => Type::u16(),
                (IntWidth::W32, false) => Type::u32(),
                (IntWidth::W64, false) => Type::u64(),
            },
            TypeDesc::Float(FloatKind::Float) => Type::f32(),
            TypeDesc::Float(FloatKind::Double) => Type::f64(),
            #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
            TypeDesc::Float(FloatKind::LongDouble) => Type::longdouble(),
            // libffi exports no scalar long double type for these targets.
            #[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
            TypeDesc::Float(FloatKind::LongDouble) => {
                return Err(FfiError::preparation_failed(
                    "long double has no libffi type on this target",
                ))
            }
            TypeDesc::Complex(FloatKind::Float) => Type::c32(),
            TypeDesc::Complex(FloatKind::Double) => Type::c64(),
            #[cfg(not(target_arch = "arm"))]
            TypeDesc::Complex(FloatKind::LongDouble) => Type::complex_longdouble(),
            #[cfg(target_arch = "arm")]
            TypeDesc::Complex(FloatKind::LongDouble) => {
                return Err(FfiError::preparation_failed(
                    "complex long double has no libffi type on this target",
                ))
            }
            TypeDesc::Pointer => Type::pointer(),
            TypeDesc::Array(array) => {
                let element = array.element.to_ffi_type()?;
                let mut elements = Vec::new();
                elements.try_reserve_exact(array.length).map_err(|_| {
                    FfiError::preparation_failed(format!("{} is too large to pass by value", self))
                })?;
                elements.resize(array.length, element);
                Type::structure(elements)
            }
            TypeDesc::Struct(st) => {
                let members = st
                    .members
                    .iter()
                    .map(TypeDesc::to_ffi_type)
                    .collect::<FfiResult<Vec<_>>>()?;
                Type::structure(members)
            }
        })
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => write!(f, "void"),
            TypeDesc::Int { width, signed } => {
                let prefix = if *signed { "int" } else { "uint" };
                write!(f, "{}{}_t", prefix, width.bits())
            }
            TypeDesc::Float(FloatKind::Float) => write!(f, "float"),
            TypeDesc::Float(FloatKind::Double) => write!(f, "double"),
            TypeDesc::Float(FloatKind::LongDouble) => write!(f, "long double"),
            TypeDesc::Complex(FloatKind::Float) => write!(f, "float _Complex"),
            TypeDesc::Complex(FloatKind::Double) => write!(f, "double _Complex"),
            TypeDesc::Complex(FloatKind::LongDouble) => write!(f, "long double _Complex"),
            TypeDesc::Pointer => write!(f, "void *"),
            TypeDesc::Array(array) => write!(f, "{}[{}]", array.element, array.length),
            TypeDesc::Struct(st) => {
                write!(f, "struct {{")?;
                for (i, member) in st.members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}", member)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// C type names whose width depends on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CAlias {
    Char,
    Short,
    Int,
    Long,
    LongLong,
    SSize,
    UChar,
    UShort,
    UInt,
    ULong,
    ULongLong,
    Size,
    Time,
}

impl CAlias {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "char" => CAlias::Char,
            "short" => CAlias::Short,
            "int" => CAlias::Int,
            "long" => CAlias::Long,
            "longlong" | "long-long" => CAlias::LongLong,
            "ssize" | "ssize_t" => CAlias::SSize,
            "uchar" => CAlias::UChar,
            "ushort" => CAlias::UShort,
            "uint" => CAlias::UInt,
            "ulong" => CAlias::ULong,
            "ulonglong" | "ulong-long" => CAlias::ULongLong,
            "size" | "size_t" => CAlias::Size,
            "time" | "time_t" => CAlias::Time,
            _ => return None,
        })
    }

    /// Resolve the alias to a fixed-width integer for this platform.
    pub fn resolve(self) -> TypeDesc {
        let (bytes, signed) = match self {
            CAlias::Char => (size_of::<c_char>(), c_char::MIN != 0),
            CAlias::Short => (size_of::<c_short>(), true),
            CAlias::Int => (size_of::<c_int>(), true),
            CAlias::Long => (size_of::<c_long>(), true),
            CAlias::LongLong => (size_of::<c_longlong>(), true),
            CAlias::SSize => (size_of::<isize>(), true),
            CAlias::UChar => (size_of::<c_char>(), false),
            CAlias::UShort => (size_of::<c_short>(), false),
            CAlias::UInt => (size_of::<c_int>(), false),
            CAlias::ULong => (size_of::<c_long>(), false),
            CAlias::ULongLong => (size_of::<c_longlong>(), false),
            CAlias::Size => (size_of::<usize>(), false),
            CAlias::Time => (size_of::<libc::time_t>(), true),
        };
        match IntWidth::from_bytes(bytes) {
            Some(width) => TypeDesc::Int { width, signed },
            // Every supported target has 1/2/4/8-byte C integers.
            None => unreachable!("C integer of {} bytes", bytes),
        }
    }
}
