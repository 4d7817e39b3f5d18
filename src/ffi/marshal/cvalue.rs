use crate::ffi::memory::ValueBuffer;

/// A runtime value in C terms. Only meaningful relative to a
/// [`TypeDesc`](crate::ffi::types::TypeDesc); the same value may be
/// written through any descriptor whose shape it matches.
#[derive(Debug, Clone)]
pub enum ForeignValue {
    /// The value of `void`
    Unit,
    /// Any signed integer, sign-extended to 64 bits
    SignedInt(i64),
    /// Any unsigned integer, zero-extended to 64 bits
    UnsignedInt(u64),
    /// `float`, `double` and `long double`, held at double precision
    Float(f64),
    /// Real and imaginary parts
    Complex(f64, f64),
    /// An address, plus whatever region it points into
    PointerRef(ValueBuffer),
    /// Struct members or array elements, in order
    Struct(Vec<ForeignValue>),
}

impl ForeignValue {
    /// A pointer value with no known extent.
    pub fn pointer(address: usize) -> Self {
        ForeignValue::PointerRef(ValueBuffer::pointer_to(address))
    }

    pub fn null() -> Self {
        ForeignValue::PointerRef(ValueBuffer::null())
    }

    pub fn tag_name(&self) -> &'static str {
        match self {
            ForeignValue::Unit => "unit",
            ForeignValue::SignedInt(_) => "signed integer",
            ForeignValue::UnsignedInt(_) => "unsigned integer",
            ForeignValue::Float(_) => "float",
            ForeignValue::Complex(..) => "complex",
            ForeignValue::PointerRef(_) => "pointer",
            ForeignValue::Struct(_) => "struct",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ForeignValue::SignedInt(n) => Some(*n),
            ForeignValue::UnsignedInt(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ForeignValue::UnsignedInt(n) => Some(*n),
            ForeignValue::SignedInt(n) => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ForeignValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<usize> {
        match self {
            ForeignValue::PointerRef(buf) => Some(buf.address()),
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&[ForeignValue]> {
        match self {
            ForeignValue::Struct(members) => Some(members),
            _ => None,
        }
    }
}

/// Pointers compare by address; everything else structurally.
impl PartialEq for ForeignValue {
    fn eq(&self, other: &Self) -> bool {
        use ForeignValue::*;
        match (self, other) {
            (Unit, Unit) => true,
            (SignedInt(a), SignedInt(b)) => a == b,
            (UnsignedInt(a), UnsignedInt(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Complex(ar, ai), Complex(br, bi)) => ar == br && ai == bi,
            (PointerRef(a), PointerRef(b)) => a.address() == b.address(),
            (Struct(a), Struct(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for ForeignValue {
    fn from(n: i64) -> Self {
        ForeignValue::SignedInt(n)
    }
}

impl From<i32> for ForeignValue {
    fn from(n: i32) -> Self {
        ForeignValue::SignedInt(n as i64)
    }
}

impl From<u64> for ForeignValue {
    fn from(n: u64) -> Self {
        ForeignValue::UnsignedInt(n)
    }
}

impl From<f64> for ForeignValue {
    fn from(f: f64) -> Self {
        ForeignValue::Float(f)
    }
}
