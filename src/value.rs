//! Host-side values.
//!
//! [`HostValue`] is what crosses the boundary between the host runtime and
//! the marshaling engine. The first seven variants carry data and use the
//! host's fixed tag numbering; the rest are opaque object handles. Handles
//! are reference counted: cloning a value retains it, dropping releases it.

use crate::error::{FfiError, FfiResult};
use crate::ffi::call::Function;
use crate::ffi::callback::CallbackTrampoline;
use crate::ffi::description::TypeDescription;
use crate::ffi::loader::Library;
use crate::ffi::memory::ValueBuffer;
use crate::ffi::symbol::Symbol;
use std::fmt;
use std::sync::Arc;

/// A host procedure that native code can reach through a closure.
pub type HostProcedure = Arc<dyn Fn(&[HostValue]) -> HostResult + Send + Sync>;

pub const TAG_UNIT: u8 = 0;
pub const TAG_INT: u8 = 1;
pub const TAG_NAT: u8 = 2;
pub const TAG_FLOAT: u8 = 3;
pub const TAG_COMPLEX: u8 = 4;
pub const TAG_STRUCT: u8 = 5;
pub const TAG_POINTER: u8 = 6;

/// Function arity specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn matches(&self, n: usize) -> bool {
        match self {
            Arity::Exact(expected) => n == *expected,
            Arity::AtLeast(min) => n >= *min,
            Arity::Range(min, max) => n >= *min && n <= *max,
        }
    }

    /// The bound an argument count of `n` violated.
    fn nearest(&self, n: usize) -> usize {
        match self {
            Arity::Exact(expected) => *expected,
            Arity::AtLeast(min) => *min,
            Arity::Range(min, max) => {
                if n < *min {
                    *min
                } else {
                    *max
                }
            }
        }
    }

    pub fn check(&self, n: usize) -> FfiResult<()> {
        if self.matches(n) {
            Ok(())
        } else {
            Err(FfiError::argument_count(self.nearest(n), n))
        }
    }
}

#[derive(Clone)]
pub enum HostValue {
    Unit,
    Int(i64),
    Nat(u64),
    Float(f64),
    Complex(f64, f64),
    Struct(Vec<HostValue>),
    Pointer(ValueBuffer),
    Bytes(Vec<u8>),
    String(String),
    Type(TypeDescription),
    Library(Arc<Library>),
    Symbol(Arc<Symbol>),
    Function(Arc<Function>),
    Closure(Arc<CallbackTrampoline>),
    Procedure(HostProcedure),
}

impl HostValue {
    /// The host tag for data values; `None` for object handles.
    pub fn tag(&self) -> Option<u8> {
        Some(match self {
            HostValue::Unit => TAG_UNIT,
            HostValue::Int(_) => TAG_INT,
            HostValue::Nat(_) => TAG_NAT,
            HostValue::Float(_) => TAG_FLOAT,
            HostValue::Complex(..) => TAG_COMPLEX,
            HostValue::Struct(_) => TAG_STRUCT,
            HostValue::Pointer(_) => TAG_POINTER,
            _ => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Unit => "unit",
            HostValue::Int(_) => "int",
            HostValue::Nat(_) => "nat",
            HostValue::Float(_) => "float",
            HostValue::Complex(..) => "complex",
            HostValue::Struct(_) => "struct",
            HostValue::Pointer(_) => "pointer",
            HostValue::Bytes(_) => "bytes",
            HostValue::String(_) => "string",
            HostValue::Type(_) => "type",
            HostValue::Library(_) => "library",
            HostValue::Symbol(_) => "symbol",
            HostValue::Function(_) => "function",
            HostValue::Closure(_) => "closure",
            HostValue::Procedure(_) => "procedure",
        }
    }

    fn expected(&self, what: &str) -> FfiError {
        FfiError::type_mismatch(what, self.type_name())
    }

    /// A non-negative integer, as a size or offset.
    pub fn as_usize(&self) -> FfiResult<usize> {
        match self {
            HostValue::Nat(n) => usize::try_from(*n).map_err(|_| self.expected("size")),
            HostValue::Int(n) => usize::try_from(*n).map_err(|_| {
                FfiError::type_mismatch("non-negative int", format!("int {}", n))
            }),
            _ => Err(self.expected("nat")),
        }
    }

    pub fn as_str(&self) -> FfiResult<&str> {
        match self {
            HostValue::String(s) => Ok(s),
            _ => Err(self.expected("string")),
        }
    }

    pub fn as_bytes(&self) -> FfiResult<&[u8]> {
        match self {
            HostValue::Bytes(b) => Ok(b),
            _ => Err(self.expected("bytes")),
        }
    }

    pub fn as_type(&self) -> FfiResult<&TypeDescription> {
        match self {
            HostValue::Type(t) => Ok(t),
            _ => Err(self.expected("type")),
        }
    }

    pub fn as_struct(&self) -> FfiResult<&[HostValue]> {
        match self {
            HostValue::Struct(members) => Ok(members),
            _ => Err(self.expected("struct")),
        }
    }

    pub fn as_pointer(&self) -> FfiResult<&ValueBuffer> {
        match self {
            HostValue::Pointer(buffer) => Ok(buffer),
            _ => Err(self.expected("pointer")),
        }
    }

    pub fn as_library(&self) -> FfiResult<&Arc<Library>> {
        match self {
            HostValue::Library(lib) => Ok(lib),
            _ => Err(self.expected("library")),
        }
    }

    pub fn as_symbol(&self) -> FfiResult<&Arc<Symbol>> {
        match self {
            HostValue::Symbol(sym) => Ok(sym),
            _ => Err(self.expected("symbol")),
        }
    }

    pub fn as_function(&self) -> FfiResult<&Arc<Function>> {
        match self {
            HostValue::Function(f) => Ok(f),
            _ => Err(self.expected("function")),
        }
    }

    pub fn as_closure(&self) -> FfiResult<&Arc<CallbackTrampoline>> {
        match self {
            HostValue::Closure(c) => Ok(c),
            _ => Err(self.expected("closure")),
        }
    }

    pub fn as_procedure(&self) -> FfiResult<&HostProcedure> {
        match self {
            HostValue::Procedure(p) => Ok(p),
            _ => Err(self.expected("procedure")),
        }
    }
}

/// Data compares structurally, pointers by address, handles by identity.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Unit, Unit) => true,
            (Int(a), Int(b)) => a == b,
            (Nat(a), Nat(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Complex(ar, ai), Complex(br, bi)) => ar == br && ai == bi,
            (Struct(a), Struct(b)) => a == b,
            (Pointer(a), Pointer(b)) => a.address() == b.address(),
            (Bytes(a), Bytes(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Type(a), Type(b)) => a == b,
            (Library(a), Library(b)) => Arc::ptr_eq(a, b),
            (Symbol(a), Symbol(b)) => Arc::ptr_eq(a, b),
            (Function(a), Function(b)) => Arc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => Arc::ptr_eq(a, b),
            (Procedure(a), Procedure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Unit => write!(f, "()"),
            HostValue::Int(n) => write!(f, "{}", n),
            HostValue::Nat(n) => write!(f, "{}u", n),
            HostValue::Float(x) => write!(f, "{:?}", x),
            HostValue::Complex(re, im) => write!(f, "{:?}+{:?}i", re, im),
            HostValue::Struct(members) => f.debug_list().entries(members).finish(),
            HostValue::Pointer(buffer) => write!(f, "{:?}", buffer),
            HostValue::Bytes(bytes) => write!(f, "#bytes{:?}", bytes),
            HostValue::String(s) => write!(f, "{:?}", s),
            HostValue::Type(t) => write!(f, "<type {:?}>", t),
            HostValue::Library(lib) => write!(f, "<library {}>", lib.name()),
            HostValue::Symbol(sym) => write!(f, "<symbol {}>", sym.name()),
            HostValue::Function(func) => write!(f, "<function {}>", func.symbol().name()),
            HostValue::Closure(c) => write!(f, "<closure {:#x}>", c.code_ptr()),
            HostValue::Procedure(_) => write!(f, "<procedure>"),
        }
    }
}

/// The tagged result of every host entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum HostResult {
    Ok(HostValue),
    Error { kind: &'static str, message: String },
}

impl HostResult {
    pub fn error(kind: &'static str, message: impl Into<String>) -> Self {
        HostResult::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HostResult::Ok(_))
    }

    pub fn ok(self) -> Option<HostValue> {
        match self {
            HostResult::Ok(value) => Some(value),
            HostResult::Error { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<&'static str> {
        match self {
            HostResult::Ok(_) => None,
            HostResult::Error { kind, .. } => Some(kind),
        }
    }
}

impl From<FfiResult<HostValue>> for HostResult {
    fn from(result: FfiResult<HostValue>) -> Self {
        match result {
            Ok(value) => HostResult::Ok(value),
            Err(e) => HostResult::Error {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}
