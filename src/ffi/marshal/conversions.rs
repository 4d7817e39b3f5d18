use super::cvalue::ForeignValue;
use super::struct_marshal;
use crate::error::{FfiError, FfiResult};
use crate::ffi::extended;
use crate::ffi::memory::{AlignedBuffer, ValueBuffer};
use crate::ffi::types::{FloatKind, IntWidth, TypeDesc};
use crate::value::HostValue;
use std::mem::size_of;

fn mismatch(desc: &TypeDesc, value: &ForeignValue) -> FfiError {
    FfiError::type_mismatch(desc.to_string(), value.tag_name())
}

fn short_slice(desc: &TypeDesc, len: usize) -> FfiError {
    FfiError::out_of_bounds(format!("slice too short for {}", desc), 0, desc.size(), len)
}

/// Write the low `width` bytes of `bits` in native byte order.
fn write_int(width: IntWidth, bits: u64, out: &mut [u8]) {
    match width {
        IntWidth::W8 => out[..1].copy_from_slice(&(bits as u8).to_ne_bytes()),
        IntWidth::W16 => out[..2].copy_from_slice(&(bits as u16).to_ne_bytes()),
        IntWidth::W32 => out[..4].copy_from_slice(&(bits as u32).to_ne_bytes()),
        IntWidth::W64 => out[..8].copy_from_slice(&bits.to_ne_bytes()),
    }
}

fn read_int(width: IntWidth, signed: bool, bytes: &[u8]) -> ForeignValue {
    macro_rules! read {
        ($t:ty, $n:expr) => {{
            let mut raw = [0u8; $n];
            raw.copy_from_slice(&bytes[..$n]);
            <$t>::from_ne_bytes(raw)
        }};
    }
    match (width, signed) {
        (IntWidth::W8, true) => ForeignValue::SignedInt(read!(i8, 1) as i64),
        (IntWidth::W16, true) => ForeignValue::SignedInt(read!(i16, 2) as i64),
        (IntWidth::W32, true) => ForeignValue::SignedInt(read!(i32, 4) as i64),
        (IntWidth::W64, true) => ForeignValue::SignedInt(read!(i64, 8)),
        (IntWidth::W8, false) => ForeignValue::UnsignedInt(read!(u8, 1) as u64),
        (IntWidth::W16, false) => ForeignValue::UnsignedInt(read!(u16, 2) as u64),
        (IntWidth::W32, false) => ForeignValue::UnsignedInt(read!(u32, 4) as u64),
        (IntWidth::W64, false) => ForeignValue::UnsignedInt(read!(u64, 8)),
    }
}

fn write_float(kind: FloatKind, value: f64, out: &mut [u8]) {
    match kind {
        FloatKind::Float => out[..4].copy_from_slice(&(value as f32).to_ne_bytes()),
        FloatKind::Double => out[..8].copy_from_slice(&value.to_ne_bytes()),
        FloatKind::LongDouble => extended::encode_long_double(value, &mut out[..kind.size()]),
    }
}

fn read_float(kind: FloatKind, bytes: &[u8]) -> f64 {
    match kind {
        FloatKind::Float => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[..4]);
            f32::from_ne_bytes(raw) as f64
        }
        FloatKind::Double => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            f64::from_ne_bytes(raw)
        }
        FloatKind::LongDouble => extended::decode_long_double(&bytes[..kind.size()]),
    }
}

fn read_address(bytes: &[u8]) -> usize {
    let mut raw = [0u8; size_of::<usize>()];
    raw.copy_from_slice(&bytes[..size_of::<usize>()]);
    usize::from_ne_bytes(raw)
}

/// Sign-extend the low `bits` of `n`.
pub(crate) fn sign_extend(n: i64, bits: u32) -> i64 {
    let shift = 64 - bits;
    (n << shift) >> shift
}

pub(crate) fn zero_extend(n: u64, bits: u32) -> u64 {
    if bits == 64 {
        n
    } else {
        n & ((1u64 << bits) - 1)
    }
}

impl ForeignValue {
    /// Decode a value of type `desc` from the start of `bytes`.
    pub fn from_bytes(desc: &TypeDesc, bytes: &[u8]) -> FfiResult<ForeignValue> {
        if bytes.len() < desc.size() {
            return Err(short_slice(desc, bytes.len()));
        }
        Ok(match desc {
            TypeDesc::Void => ForeignValue::Unit,
            TypeDesc::Int { width, signed } => read_int(*width, *signed, bytes),
            TypeDesc::Float(kind) => ForeignValue::Float(read_float(*kind, bytes)),
            TypeDesc::Complex(kind) => {
                let re = read_float(*kind, bytes);
                let im = read_float(*kind, &bytes[kind.size()..]);
                ForeignValue::Complex(re, im)
            }
            TypeDesc::Pointer => ForeignValue::pointer(read_address(bytes)),
            TypeDesc::Array(_) | TypeDesc::Struct(_) => {
                return struct_marshal::read_aggregate(desc, bytes)
            }
        })
    }

    /// Encode into the first `desc.size()` bytes of `out`. Integers are
    /// truncated to the target width; floats are narrowed.
    pub fn write_into(&self, desc: &TypeDesc, out: &mut [u8]) -> FfiResult<()> {
        if out.len() < desc.size() {
            return Err(short_slice(desc, out.len()));
        }
        match (desc, self) {
            (TypeDesc::Void, ForeignValue::Unit) => {}
            (TypeDesc::Int { width, .. }, ForeignValue::SignedInt(n)) => {
                write_int(*width, *n as u64, out)
            }
            (TypeDesc::Int { width, .. }, ForeignValue::UnsignedInt(n)) => {
                write_int(*width, *n, out)
            }
            (TypeDesc::Float(kind), ForeignValue::Float(f)) => write_float(*kind, *f, out),
            (TypeDesc::Complex(kind), ForeignValue::Complex(re, im)) => {
                write_float(*kind, *re, out);
                write_float(*kind, *im, &mut out[kind.size()..]);
            }
            (TypeDesc::Pointer, ForeignValue::PointerRef(target)) => {
                out[..size_of::<usize>()].copy_from_slice(&target.address().to_ne_bytes())
            }
            (TypeDesc::Array(_) | TypeDesc::Struct(_), ForeignValue::Struct(_)) => {
                struct_marshal::write_aggregate(desc, self, out)?
            }
            _ => return Err(mismatch(desc, self)),
        }
        Ok(())
    }

    pub fn to_bytes(&self, desc: &TypeDesc) -> FfiResult<Vec<u8>> {
        let size = desc.size();
        let mut out = Vec::new();
        out.try_reserve_exact(size)
            .map_err(|e| FfiError::allocation_failed(size, e.to_string()))?;
        out.resize(size, 0);
        self.write_into(desc, &mut out)?;
        Ok(out)
    }

    /// Marshal into a freshly allocated buffer of `desc.size()` bytes.
    pub fn to_buffer(&self, desc: &TypeDesc) -> FfiResult<ValueBuffer> {
        let mut storage = AlignedBuffer::zeroed(desc.size())?;
        self.write_into(desc, storage.as_mut_slice())?;
        Ok(ValueBuffer::from_aligned(storage))
    }

    pub fn from_buffer(desc: &TypeDesc, buffer: &ValueBuffer) -> FfiResult<ForeignValue> {
        buffer.read_typed(desc, 0)
    }

    /// Unbox a host value by its tag.
    pub fn from_host_value(value: &HostValue) -> FfiResult<ForeignValue> {
        Ok(match value {
            HostValue::Unit => ForeignValue::Unit,
            HostValue::Int(n) => ForeignValue::SignedInt(*n),
            HostValue::Nat(n) => ForeignValue::UnsignedInt(*n),
            HostValue::Float(f) => ForeignValue::Float(*f),
            HostValue::Complex(re, im) => ForeignValue::Complex(*re, *im),
            HostValue::Struct(members) => ForeignValue::Struct(
                members
                    .iter()
                    .map(ForeignValue::from_host_value)
                    .collect::<FfiResult<Vec<_>>>()?,
            ),
            HostValue::Pointer(buffer) => ForeignValue::PointerRef(buffer.clone()),
            // A closure stands for its entry point, so it can be passed
            // wherever a function pointer is expected.
            HostValue::Closure(closure) => ForeignValue::pointer(closure.code_ptr()),
            other => {
                return Err(FfiError::type_mismatch(
                    "unit, int, nat, float, complex, struct or pointer",
                    other.type_name(),
                ))
            }
        })
    }

    /// Box into a host value, checked against `desc`.
    pub fn to_host_value(&self, desc: &TypeDesc) -> FfiResult<HostValue> {
        Ok(match (desc, self) {
            (TypeDesc::Void, ForeignValue::Unit) => HostValue::Unit,
            (TypeDesc::Int { width, signed: true }, ForeignValue::SignedInt(n)) => {
                HostValue::Int(sign_extend(*n, width.bits()))
            }
            (TypeDesc::Int { width, signed: false }, ForeignValue::UnsignedInt(n)) => {
                HostValue::Nat(zero_extend(*n, width.bits()))
            }
            (TypeDesc::Float(_), ForeignValue::Float(f)) => HostValue::Float(*f),
            (TypeDesc::Complex(_), ForeignValue::Complex(re, im)) => HostValue::Complex(*re, *im),
            (TypeDesc::Pointer, ForeignValue::PointerRef(buffer)) => {
                HostValue::Pointer(buffer.clone())
            }
            (TypeDesc::Struct(st), ForeignValue::Struct(values)) => {
                if values.len() != st.members().len() {
                    return Err(struct_marshal::count_mismatch(desc, values.len()));
                }
                HostValue::Struct(
                    st.members()
                        .iter()
                        .zip(values)
                        .map(|(member, value)| value.to_host_value(member))
                        .collect::<FfiResult<Vec<_>>>()?,
                )
            }
            (TypeDesc::Array(array), ForeignValue::Struct(values)) => {
                if values.len() != array.length() {
                    return Err(struct_marshal::count_mismatch(desc, values.len()));
                }
                HostValue::Struct(
                    values
                        .iter()
                        .map(|value| value.to_host_value(array.element()))
                        .collect::<FfiResult<Vec<_>>>()?,
                )
            }
            _ => return Err(mismatch(desc, self)),
        })
    }
}
