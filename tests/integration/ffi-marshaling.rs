// Scalar and pointer marshaling through prepared call interfaces.

use dynffi::ffi::types::FloatKind;
use dynffi::ffi::{CallInterface, ForeignValue, TypeDesc, ValueBuffer};

extern "C" fn mix(a: i8, b: u16, c: f32, d: f64, e: i64) -> f64 {
    a as f64 + b as f64 + c as f64 + d + e as f64
}

extern "C" fn many(a: i32, b: i32, c: i32, d: i32, e: i32, f: i32, g: i32, h: i32, i: i32, j: i32) -> i64 {
    [a, b, c, d, e, f, g, h, i, j]
        .iter()
        .enumerate()
        .map(|(k, v)| (k as i64 + 1) * *v as i64)
        .sum()
}

extern "C" fn fill(out: *mut u32, n: usize) {
    for i in 0..n {
        unsafe { *out.add(i) = (i as u32 + 1) * 10 };
    }
}

extern "C" fn identity_ptr(p: *const u8) -> *const u8 {
    p
}

extern "C" fn min_i64() -> i64 {
    i64::MIN
}

extern "C" fn max_u64() -> u64 {
    u64::MAX
}

extern "C" fn half(x: f32) -> f32 {
    x / 2.0
}

// Same layout and calling convention as `double _Complex` on the
// supported targets.
#[repr(C)]
#[derive(Clone, Copy)]
struct Cplx {
    re: f64,
    im: f64,
}

extern "C" fn conj(z: Cplx) -> Cplx {
    Cplx { re: z.re, im: -z.im }
}

#[test]
fn test_mixed_scalar_arguments() {
    let iface = CallInterface::prepare(
        TypeDesc::DOUBLE,
        vec![TypeDesc::I8, TypeDesc::U16, TypeDesc::FLOAT, TypeDesc::DOUBLE, TypeDesc::I64],
    )
    .unwrap();
    let result = unsafe {
        iface.invoke(
            mix as usize,
            &[
                ForeignValue::SignedInt(-3),
                ForeignValue::UnsignedInt(1000),
                ForeignValue::Float(0.5),
                ForeignValue::Float(0.25),
                ForeignValue::SignedInt(1 << 40),
            ],
        )
    };
    assert_eq!(
        result.unwrap(),
        ForeignValue::Float(-3.0 + 1000.0 + 0.5 + 0.25 + (1u64 << 40) as f64)
    );
}

#[test]
fn test_arguments_spill_to_stack() {
    let iface = CallInterface::prepare(TypeDesc::I64, vec![TypeDesc::I32; 10]).unwrap();
    let args: Vec<_> = (1..=10).map(ForeignValue::SignedInt).collect();
    let result = unsafe { iface.invoke(many as usize, &args) };
    let expected: i64 = (1..=10).map(|k| k * k).sum();
    assert_eq!(result.unwrap(), ForeignValue::SignedInt(expected));
}

#[test]
fn test_out_buffer_is_written() {
    let iface = CallInterface::prepare(TypeDesc::Void, vec![TypeDesc::Pointer, TypeDesc::U64]).unwrap();
    let buf = ValueBuffer::allocate(16).unwrap();
    let result = unsafe {
        iface.invoke(
            fill as usize,
            &[ForeignValue::PointerRef(buf.clone()), ForeignValue::UnsignedInt(4)],
        )
    };
    assert_eq!(result.unwrap(), ForeignValue::Unit);
    let arr = TypeDesc::array(TypeDesc::U32, 4).unwrap();
    assert_eq!(
        buf.read_typed(&arr, 0).unwrap(),
        ForeignValue::Struct((1..=4).map(|i| ForeignValue::UnsignedInt(i * 10)).collect())
    );
}

#[test]
fn test_pointer_return_is_foreign_view() {
    let iface = CallInterface::prepare(TypeDesc::Pointer, vec![TypeDesc::Pointer]).unwrap();
    let buf = ValueBuffer::from_foreign_bytes(b"abc").unwrap();
    let result = unsafe { iface.invoke(identity_ptr as usize, &[ForeignValue::PointerRef(buf.clone())]) }
        .unwrap();
    let ForeignValue::PointerRef(view) = result else {
        panic!("expected pointer");
    };
    assert_eq!(view.address(), buf.address());
    assert!(!view.is_owned());
    assert_eq!(view.len(), 0);
}

#[test]
fn test_null_pointer_roundtrip() {
    let iface = CallInterface::prepare(TypeDesc::Pointer, vec![TypeDesc::Pointer]).unwrap();
    let result = unsafe { iface.invoke(identity_ptr as usize, &[ForeignValue::null()]) }.unwrap();
    assert_eq!(result.as_address(), Some(0));
}

#[test]
fn test_extreme_integer_returns() {
    let iface = CallInterface::prepare(TypeDesc::I64, vec![]).unwrap();
    assert_eq!(
        unsafe { iface.invoke(min_i64 as usize, &[]) }.unwrap(),
        ForeignValue::SignedInt(i64::MIN)
    );
    let iface = CallInterface::prepare(TypeDesc::U64, vec![]).unwrap();
    assert_eq!(
        unsafe { iface.invoke(max_u64 as usize, &[]) }.unwrap(),
        ForeignValue::UnsignedInt(u64::MAX)
    );
}

#[test]
fn test_float_narrowing() {
    let iface = CallInterface::prepare(TypeDesc::FLOAT, vec![TypeDesc::FLOAT]).unwrap();
    let result = unsafe { iface.invoke(half as usize, &[ForeignValue::Float(3.0)]) };
    assert_eq!(result.unwrap(), ForeignValue::Float(1.5));
}

#[test]
fn test_complex_double_by_value() {
    let desc = TypeDesc::Complex(FloatKind::Double);
    let iface = CallInterface::prepare(desc.clone(), vec![desc]).unwrap();
    let result = unsafe { iface.invoke(conj as usize, &[ForeignValue::Complex(1.0, 2.0)]) };
    assert_eq!(result.unwrap(), ForeignValue::Complex(1.0, -2.0));
}

#[test]
fn test_null_code_pointer() {
    let iface = CallInterface::prepare(TypeDesc::Void, vec![]).unwrap();
    let err = unsafe { iface.invoke(0, &[]) }.unwrap_err();
    assert_eq!(err.kind(), "preparation-failed");
}

#[cfg(all(
    target_os = "linux",
    target_env = "gnu",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
mod libm {
    use dynffi::ffi::{ForeignValue, Function, Library, OpenFlag, Symbol, TypeDesc};
    use dynffi::ffi::types::FloatKind;
    use std::sync::Arc;

    fn libm() -> Arc<Library> {
        Arc::new(Library::open("libm.so.6", &[OpenFlag::Now]).unwrap())
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_sqrtl_long_double() {
        let lib = libm();
        let sym = Arc::new(Symbol::resolve(&lib, "sqrtl").unwrap());
        let f = Function::new(sym, TypeDesc::LONG_DOUBLE, vec![TypeDesc::LONG_DOUBLE]).unwrap();
        let result = unsafe { f.call(&[ForeignValue::Float(6.25)]) };
        assert_eq!(result.unwrap(), ForeignValue::Float(2.5));
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn test_long_double_has_no_call_type() {
        let lib = libm();
        let sym = Arc::new(Symbol::resolve(&lib, "sqrtl").unwrap());
        let err = Function::new(sym, TypeDesc::LONG_DOUBLE, vec![TypeDesc::LONG_DOUBLE])
            .unwrap_err();
        assert_eq!(err.kind(), "preparation-failed");
    }

    #[test]
    fn test_cabsf_complex_float() {
        let lib = libm();
        let sym = Arc::new(Symbol::resolve(&lib, "cabsf").unwrap());
        let f = Function::new(
            sym,
            TypeDesc::FLOAT,
            vec![TypeDesc::Complex(FloatKind::Float)],
        )
        .unwrap();
        let result = unsafe { f.call(&[ForeignValue::Complex(3.0, 4.0)]) };
        assert_eq!(result.unwrap(), ForeignValue::Float(5.0));
    }

    #[test]
    fn test_cabs_complex_double() {
        let lib = libm();
        let sym = Arc::new(Symbol::resolve(&lib, "cabs").unwrap());
        let f = Function::new(
            sym,
            TypeDesc::DOUBLE,
            vec![TypeDesc::Complex(FloatKind::Double)],
        )
        .unwrap();
        let result = unsafe { f.call(&[ForeignValue::Complex(3.0, 4.0)]) };
        assert_eq!(result.unwrap(), ForeignValue::Float(5.0));
    }

    #[test]
    fn test_conjl_complex_long_double() {
        let lib = libm();
        let sym = Arc::new(Symbol::resolve(&lib, "conjl").unwrap());
        let cld = TypeDesc::Complex(FloatKind::LongDouble);
        let f = Function::new(sym, cld.clone(), vec![cld]).unwrap();
        let result = unsafe { f.call(&[ForeignValue::Complex(3.0, 4.0)]) };
        assert_eq!(result.unwrap(), ForeignValue::Complex(3.0, -4.0));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_cabsl_complex_long_double() {
        let lib = libm();
        let sym = Arc::new(Symbol::resolve(&lib, "cabsl").unwrap());
        let f = Function::new(
            sym,
            TypeDesc::LONG_DOUBLE,
            vec![TypeDesc::Complex(FloatKind::LongDouble)],
        )
        .unwrap();
        let result = unsafe { f.call(&[ForeignValue::Complex(3.0, 4.0)]) };
        assert_eq!(result.unwrap(), ForeignValue::Float(5.0));
    }
}
