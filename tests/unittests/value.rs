// Unit tests for host values and their conversion to foreign values.

use dynffi::ffi::types::FloatKind;
use dynffi::ffi::{ForeignValue, TypeDesc, ValueBuffer};
use dynffi::value::Arity;
use dynffi::{HostResult, HostValue};

#[test]
fn test_int_narrows_on_write() {
    let foreign = ForeignValue::from_host_value(&HostValue::Int(0x1_0000_0005)).unwrap();
    let bytes = foreign.to_bytes(&TypeDesc::I32).unwrap();
    assert_eq!(bytes, 5i32.to_ne_bytes().to_vec());
}

#[test]
fn test_signed_read_extends() {
    let foreign = ForeignValue::from_bytes(&TypeDesc::I8, &[0xff]).unwrap();
    assert_eq!(foreign.to_host_value(&TypeDesc::I8).unwrap(), HostValue::Int(-1));
    let foreign = ForeignValue::from_bytes(&TypeDesc::U8, &[0xff]).unwrap();
    assert_eq!(foreign.to_host_value(&TypeDesc::U8).unwrap(), HostValue::Nat(255));
}

#[test]
fn test_signedness_mismatch_on_box() {
    let err = ForeignValue::SignedInt(3)
        .to_host_value(&TypeDesc::U32)
        .unwrap_err();
    assert_eq!(err.kind(), "type-mismatch");
}

#[test]
fn test_struct_member_count_checked() {
    let desc = TypeDesc::structure(vec![TypeDesc::I32, TypeDesc::I32]).unwrap();
    let host = HostValue::Struct(vec![HostValue::Int(1)]);
    let foreign = ForeignValue::from_host_value(&host).unwrap();
    assert!(foreign.to_bytes(&desc).is_err());
}

#[test]
fn test_complex_roundtrip() {
    let desc = TypeDesc::Complex(FloatKind::Double);
    let host = HostValue::Complex(1.5, -2.0);
    let bytes = ForeignValue::from_host_value(&host)
        .unwrap()
        .to_bytes(&desc)
        .unwrap();
    let back = ForeignValue::from_bytes(&desc, &bytes)
        .unwrap()
        .to_host_value(&desc)
        .unwrap();
    assert_eq!(back, host);
}

#[test]
fn test_pointer_equality_is_by_address() {
    let buf = ValueBuffer::allocate(8).unwrap();
    let a = HostValue::Pointer(buf.clone());
    let b = HostValue::Pointer(buf.slice(0, 8).unwrap());
    assert_eq!(a, b);
    assert_ne!(a, HostValue::Pointer(ValueBuffer::allocate(8).unwrap()));
}

#[test]
fn test_handles_have_no_tag() {
    assert_eq!(HostValue::String("x".into()).tag(), None);
    assert_eq!(HostValue::Pointer(ValueBuffer::null()).tag(), Some(6));
}

#[test]
fn test_float_to_int_descriptor_is_mismatch() {
    let foreign = ForeignValue::from_host_value(&HostValue::Float(1.0)).unwrap();
    let err = foreign.to_bytes(&TypeDesc::I32).unwrap_err();
    assert_eq!(err.kind(), "type-mismatch");
}

#[test]
fn test_arity_ranges() {
    assert!(Arity::Range(2, 3).matches(2));
    assert!(Arity::Range(2, 3).matches(3));
    assert!(!Arity::Exact(1).matches(0));
    assert!(Arity::AtLeast(0).matches(100));
}

#[test]
fn test_host_result_accessors() {
    let ok = HostResult::Ok(HostValue::Unit);
    assert!(ok.is_ok());
    assert_eq!(ok.ok(), Some(HostValue::Unit));
    let err = HostResult::error("out-of-bounds", "nope");
    assert_eq!(err.error_kind(), Some("out-of-bounds"));
    assert_eq!(err.ok(), None);
}
