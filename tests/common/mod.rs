//! Shared test helpers for the dynffi test suite.

#![allow(dead_code)]

use dynffi::ffi::TypeDescription;
use dynffi::{primitives, FfiSubsystem, HostResult, HostValue};

/// Call a host primitive, splitting the tagged result.
pub fn eval(
    ffi: &mut FfiSubsystem,
    name: &str,
    args: &[HostValue],
) -> Result<HostValue, (&'static str, String)> {
    match primitives::call(ffi, name, args) {
        HostResult::Ok(value) => Ok(value),
        HostResult::Error { kind, message } => Err((kind, message)),
    }
}

/// Call a host primitive that must succeed.
pub fn eval_ok(ffi: &mut FfiSubsystem, name: &str, args: &[HostValue]) -> HostValue {
    match eval(ffi, name, args) {
        Ok(value) => value,
        Err((kind, message)) => panic!("{} failed with {}: {}", name, kind, message),
    }
}

/// The error kind of a host primitive call that must fail.
pub fn eval_err(ffi: &mut FfiSubsystem, name: &str, args: &[HostValue]) -> &'static str {
    match eval(ffi, name, args) {
        Ok(value) => panic!("{} unexpectedly returned {:?}", name, value),
        Err((kind, _)) => kind,
    }
}

pub fn ty(desc: TypeDescription) -> HostValue {
    HostValue::Type(desc)
}

pub fn types(descs: Vec<TypeDescription>) -> HostValue {
    HostValue::Struct(descs.into_iter().map(HostValue::Type).collect())
}

pub fn string(s: &str) -> HostValue {
    HostValue::String(s.to_string())
}

/// Bind a symbol of the running process (libc is always loaded).
pub fn libc_function(
    ffi: &mut FfiSubsystem,
    name: &str,
    ret: TypeDescription,
    args: Vec<TypeDescription>,
) -> HostValue {
    let lib = eval_ok(ffi, "ffi/library-open", &[HostValue::Unit]);
    let sym = eval_ok(ffi, "ffi/symbol-lookup", &[lib, string(name)]);
    eval_ok(ffi, "ffi/function-new", &[sym, ty(ret), types(args)])
}

/// A NUL-terminated C string in an owned buffer.
pub fn c_string(ffi: &mut FfiSubsystem, s: &str) -> HostValue {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    eval_ok(ffi, "ffi/buffer-from-bytes", &[HostValue::Bytes(bytes)])
}
