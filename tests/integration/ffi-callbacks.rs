// Callback trampolines: native code calling back into host handlers.

use crate::common::{eval, eval_err, eval_ok, libc_function, ty, types};
use dynffi::ffi::{CallInterface, CallbackTrampoline, ForeignValue, TypeDesc, TypeDescription as D};
use dynffi::value::HostProcedure;
use dynffi::{FfiError, FfiSubsystem, HostResult, HostValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

extern "C" fn apply_i32(cb: extern "C" fn(i32) -> i32, x: i32) -> i32 {
    cb(x)
}

extern "C" fn sum_with(cb: extern "C" fn(f64, f64) -> f64, n: i32) -> f64 {
    (0..n).map(|i| cb(i as f64, 0.5)).sum()
}

fn read_i32(pointer: &HostValue) -> i32 {
    let HostValue::Pointer(p) = pointer else {
        panic!("expected pointer, got {:?}", pointer);
    };
    // SAFETY: qsort hands the comparator pointers into the array it sorts.
    let view = unsafe { dynffi::ffi::ValueBuffer::from_address(p.address(), 4) };
    view.read_typed(&TypeDesc::I32, 0).unwrap().as_i64().unwrap() as i32
}

// ── Through the host entry points ───────────────────────────────────

#[test]
fn test_qsort_with_host_comparator() {
    let mut ffi = FfiSubsystem::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let compare: HostProcedure = Arc::new(move |args: &[HostValue]| {
        seen.fetch_add(1, Ordering::Relaxed);
        let (a, b) = (read_i32(&args[0]), read_i32(&args[1]));
        HostResult::Ok(HostValue::Int(a.cmp(&b) as i64))
    });
    let closure = eval_ok(
        &mut ffi,
        "ffi/closure-new",
        &[
            ty(D::Int),
            types(vec![D::Pointer, D::Pointer]),
            HostValue::Procedure(compare),
        ],
    );

    let array = D::Array {
        element: Box::new(D::Int32),
        length: 5,
    };
    let values = HostValue::Struct([5, -1, 3, 0, 9].map(HostValue::Int).to_vec());
    let base = eval_ok(&mut ffi, "ffi/buffer-from-value", &[ty(array.clone()), values]);

    let qsort = libc_function(
        &mut ffi,
        "qsort",
        D::Void,
        vec![D::Pointer, D::Size, D::Size, D::Pointer],
    );
    eval_ok(
        &mut ffi,
        "ffi/function-call",
        &[
            qsort,
            base.clone(),
            HostValue::Nat(5),
            HostValue::Nat(4),
            closure.clone(),
        ],
    );

    assert_eq!(
        eval_ok(&mut ffi, "ffi/buffer-read", &[base, ty(array)]),
        HostValue::Struct([-1, 0, 3, 5, 9].map(HostValue::Int).to_vec())
    );
    assert!(calls.load(Ordering::Relaxed) > 0);
    eval_ok(&mut ffi, "ffi/closure-delete", &[closure]);
}

#[test]
fn test_closure_pointer_matches_code_address() {
    let mut ffi = FfiSubsystem::new();
    let identity: HostProcedure = Arc::new(|args: &[HostValue]| HostResult::Ok(args[0].clone()));
    let closure = eval_ok(
        &mut ffi,
        "ffi/closure-new",
        &[ty(D::Int32), types(vec![D::Int32]), HostValue::Procedure(identity)],
    );
    let pointer = eval_ok(&mut ffi, "ffi/closure-pointer", &[closure.clone()]);
    let (HostValue::Closure(c), HostValue::Pointer(p)) = (&closure, &pointer) else {
        panic!("unexpected values");
    };
    assert_eq!(p.address(), c.code_ptr());
    assert_ne!(p.address(), 0);

    eval_ok(&mut ffi, "ffi/closure-delete", &[closure.clone()]);
    assert_eq!(
        eval_err(&mut ffi, "ffi/closure-delete", &[closure]),
        "callback-failed"
    );
}

#[test]
fn test_closure_callable_after_host_drops_handle() {
    let mut ffi = FfiSubsystem::new();
    let triple: HostProcedure = Arc::new(|args: &[HostValue]| match args[0] {
        HostValue::Int(n) => HostResult::Ok(HostValue::Int(n * 3)),
        _ => HostResult::error("type-mismatch", "expected int"),
    });
    let closure = eval_ok(
        &mut ffi,
        "ffi/closure-new",
        &[ty(D::Int32), types(vec![D::Int32]), HostValue::Procedure(triple)],
    );
    let pointer = eval_ok(&mut ffi, "ffi/closure-pointer", &[closure.clone()]);
    // The host forgets the closure without deleting it; native code still
    // holds the pointer.
    drop(closure);

    let HostValue::Pointer(code) = &pointer else {
        panic!("expected pointer, got {:?}", pointer);
    };
    let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(code.address()) };
    assert_eq!(apply_i32(f, 7), 21);
}

#[test]
fn test_closure_delete_after_native_calls() {
    let mut ffi = FfiSubsystem::new();
    let negate: HostProcedure = Arc::new(|args: &[HostValue]| match args[0] {
        HostValue::Int(n) => HostResult::Ok(HostValue::Int(-n)),
        _ => HostResult::error("type-mismatch", "expected int"),
    });
    let closure = eval_ok(
        &mut ffi,
        "ffi/closure-new",
        &[ty(D::Int32), types(vec![D::Int32]), HostValue::Procedure(negate)],
    );
    let HostValue::Closure(trampoline) = &closure else {
        panic!("expected closure, got {:?}", closure);
    };
    let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(trampoline.code_ptr()) };
    assert_eq!(apply_i32(f, 4), -4);

    assert_eq!(eval_ok(&mut ffi, "ffi/closure-delete", &[closure.clone()]), HostValue::Unit);
    assert!(trampoline.is_closed());
    assert_eq!(trampoline.failure_count(), 0);
}

#[test]
fn test_host_error_becomes_zero_return() {
    let mut ffi = FfiSubsystem::new();
    let failing: HostProcedure =
        Arc::new(|_: &[HostValue]| HostResult::error("user-error", "no thanks"));
    let closure = eval_ok(
        &mut ffi,
        "ffi/closure-new",
        &[ty(D::Int32), types(vec![D::Int32]), HostValue::Procedure(failing)],
    );
    let HostValue::Closure(trampoline) = &closure else {
        panic!("expected closure");
    };

    let apply = CallInterface::prepare(TypeDesc::I32, vec![TypeDesc::Pointer, TypeDesc::I32]).unwrap();
    let result = unsafe {
        apply
            .invoke(
                apply_i32 as usize,
                &[ForeignValue::pointer(trampoline.code_ptr()), ForeignValue::SignedInt(8)],
            )
            .unwrap()
    };
    assert_eq!(result, ForeignValue::SignedInt(0));
    assert_eq!(trampoline.failure_count(), 1);
    match trampoline.take_last_error() {
        Some(FfiError::Callback { message }) => {
            assert!(message.contains("user-error"));
            assert!(message.contains("no thanks"));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(eval(&mut ffi, "ffi/closure-delete", &[closure]).is_ok());
}

#[test]
fn test_host_procedure_sees_boxed_arguments() {
    let mut ffi = FfiSubsystem::new();
    let doubler: HostProcedure = Arc::new(|args: &[HostValue]| match &args[0] {
        HostValue::Int(n) => HostResult::Ok(HostValue::Int(n * 2)),
        other => HostResult::error("type-error", format!("got {:?}", other)),
    });
    let closure = eval_ok(
        &mut ffi,
        "ffi/closure-new",
        &[ty(D::Int32), types(vec![D::Int32]), HostValue::Procedure(doubler)],
    );
    let HostValue::Closure(trampoline) = &closure else {
        panic!("expected closure");
    };
    let apply = CallInterface::prepare(TypeDesc::I32, vec![TypeDesc::Pointer, TypeDesc::I32]).unwrap();
    let result = unsafe {
        apply.invoke(
            apply_i32 as usize,
            &[ForeignValue::pointer(trampoline.code_ptr()), ForeignValue::SignedInt(-21)],
        )
    };
    assert_eq!(result.unwrap(), ForeignValue::SignedInt(-42));
    assert_eq!(trampoline.failure_count(), 0);
    trampoline.close().unwrap();
}

// ── Directly through the engine ─────────────────────────────────────

#[test]
fn test_double_callback_called_repeatedly() {
    let trampoline = CallbackTrampoline::create(
        TypeDesc::DOUBLE,
        vec![TypeDesc::DOUBLE, TypeDesc::DOUBLE],
        |args: &[ForeignValue]| {
            let (a, b) = (args[0].as_f64().unwrap(), args[1].as_f64().unwrap());
            Ok(ForeignValue::Float(a + b))
        },
    )
    .unwrap();
    let sum = CallInterface::prepare(TypeDesc::DOUBLE, vec![TypeDesc::Pointer, TypeDesc::I32]).unwrap();
    let result = unsafe {
        sum.invoke(
            sum_with as usize,
            &[ForeignValue::pointer(trampoline.code_ptr()), ForeignValue::SignedInt(4)],
        )
    };
    // (0 + 1 + 2 + 3) + 4 * 0.5
    assert_eq!(result.unwrap(), ForeignValue::Float(8.0));
    trampoline.close().unwrap();
}

#[test]
fn test_struct_returning_callback() {
    let pair = TypeDesc::structure(vec![TypeDesc::I32, TypeDesc::I32]).unwrap();
    let trampoline = CallbackTrampoline::create(
        pair.clone(),
        vec![TypeDesc::I32, TypeDesc::I32],
        |args: &[ForeignValue]| {
            let (a, b) = (args[0].as_i64().unwrap(), args[1].as_i64().unwrap());
            Ok(ForeignValue::Struct(vec![
                ForeignValue::SignedInt(a + b),
                ForeignValue::SignedInt(a * b),
            ]))
        },
    )
    .unwrap();
    let call = CallInterface::prepare(pair, vec![TypeDesc::I32, TypeDesc::I32]).unwrap();
    let result = unsafe {
        call.invoke(
            trampoline.code_ptr(),
            &[ForeignValue::SignedInt(6), ForeignValue::SignedInt(7)],
        )
    };
    assert_eq!(
        result.unwrap(),
        ForeignValue::Struct(vec![ForeignValue::SignedInt(13), ForeignValue::SignedInt(42)])
    );
    trampoline.close().unwrap();
}

#[test]
fn test_small_unsigned_return_truncates() {
    let trampoline = CallbackTrampoline::create(TypeDesc::U8, vec![], |_: &[ForeignValue]| {
        Ok(ForeignValue::UnsignedInt(0x1ff))
    })
    .unwrap();
    // SAFETY: the trampoline was prepared as `uint8_t (void)`.
    let f: extern "C" fn() -> u8 = unsafe { std::mem::transmute(trampoline.code_ptr()) };
    assert_eq!(f(), 0xff);
    trampoline.close().unwrap();
}
