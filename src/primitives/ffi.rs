//! FFI primitive functions.
//!
//! The host-facing API: library loading, symbol lookup, function
//! creation and calls, buffer management, typed memory access, layout
//! queries and callback closures.
//!
//! Types are passed either as a [`HostValue::Type`] description or as a
//! keyword string such as `"i32"` or `"size_t"`.

use super::def::PrimitiveDef;
use crate::error::{FfiError, FfiResult};
use crate::ffi::call::Function;
use crate::ffi::callback::{CallbackHandler, CallbackTrampoline};
use crate::ffi::loader::OpenFlag;
use crate::ffi::marshal::ForeignValue;
use crate::ffi::memory::ValueBuffer;
use crate::ffi::symbol::Symbol;
use crate::ffi::types::TypeDesc;
use crate::ffi::FfiSubsystem;
use crate::value::{Arity, HostResult, HostValue};
use std::sync::Arc;

fn resolve_type(value: &HostValue) -> FfiResult<TypeDesc> {
    match value {
        HostValue::Type(desc) => TypeDesc::from_description(desc),
        HostValue::String(name) => TypeDesc::from_keyword(name)
            .ok_or_else(|| FfiError::unsupported_type(format!("unknown type :{}", name))),
        other => Err(FfiError::type_mismatch("type", other.type_name())),
    }
}

fn resolve_types(value: &HostValue) -> FfiResult<Vec<TypeDesc>> {
    value.as_struct()?.iter().map(resolve_type).collect()
}

// ── Library loading ─────────────────────────────────────────────────

pub fn prim_library_open(ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let flags = match args.get(1) {
        Some(flags) => flags
            .as_struct()?
            .iter()
            .map(|flag| flag.as_str()?.parse::<OpenFlag>())
            .collect::<FfiResult<Vec<_>>>()?,
        None => Vec::new(),
    };
    // unit → the running process image
    let (_, lib) = match &args[0] {
        HostValue::Unit => ffi.load_self(),
        path => ffi.load_library(path.as_str()?, &flags)?,
    };
    Ok(HostValue::Library(lib))
}

pub fn prim_library_close(ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let lib = args[0].as_library()?;
    if let Some(id) = ffi.library_id(lib) {
        ffi.unload_library(id)?;
    }
    Ok(HostValue::Unit)
}

// ── Symbols and functions ───────────────────────────────────────────

pub fn prim_symbol_lookup(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let lib = args[0].as_library()?;
    let name = args[1].as_str()?;
    let symbol = Symbol::resolve(lib, name)?;
    Ok(HostValue::Symbol(Arc::new(symbol)))
}

pub fn prim_function_new(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let symbol = Arc::clone(args[0].as_symbol()?);
    let ret = resolve_type(&args[1])?;
    let params = resolve_types(&args[2])?;
    let function = Function::new(symbol, ret, params)?;
    Ok(HostValue::Function(Arc::new(function)))
}

pub fn prim_function_call(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let function = args[0].as_function()?;
    let call_args = args[1..]
        .iter()
        .map(ForeignValue::from_host_value)
        .collect::<FfiResult<Vec<_>>>()?;
    // SAFETY: the host declared the signature of the symbol it resolved.
    let result = unsafe { function.call(&call_args)? };
    result.to_host_value(function.interface().return_type())
}

// ── Buffers ─────────────────────────────────────────────────────────

pub fn prim_buffer_allocate(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let size = args[0].as_usize()?;
    Ok(HostValue::Pointer(ValueBuffer::allocate(size)?))
}

pub fn prim_buffer_from_bytes(
    _ffi: &mut FfiSubsystem,
    args: &[HostValue],
) -> FfiResult<HostValue> {
    let bytes = args[0].as_bytes()?;
    Ok(HostValue::Pointer(ValueBuffer::from_foreign_bytes(bytes)?))
}

pub fn prim_buffer_to_bytes(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let buffer = args[0].as_pointer()?;
    Ok(HostValue::Bytes(buffer.to_foreign_bytes()))
}

pub fn prim_buffer_size(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let buffer = args[0].as_pointer()?;
    Ok(HostValue::Nat(buffer.len() as u64))
}

/// 1 when the buffer owns its storage, 0 for views and foreign memory.
pub fn prim_buffer_owned(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let buffer = args[0].as_pointer()?;
    Ok(HostValue::Nat(buffer.is_owned() as u64))
}

pub fn prim_buffer_from_value(
    _ffi: &mut FfiSubsystem,
    args: &[HostValue],
) -> FfiResult<HostValue> {
    let desc = resolve_type(&args[0])?;
    let value = ForeignValue::from_host_value(&args[1])?;
    Ok(HostValue::Pointer(ValueBuffer::from_value(&desc, &value)?))
}

pub fn prim_buffer_slice(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let buffer = args[0].as_pointer()?;
    let begin = args[1].as_usize()?;
    let end = args[2].as_usize()?;
    Ok(HostValue::Pointer(buffer.slice(begin, end)?))
}

pub fn prim_buffer_dereference(
    _ffi: &mut FfiSubsystem,
    args: &[HostValue],
) -> FfiResult<HostValue> {
    let buffer = args[0].as_pointer()?;
    let offset = args[1].as_usize()?;
    let size = args[2].as_usize()?;
    // SAFETY: the target of a stored pointer cannot be checked; the host
    // vouches for the size it asks to view.
    let target = unsafe { buffer.dereference(offset, size)? };
    Ok(HostValue::Pointer(target))
}

pub fn prim_buffer_read(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let buffer = args[0].as_pointer()?;
    let desc = resolve_type(&args[1])?;
    let offset = match args.get(2) {
        Some(offset) => offset.as_usize()?,
        None => 0,
    };
    buffer.read_typed(&desc, offset)?.to_host_value(&desc)
}

pub fn prim_buffer_write(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let buffer = args[0].as_pointer()?;
    let desc = resolve_type(&args[1])?;
    let offset = args[2].as_usize()?;
    let value = ForeignValue::from_host_value(&args[3])?;
    buffer.write_typed(&desc, offset, &value)?;
    Ok(HostValue::Unit)
}

// ── Layout queries ──────────────────────────────────────────────────

pub fn prim_type_size(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let desc = resolve_type(&args[0])?;
    Ok(HostValue::Nat(desc.size() as u64))
}

pub fn prim_type_alignment(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let desc = resolve_type(&args[0])?;
    Ok(HostValue::Nat(desc.alignment() as u64))
}

pub fn prim_type_offsets(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let desc = resolve_type(&args[0])?;
    let offsets = desc
        .member_offsets()
        .ok_or_else(|| FfiError::type_mismatch("struct or array", desc.to_string()))?;
    Ok(HostValue::Struct(
        offsets.into_iter().map(|o| HostValue::Nat(o as u64)).collect(),
    ))
}

// ── Closures ────────────────────────────────────────────────────────

pub fn prim_closure_new(ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let ret = resolve_type(&args[0])?;
    let params = resolve_types(&args[1])?;
    let procedure = Arc::clone(args[2].as_procedure()?);

    let arg_types = params.clone();
    let handler: Arc<CallbackHandler> = Arc::new(move |values: &[ForeignValue]| {
        let host_args = values
            .iter()
            .zip(&arg_types)
            .map(|(value, desc)| value.to_host_value(desc))
            .collect::<FfiResult<Vec<_>>>()?;
        match procedure(&host_args) {
            HostResult::Ok(value) => ForeignValue::from_host_value(&value),
            HostResult::Error { kind, message } => {
                Err(FfiError::callback(format!("{}: {}", kind, message)))
            }
        }
    });

    let trampoline = CallbackTrampoline::with_policy(ret, params, ffi.callback_policy(), handler)?;
    Ok(HostValue::Closure(Arc::new(trampoline)))
}

pub fn prim_closure_pointer(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    let closure = args[0].as_closure()?;
    Ok(HostValue::Pointer(ValueBuffer::pointer_to(closure.code_ptr())))
}

pub fn prim_closure_delete(_ffi: &mut FfiSubsystem, args: &[HostValue]) -> FfiResult<HostValue> {
    args[0].as_closure()?.close()?;
    Ok(HostValue::Unit)
}

// ── PRIMITIVES table ────────────────────────────────────────────────

pub const PRIMITIVES: &[PrimitiveDef] = &[
    PrimitiveDef {
        name: "ffi/library-open",
        func: prim_library_open,
        arity: Arity::Range(1, 2),
        doc: "Open a shared library. Pass unit for the current process.",
        params: &["path", "flags"],
    },
    PrimitiveDef {
        name: "ffi/library-close",
        func: prim_library_close,
        arity: Arity::Exact(1),
        doc: "Unregister a library. It closes once nothing references it.",
        params: &["library"],
    },
    PrimitiveDef {
        name: "ffi/symbol-lookup",
        func: prim_symbol_lookup,
        arity: Arity::Exact(2),
        doc: "Resolve a symbol in a loaded library.",
        params: &["library", "name"],
    },
    PrimitiveDef {
        name: "ffi/function-new",
        func: prim_function_new,
        arity: Arity::Exact(3),
        doc: "Bind a symbol to a return type and argument types.",
        params: &["symbol", "return-type", "arg-types"],
    },
    PrimitiveDef {
        name: "ffi/function-call",
        func: prim_function_call,
        arity: Arity::AtLeast(1),
        doc: "Call a bound function through libffi.",
        params: &["function", "args"],
    },
    PrimitiveDef {
        name: "ffi/buffer-allocate",
        func: prim_buffer_allocate,
        arity: Arity::Exact(1),
        doc: "Allocate zeroed, owned memory.",
        params: &["size"],
    },
    PrimitiveDef {
        name: "ffi/buffer-from-bytes",
        func: prim_buffer_from_bytes,
        arity: Arity::Exact(1),
        doc: "Copy a byte string into owned memory.",
        params: &["bytes"],
    },
    PrimitiveDef {
        name: "ffi/buffer-to-bytes",
        func: prim_buffer_to_bytes,
        arity: Arity::Exact(1),
        doc: "Copy a buffer's contents into a byte string.",
        params: &["buffer"],
    },
    PrimitiveDef {
        name: "ffi/buffer-size",
        func: prim_buffer_size,
        arity: Arity::Exact(1),
        doc: "Length of a buffer in bytes.",
        params: &["buffer"],
    },
    PrimitiveDef {
        name: "ffi/buffer-owned",
        func: prim_buffer_owned,
        arity: Arity::Exact(1),
        doc: "1 if the buffer owns its memory, 0 for views and foreign memory.",
        params: &["buffer"],
    },
    PrimitiveDef {
        name: "ffi/buffer-from-value",
        func: prim_buffer_from_value,
        arity: Arity::Exact(2),
        doc: "Allocate a buffer holding a marshaled value.",
        params: &["type", "value"],
    },
    PrimitiveDef {
        name: "ffi/buffer-slice",
        func: prim_buffer_slice,
        arity: Arity::Exact(3),
        doc: "View the half-open range [begin, end) of a buffer.",
        params: &["buffer", "begin", "end"],
    },
    PrimitiveDef {
        name: "ffi/buffer-dereference",
        func: prim_buffer_dereference,
        arity: Arity::Exact(3),
        doc: "Follow the pointer stored at offset and view size bytes there.",
        params: &["buffer", "offset", "size"],
    },
    PrimitiveDef {
        name: "ffi/buffer-read",
        func: prim_buffer_read,
        arity: Arity::Range(2, 3),
        doc: "Read a typed value from a buffer.",
        params: &["buffer", "type", "offset"],
    },
    PrimitiveDef {
        name: "ffi/buffer-write",
        func: prim_buffer_write,
        arity: Arity::Exact(4),
        doc: "Write a typed value into a buffer.",
        params: &["buffer", "type", "offset", "value"],
    },
    PrimitiveDef {
        name: "ffi/type-size",
        func: prim_type_size,
        arity: Arity::Exact(1),
        doc: "Size of a C type in bytes.",
        params: &["type"],
    },
    PrimitiveDef {
        name: "ffi/type-alignment",
        func: prim_type_alignment,
        arity: Arity::Exact(1),
        doc: "Alignment of a C type in bytes.",
        params: &["type"],
    },
    PrimitiveDef {
        name: "ffi/type-offsets",
        func: prim_type_offsets,
        arity: Arity::Exact(1),
        doc: "Member offsets of a struct or array type.",
        params: &["type"],
    },
    PrimitiveDef {
        name: "ffi/closure-new",
        func: prim_closure_new,
        arity: Arity::Exact(3),
        doc: "Create a native function pointer that calls a host procedure.",
        params: &["return-type", "arg-types", "procedure"],
    },
    PrimitiveDef {
        name: "ffi/closure-pointer",
        func: prim_closure_pointer,
        arity: Arity::Exact(1),
        doc: "The native code address of a closure.",
        params: &["closure"],
    },
    PrimitiveDef {
        name: "ffi/closure-delete",
        func: prim_closure_delete,
        arity: Arity::Exact(1),
        doc: "Free a closure's trampoline.",
        params: &["closure"],
    },
];
