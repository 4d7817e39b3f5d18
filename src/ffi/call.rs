//! Call dispatch via libffi.
//!
//! A [`CallInterface`] binds a return descriptor and argument descriptors
//! to a prepared `ffi_cif`. Once prepared it can be invoked any number of
//! times against any code address with a matching C signature.

use crate::error::{FfiError, FfiResult};
use crate::ffi::marshal::{sign_extend, zero_extend, ForeignValue};
use crate::ffi::memory::AlignedBuffer;
use crate::ffi::symbol::Symbol;
use crate::ffi::types::{IntWidth, TypeDesc};
use libffi::low::{ffi_arg, CodePtr};
use libffi::middle::Type;
use libffi::raw;
use smallvec::SmallVec;
use std::ffi::{c_uint, c_void};
use std::fmt;
use std::mem::size_of;
use std::ptr;
use std::sync::Arc;

/// A prepared `ffi_cif` together with the type storage it points into.
///
/// Boxed by its owners: closures keep a pointer to `cif`, so it must not
/// move after preparation.
pub(crate) struct PreparedCif {
    cif: raw::ffi_cif,
    arg_ptrs: Vec<*mut raw::ffi_type>,
    _ret_type: Type,
    _arg_types: Vec<Type>,
}

// SAFETY: the cif and type tree are never written after preparation.
unsafe impl Send for PreparedCif {}
unsafe impl Sync for PreparedCif {}

impl PreparedCif {
    pub(crate) fn new(ret: &TypeDesc, args: &[TypeDesc]) -> FfiResult<Box<PreparedCif>> {
        if let Some(i) = args.iter().position(TypeDesc::is_void) {
            return Err(FfiError::preparation_failed(format!(
                "argument {} has type void",
                i
            )));
        }
        let ret_type = ret.to_ffi_type()?;
        let arg_types = args
            .iter()
            .map(TypeDesc::to_ffi_type)
            .collect::<FfiResult<Vec<_>>>()?;
        let arg_ptrs = arg_types.iter().map(Type::as_raw_ptr).collect();

        let mut prepared = Box::new(PreparedCif {
            // SAFETY: ffi_cif is plain data and fully written by ffi_prep_cif.
            cif: unsafe { std::mem::zeroed() },
            arg_ptrs,
            _ret_type: ret_type,
            _arg_types: arg_types,
        });
        let nargs = prepared.arg_ptrs.len() as c_uint;
        let rtype = prepared._ret_type.as_raw_ptr();
        let atypes = prepared.arg_ptrs.as_mut_ptr();
        // SAFETY: every type pointer is owned by `prepared` and outlives the cif.
        let status = unsafe {
            raw::ffi_prep_cif(
                &mut prepared.cif,
                raw::ffi_abi_FFI_DEFAULT_ABI,
                nargs,
                rtype,
                atypes,
            )
        };
        if status != raw::ffi_status_FFI_OK {
            return Err(FfiError::preparation_failed(format!(
                "ffi_prep_cif rejected {} (status {})",
                Signature { ret, args },
                status
            )));
        }
        Ok(prepared)
    }

    pub(crate) fn as_raw_ptr(&self) -> *mut raw::ffi_cif {
        &self.cif as *const raw::ffi_cif as *mut raw::ffi_cif
    }
}

struct Signature<'a> {
    ret: &'a TypeDesc,
    args: &'a [TypeDesc],
}

impl fmt::Display for Signature<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.ret)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Size of the native return slot for `ret`. libffi writes integral
/// returns as a full `ffi_arg`.
pub(crate) fn return_slot_size(ret: &TypeDesc) -> usize {
    ret.size().max(size_of::<ffi_arg>())
}

fn widened_int(desc: &TypeDesc) -> Option<(IntWidth, bool)> {
    match desc {
        TypeDesc::Int { width, signed } if width.bytes() < size_of::<ffi_arg>() => {
            Some((*width, *signed))
        }
        _ => None,
    }
}

/// Decode a native return slot.
pub(crate) fn read_return(ret: &TypeDesc, slot: &[u8]) -> FfiResult<ForeignValue> {
    match widened_int(ret) {
        Some((width, signed)) => {
            if slot.len() < size_of::<ffi_arg>() {
                return Err(FfiError::out_of_bounds(
                    "return slot too small",
                    0,
                    size_of::<ffi_arg>(),
                    slot.len(),
                ));
            }
            // SAFETY: length checked above.
            let raw = unsafe { ptr::read_unaligned(slot.as_ptr() as *const ffi_arg) } as u64;
            Ok(if signed {
                ForeignValue::SignedInt(sign_extend(raw as i64, width.bits()))
            } else {
                ForeignValue::UnsignedInt(zero_extend(raw, width.bits()))
            })
        }
        None => ForeignValue::from_bytes(ret, slot),
    }
}

/// Encode `value` into a native return slot, widening small integers.
pub(crate) fn write_return(ret: &TypeDesc, value: &ForeignValue, slot: &mut [u8]) -> FfiResult<()> {
    match widened_int(ret) {
        Some((width, signed)) => {
            let bits = match value {
                ForeignValue::SignedInt(n) => *n as u64,
                ForeignValue::UnsignedInt(n) => *n,
                other => return Err(FfiError::type_mismatch(ret.to_string(), other.tag_name())),
            };
            let widened = if signed {
                sign_extend(bits as i64, width.bits()) as u64
            } else {
                zero_extend(bits, width.bits())
            };
            if slot.len() < size_of::<ffi_arg>() {
                return Err(FfiError::out_of_bounds(
                    "return slot too small",
                    0,
                    size_of::<ffi_arg>(),
                    slot.len(),
                ));
            }
            // SAFETY: length checked above.
            unsafe { ptr::write_unaligned(slot.as_mut_ptr() as *mut ffi_arg, widened as ffi_arg) };
            Ok(())
        }
        None => value.write_into(ret, slot),
    }
}

/// A reusable, prepared call specification.
pub struct CallInterface {
    ret: TypeDesc,
    args: Vec<TypeDesc>,
    prepared: Box<PreparedCif>,
}

impl CallInterface {
    /// Prepare a call interface. Fails with `PreparationFailed` for void
    /// arguments or a signature libffi rejects.
    pub fn prepare(ret: TypeDesc, args: Vec<TypeDesc>) -> FfiResult<CallInterface> {
        let prepared = PreparedCif::new(&ret, &args)?;
        tracing::debug!(signature = %Signature { ret: &ret, args: &args }, "prepared call interface");
        Ok(CallInterface {
            ret,
            args,
            prepared,
        })
    }

    pub fn return_type(&self) -> &TypeDesc {
        &self.ret
    }

    pub fn arg_types(&self) -> &[TypeDesc] {
        &self.args
    }

    /// Call the function at `code` with `args`.
    ///
    /// Argument and return storage lives only for the duration of the
    /// call and is released on every path out of this function.
    ///
    /// # Safety
    /// `code` must be the address of a function whose C signature matches
    /// this interface, and any pointers passed must be valid for it.
    pub unsafe fn invoke(&self, code: usize, args: &[ForeignValue]) -> FfiResult<ForeignValue> {
        if args.len() != self.args.len() {
            return Err(FfiError::argument_count(self.args.len(), args.len()));
        }
        if code == 0 {
            return Err(FfiError::preparation_failed("cannot call a null function pointer"));
        }

        let mut storage: SmallVec<[AlignedBuffer; 8]> = SmallVec::with_capacity(args.len());
        for (desc, value) in self.args.iter().zip(args) {
            let mut buffer = AlignedBuffer::zeroed(desc.size())?;
            value.write_into(desc, buffer.as_mut_slice())?;
            storage.push(buffer);
        }
        let mut argv: SmallVec<[*mut c_void; 8]> =
            storage.iter().map(|b| b.as_ptr() as *mut c_void).collect();
        let ret = AlignedBuffer::zeroed(return_slot_size(&self.ret))?;

        let code = CodePtr(code as *mut c_void);
        raw::ffi_call(
            self.prepared.as_raw_ptr(),
            Some(*code.as_safe_fun()),
            ret.as_ptr() as *mut c_void,
            argv.as_mut_ptr(),
        );

        read_return(&self.ret, ret.as_slice())
    }
}

impl fmt::Debug for CallInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallInterface({})",
            Signature {
                ret: &self.ret,
                args: &self.args
            }
        )
    }
}

/// A call interface bound to a resolved symbol. Holding a `Function`
/// keeps the symbol's library open.
#[derive(Debug)]
pub struct Function {
    symbol: Arc<Symbol>,
    interface: CallInterface,
}

impl Function {
    pub fn new(symbol: Arc<Symbol>, ret: TypeDesc, args: Vec<TypeDesc>) -> FfiResult<Function> {
        let interface = CallInterface::prepare(ret, args)?;
        Ok(Function { symbol, interface })
    }

    pub fn symbol(&self) -> &Arc<Symbol> {
        &self.symbol
    }

    pub fn interface(&self) -> &CallInterface {
        &self.interface
    }

    /// # Safety
    /// The declared signature must match the symbol's real C signature.
    pub unsafe fn call(&self, args: &[ForeignValue]) -> FfiResult<ForeignValue> {
        self.interface.invoke(self.symbol.address(), args)
    }
}
