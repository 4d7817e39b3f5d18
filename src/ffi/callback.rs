//! Callback trampolines: native code calling into host handlers.
//!
//! A [`CallbackTrampoline`] allocates a libffi closure whose entry point
//! can be handed to C as a function pointer. Invocations unpack the native
//! arguments into [`ForeignValue`]s, run the handler, and write its result
//! into the native return slot.
//!
//! The closure and its state are released only by [`CallbackTrampoline::close`].
//! Dropping the handle leaks them, because C code may still hold the
//! function pointer.

use crate::error::{FfiError, FfiResult};
use crate::ffi::call::{return_slot_size, write_return, PreparedCif};
use crate::ffi::marshal::ForeignValue;
use crate::ffi::types::TypeDesc;
use libffi::raw;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A host handler. Receives one value per declared argument.
pub type CallbackHandler = dyn Fn(&[ForeignValue]) -> FfiResult<ForeignValue> + Send + Sync;

/// What a trampoline does when its handler fails or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackFailurePolicy {
    /// Log, record the error, and return zero to the native caller
    #[default]
    ZeroReturn,
    /// Log and abort the process
    Abort,
}

struct TrampolineState {
    ret: TypeDesc,
    args: Vec<TypeDesc>,
    handler: Arc<CallbackHandler>,
    policy: CallbackFailurePolicy,
    failures: AtomicUsize,
    last_error: Mutex<Option<FfiError>>,
    cif: Box<PreparedCif>,
}

impl TrampolineState {
    fn return_len(&self) -> usize {
        match self.ret {
            TypeDesc::Int { .. } => return_slot_size(&self.ret),
            _ => self.ret.size(),
        }
    }

    /// # Safety
    /// `args` holds one valid pointer per declared argument, and `ret`
    /// is valid for `return_len()` bytes.
    unsafe fn run(&self, ret: *mut c_void, args: *mut *mut c_void) -> FfiResult<()> {
        let mut values: SmallVec<[ForeignValue; 8]> = SmallVec::with_capacity(self.args.len());
        for (i, desc) in self.args.iter().enumerate() {
            let arg = *args.add(i) as *const u8;
            let bytes = std::slice::from_raw_parts(arg, desc.size());
            values.push(ForeignValue::from_bytes(desc, bytes)?);
        }

        let result = (self.handler)(&values)?;

        if self.ret.is_void() {
            return match result {
                ForeignValue::Unit => Ok(()),
                other => Err(FfiError::type_mismatch("void", other.tag_name())),
            };
        }
        // Marshal into a staging slot first so a failed conversion leaves
        // nothing half-written.
        let len = self.return_len();
        let mut staging: SmallVec<[u8; 16]> = SmallVec::from_elem(0, len);
        write_return(&self.ret, &result, &mut staging)?;
        ptr::copy_nonoverlapping(staging.as_ptr(), ret as *mut u8, len);
        Ok(())
    }

    unsafe fn fail(&self, error: FfiError, ret: *mut c_void) {
        tracing::error!(error = %error, "callback handler failed");
        if self.policy == CallbackFailurePolicy::Abort {
            std::process::abort();
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(error);
        }
        if !self.ret.is_void() {
            ptr::write_bytes(ret as *mut u8, 0, self.return_len());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

unsafe extern "C" fn dispatch(
    _cif: *mut raw::ffi_cif,
    ret: *mut c_void,
    args: *mut *mut c_void,
    userdata: *mut c_void,
) {
    let state = &*(userdata as *const TrampolineState);
    // Nothing may unwind into the native caller.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| state.run(ret, args)));
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(payload) => FfiError::callback(panic_message(payload.as_ref())),
    };
    state.fail(error, ret);
}

struct Closure {
    raw: *mut raw::ffi_closure,
    userdata: *const TrampolineState,
}

// SAFETY: the closure is only touched again by close(), under a mutex.
unsafe impl Send for Closure {}

/// An executable stub bound to a host handler.
pub struct CallbackTrampoline {
    state: Arc<TrampolineState>,
    closure: Mutex<Option<Closure>>,
    code: usize,
}

impl CallbackTrampoline {
    /// Create a trampoline with the default failure policy.
    pub fn create<F>(ret: TypeDesc, args: Vec<TypeDesc>, handler: F) -> FfiResult<Self>
    where
        F: Fn(&[ForeignValue]) -> FfiResult<ForeignValue> + Send + Sync + 'static,
    {
        Self::with_policy(ret, args, CallbackFailurePolicy::default(), Arc::new(handler))
    }

    pub fn with_policy(
        ret: TypeDesc,
        args: Vec<TypeDesc>,
        policy: CallbackFailurePolicy,
        handler: Arc<CallbackHandler>,
    ) -> FfiResult<Self> {
        let cif = PreparedCif::new(&ret, &args)?;
        let state = Arc::new(TrampolineState {
            ret,
            args,
            handler,
            policy,
            failures: AtomicUsize::new(0),
            last_error: Mutex::new(None),
            cif,
        });

        let mut code: *mut c_void = ptr::null_mut();
        // SAFETY: allocates a closure sized for ffi_closure and its code address.
        let closure = unsafe { raw::ffi_closure_alloc(size_of::<raw::ffi_closure>(), &mut code) }
            as *mut raw::ffi_closure;
        if closure.is_null() {
            return Err(FfiError::preparation_failed("ffi_closure_alloc failed"));
        }

        let userdata = Arc::into_raw(Arc::clone(&state));
        // SAFETY: the cif is boxed inside state, which userdata keeps alive
        // until close().
        let status = unsafe {
            raw::ffi_prep_closure_loc(
                closure,
                state.cif.as_raw_ptr(),
                Some(dispatch),
                userdata as *mut c_void,
                code,
            )
        };
        if status != raw::ffi_status_FFI_OK {
            // SAFETY: neither pointer has been handed out yet.
            unsafe {
                raw::ffi_closure_free(closure as *mut c_void);
                drop(Arc::from_raw(userdata));
            }
            return Err(FfiError::preparation_failed(format!(
                "ffi_prep_closure_loc failed (status {})",
                status
            )));
        }

        tracing::debug!(code = code as usize, "allocated trampoline");
        Ok(CallbackTrampoline {
            state,
            closure: Mutex::new(Some(Closure {
                raw: closure,
                userdata,
            })),
            code: code as usize,
        })
    }

    /// Entry point to hand to native code. Calling it after
    /// [`close`](Self::close) is undefined.
    pub fn code_ptr(&self) -> usize {
        self.code
    }

    pub fn return_type(&self) -> &TypeDesc {
        &self.state.ret
    }

    pub fn arg_types(&self) -> &[TypeDesc] {
        &self.state.args
    }

    pub fn policy(&self) -> CallbackFailurePolicy {
        self.state.policy
    }

    /// How many invocations failed so far.
    pub fn failure_count(&self) -> usize {
        self.state.failures.load(Ordering::Relaxed)
    }

    /// The most recent failure, if any, clearing it.
    pub fn take_last_error(&self) -> Option<FfiError> {
        self.state.last_error.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn is_closed(&self) -> bool {
        self.closure.lock().map(|c| c.is_none()).unwrap_or(true)
    }

    /// Free the executable stub and release the handler. A second call
    /// fails.
    pub fn close(&self) -> FfiResult<()> {
        let closure = self
            .closure
            .lock()
            .map_err(|_| FfiError::callback("trampoline lock poisoned"))?
            .take()
            .ok_or_else(|| FfiError::callback("trampoline already closed"))?;
        // SAFETY: the closure came from ffi_closure_alloc and userdata from
        // Arc::into_raw; both are released exactly once, here.
        unsafe {
            raw::ffi_closure_free(closure.raw as *mut c_void);
            drop(Arc::from_raw(closure.userdata));
        }
        tracing::debug!(code = self.code, "closed trampoline");
        Ok(())
    }
}

impl fmt::Debug for CallbackTrampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTrampoline")
            .field("code", &format_args!("{:#x}", self.code))
            .field("ret", &self.state.ret)
            .field("args", &self.state.args)
            .field("closed", &self.is_closed())
            .finish()
    }
}
