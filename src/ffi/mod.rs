//! Dynamic foreign function interface.
//!
//! Runtime type descriptors, value marshaling, and libffi call dispatch.
//!
//! # Example
//!
//! ```
//! use dynffi::ffi::{ForeignValue, Function, Library, Symbol, TypeDesc, ValueBuffer};
//! use std::sync::Arc;
//!
//! # fn main() -> dynffi::FfiResult<()> {
//! let libc = Arc::new(Library::open_self());
//! let strlen = Arc::new(Symbol::resolve(&libc, "strlen")?);
//! let size_t = TypeDesc::int(std::mem::size_of::<usize>(), false)?;
//! let f = Function::new(strlen, size_t, vec![TypeDesc::Pointer])?;
//!
//! let text = ValueBuffer::from_foreign_bytes(b"hello\0")?;
//! let len = unsafe { f.call(&[ForeignValue::PointerRef(text)])? };
//! assert_eq!(len, ForeignValue::UnsignedInt(5));
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod callback;
pub mod description;
pub mod extended;
pub mod loader;
pub mod marshal;
pub mod memory;
pub mod symbol;
pub mod types;

pub use call::{CallInterface, Function};
pub use callback::{CallbackFailurePolicy, CallbackTrampoline};
pub use description::TypeDescription;
pub use loader::{Library, OpenFlag};
pub use marshal::ForeignValue;
pub use memory::ValueBuffer;
pub use symbol::Symbol;
pub use types::TypeDesc;

use crate::config::FfiConfig;
use crate::error::{FfiError, FfiResult};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// The FFI subsystem keeps loaded libraries and runtime settings.
pub struct FfiSubsystem {
    /// Loaded libraries: id -> handle
    libraries: FxHashMap<u32, Arc<Library>>,
    /// Next library ID to assign
    next_lib_id: u32,
    config: FfiConfig,
}

impl FfiSubsystem {
    pub fn new() -> Self {
        Self::with_config(FfiConfig::default())
    }

    pub fn with_config(config: FfiConfig) -> Self {
        FfiSubsystem {
            libraries: FxHashMap::default(),
            next_lib_id: 1,
            config,
        }
    }

    pub fn config(&self) -> &FfiConfig {
        &self.config
    }

    pub fn callback_policy(&self) -> CallbackFailurePolicy {
        self.config.callback_failure
    }

    /// Open a shared library and register it. An empty `flags` slice
    /// means the configured default flags.
    pub fn load_library(
        &mut self,
        path: &str,
        flags: &[OpenFlag],
    ) -> FfiResult<(u32, Arc<Library>)> {
        let lib = if flags.is_empty() {
            let defaults = self
                .config
                .open_flags()
                .map_err(|e| FfiError::library_open_failed(path, e.to_string()))?;
            Library::open(path, &defaults)?
        } else {
            Library::open(path, flags)?
        };
        Ok(self.register(lib))
    }

    /// Register the running process image.
    pub fn load_self(&mut self) -> (u32, Arc<Library>) {
        self.register(Library::open_self())
    }

    fn register(&mut self, lib: Library) -> (u32, Arc<Library>) {
        let id = self.next_lib_id;
        self.next_lib_id += 1;
        let lib = Arc::new(lib);
        self.libraries.insert(id, Arc::clone(&lib));
        (id, lib)
    }

    pub fn get_library(&self, id: u32) -> Option<&Arc<Library>> {
        self.libraries.get(&id)
    }

    /// The registry id of a library handle.
    pub fn library_id(&self, lib: &Arc<Library>) -> Option<u32> {
        self.libraries
            .iter()
            .find(|(_, held)| Arc::ptr_eq(held, lib))
            .map(|(id, _)| *id)
    }

    /// Remove a library from the registry. The module is closed now if the
    /// registry held the last reference, otherwise when the last symbol or
    /// host handle drops it.
    pub fn unload_library(&mut self, id: u32) -> FfiResult<bool> {
        let Some(lib) = self.libraries.remove(&id) else {
            return Ok(false);
        };
        match Arc::try_unwrap(lib) {
            Ok(lib) => lib.close()?,
            Err(shared) => {
                tracing::debug!(
                    name = shared.name(),
                    refs = Arc::strong_count(&shared),
                    "library still referenced; deferring close"
                );
            }
        }
        Ok(true)
    }

    /// List all loaded libraries, ordered by id.
    pub fn loaded_libraries(&self) -> Vec<(u32, String)> {
        let mut libs: Vec<_> = self
            .libraries
            .iter()
            .map(|(id, lib)| (*id, lib.name().to_string()))
            .collect();
        libs.sort_by_key(|(id, _)| *id);
        libs
    }
}

impl Default for FfiSubsystem {
    fn default() -> Self {
        Self::new()
    }
}
