//! Dynamic library loading.
//!
//! A thin wrapper over `dlopen`/`dlclose` through `libloading`. Open-mode
//! flags are handed to the loader as raw `RTLD_*` bits.

use crate::error::{FfiError, FfiResult};
use libloading::os::unix::Library as NativeLibrary;
use std::ffi::c_int;
use std::fmt;
use std::str::FromStr;

/// One `dlopen` mode bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenFlag {
    Lazy,
    Now,
    NoLoad,
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    DeepBind,
    Global,
    Local,
    NoDelete,
}

impl OpenFlag {
    pub fn bits(self) -> c_int {
        match self {
            OpenFlag::Lazy => libc::RTLD_LAZY,
            OpenFlag::Now => libc::RTLD_NOW,
            OpenFlag::NoLoad => libc::RTLD_NOLOAD,
            #[cfg(all(target_os = "linux", target_env = "gnu"))]
            OpenFlag::DeepBind => libc::RTLD_DEEPBIND,
            OpenFlag::Global => libc::RTLD_GLOBAL,
            OpenFlag::Local => libc::RTLD_LOCAL,
            OpenFlag::NoDelete => libc::RTLD_NODELETE,
        }
    }

    /// OR together a set of flags.
    pub fn combine(flags: &[OpenFlag]) -> c_int {
        flags.iter().fold(0, |acc, flag| acc | flag.bits())
    }
}

impl FromStr for OpenFlag {
    type Err = FfiError;

    fn from_str(name: &str) -> FfiResult<Self> {
        let name = name.strip_prefix(':').unwrap_or(name);
        Ok(match name.to_ascii_lowercase().as_str() {
            "lazy" => OpenFlag::Lazy,
            "now" => OpenFlag::Now,
            "noload" => OpenFlag::NoLoad,
            #[cfg(all(target_os = "linux", target_env = "gnu"))]
            "deepbind" => OpenFlag::DeepBind,
            "global" => OpenFlag::Global,
            "local" => OpenFlag::Local,
            "nodelete" => OpenFlag::NoDelete,
            _ => {
                return Err(FfiError::library_open_failed(
                    "",
                    format!("unknown open flag '{}'", name),
                ))
            }
        })
    }
}

/// An open shared library. Closed on drop or through [`Library::close`].
pub struct Library {
    name: String,
    flags: c_int,
    native: Option<NativeLibrary>,
}

impl Library {
    /// Open `path` with the given flags.
    pub fn open(path: &str, flags: &[OpenFlag]) -> FfiResult<Library> {
        Self::open_raw(path, OpenFlag::combine(flags))
    }

    /// Open `path` with raw `dlopen` mode bits.
    pub fn open_raw(path: &str, flags: c_int) -> FfiResult<Library> {
        tracing::debug!(path, flags, "opening library");
        // SAFETY: running a library's initializers is the point of loading it.
        let native = unsafe { NativeLibrary::open(Some(path), flags) }
            .map_err(|e| FfiError::library_open_failed(path, e.to_string()))?;
        Ok(Library {
            name: path.to_string(),
            flags,
            native: Some(native),
        })
    }

    /// The running program and everything it has loaded globally.
    pub fn open_self() -> Library {
        Library {
            name: "<self>".to_string(),
            flags: 0,
            native: Some(NativeLibrary::this()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> c_int {
        self.flags
    }

    /// Address of `symbol`, which may legitimately be null.
    pub fn resolve(&self, symbol: &str) -> FfiResult<usize> {
        let native = self.native.as_ref().ok_or_else(|| {
            FfiError::symbol_resolution_failed(&self.name, symbol, "library is closed")
        })?;
        // SAFETY: the symbol is read as an untyped address, never called here.
        let address = unsafe { native.get::<*mut std::ffi::c_void>(symbol.as_bytes()) }
            .map(|sym| *sym as usize)
            .map_err(|e| FfiError::symbol_resolution_failed(&self.name, symbol, e.to_string()))?;
        Ok(address)
    }

    /// Close the handle now, reporting any `dlclose` failure.
    pub fn close(mut self) -> FfiResult<()> {
        match self.native.take() {
            Some(native) => {
                tracing::debug!(library = %self.name, "closing library");
                native
                    .close()
                    .map_err(|e| FfiError::library_close_failed(&self.name, e.to_string()))
            }
            None => Ok(()),
        }
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        if self.native.is_some() {
            tracing::debug!(library = %self.name, "finalizing library");
        }
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("flags", &format_args!("{:#x}", self.flags))
            .field("open", &self.native.is_some())
            .finish()
    }
}
