//! # dynffi - Runtime C Marshaling
//!
//! dynffi calls C functions whose signatures are only known at runtime.
//! It computes C layouts from runtime type descriptors, converts between
//! host values and raw bytes, and dispatches calls and callbacks through
//! libffi.
//!
//! ## Quick Start
//!
//! ```
//! use dynffi::{primitives, FfiSubsystem, HostResult, HostValue};
//! use dynffi::ffi::TypeDescription;
//!
//! let mut ffi = FfiSubsystem::new();
//! let pair = HostValue::Type(TypeDescription::Struct {
//!     members: vec![TypeDescription::Int8, TypeDescription::Double],
//! });
//! let size = primitives::call(&mut ffi, "ffi/type-size", &[pair]);
//! assert_eq!(size, HostResult::Ok(HostValue::Nat(16)));
//! ```
//!
//! ## Architecture
//!
//! 1. **Types** - [`ffi::TypeDesc`] computes sizes, alignments and offsets
//! 2. **Memory** - [`ffi::ValueBuffer`] owns or borrows raw bytes
//! 3. **Marshaling** - [`ffi::ForeignValue`] moves values in and out of bytes
//! 4. **Calls** - [`ffi::CallInterface`] and [`ffi::CallbackTrampoline`]
//! 5. **Host boundary** - [`primitives`] entry points over [`HostValue`]

pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod primitives;
pub mod value;

pub use config::FfiConfig;
pub use error::{FfiError, FfiResult};
pub use ffi::FfiSubsystem;
pub use value::{HostResult, HostValue};
