//! Typed errors for the marshaling engine.
//!
//! Every fallible operation in the crate returns [`FfiResult`]. The host
//! boundary (`primitives::ffi`) turns these into tagged host results using
//! [`FfiError::kind`] and the `Display` message, so nothing fallible ever
//! crosses into the host as a panic.

use std::fmt;
use thiserror::Error;

/// Which side of an argument-count check failed.
///
/// Variadic calls are not supported, so surplus arguments are reported
/// separately from missing ones instead of being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentCountReason {
    TooFew,
    TooMany,
}

impl fmt::Display for ArgumentCountReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentCountReason::TooFew => write!(f, "not enough arguments"),
            ArgumentCountReason::TooMany => write!(f, "variadic arguments not supported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FfiError {
    #[error("Unsupported type: {message}")]
    UnsupportedType { message: String },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Out of bounds: {message} (offset {offset}, size {size}, length {length})")]
    OutOfBounds {
        message: String,
        offset: usize,
        size: usize,
        length: usize,
    },

    #[error("Argument count mismatch: {reason}: expected {expected}, got {got}")]
    ArgumentCountMismatch {
        expected: usize,
        got: usize,
        reason: ArgumentCountReason,
    },

    #[error("Allocation of {size} bytes failed: {message}")]
    AllocationFailed { size: usize, message: String },

    #[error("Call preparation failed: {message}")]
    PreparationFailed { message: String },

    #[error("Failed to open library '{path}': {message}")]
    LibraryOpenFailed { path: String, message: String },

    #[error("Failed to close library '{path}': {message}")]
    LibraryCloseFailed { path: String, message: String },

    #[error("Symbol '{symbol}' not found in {library}: {message}")]
    SymbolResolutionFailed {
        library: String,
        symbol: String,
        message: String,
    },

    #[error("Callback failed: {message}")]
    Callback { message: String },
}

pub type FfiResult<T> = Result<T, FfiError>;

impl FfiError {
    pub fn unsupported_type(message: impl Into<String>) -> Self {
        FfiError::UnsupportedType {
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        FfiError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn out_of_bounds(
        message: impl Into<String>,
        offset: usize,
        size: usize,
        length: usize,
    ) -> Self {
        FfiError::OutOfBounds {
            message: message.into(),
            offset,
            size,
            length,
        }
    }

    /// Build an argument-count error, classifying the direction from the
    /// two counts. Callers only construct this when the counts differ.
    pub fn argument_count(expected: usize, got: usize) -> Self {
        let reason = if got < expected {
            ArgumentCountReason::TooFew
        } else {
            ArgumentCountReason::TooMany
        };
        FfiError::ArgumentCountMismatch {
            expected,
            got,
            reason,
        }
    }

    pub fn allocation_failed(size: usize, message: impl Into<String>) -> Self {
        FfiError::AllocationFailed {
            size,
            message: message.into(),
        }
    }

    pub fn preparation_failed(message: impl Into<String>) -> Self {
        FfiError::PreparationFailed {
            message: message.into(),
        }
    }

    pub fn library_open_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        FfiError::LibraryOpenFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn library_close_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        FfiError::LibraryCloseFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn symbol_resolution_failed(
        library: impl Into<String>,
        symbol: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        FfiError::SymbolResolutionFailed {
            library: library.into(),
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    pub fn callback(message: impl Into<String>) -> Self {
        FfiError::Callback {
            message: message.into(),
        }
    }

    /// Stable kebab-case name of the error kind, used as the host error tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FfiError::UnsupportedType { .. } => "unsupported-type",
            FfiError::TypeMismatch { .. } => "type-mismatch",
            FfiError::OutOfBounds { .. } => "out-of-bounds",
            FfiError::ArgumentCountMismatch { .. } => "argument-count-mismatch",
            FfiError::AllocationFailed { .. } => "allocation-failed",
            FfiError::PreparationFailed { .. } => "preparation-failed",
            FfiError::LibraryOpenFailed { .. } => "library-open-failed",
            FfiError::LibraryCloseFailed { .. } => "library-close-failed",
            FfiError::SymbolResolutionFailed { .. } => "symbol-resolution-failed",
            FfiError::Callback { .. } => "callback-failed",
        }
    }
}
