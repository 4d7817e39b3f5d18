//! Primitive definition type for declarative registration.
//!
//! Each primitive module exports a `const PRIMITIVES: &[PrimitiveDef]`
//! table. The registry in [`crate::primitives`] indexes all tables by name.

use crate::error::FfiResult;
use crate::ffi::FfiSubsystem;
use crate::value::{Arity, HostResult, HostValue};
use std::fmt::Write;

/// A host entry point. Arity is checked before it runs.
pub type HostPrimitive = fn(&mut FfiSubsystem, &[HostValue]) -> FfiResult<HostValue>;

/// Declarative definition of a primitive function.
pub struct PrimitiveDef {
    /// The host-facing name (e.g., "ffi/buffer-read").
    pub name: &'static str,
    pub func: HostPrimitive,
    /// Argument count constraint.
    pub arity: Arity,
    /// One-line description for help output.
    pub doc: &'static str,
    /// Parameter names for signature help.
    pub params: &'static [&'static str],
}

impl PrimitiveDef {
    /// Check arity, run the primitive, and fold any error into a
    /// `HostResult` whose message names the primitive.
    pub fn invoke(&self, ffi: &mut FfiSubsystem, args: &[HostValue]) -> HostResult {
        let result = self
            .arity
            .check(args.len())
            .and_then(|()| (self.func)(ffi, args));
        match result {
            Ok(value) => HostResult::Ok(value),
            Err(e) => HostResult::error(e.kind(), format!("{}: {}", self.name, e)),
        }
    }

    /// Format as a human-readable doc string.
    pub fn format(&self) -> String {
        let mut out = String::new();
        out.push('(');
        out.push_str(self.name);
        for p in self.params {
            out.push(' ');
            out.push_str(p);
        }
        out.push_str(")\n");
        if !self.doc.is_empty() {
            let _ = writeln!(out, "  {}", self.doc);
        }
        let _ = writeln!(out, "  arity: {:?}", self.arity);
        out
    }
}
