//! Host-facing entry points.

pub mod def;
pub mod ffi;

use crate::ffi::FfiSubsystem;
use crate::value::{HostResult, HostValue};
use def::PrimitiveDef;
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

/// All primitive tables.
pub(crate) const ALL_TABLES: &[&[PrimitiveDef]] = &[ffi::PRIMITIVES];

fn registry() -> &'static FxHashMap<&'static str, &'static PrimitiveDef> {
    static REGISTRY: OnceLock<FxHashMap<&'static str, &'static PrimitiveDef>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        ALL_TABLES
            .iter()
            .flat_map(|table| table.iter())
            .map(|def| (def.name, def))
            .collect()
    })
}

pub fn lookup(name: &str) -> Option<&'static PrimitiveDef> {
    registry().get(name).copied()
}

/// Names of every registered primitive, sorted.
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Call a primitive by name.
pub fn call(ffi: &mut FfiSubsystem, name: &str, args: &[HostValue]) -> HostResult {
    match lookup(name) {
        Some(def) => def.invoke(ffi, args),
        None => HostResult::error("unknown-primitive", format!("no primitive named {}", name)),
    }
}
