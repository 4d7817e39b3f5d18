//! Resolved symbols.
//!
//! A [`Symbol`] keeps its [`Library`] open for as long as it exists.

use super::loader::Library;
use crate::error::FfiResult;
use std::fmt;
use std::sync::Arc;

pub struct Symbol {
    library: Arc<Library>,
    name: String,
    address: usize,
}

impl Symbol {
    /// Look `name` up in `library`.
    pub fn resolve(library: &Arc<Library>, name: &str) -> FfiResult<Symbol> {
        tracing::debug!(symbol = name, library = library.name(), "opening symbol");
        let address = library.resolve(name)?;
        Ok(Symbol {
            library: Arc::clone(library),
            name: name.to_string(),
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn address(&self) -> usize {
        self.address
    }
}

impl Drop for Symbol {
    fn drop(&mut self) {
        tracing::trace!(symbol = %self.name, library = self.library.name(), "finalizing symbol");
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("library", &self.library.name())
            .field("address", &format_args!("{:#x}", self.address))
            .finish()
    }
}
