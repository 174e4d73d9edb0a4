//! Symbol/keyword intern cache.
//!
//! Script code names host symbols with identifiers that cannot contain `-`, so
//! every lookup canonicalizes `_` to `-` first. Keywords are the same names
//! with a leading `:`.
//!
//! The cache only holds weak references. A hit is returned only while some
//! script value still keeps the handle alive; otherwise the host is asked
//! again and the entry is repopulated.

use std::collections::HashMap;
use std::rc::Weak;

use crate::handle::{Handle, HandleInner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Symbol,
    Keyword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Reuse a live cached handle when there is one.
    Cached,
    /// Always perform a live intern call on the host.
    Uncached,
}

/// Canonical host spelling of a script-side name.
pub fn normalize(name: &str) -> String {
    name.replace('_', "-")
}

/// Host spelling of `name` for the given kind, normalized.
pub fn host_name(name: &str, kind: SymbolKind) -> String {
    let name = normalize(name);
    match kind {
        SymbolKind::Symbol => name,
        SymbolKind::Keyword if name.starts_with(':') => name,
        SymbolKind::Keyword => format!(":{name}"),
    }
}

#[derive(Default)]
pub(crate) struct InternCache {
    entries: HashMap<(SymbolKind, String), Weak<HandleInner>>,
}

impl InternCache {
    pub(crate) fn get(&self, kind: SymbolKind, name: &str) -> Option<Handle> {
        self.entries
            .get(&(kind, name.to_string()))
            .and_then(Handle::upgrade)
    }

    pub(crate) fn insert(&mut self, kind: SymbolKind, name: String, handle: &Handle) {
        self.entries.insert((kind, name), handle.downgrade());
    }

    /// Drop entries whose handle is gone. Returns how many were removed.
    pub(crate) fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
