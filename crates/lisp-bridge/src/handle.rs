//! Handle Registry
//!
//! A [`Handle`] is the script side's view of a host value. The registry maps
//! each host identity to at most one live handle: adopting an identity that is
//! already live returns the existing handle, so identity comparisons on the
//! script side agree with `eq` on the host side.
//!
//! The table holds handles weakly. Script code owns them; once the last clone
//! is dropped the entry becomes a sweep candidate (see [`crate::sweep`]).

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::bridge::Bridge;
use crate::error::BridgeResult;
use crate::wire::HostId;

pub(crate) struct HandleInner {
    id: HostId,
    /// Host name, for handles obtained through a symbol lookup.
    symbol_name: OnceCell<String>,
}

/// Opaque, identity-carrying reference to a host value.
#[derive(Clone)]
pub struct Handle(Rc<HandleInner>);

impl Handle {
    pub fn id(&self) -> HostId {
        self.0.id
    }

    /// Fetch the full structural form of the referenced value.
    ///
    /// Always performs a round-trip to the host; the result reflects the value
    /// at the time of the call and is never cached.
    pub fn structural_form(&self, bridge: &Bridge) -> BridgeResult<serde_json::Value> {
        bridge.structural_form(self)
    }

    pub(crate) fn symbol_name(&self) -> Option<&str> {
        self.0.symbol_name.get().map(String::as_str)
    }

    pub(crate) fn record_symbol_name(&self, name: &str) {
        let _ = self.0.symbol_name.set(name.to_string());
    }

    pub(crate) fn downgrade(&self) -> Weak<HandleInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<HandleInner>) -> Option<Handle> {
        weak.upgrade().map(Handle)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0.id)
    }
}

/// Weak table of every host identity the script side may still reference.
#[derive(Default)]
pub(crate) struct HandleTable {
    entries: HashMap<HostId, Weak<HandleInner>>,
}

impl HandleTable {
    /// Return the live handle for `id`, creating one if none is live.
    pub(crate) fn adopt(&mut self, id: HostId) -> Handle {
        if let Some(existing) = self.entries.get(&id).and_then(Handle::upgrade) {
            return existing;
        }

        let handle = Handle(Rc::new(HandleInner {
            id,
            symbol_name: OnceCell::new(),
        }));
        self.entries.insert(id, handle.downgrade());
        tracing::trace!(%id, "adopted host reference");
        handle
    }

    /// Remove and return every entry that is neither referenced by the script
    /// side nor pinned by a pending call frame.
    pub(crate) fn collect_unreachable(&mut self, pinned: &HashSet<HostId>) -> Vec<HostId> {
        let mut batch: Vec<HostId> = self
            .entries
            .iter()
            .filter(|(id, weak)| weak.strong_count() == 0 && !pinned.contains(id))
            .map(|(id, _)| *id)
            .collect();
        batch.sort();

        for id in &batch {
            self.entries.remove(id);
        }
        batch
    }

    /// Entries still tracked, live or awaiting a sweep.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
