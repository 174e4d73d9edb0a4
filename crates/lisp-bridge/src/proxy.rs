//! Reverse-proxy registry.
//!
//! Script objects the host cannot interpret but must be able to store and hand
//! back. Wrapping stores the object here; the host receives a marker value
//! carrying the [`ProxyId`] and returns it as [`Wire::Proxy`](crate::Wire).
//! Unwrapping yields the very same object, never a copy.

use std::fmt;

use crate::arena::{Arena, Key};
use crate::error::{BridgeError, BridgeResult};
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(Key);

impl ProxyId {
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self(Key::from_parts(index, generation))
    }

    pub fn index(self) -> u32 {
        self.0.index()
    }

    pub fn generation(self) -> u32 {
        self.0.generation()
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyId({})", self.0)
    }
}

#[derive(Default)]
pub(crate) struct ReverseProxyRegistry {
    arena: Arena<Value>,
}

impl ReverseProxyRegistry {
    pub(crate) fn wrap(&mut self, object: Value) -> BridgeResult<ProxyId> {
        let key = self
            .arena
            .insert(object)
            .map_err(|_| BridgeError::RegistryFull("reverse proxy"))?;
        let id = ProxyId(key);
        tracing::debug!(proxy = %id, "wrapped script object");
        Ok(id)
    }

    pub(crate) fn unwrap(&self, id: ProxyId) -> Option<Value> {
        self.arena.get(id.0).cloned()
    }

    pub(crate) fn invalidate(&mut self, id: ProxyId) -> bool {
        let removed = self.arena.remove(id.0).is_some();
        if removed {
            tracing::debug!(proxy = %id, "invalidated reverse proxy");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }
}
