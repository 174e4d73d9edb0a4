//! Callback registry.
//!
//! Script callables the host may call back into. The host only ever sees the
//! [`CallbackId`], embedded as two integers in the closure form built by the
//! marshaller.

use std::fmt;

use crate::arena::{Arena, Key};
use crate::error::{BridgeError, BridgeResult};
use crate::value::ScriptFn;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(Key);

impl CallbackId {
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

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackId({})", self.0)
    }
}

#[derive(Default)]
pub(crate) struct CallbackRegistry {
    arena: Arena<ScriptFn>,
}

impl CallbackRegistry {
    pub(crate) fn register(&mut self, callable: ScriptFn) -> BridgeResult<CallbackId> {
        let key = self
            .arena
            .insert(callable)
            .map_err(|_| BridgeError::RegistryFull("callback"))?;
        let id = CallbackId(key);
        tracing::debug!(callback = %id, "registered callback");
        Ok(id)
    }

    /// Cloned out so the registry is not borrowed while the body runs.
    pub(crate) fn get(&self, id: CallbackId) -> Option<ScriptFn> {
        self.arena.get(id.0).cloned()
    }

    pub(crate) fn invalidate(&mut self, id: CallbackId) -> bool {
        let removed = self.arena.remove(id.0).is_some();
        if removed {
            tracing::debug!(callback = %id, "invalidated callback");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Arity, Value};

    #[test]
    fn test_invalidated_callback_is_gone() {
        let mut registry = CallbackRegistry::default();
        let id = registry.register(ScriptFn::new(0, |_, _| Ok(Value::Null))).unwrap();
        assert!(registry.get(id).is_some());

        assert!(registry.invalidate(id));
        assert!(!registry.invalidate(id));
        assert!(registry.get(id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_reused_slot_rejects_old_id() {
        let mut registry = CallbackRegistry::default();
        let old = registry.register(ScriptFn::new(1, |_, _| Ok(Value::Null))).unwrap();
        registry.invalidate(old);
        let new = registry.register(ScriptFn::new(2, |_, _| Ok(Value::Null))).unwrap();

        assert_eq!(old.index(), new.index());
        assert!(registry.get(old).is_none());
        assert_eq!(registry.get(new).map(|f| f.arity()), Some(Arity::Exact(2)));
    }
}
