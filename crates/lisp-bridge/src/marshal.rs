//! Value Marshaller
//!
//! Converts [`Value`]s to [`Wire`] form and back.
//!
//! | Script value | Wire |
//! |---|---|
//! | null, boolean, string, array, object | `Data` (JSON) |
//! | number | `Ref` to a cached host number, or `Data` when caching is off |
//! | handle | `Ref`, unchanged |
//! | function | `Ref` to a host closure that re-enters the bridge |
//! | wrapped object | already a handle to the host's proxy marker |
//!
//! Encoding may create short-lived handles (closures, cached numbers). They
//! are pushed onto a keep-alive list that the caller holds until the host call
//! has returned, so no sweep can release them mid-call.

use std::collections::HashMap;
use std::rc::Weak;

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleInner};
use crate::value::{ScriptFn, Value};
use crate::wire::Wire;

/// An encoded value together with the handles that must outlive its use.
#[derive(Debug)]
pub struct Encoded {
    pub wire: Wire,
    pub keep_alive: Vec<Handle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NumberKey {
    Int(i64),
    Float(u64),
}

impl NumberKey {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(NumberKey::Int(*i)),
            Value::Float(f) => Some(NumberKey::Float(f.to_bits())),
            _ => None,
        }
    }
}

/// Content-keyed weak cache of host numbers.
#[derive(Default)]
pub(crate) struct NumberCache {
    entries: HashMap<NumberKey, Weak<HandleInner>>,
}

impl NumberCache {
    fn get(&self, key: NumberKey) -> Option<Handle> {
        self.entries.get(&key).and_then(Handle::upgrade)
    }

    fn insert(&mut self, key: NumberKey, handle: &Handle) {
        self.entries.insert(key, handle.downgrade());
    }

    pub(crate) fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }
}

impl Bridge {
    /// Encode a single value for the host.
    pub fn encode(&self, value: &Value) -> BridgeResult<Encoded> {
        let mut keep_alive = Vec::new();
        let wire = self.encode_into(value, &mut keep_alive)?;
        Ok(Encoded { wire, keep_alive })
    }

    pub(crate) fn encode_into(&self, value: &Value, keep: &mut Vec<Handle>) -> BridgeResult<Wire> {
        let wire = match value {
            Value::Handle(handle) => Wire::Ref(handle.id()),
            Value::Int(_) | Value::Float(_) if self.config().marshal.cache_numbers => {
                self.encode_cached_number(value, keep)?
            }
            Value::Function(callable) => {
                let closure = self.make_closure(callable)?;
                let wire = Wire::Ref(closure.id());
                keep.push(closure);
                wire
            }
            Value::Opaque(_) => {
                return Err(BridgeError::encoding(
                    "opaque script objects must be wrapped before crossing to the host",
                ));
            }
            data => Wire::from_json(&data.to_json()?)?,
        };
        tracing::trace!(kind = value.kind(), ?wire, "encoded");
        Ok(wire)
    }

    /// Decode a value received from the host.
    pub fn decode(&self, wire: Wire) -> BridgeResult<Value> {
        let value = match wire {
            Wire::Data(text) => Value::from_json(Wire::parse_data(&text)?),
            Wire::Ref(id) => Value::Handle(self.adopt(id)),
            Wire::Proxy(id) => self
                .proxies()
                .borrow()
                .unwrap(id)
                .ok_or(BridgeError::InvalidReverseProxy(id))?,
        };
        tracing::trace!(kind = value.kind(), "decoded");
        Ok(value)
    }

    fn encode_cached_number(&self, value: &Value, keep: &mut Vec<Handle>) -> BridgeResult<Wire> {
        let datum = value.to_json()?;
        let Some(key) = NumberKey::of(value) else {
            return Wire::from_json(&datum);
        };

        let cached = self.numbers().borrow().get(key);
        let handle = match cached {
            Some(handle) => handle,
            None => {
                let handle = self.materialize(&datum)?;
                self.numbers().borrow_mut().insert(key, &handle);
                handle
            }
        };

        let wire = Wire::Ref(handle.id());
        keep.push(handle);
        Ok(wire)
    }

    /// Register `callable` and build the host closure that calls it:
    /// `(lambda (&rest bridge--args) (bridge--reenter INDEX GENERATION bridge--args))`.
    fn make_closure(&self, callable: &ScriptFn) -> BridgeResult<Handle> {
        let (params, call) = self.reenter_form(callable)?;
        let form = self.list(&[self.symbol("lambda")?.into(), params, call])?;

        match self.eval(&form)? {
            Value::Handle(closure) => Ok(closure),
            other => Err(BridgeError::decoding(format!(
                "closure form evaluated to {}",
                other.kind()
            ))),
        }
    }
}
