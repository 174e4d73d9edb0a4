//! The host side of the wire protocol.
//!
//! `nil`, `t`, numbers and strings cross as JSON. A `(bridge--proxy I G)`
//! marker crosses as the proxy kind. Everything else crosses by reference and
//! stays in the retained table until the bridge releases it.

use lisp_bridge::{BridgeEntry, Host, HostError, HostId, ProxyId, Wire, host};

use crate::interp::Interp;
use crate::object::Obj;

fn signal(symbol: &str, message: impl Into<String>) -> HostError {
    HostError::signal(symbol, message)
}

impl Interp {
    // ─────────────────────────────────────────────────────────────────────────
    // Retained table
    // ─────────────────────────────────────────────────────────────────────────

    /// Keep `obj` alive for the bridge. A heap object already retained keeps
    /// its id.
    pub(crate) fn retain(&self, obj: Obj) -> HostId {
        let identity = obj.identity();
        if let Some(key) = identity {
            let existing = self.identities.borrow().get(&key).copied();
            if let Some(id) = existing {
                return id;
            }
        }

        self.next_id.set(self.next_id.get() + 1);
        let id = HostId(self.next_id.get());
        if let Some(key) = identity {
            self.identities.borrow_mut().insert(key, id);
        }
        self.retained.borrow_mut().insert(id, obj);
        id
    }

    pub(crate) fn resolve(&self, id: HostId) -> Result<Obj, HostError> {
        self.retained
            .borrow()
            .get(&id)
            .cloned()
            .ok_or_else(|| signal("invalid-reference", id.to_string()))
    }

    pub fn is_retained(&self, id: HostId) -> bool {
        self.retained.borrow().contains_key(&id)
    }

    pub fn retained_count(&self) -> usize {
        self.retained.borrow().len()
    }

    /// Every release batch received so far, oldest first.
    pub fn release_batches(&self) -> Vec<Vec<HostId>> {
        self.releases.borrow().clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wire conversion
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn encode(&self, obj: &Obj) -> Result<Wire, HostError> {
        let datum = match obj {
            Obj::Nil => serde_json::Value::Null,
            Obj::Int(i) => serde_json::Value::from(*i),
            Obj::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None => return Ok(Wire::Ref(self.retain(obj.clone()))),
            },
            Obj::Str(s) => serde_json::Value::String(s.to_string()),
            Obj::Symbol(_) if self.is_t(obj) => serde_json::Value::Bool(true),
            Obj::Cons(_) => {
                if let Some(proxy) = self.proxy_marker(obj) {
                    return Ok(Wire::Proxy(proxy));
                }
                return Ok(Wire::Ref(self.retain(obj.clone())));
            }
            _ => return Ok(Wire::Ref(self.retain(obj.clone()))),
        };
        serde_json::to_string(&datum)
            .map(Wire::Data)
            .map_err(|e| signal("error", e.to_string()))
    }

    pub(crate) fn decode(&self, wire: &Wire) -> Result<Obj, HostError> {
        match wire {
            Wire::Data(text) => serde_json::from_str(text)
                .map(|datum| self.from_json(&datum))
                .map_err(|e| signal("json-parse-error", e.to_string())),
            Wire::Ref(id) => self.resolve(*id),
            Wire::Proxy(id) => Ok(self.proxy_form(*id)),
        }
    }

    fn proxy_form(&self, id: ProxyId) -> Obj {
        Obj::list([
            self.intern(host::PROXY_MARKER),
            Obj::Int(i64::from(id.index())),
            Obj::Int(i64::from(id.generation())),
        ])
    }

    fn proxy_marker(&self, obj: &Obj) -> Option<ProxyId> {
        let items = obj.to_vec()?;
        let [head, Obj::Int(index), Obj::Int(generation)] = items.as_slice() else {
            return None;
        };
        if !head.eq(&self.intern(host::PROXY_MARKER)) {
            return None;
        }
        Some(ProxyId::from_parts(
            u32::try_from(*index).ok()?,
            u32::try_from(*generation).ok()?,
        ))
    }

    /// Arrays become vectors, objects become plists keyed by keywords.
    pub fn from_json(&self, datum: &serde_json::Value) -> Obj {
        match datum {
            serde_json::Value::Null => Obj::Nil,
            serde_json::Value::Bool(b) => self.bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Obj::Int(i),
                None => Obj::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Obj::string(s),
            serde_json::Value::Array(items) => {
                Obj::vector(items.iter().map(|item| self.from_json(item)).collect())
            }
            serde_json::Value::Object(map) => Obj::list(map.iter().flat_map(|(key, value)| {
                [self.intern(&format!(":{key}")), self.from_json(value)]
            })),
        }
    }

    /// Structural form of `obj`, or `None` if it (or anything inside it) is
    /// not plain data.
    pub fn to_json(&self, obj: &Obj) -> Option<serde_json::Value> {
        Some(match obj {
            Obj::Nil => serde_json::Value::Null,
            Obj::Int(i) => serde_json::Value::from(*i),
            Obj::Float(f) => serde_json::Value::Number(serde_json::Number::from_f64(*f)?),
            Obj::Str(s) => serde_json::Value::String(s.to_string()),
            Obj::Symbol(_) if self.is_t(obj) => serde_json::Value::Bool(true),
            Obj::Symbol(s) => serde_json::Value::String(s.name.clone()),
            Obj::Cons(_) => serde_json::Value::Array(
                obj.to_vec()?
                    .iter()
                    .map(|item| self.to_json(item))
                    .collect::<Option<_>>()?,
            ),
            Obj::Vector(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|item| self.to_json(item))
                    .collect::<Option<_>>()?,
            ),
            Obj::HashTable(table) => {
                let mut map = serde_json::Map::new();
                for (key, value) in &table.borrow().entries {
                    let key = match key {
                        Obj::Str(s) => s.to_string(),
                        Obj::Symbol(s) => s.name.clone(),
                        _ => return None,
                    };
                    map.insert(key, self.to_json(value)?);
                }
                serde_json::Value::Object(map)
            }
            Obj::Closure(_) | Obj::Builtin(_) | Obj::Buffer(_) => return None,
        })
    }
}

impl Host for Interp {
    fn invoke(
        &self,
        bridge: &dyn BridgeEntry,
        function: HostId,
        args: &[Wire],
    ) -> Result<Wire, HostError> {
        let function = self.resolve(function)?;
        let args = args
            .iter()
            .map(|wire| self.decode(wire))
            .collect::<Result<Vec<_>, _>>()?;

        let result = self.apply(bridge, &function, args)?;
        self.encode(&result)
    }

    fn intern(&self, name: &str) -> Result<HostId, HostError> {
        Ok(self.retain(Interp::intern(self, name)))
    }

    fn materialize(&self, datum: &str) -> Result<HostId, HostError> {
        let datum: serde_json::Value =
            serde_json::from_str(datum).map_err(|e| signal("json-parse-error", e.to_string()))?;
        Ok(self.retain(self.from_json(&datum)))
    }

    fn make_reverse_proxy(&self, id: ProxyId) -> Result<HostId, HostError> {
        Ok(self.retain(self.proxy_form(id)))
    }

    fn structural_form(&self, id: HostId) -> Result<Option<String>, HostError> {
        let obj = self.resolve(id)?;
        Ok(self.to_json(&obj).map(|datum| datum.to_string()))
    }

    fn release(&self, batch: &[HostId]) {
        let mut retained = self.retained.borrow_mut();
        let mut identities = self.identities.borrow_mut();
        for id in batch {
            if let Some(key) = retained.remove(id).and_then(|obj| obj.identity()) {
                identities.remove(&key);
            }
        }
        tracing::debug!(count = batch.len(), remaining = retained.len(), "released host values");
        self.releases.borrow_mut().push(batch.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_immediates_cross_as_data() {
        let interp = Interp::new();
        assert_eq!(interp.encode(&Obj::Nil).unwrap(), Wire::Data("null".into()));
        assert_eq!(interp.encode(&interp.t()).unwrap(), Wire::Data("true".into()));
        assert_eq!(interp.encode(&Obj::Int(7)).unwrap(), Wire::Data("7".into()));
        assert_eq!(
            interp.encode(&Obj::string("hi")).unwrap(),
            Wire::Data("\"hi\"".into())
        );
        assert_eq!(interp.retained_count(), 0);
    }

    #[test]
    fn test_heap_objects_keep_their_id() {
        let interp = Interp::new();
        let list = Obj::list([Obj::Int(1)]);
        let a = interp.encode(&list).unwrap();
        let b = interp.encode(&list).unwrap();
        assert_eq!(a, b);
        assert_eq!(interp.retained_count(), 1);

        let id = a.as_ref_id().unwrap();
        interp.release(&[id]);
        assert!(!interp.is_retained(id));
        assert_ne!(interp.encode(&list).unwrap(), a);
    }

    #[test]
    fn test_proxy_marker_round_trip() {
        let interp = Interp::new();
        let id = ProxyId::from_parts(3, 1);
        let marker = interp.decode(&Wire::Proxy(id)).unwrap();
        assert_eq!(marker.print(), "(bridge--proxy 3 1)");
        assert_eq!(interp.encode(&marker).unwrap(), Wire::Proxy(id));
    }

    #[test]
    fn test_json_objects_become_plists() {
        let interp = Interp::new();
        let obj = interp.from_json(&json!({"a": 1, "b": [true, null]}));
        assert_eq!(obj.print(), "(:a 1 :b [t nil])");
        assert_eq!(interp.to_json(&obj), Some(json!([":a", 1, ":b", [true, null]])));
    }

    #[test]
    fn test_closures_have_no_structural_form() {
        let interp = Interp::new();
        let closure = interp.make_closure(&[Obj::Nil]).unwrap();
        assert_eq!(interp.to_json(&closure), None);
        assert_eq!(interp.to_json(&Obj::list([closure])), None);
    }
}
