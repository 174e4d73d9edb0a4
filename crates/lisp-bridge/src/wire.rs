//! Wire form of values crossing the boundary.
//!
//! Every argument and result is exactly one of:
//! - `Data`: JSON text for primitives and plain structured data,
//! - `Ref`: the identity of a host value the host keeps retained for us,
//! - `Proxy`: the marker kind for a script object previously wrapped with
//!   [`Bridge::wrap`](crate::Bridge::wrap).

use std::fmt;

use crate::error::{BridgeError, BridgeResult};
use crate::proxy::ProxyId;

/// Host-side identity of a value, unique per live host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host:{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Wire {
    Data(String),
    Ref(HostId),
    Proxy(ProxyId),
}

impl Wire {
    pub fn null() -> Self {
        Wire::Data("null".to_string())
    }

    /// Serialize a JSON datum, rejecting text the host cannot represent.
    pub fn from_json(datum: &serde_json::Value) -> BridgeResult<Self> {
        check_text(datum)?;
        serde_json::to_string(datum)
            .map(Wire::Data)
            .map_err(|e| BridgeError::encoding(e.to_string()))
    }

    pub fn as_ref_id(&self) -> Option<HostId> {
        match self {
            Wire::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Parse the JSON payload of a `Data` wire value.
    pub fn parse_data(text: &str) -> BridgeResult<serde_json::Value> {
        serde_json::from_str(text).map_err(|e| BridgeError::decoding(format!("{e}: {text:?}")))
    }
}

/// Host strings are NUL-terminated on the far side of the boundary.
fn check_text(datum: &serde_json::Value) -> BridgeResult<()> {
    match datum {
        serde_json::Value::String(s) => check_str(s),
        serde_json::Value::Array(items) => items.iter().try_for_each(check_text),
        serde_json::Value::Object(map) => map.iter().try_for_each(|(k, v)| {
            check_str(k)?;
            check_text(v)
        }),
        _ => Ok(()),
    }
}

fn check_str(s: &str) -> BridgeResult<()> {
    if s.contains('\0') {
        return Err(BridgeError::encoding("string contains an embedded NUL byte"));
    }
    Ok(())
}
