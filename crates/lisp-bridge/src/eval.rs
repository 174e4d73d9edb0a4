//! Literal evaluation seam.
//!
//! The host may ask the bridge to evaluate script source. Which engine does the
//! evaluating is pluggable; the default only understands JSON literals.

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::value::Value;

pub trait ScriptEvaluator {
    fn evaluate(&self, bridge: &Bridge, source: &str) -> BridgeResult<Value>;
}

/// Evaluates JSON literal source text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralEvaluator;

impl ScriptEvaluator for LiteralEvaluator {
    fn evaluate(&self, _bridge: &Bridge, source: &str) -> BridgeResult<Value> {
        serde_json::from_str(source.trim())
            .map(Value::from_json)
            .map_err(|e| BridgeError::raise(format!("SyntaxError: {e}")))
    }
}

impl<F> ScriptEvaluator for F
where
    F: Fn(&Bridge, &str) -> BridgeResult<Value>,
{
    fn evaluate(&self, bridge: &Bridge, source: &str) -> BridgeResult<Value> {
        self(bridge, source)
    }
}
