//! Error types for the bridge.

use std::fmt;

use crate::callback::CallbackId;
use crate::proxy::ProxyId;

/// An exception raised by script code inside a registered callback.
///
/// It travels through every enclosing host and script frame untouched, so the
/// top-level caller observes the same value the innermost callback produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptException {
    message: String,
}

impl ScriptException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors surfaced to script code calling through the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid callback: {0}")]
    InvalidCallback(CallbackId),

    #[error("Invalid reverse proxy: {0}")]
    InvalidReverseProxy(ProxyId),

    #[error("No free {0} slots left")]
    RegistryFull(&'static str),

    #[error("Arity mismatch{}: expected {expected} argument(s), got {actual}", callback_suffix(.callback))]
    ArityMismatch {
        callback: Option<CallbackId>,
        expected: usize,
        actual: usize,
    },

    #[error("Attempting to call non-supported function via script invocation ({0})")]
    ForbiddenOperation(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Host error ({symbol}): {message}")]
    Host { symbol: String, message: String },

    #[error("{0}")]
    Exception(ScriptException),
}

fn callback_suffix(callback: &Option<CallbackId>) -> String {
    match callback {
        Some(id) => format!(" in callback {}", id),
        None => String::new(),
    }
}

impl BridgeError {
    /// Raise a script exception; the usual way for callback bodies to fail.
    pub fn raise(message: impl Into<String>) -> Self {
        BridgeError::Exception(ScriptException::new(message))
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        BridgeError::Encoding(message.into())
    }

    pub fn decoding(message: impl Into<String>) -> Self {
        BridgeError::Decoding(message.into())
    }
}

/// Errors returned by host primitives.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// An error signalled by the host itself.
    #[error("{symbol}: {message}")]
    Signal { symbol: String, message: String },

    /// A bridge error unwinding through host frames on its way to the caller.
    #[error(transparent)]
    Bridge(Box<BridgeError>),
}

impl HostError {
    pub fn signal(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Signal {
            symbol: symbol.into(),
            message: message.into(),
        }
    }
}

impl From<BridgeError> for HostError {
    fn from(e: BridgeError) -> Self {
        HostError::Bridge(Box::new(e))
    }
}

impl From<HostError> for BridgeError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Signal { symbol, message } => BridgeError::Host { symbol, message },
            HostError::Bridge(inner) => *inner,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_survives_host_round_trip() {
        let original = BridgeError::raise("Intentional");
        let through_host: HostError = original.into();
        let back: BridgeError = through_host.into();

        match back {
            BridgeError::Exception(e) => assert_eq!(e.message(), "Intentional"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_host_signal_becomes_host_error() {
        let err: BridgeError = HostError::signal("void-function", "foo").into();
        assert_eq!(err.to_string(), "Host error (void-function): foo");
    }

    #[test]
    fn test_arity_message() {
        let err = BridgeError::ArityMismatch {
            callback: None,
            expected: 0,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Arity mismatch: expected 0 argument(s), got 2"
        );
    }
}
