//! Lisp Bridge
//!
//! A synchronous value and call bridge between a host Lisp interpreter and a
//! script engine that calls back into it.
//!
//! # Architecture
//!
//! - [`Bridge`] is the one context object; it owns every registry
//! - Host values cross by reference as [`Handle`]s, one per live host identity
//! - Script callables cross as host closures that re-enter the bridge by index
//! - Script objects the host cannot interpret cross as reverse proxies
//! - A liveness sweep tells the host which references it may drop
//!
//! The host side implements [`Host`]; it reaches back into the bridge through
//! [`BridgeEntry`].

mod arena;
mod bridge;
mod callback;
mod config;
mod error;
mod eval;
mod forms;
mod frame;
mod handle;
pub mod host;
mod intern;
mod marshal;
mod proxy;
mod sweep;
mod value;
mod wire;

pub use arena::Key;
pub use bridge::{Bridge, BridgeStats};
pub use callback::CallbackId;
pub use config::{BridgeConfig, ConfigError, MarshalConfig, PrivilegeConfig, SweepConfig};
pub use error::{BridgeError, BridgeResult, HostError, ScriptException};
pub use eval::{LiteralEvaluator, ScriptEvaluator};
pub use forms::{Defun, Interactive};
pub use handle::Handle;
pub use host::{BridgeEntry, Host};
pub use intern::{Lookup, SymbolKind, normalize};
pub use marshal::Encoded;
pub use proxy::ProxyId;
pub use sweep::spawn_periodic_sweep;
pub use value::{Arity, NativeFn, Opaque, ScriptFn, Value};
pub use wire::{HostId, Wire};
