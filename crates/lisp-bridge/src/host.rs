//! The two directions of the boundary.
//!
//! [`Host`] is what the bridge needs from the host interpreter. [`BridgeEntry`]
//! is what the host may call on the bridge. Every host primitive receives the
//! bridge as `&dyn BridgeEntry` so host code running inside a script call can
//! call back into script code, to any depth.
//!
//! Every [`HostId`] the host hands out (as a result, an interned symbol or a
//! materialized value) is retained on the host side until it shows up in a
//! [`Host::release`] batch.

use crate::callback::CallbackId;
use crate::error::{BridgeError, HostError};
use crate::proxy::ProxyId;
use crate::wire::{HostId, Wire};

// ─────────────────────────────────────────────────────────────────────────────
// Protocol symbols
// ─────────────────────────────────────────────────────────────────────────────

/// `(bridge--reenter INDEX GENERATION ARGS)` invokes a registered callback.
pub const REENTER: &str = "bridge--reenter";

/// Rest-parameter name used by generated closures.
pub const ARGS: &str = "bridge--args";

/// Head of the host-side marker list for a reverse proxy:
/// `(bridge--proxy INDEX GENERATION)`.
pub const PROXY_MARKER: &str = "bridge--proxy";

/// `(bridge--clear INDEX GENERATION)` invalidates a callback.
pub const CLEAR: &str = "bridge--clear";

/// `(bridge--clear-proxy INDEX GENERATION)` invalidates a reverse proxy.
pub const CLEAR_PROXY: &str = "bridge--clear-proxy";

// ─────────────────────────────────────────────────────────────────────────────
// Bridge → host
// ─────────────────────────────────────────────────────────────────────────────

pub trait Host {
    /// Apply the host function identified by `function` to `args`.
    fn invoke(
        &self,
        bridge: &dyn BridgeEntry,
        function: HostId,
        args: &[Wire],
    ) -> Result<Wire, HostError>;

    /// Intern `name` (already in host spelling) and return the symbol.
    fn intern(&self, name: &str) -> Result<HostId, HostError>;

    /// Build a host value from JSON text and return it by reference.
    fn materialize(&self, datum: &str) -> Result<HostId, HostError>;

    /// Build the host's marker value for a wrapped script object.
    fn make_reverse_proxy(&self, id: ProxyId) -> Result<HostId, HostError>;

    /// JSON text of the value's full structure, or `None` when it has none
    /// (closures, buffers, other native objects).
    fn structural_form(&self, id: HostId) -> Result<Option<String>, HostError>;

    /// Stop retaining every value in `batch`.
    fn release(&self, batch: &[HostId]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Host → bridge
// ─────────────────────────────────────────────────────────────────────────────

pub trait BridgeEntry {
    /// Call a registered script callable.
    fn invoke_callback(&self, id: CallbackId, args: Vec<Wire>) -> Result<Wire, BridgeError>;

    /// Idempotent.
    fn invalidate_callback(&self, id: CallbackId);

    /// Idempotent.
    fn invalidate_reverse_proxy(&self, id: ProxyId);

    /// Run a liveness sweep now. Returns how many host values were released;
    /// the count is advisory.
    fn reconcile_liveness(&self) -> usize;

    /// Evaluate script source. Privileged: refused while script code is
    /// already running unless configured otherwise.
    fn evaluate_literal(&self, source: &str) -> Result<Wire, BridgeError>;
}
