//! The bridge context.
//!
//! [`Bridge`] owns every registry: handles, intern cache, number cache,
//! callbacks, reverse proxies and pending frames. All methods take `&self` so
//! the bridge can be re-entered from host code that is itself running inside a
//! script call. No registry borrow is held across a host call or a callback
//! body.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::callback::{CallbackId, CallbackRegistry};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::eval::{LiteralEvaluator, ScriptEvaluator};
use crate::frame::{Frame, FrameStack};
use crate::handle::{Handle, HandleTable};
use crate::host::{BridgeEntry, Host};
use crate::intern::{self, InternCache, Lookup, SymbolKind};
use crate::marshal::NumberCache;
use crate::proxy::{ProxyId, ReverseProxyRegistry};
use crate::value::{Arity, Value};
use crate::wire::{HostId, Wire};

/// Counters describing the bridge's current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Handles the script side still references.
    pub live_handles: usize,
    /// Handle table entries, including ones awaiting a sweep.
    pub tracked_handles: usize,
    pub callbacks: usize,
    pub reverse_proxies: usize,
    pub frame_depth: usize,
    /// Host values released over the bridge's lifetime.
    pub released_total: u64,
}

pub struct Bridge {
    host: Rc<dyn Host>,
    config: BridgeConfig,
    handles: RefCell<HandleTable>,
    interned: RefCell<InternCache>,
    numbers: RefCell<NumberCache>,
    callbacks: RefCell<CallbackRegistry>,
    proxies: RefCell<ReverseProxyRegistry>,
    frames: FrameStack,
    evaluator: RefCell<Rc<dyn ScriptEvaluator>>,
    /// Script → host calls currently in progress.
    outbound: Cell<usize>,
    evaluating: Cell<bool>,
    sweeping: Cell<bool>,
    released_total: Cell<u64>,
}

/// Restores a counter or flag when a call unwinds.
struct Depth<'a>(&'a Cell<usize>);

impl<'a> Depth<'a> {
    fn enter(cell: &'a Cell<usize>) -> Self {
        cell.set(cell.get() + 1);
        Self(cell)
    }
}

impl Drop for Depth<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

struct Flag<'a>(&'a Cell<bool>);

impl Drop for Flag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Bridge {
    pub fn new(host: Rc<dyn Host>, config: BridgeConfig) -> Self {
        tracing::debug!(
            sweep_interval_ms = config.sweep.interval_ms,
            cache_numbers = config.marshal.cache_numbers,
            "creating bridge"
        );
        Self {
            host,
            config,
            handles: RefCell::default(),
            interned: RefCell::default(),
            numbers: RefCell::default(),
            callbacks: RefCell::default(),
            proxies: RefCell::default(),
            frames: FrameStack::default(),
            evaluator: RefCell::new(Rc::new(LiteralEvaluator)),
            outbound: Cell::new(0),
            evaluating: Cell::new(false),
            sweeping: Cell::new(false),
            released_total: Cell::new(0),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Replace the engine used by `evaluate_literal`.
    pub fn set_evaluator(&self, evaluator: impl ScriptEvaluator + 'static) {
        *self.evaluator.borrow_mut() = Rc::new(evaluator);
    }

    pub fn stats(&self) -> BridgeStats {
        let handles = self.handles.borrow();
        BridgeStats {
            live_handles: handles.live_count(),
            tracked_handles: handles.len(),
            callbacks: self.callbacks.borrow().len(),
            reverse_proxies: self.proxies.borrow().len(),
            frame_depth: self.frames.depth(),
            released_total: self.released_total.get(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calling the host
    // ─────────────────────────────────────────────────────────────────────────

    /// Call the host function named `name`.
    ///
    /// Underscores in `name` are read as dashes. Forbidden operations are
    /// refused before any argument is encoded.
    pub fn call(&self, name: &str, args: &[Value]) -> BridgeResult<Value> {
        let name = intern::normalize(name);
        self.refuse_forbidden(&name)?;

        let function = self.lookup(&name, SymbolKind::Symbol, Lookup::Cached)?;
        self.funcall(&function, args)
    }

    /// Apply a host function value (symbol or closure) to `args`.
    ///
    /// Symbols obtained through [`Bridge::lookup`] are checked against the
    /// forbidden operations just like names passed to [`Bridge::call`].
    pub fn funcall(&self, function: &Handle, args: &[Value]) -> BridgeResult<Value> {
        if let Some(name) = function.symbol_name() {
            self.refuse_forbidden(name)?;
        }

        let mut keep_alive = Vec::new();
        let wires = args
            .iter()
            .map(|arg| self.encode_into(arg, &mut keep_alive))
            .collect::<BridgeResult<Vec<_>>>()?;

        let result = {
            let _depth = Depth::enter(&self.outbound);
            self.host.invoke(self, function.id(), &wires)
        };
        let value = self.decode(result?)?;

        drop(keep_alive);
        Ok(value)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Symbols
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve a symbol or keyword, optionally through the intern cache.
    pub fn lookup(&self, name: &str, kind: SymbolKind, lookup: Lookup) -> BridgeResult<Handle> {
        let host_name = intern::host_name(name, kind);

        if lookup == Lookup::Cached {
            let cached = self.interned.borrow().get(kind, &host_name);
            if let Some(handle) = cached {
                return Ok(handle);
            }
        }

        let handle = self.adopt(self.host.intern(&host_name)?);
        handle.record_symbol_name(&host_name);
        tracing::trace!(name = %host_name, ?kind, ?lookup, id = %handle.id(), "interned");
        self.interned.borrow_mut().insert(kind, host_name, &handle);
        Ok(handle)
    }

    pub fn symbol(&self, name: &str) -> BridgeResult<Handle> {
        self.lookup(name, SymbolKind::Symbol, Lookup::Cached)
    }

    pub fn keyword(&self, name: &str) -> BridgeResult<Handle> {
        self.lookup(name, SymbolKind::Keyword, Lookup::Cached)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host values
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a host value from plain data and hold it by reference.
    pub fn materialize(&self, datum: &serde_json::Value) -> BridgeResult<Handle> {
        let Wire::Data(text) = Wire::from_json(datum)? else {
            return Err(BridgeError::encoding("datum did not encode as data"));
        };
        Ok(self.adopt(self.host.materialize(&text)?))
    }

    /// Full structure of a host value, fetched fresh on every call.
    ///
    /// Values without one (closures, buffers, native objects) yield
    /// `{"nativeProxy": true}`.
    pub fn structural_form(&self, handle: &Handle) -> BridgeResult<serde_json::Value> {
        match self.host.structural_form(handle.id())? {
            Some(text) => Wire::parse_data(&text),
            None => Ok(serde_json::json!({ "nativeProxy": true })),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reverse proxies
    // ─────────────────────────────────────────────────────────────────────────

    /// Make `object` passable through the host. The host sees an opaque
    /// marker; whenever it hands that marker back, script code receives
    /// `object` itself.
    pub fn wrap(&self, object: Value) -> BridgeResult<Handle> {
        let id = self.proxies.borrow_mut().wrap(object)?;
        match self.host.make_reverse_proxy(id) {
            Ok(marker) => Ok(self.adopt(marker)),
            Err(e) => {
                self.proxies.borrow_mut().invalidate(id);
                Err(e.into())
            }
        }
    }

    pub fn unwrap_proxy(&self, id: ProxyId) -> BridgeResult<Value> {
        self.proxies
            .borrow()
            .unwrap(id)
            .ok_or(BridgeError::InvalidReverseProxy(id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Crate-internal access
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn adopt(&self, id: HostId) -> Handle {
        self.handles.borrow_mut().adopt(id)
    }

    pub(crate) fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub(crate) fn handles(&self) -> &RefCell<HandleTable> {
        &self.handles
    }

    pub(crate) fn interned(&self) -> &RefCell<InternCache> {
        &self.interned
    }

    pub(crate) fn numbers(&self) -> &RefCell<NumberCache> {
        &self.numbers
    }

    pub(crate) fn callbacks(&self) -> &RefCell<CallbackRegistry> {
        &self.callbacks
    }

    pub(crate) fn proxies(&self) -> &RefCell<ReverseProxyRegistry> {
        &self.proxies
    }

    pub(crate) fn frames(&self) -> &FrameStack {
        &self.frames
    }

    pub(crate) fn sweeping(&self) -> &Cell<bool> {
        &self.sweeping
    }

    pub(crate) fn record_released(&self, count: usize) {
        self.released_total
            .set(self.released_total.get() + count as u64);
    }

    fn refuse_forbidden(&self, name: &str) -> BridgeResult<()> {
        if self.config.privilege.is_forbidden(name) {
            tracing::warn!(operation = %name, "refused forbidden operation");
            return Err(BridgeError::ForbiddenOperation(name.to_string()));
        }
        Ok(())
    }

    /// Script code is on the stack, or the host is already evaluating source.
    fn in_script_context(&self) -> bool {
        self.frames.depth() > 0 || self.outbound.get() > 0 || self.evaluating.get()
    }
}

impl BridgeEntry for Bridge {
    fn invoke_callback(&self, id: CallbackId, args: Vec<Wire>) -> Result<Wire, BridgeError> {
        let callable = self
            .callbacks
            .borrow()
            .get(id)
            .ok_or(BridgeError::InvalidCallback(id))?;

        if let Arity::Exact(expected) = callable.arity() {
            if expected != args.len() {
                return Err(BridgeError::ArityMismatch {
                    callback: Some(id),
                    expected,
                    actual: args.len(),
                });
            }
        }

        let frame = self.frames.enter(Frame {
            callback: id,
            arg_count: args.len(),
            pinned: args.iter().filter_map(Wire::as_ref_id).collect(),
            failed: false,
        });

        let result = args
            .into_iter()
            .map(|wire| self.decode(wire))
            .collect::<BridgeResult<Vec<_>>>()
            .and_then(|values| callable.call(self, &values))
            .and_then(|value| self.encode(&value))
            .map(|encoded| encoded.wire);

        if result.is_err() {
            frame.mark_failed();
        }
        result
    }

    fn invalidate_callback(&self, id: CallbackId) {
        self.callbacks.borrow_mut().invalidate(id);
    }

    fn invalidate_reverse_proxy(&self, id: ProxyId) {
        self.proxies.borrow_mut().invalidate(id);
    }

    fn reconcile_liveness(&self) -> usize {
        self.sweep()
    }

    fn evaluate_literal(&self, source: &str) -> Result<Wire, BridgeError> {
        if self.in_script_context() && !self.config.privilege.allow_nested_literal_eval {
            tracing::warn!("refused literal evaluation while script code is running");
            return Err(BridgeError::ForbiddenOperation(
                "evaluate_literal while script code is running".to_string(),
            ));
        }

        let evaluator = Rc::clone(&self.evaluator.borrow());
        self.evaluating.set(true);
        let _flag = Flag(&self.evaluating);

        let value = evaluator.evaluate(self, source)?;
        Ok(self.encode(&value)?.wire)
    }
}
