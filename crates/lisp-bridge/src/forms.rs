//! Form-Builder
//!
//! Host special forms cannot be called like functions: their arguments must
//! arrive unevaluated. Everything here builds a host form out of ordinary
//! `list` calls and hands it to `eval`, so it only relies on the handle,
//! callback and marshalling layers.
//!
//! Values spliced into a form would otherwise be evaluated by the host, so
//! list-shaped arguments are quoted. A form that is already `(quote ...)` is
//! left alone.

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::host;
use crate::value::{Arity, ScriptFn, Value};

/// `(interactive)` declaration of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interactive {
    /// `(interactive)`
    Plain,
    /// `(interactive "SPEC")`
    Spec(String),
}

/// A named host function whose body is a script callable.
#[derive(Debug, Clone)]
pub struct Defun {
    name: String,
    doc: Option<String>,
    interactive: Option<Interactive>,
    body: ScriptFn,
}

impl Defun {
    pub fn new(name: impl Into<String>, body: ScriptFn) -> Self {
        Self {
            name: name.into(),
            doc: None,
            interactive: None,
            body,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = Some(Interactive::Plain);
        self
    }

    pub fn interactive_spec(mut self, spec: impl Into<String>) -> Self {
        self.interactive = Some(Interactive::Spec(spec.into()));
        self
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

impl Bridge {
    // ─────────────────────────────────────────────────────────────────────────
    // Building blocks
    // ─────────────────────────────────────────────────────────────────────────

    /// `(list ITEMS...)`. Returns null for an empty list.
    pub fn list(&self, items: &[Value]) -> BridgeResult<Value> {
        self.call("list", items)
    }

    /// `(quote VALUE)`
    pub fn quote(&self, value: &Value) -> BridgeResult<Value> {
        self.list(&[self.symbol("quote")?.into(), value.clone()])
    }

    /// Evaluate a host form.
    pub fn eval(&self, form: &Value) -> BridgeResult<Value> {
        self.call("eval", std::slice::from_ref(form))
    }

    /// Quote `value` if the host would otherwise evaluate it as a call.
    fn quote_if_list(&self, value: &Value) -> BridgeResult<Value> {
        match value {
            // Objects arrive on the host side as plists.
            Value::Object(fields) if !fields.is_empty() => self.quote(value),
            Value::Handle(handle) => {
                if !self.is_quoted_or_atom(handle)? {
                    return self.quote(value);
                }
                Ok(value.clone())
            }
            _ => Ok(value.clone()),
        }
    }

    fn is_quoted_or_atom(&self, handle: &Handle) -> BridgeResult<bool> {
        let value = Value::Handle(handle.clone());
        if !truthy(&self.call("consp", std::slice::from_ref(&value))?) {
            return Ok(true);
        }
        let head = self.call("car", std::slice::from_ref(&value))?;
        let quote = self.symbol("quote")?;
        Ok(matches!(head, Value::Handle(h) if h == quote))
    }

    /// Register `body` and return `(&rest bridge--args)` together with
    /// `(bridge--reenter INDEX GENERATION bridge--args)`.
    pub(crate) fn reenter_form(&self, body: &ScriptFn) -> BridgeResult<(Value, Value)> {
        let id = self.callbacks().borrow_mut().register(body.clone())?;
        let args: Value = self.symbol(host::ARGS)?.into();
        let params = self.list(&[self.symbol("&rest")?.into(), args.clone()])?;
        let call = self.list(&[
            self.symbol(host::REENTER)?.into(),
            Value::Int(i64::from(id.index())),
            Value::Int(i64::from(id.generation())),
            args,
        ])?;
        Ok((params, call))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Definitions and scopes
    // ─────────────────────────────────────────────────────────────────────────

    /// `(defun NAME (&rest bridge--args) [DOC] [(interactive [SPEC])] BODY)`
    ///
    /// Returns the function's symbol.
    pub fn defun(&self, def: Defun) -> BridgeResult<Handle> {
        tracing::debug!(name = %def.name, arity = ?def.body.arity(), "defining host function");

        let name = self.symbol(&def.name)?;
        let (params, call) = self.reenter_form(&def.body)?;

        let mut form = vec![self.symbol("defun")?.into(), name.clone().into(), params];
        if let Some(doc) = def.doc {
            form.push(Value::Str(doc));
        }
        if let Some(interactive) = def.interactive {
            let mut decl = vec![self.symbol("interactive")?.into()];
            if let Interactive::Spec(spec) = interactive {
                decl.push(Value::Str(spec));
            }
            form.push(self.list(&decl)?);
        }
        form.push(call);

        self.eval(&self.list(&form)?)?;
        Ok(name)
    }

    /// Evaluate `body` inside `(let ((NAME VALUE)...) ...)`.
    ///
    /// A nullary body observes the bindings dynamically; otherwise it must take
    /// exactly one argument per binding and receives the bound values. Values
    /// are spliced in the same way as [`Bridge::special_form`] arguments.
    pub fn let_bind(&self, bindings: &[(&str, Value)], body: ScriptFn) -> BridgeResult<Value> {
        let arity = body.arity();
        let passes_values = match arity {
            Arity::Exact(0) => false,
            Arity::Exact(n) if n == bindings.len() => true,
            Arity::Variadic => true,
            Arity::Exact(n) => {
                return Err(BridgeError::ArityMismatch {
                    callback: None,
                    expected: bindings.len(),
                    actual: n,
                });
            }
        };

        let mut names = Vec::with_capacity(bindings.len());
        let mut binding_forms = Vec::with_capacity(bindings.len());
        for (name, value) in bindings {
            let symbol: Value = self.symbol(name)?.into();
            binding_forms.push(self.list(&[symbol.clone(), self.quote_if_list(value)?])?);
            names.push(symbol);
        }

        let mut call = vec![self.symbol("funcall")?.into(), self.quote(&body.into())?];
        if passes_values {
            call.extend(names);
        }

        let form = self.list(&[
            self.symbol("let")?.into(),
            self.list(&binding_forms)?,
            self.list(&call)?,
        ])?;
        self.eval(&form)
    }

    /// Run `body` with `buffer` current, restoring the previous buffer on
    /// every exit path. `buffer` is a buffer, a buffer name, or a form that
    /// evaluates to one.
    pub fn with_current_buffer(&self, buffer: &Value, body: ScriptFn) -> BridgeResult<Value> {
        require_nullary(&body)?;
        let scoped = self.scoped_call(&body)?;
        let form = self.list(&[
            self.symbol("with-current-buffer")?.into(),
            self.quote_if_list(buffer)?,
            scoped,
        ])?;
        self.eval(&form)
    }

    /// Run `body` in a fresh temporary buffer.
    pub fn with_temp_buffer(&self, body: ScriptFn) -> BridgeResult<Value> {
        require_nullary(&body)?;
        let scoped = self.scoped_call(&body)?;
        let form = self.list(&[self.symbol("with-temp-buffer")?.into(), scoped])?;
        self.eval(&form)
    }

    /// `(funcall 'CLOSURE)`
    fn scoped_call(&self, body: &ScriptFn) -> BridgeResult<Value> {
        self.list(&[
            self.symbol("funcall")?.into(),
            self.quote(&Value::Function(body.clone()))?,
        ])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Generic special forms
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluate `(HEAD ARGS...)`, quoting list-shaped arguments.
    pub fn special_form(&self, head: &str, args: &[Value]) -> BridgeResult<Value> {
        let mut form = Vec::with_capacity(args.len() + 1);
        form.push(self.symbol(head)?.into());
        for arg in args {
            form.push(self.quote_if_list(arg)?);
        }
        self.eval(&self.list(&form)?)
    }

    pub fn setq(&self, args: &[Value]) -> BridgeResult<Value> {
        self.special_form("setq", args)
    }

    pub fn defvar(&self, args: &[Value]) -> BridgeResult<Value> {
        self.special_form("defvar", args)
    }

    pub fn define_key(&self, args: &[Value]) -> BridgeResult<Value> {
        self.special_form("define-key", args)
    }

    pub fn define_minor_mode(&self, args: &[Value]) -> BridgeResult<Value> {
        self.special_form("define-minor-mode", args)
    }

    pub fn define_derived_mode(&self, args: &[Value]) -> BridgeResult<Value> {
        self.special_form("define-derived-mode", args)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Hash table with `equal` test populated from `entries`.
    pub fn make_hash_table(&self, entries: &[(Value, Value)]) -> BridgeResult<Value> {
        let table = self.call(
            "make-hash-table",
            &[self.keyword("test")?.into(), self.symbol("equal")?.into()],
        )?;
        for (key, value) in entries {
            self.call("puthash", &[key.clone(), value.clone(), table.clone()])?;
        }
        Ok(table)
    }

    /// `((KEY . VALUE)...)`
    pub fn make_alist(&self, entries: &[(Value, Value)]) -> BridgeResult<Value> {
        let mut cells = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            cells.push(self.call("cons", &[key.clone(), value.clone()])?);
        }
        self.list(&cells)
    }

    /// `(:KEY VALUE...)`
    pub fn make_plist(&self, entries: &[(&str, Value)]) -> BridgeResult<Value> {
        let mut items = Vec::with_capacity(entries.len() * 2);
        for (key, value) in entries {
            items.push(self.keyword(key)?.into());
            items.push(value.clone());
        }
        self.list(&items)
    }

    pub fn make_vector(&self, items: &[Value]) -> BridgeResult<Value> {
        self.call("vector", items)
    }

    pub fn make_list(&self, items: &[Value]) -> BridgeResult<Value> {
        self.list(items)
    }

    /// A host string held by reference rather than copied on every crossing.
    pub fn make_string(&self, text: &str) -> BridgeResult<Handle> {
        self.materialize(&serde_json::Value::String(text.to_string()))
    }
}

fn require_nullary(body: &ScriptFn) -> BridgeResult<()> {
    match body.arity() {
        Arity::Exact(n) if n > 0 => Err(BridgeError::ArityMismatch {
            callback: None,
            expected: 0,
            actual: n,
        }),
        _ => Ok(()),
    }
}
