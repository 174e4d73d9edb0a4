//! The interpreter: obarray, dynamic binding, special forms, buffers and the
//! table of values retained on behalf of the bridge.
//!
//! Every variable is dynamically scoped. `let` and function parameters save
//! the previous value cell and restore it on every exit path, including a
//! signal or a script exception unwinding through.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use lisp_bridge::{BridgeEntry, HostError, HostId};

use crate::builtins;
use crate::object::{Buffer, Closure, Obj, Symbol};
use crate::reader::Reader;

const MAX_EVAL_DEPTH: usize = 200;

pub struct Interp {
    obarray: RefCell<HashMap<String, Rc<Symbol>>>,
    buffers: RefCell<Vec<Rc<Buffer>>>,
    current: RefCell<Rc<Buffer>>,
    temp_counter: Cell<usize>,
    depth: Cell<usize>,
    pub(crate) retained: RefCell<HashMap<HostId, Obj>>,
    pub(crate) identities: RefCell<HashMap<usize, HostId>>,
    pub(crate) next_id: Cell<u64>,
    pub(crate) releases: RefCell<Vec<Vec<HostId>>>,
}

fn signal(symbol: &str, message: impl Into<String>) -> HostError {
    HostError::signal(symbol, message)
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl Interp {
    pub fn new() -> Rc<Self> {
        let scratch = Rc::new(Buffer {
            name: "*scratch*".to_string(),
            text: RefCell::new(String::new()),
            live: Cell::new(true),
        });
        let interp = Rc::new(Self {
            obarray: RefCell::default(),
            buffers: RefCell::new(vec![scratch.clone()]),
            current: RefCell::new(scratch),
            temp_counter: Cell::new(0),
            depth: Cell::new(0),
            retained: RefCell::default(),
            identities: RefCell::default(),
            next_id: Cell::new(0),
            releases: RefCell::default(),
        });

        let t = interp.intern_symbol("t");
        *t.value.borrow_mut() = Some(Obj::Symbol(t.clone()));
        builtins::install(&interp);
        interp
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Symbols
    // ─────────────────────────────────────────────────────────────────────────

    /// Intern `name`. `nil` reads as the empty list.
    pub fn intern(&self, name: &str) -> Obj {
        if name == "nil" {
            return Obj::Nil;
        }
        Obj::Symbol(self.intern_symbol(name))
    }

    pub(crate) fn intern_symbol(&self, name: &str) -> Rc<Symbol> {
        if let Some(symbol) = self.obarray.borrow().get(name) {
            return symbol.clone();
        }
        let symbol = Rc::new(Symbol::new(name));
        self.obarray
            .borrow_mut()
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Remove `name` from the obarray. Existing references keep the old
    /// symbol; the next `intern` creates a new one.
    pub fn unintern(&self, name: &str) -> bool {
        self.obarray.borrow_mut().remove(name).is_some()
    }

    pub fn t(&self) -> Obj {
        self.intern("t")
    }

    pub fn bool(&self, value: bool) -> Obj {
        if value { self.t() } else { Obj::Nil }
    }

    pub fn is_t(&self, obj: &Obj) -> bool {
        matches!(obj, Obj::Symbol(s) if s.name == "t" && obj.eq(&self.t()))
    }

    pub fn symbol_value(&self, name: &str) -> Option<Obj> {
        self.obarray
            .borrow()
            .get(name)
            .and_then(|s| s.value.borrow().clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Buffers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn current_buffer(&self) -> Rc<Buffer> {
        self.current.borrow().clone()
    }

    pub fn current_buffer_name(&self) -> String {
        self.current.borrow().name.clone()
    }

    pub(crate) fn set_current_buffer(&self, buffer: Rc<Buffer>) {
        *self.current.borrow_mut() = buffer;
    }

    pub fn get_buffer(&self, name: &str) -> Option<Rc<Buffer>> {
        self.buffers
            .borrow()
            .iter()
            .find(|b| b.live.get() && b.name == name)
            .cloned()
    }

    pub fn get_buffer_create(&self, name: &str) -> Rc<Buffer> {
        if let Some(existing) = self.get_buffer(name) {
            return existing;
        }
        let buffer = Rc::new(Buffer {
            name: name.to_string(),
            text: RefCell::new(String::new()),
            live: Cell::new(true),
        });
        self.buffers.borrow_mut().push(buffer.clone());
        buffer
    }

    pub(crate) fn kill_buffer(&self, buffer: &Rc<Buffer>) {
        buffer.live.set(false);
        self.buffers.borrow_mut().retain(|b| !Rc::ptr_eq(b, buffer));
    }

    /// Resolve a buffer object or a buffer name.
    pub(crate) fn buffer_arg(&self, obj: &Obj) -> Result<Rc<Buffer>, HostError> {
        match obj {
            Obj::Buffer(b) if b.live.get() => Ok(b.clone()),
            Obj::Buffer(_) => Err(signal("error", "Selecting deleted buffer")),
            Obj::Str(name) => self
                .get_buffer(name)
                .ok_or_else(|| signal("error", format!("No such buffer {name}"))),
            other => Err(signal("wrong-type-argument", format!("bufferp {}", other.print()))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────────────────

    /// Read and evaluate every form in `source`, returning the last value.
    pub fn eval_str(&self, bridge: &dyn BridgeEntry, source: &str) -> Result<Obj, HostError> {
        let forms = Reader::new(self, source).read_all()?;
        let mut result = Obj::Nil;
        for form in &forms {
            result = self.eval(bridge, form)?;
        }
        Ok(result)
    }

    pub fn eval(&self, bridge: &dyn BridgeEntry, form: &Obj) -> Result<Obj, HostError> {
        if self.depth.get() >= MAX_EVAL_DEPTH {
            return Err(signal("excessive-lisp-nesting", MAX_EVAL_DEPTH.to_string()));
        }
        self.depth.set(self.depth.get() + 1);
        let _guard = DepthGuard(&self.depth);

        match form {
            Obj::Symbol(symbol) => {
                if symbol.is_keyword() {
                    return Ok(form.clone());
                }
                symbol
                    .value
                    .borrow()
                    .clone()
                    .ok_or_else(|| signal("void-variable", symbol.name.clone()))
            }
            Obj::Cons(_) => self.eval_list(bridge, form),
            _ => Ok(form.clone()),
        }
    }

    fn eval_list(&self, bridge: &dyn BridgeEntry, form: &Obj) -> Result<Obj, HostError> {
        let head = form.car();
        let args = form
            .cdr()
            .to_vec()
            .ok_or_else(|| signal("invalid-function", form.print()))?;

        if let Obj::Symbol(symbol) = &head {
            if let Some(result) = self.special_form(bridge, &symbol.name, &args) {
                return result;
            }
        }

        let function = self.resolve_function(&head)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in &args {
            values.push(self.eval(bridge, arg)?);
        }
        self.apply(bridge, &function, values)
    }

    fn resolve_function(&self, head: &Obj) -> Result<Obj, HostError> {
        match head {
            Obj::Symbol(symbol) => symbol
                .function
                .borrow()
                .clone()
                .ok_or_else(|| signal("void-function", symbol.name.clone())),
            Obj::Cons(_) if self.is_lambda(head) => self.make_closure(&head.cdr().to_vec().unwrap_or_default()),
            other => Ok(other.clone()),
        }
    }

    fn is_lambda(&self, form: &Obj) -> bool {
        matches!(form.car(), Obj::Symbol(s) if s.name == "lambda")
    }

    /// Apply a function object: a symbol, closure, builtin or lambda list.
    pub fn apply(
        &self,
        bridge: &dyn BridgeEntry,
        function: &Obj,
        args: Vec<Obj>,
    ) -> Result<Obj, HostError> {
        match function {
            Obj::Builtin(builtin) => (builtin.func)(self, bridge, args),
            Obj::Closure(closure) => self.call_closure(bridge, closure, args),
            Obj::Symbol(_) | Obj::Cons(_) => {
                let resolved = self.resolve_function(function)?;
                if matches!(resolved, Obj::Symbol(_) | Obj::Cons(_)) {
                    return Err(signal("invalid-function", resolved.print()));
                }
                self.apply(bridge, &resolved, args)
            }
            other => Err(signal("invalid-function", other.print())),
        }
    }

    fn call_closure(
        &self,
        bridge: &dyn BridgeEntry,
        closure: &Closure,
        args: Vec<Obj>,
    ) -> Result<Obj, HostError> {
        let required = closure.params.len();
        let max = required + closure.optional.len();
        if args.len() < required || (closure.rest.is_none() && args.len() > max) {
            return Err(signal(
                "wrong-number-of-arguments",
                format!("expected {required}..{max}, got {}", args.len()),
            ));
        }

        let mut args = args.into_iter();
        let mut bindings: Vec<(Rc<Symbol>, Obj)> = Vec::new();
        for param in closure.params.iter().chain(&closure.optional) {
            bindings.push((param.clone(), args.next().unwrap_or(Obj::Nil)));
        }
        if let Some(rest) = &closure.rest {
            bindings.push((rest.clone(), Obj::list(args)));
        }

        self.with_bindings(bindings, || self.progn(bridge, &closure.body))
    }

    /// Bind dynamically, run `body`, restore the previous cells whatever
    /// happens.
    pub(crate) fn with_bindings<F>(
        &self,
        bindings: Vec<(Rc<Symbol>, Obj)>,
        body: F,
    ) -> Result<Obj, HostError>
    where
        F: FnOnce() -> Result<Obj, HostError>,
    {
        let saved: Vec<(Rc<Symbol>, Option<Obj>)> = bindings
            .into_iter()
            .map(|(symbol, value)| {
                let old = symbol.value.replace(Some(value));
                (symbol, old)
            })
            .collect();

        let result = body();

        for (symbol, old) in saved.into_iter().rev() {
            *symbol.value.borrow_mut() = old;
        }
        result
    }

    pub(crate) fn progn(&self, bridge: &dyn BridgeEntry, body: &[Obj]) -> Result<Obj, HostError> {
        let mut result = Obj::Nil;
        for form in body {
            result = self.eval(bridge, form)?;
        }
        Ok(result)
    }

    pub(crate) fn make_closure(&self, lambda_tail: &[Obj]) -> Result<Obj, HostError> {
        let Some((params, body)) = lambda_tail.split_first() else {
            return Err(signal("invalid-function", "lambda without parameter list"));
        };
        let params = params
            .to_vec()
            .ok_or_else(|| signal("invalid-function", params.print()))?;

        let mut closure = Closure {
            params: Vec::new(),
            optional: Vec::new(),
            rest: None,
            doc: None,
            interactive: None,
            body: Vec::new(),
        };

        enum Mode {
            Required,
            Optional,
            Rest,
        }
        let mut mode = Mode::Required;
        for param in params {
            let Obj::Symbol(symbol) = &param else {
                return Err(signal("invalid-function", format!("bad parameter {}", param.print())));
            };
            let symbol = symbol.clone();
            match symbol.name.as_str() {
                "&optional" => mode = Mode::Optional,
                "&rest" => mode = Mode::Rest,
                _ => match mode {
                    Mode::Required => closure.params.push(symbol),
                    Mode::Optional => closure.optional.push(symbol),
                    Mode::Rest => closure.rest = Some(symbol),
                },
            }
        }

        let mut body = body;
        if let [Obj::Str(doc), rest @ ..] = body {
            if !rest.is_empty() {
                closure.doc = Some(doc.to_string());
                body = rest;
            }
        }
        if let [decl, rest @ ..] = body {
            if matches!(decl.car(), Obj::Symbol(s) if s.name == "interactive") {
                closure.interactive = Some(decl.cdr().car());
                body = rest;
            }
        }
        closure.body = body.to_vec();
        Ok(Obj::Closure(Rc::new(closure)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Special forms
    // ─────────────────────────────────────────────────────────────────────────

    fn special_form(
        &self,
        bridge: &dyn BridgeEntry,
        name: &str,
        args: &[Obj],
    ) -> Option<Result<Obj, HostError>> {
        Some(match name {
            "quote" | "function" => self.sf_quote(name, args),
            "lambda" => self.make_closure(args),
            "progn" => self.progn(bridge, args),
            "if" => self.sf_if(bridge, args),
            "and" => self.sf_and(bridge, args),
            "or" => self.sf_or(bridge, args),
            "while" => self.sf_while(bridge, args),
            "setq" => self.sf_setq(bridge, args),
            "defvar" => self.sf_defvar(bridge, args),
            "defun" => self.sf_defun(args),
            "let" => self.sf_let(bridge, args, false),
            "let*" => self.sf_let(bridge, args, true),
            "unwind-protect" => self.sf_unwind_protect(bridge, args),
            "with-current-buffer" => self.sf_with_current_buffer(bridge, args),
            "with-temp-buffer" => self.sf_with_temp_buffer(bridge, args),
            "interactive" => Ok(Obj::Nil),
            "define-minor-mode" => self.sf_define_minor_mode(args),
            "define-derived-mode" => self.sf_define_derived_mode(args),
            _ => return None,
        })
    }

    fn sf_quote(&self, name: &str, args: &[Obj]) -> Result<Obj, HostError> {
        match args {
            [Obj::Cons(_)] if name == "function" && self.is_lambda(&args[0]) => {
                self.make_closure(&args[0].cdr().to_vec().unwrap_or_default())
            }
            [arg] => Ok(arg.clone()),
            _ => Err(signal("wrong-number-of-arguments", name.to_string())),
        }
    }

    fn sf_if(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        let [cond, then, rest @ ..] = args else {
            return Err(signal("wrong-number-of-arguments", "if"));
        };
        if self.eval(bridge, cond)?.is_nil() {
            self.progn(bridge, rest)
        } else {
            self.eval(bridge, then)
        }
    }

    fn sf_and(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        let mut result = self.t();
        for form in args {
            result = self.eval(bridge, form)?;
            if result.is_nil() {
                break;
            }
        }
        Ok(result)
    }

    fn sf_or(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        for form in args {
            let result = self.eval(bridge, form)?;
            if !result.is_nil() {
                return Ok(result);
            }
        }
        Ok(Obj::Nil)
    }

    fn sf_while(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        let Some((cond, body)) = args.split_first() else {
            return Err(signal("wrong-number-of-arguments", "while"));
        };
        while !self.eval(bridge, cond)?.is_nil() {
            self.progn(bridge, body)?;
        }
        Ok(Obj::Nil)
    }

    fn sf_setq(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        if args.len() % 2 != 0 {
            return Err(signal("wrong-number-of-arguments", "setq"));
        }
        let mut result = Obj::Nil;
        for pair in args.chunks(2) {
            let symbol = self.symbol_arg(&pair[0])?;
            result = self.eval(bridge, &pair[1])?;
            *symbol.value.borrow_mut() = Some(result.clone());
        }
        Ok(result)
    }

    fn sf_defvar(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        let Some((name, rest)) = args.split_first() else {
            return Err(signal("wrong-number-of-arguments", "defvar"));
        };
        let symbol = self.symbol_arg(name)?;
        if let Some(init) = rest.first() {
            if symbol.value.borrow().is_none() {
                let value = self.eval(bridge, init)?;
                *symbol.value.borrow_mut() = Some(value);
            }
        }
        Ok(name.clone())
    }

    fn sf_defun(&self, args: &[Obj]) -> Result<Obj, HostError> {
        let Some((name, tail)) = args.split_first() else {
            return Err(signal("wrong-number-of-arguments", "defun"));
        };
        let symbol = self.symbol_arg(name)?;
        let closure = self.make_closure(tail)?;
        *symbol.function.borrow_mut() = Some(closure);
        Ok(name.clone())
    }

    fn sf_let(&self, bridge: &dyn BridgeEntry, args: &[Obj], sequential: bool) -> Result<Obj, HostError> {
        let Some((spec, body)) = args.split_first() else {
            return Err(signal("wrong-number-of-arguments", "let"));
        };
        let spec = spec
            .to_vec()
            .ok_or_else(|| signal("wrong-type-argument", format!("listp {}", spec.print())))?;

        let mut bindings = Vec::with_capacity(spec.len());
        for binding in &spec {
            let (symbol, init) = match binding {
                Obj::Symbol(s) => (s.clone(), Obj::Nil),
                Obj::Cons(_) => (self.symbol_arg(&binding.car())?, binding.cdr().car()),
                other => return Err(signal("wrong-type-argument", other.print())),
            };
            bindings.push((symbol, init));
        }

        if sequential {
            return self.let_sequential(bridge, &bindings, body);
        }

        let mut values = Vec::with_capacity(bindings.len());
        for (symbol, init) in bindings {
            values.push((symbol, self.eval(bridge, &init)?));
        }
        self.with_bindings(values, || self.progn(bridge, body))
    }

    fn let_sequential(
        &self,
        bridge: &dyn BridgeEntry,
        bindings: &[(Rc<Symbol>, Obj)],
        body: &[Obj],
    ) -> Result<Obj, HostError> {
        match bindings.split_first() {
            None => self.progn(bridge, body),
            Some(((symbol, init), rest)) => {
                let value = self.eval(bridge, init)?;
                self.with_bindings(vec![(symbol.clone(), value)], || {
                    self.let_sequential(bridge, rest, body)
                })
            }
        }
    }

    fn sf_unwind_protect(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        let Some((body, cleanup)) = args.split_first() else {
            return Err(signal("wrong-number-of-arguments", "unwind-protect"));
        };
        let result = self.eval(bridge, body);
        self.progn(bridge, cleanup)?;
        result
    }

    fn sf_with_current_buffer(&self, bridge: &dyn BridgeEntry, args: &[Obj]) -> Result<Obj, HostError> {
        let Some((buffer, body)) = args.split_first() else {
            return Err(signal("wrong-number-of-arguments", "with-current-buffer"));
        };
        let buffer = self.buffer_arg(&self.eval(bridge, buffer)?)?;
        let saved = self.current_buffer();

        self.set_current_buffer(buffer);
        let result = self.progn(bridge, body);
        self.set_current_buffer(saved);
        result
    }

    fn sf_with_temp_buffer(&self, bridge: &dyn BridgeEntry, body: &[Obj]) -> Result<Obj, HostError> {
        let n = self.temp_counter.get();
        self.temp_counter.set(n + 1);
        let name = if n == 0 {
            " *temp*".to_string()
        } else {
            format!(" *temp*-{n}")
        };

        let temp = self.get_buffer_create(&name);
        let saved = self.current_buffer();

        self.set_current_buffer(temp.clone());
        let result = self.progn(bridge, body);
        self.set_current_buffer(saved);
        self.kill_buffer(&temp);
        result
    }

    /// `(define-minor-mode MODE DOC BODY...)`: a variable and a toggle
    /// command, both named MODE.
    fn sf_define_minor_mode(&self, args: &[Obj]) -> Result<Obj, HostError> {
        let Some((name, tail)) = args.split_first() else {
            return Err(signal("wrong-number-of-arguments", "define-minor-mode"));
        };
        let symbol = self.symbol_arg(name)?;
        let doc = tail.first().filter(|d| d.as_str().is_some()).cloned();
        let body = if doc.is_some() { &tail[1..] } else { tail };

        if symbol.value.borrow().is_none() {
            *symbol.value.borrow_mut() = Some(Obj::Nil);
        }

        // (lambda () [DOC] (interactive) (setq MODE (not MODE)) BODY... MODE)
        let toggle = Obj::list([
            self.intern("setq"),
            name.clone(),
            Obj::list([self.intern("not"), name.clone()]),
        ]);
        let mut lambda = vec![Obj::Nil];
        lambda.extend(doc);
        lambda.push(Obj::list([self.intern("interactive")]));
        lambda.push(toggle);
        lambda.extend(body.iter().cloned());
        lambda.push(name.clone());

        *symbol.function.borrow_mut() = Some(self.make_closure(&lambda)?);
        Ok(name.clone())
    }

    /// `(define-derived-mode CHILD PARENT NAME [DOC] BODY...)`: a command
    /// that sets `major-mode` and `mode-name`, runs PARENT when it is
    /// defined, then BODY.
    fn sf_define_derived_mode(&self, args: &[Obj]) -> Result<Obj, HostError> {
        let [child, parent, mode_name, tail @ ..] = args else {
            return Err(signal("wrong-number-of-arguments", "define-derived-mode"));
        };
        let symbol = self.symbol_arg(child)?;
        let body = match tail {
            [Obj::Str(_), rest @ ..] => rest,
            rest => rest,
        };
        let quote = |obj: &Obj| Obj::list([self.intern("quote"), obj.clone()]);

        let mut lambda = vec![Obj::Nil, Obj::list([self.intern("interactive")])];
        if let Obj::Symbol(_) = parent {
            lambda.push(Obj::list([
                self.intern("if"),
                Obj::list([self.intern("fboundp"), quote(parent)]),
                Obj::list([parent.clone()]),
            ]));
        }
        lambda.push(Obj::list([
            self.intern("setq"),
            self.intern("major-mode"),
            quote(child),
            self.intern("mode-name"),
            mode_name.clone(),
        ]));
        lambda.extend(body.iter().cloned());

        *symbol.function.borrow_mut() = Some(self.make_closure(&lambda)?);
        Ok(child.clone())
    }

    pub(crate) fn symbol_arg(&self, obj: &Obj) -> Result<Rc<Symbol>, HostError> {
        match obj {
            Obj::Symbol(s) => Ok(s.clone()),
            Obj::Nil => Err(signal("setting-constant", "nil")),
            other => Err(signal("wrong-type-argument", format!("symbolp {}", other.print()))),
        }
    }
}
