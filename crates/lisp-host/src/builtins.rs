//! Builtin functions.
//!
//! Arguments arrive evaluated. The `bridge--*` builtins, `garbage-collect` and
//! `eval-js` are the host end of the bridge protocol.

use std::cell::RefCell;
use std::rc::Rc;

use lisp_bridge::{BridgeEntry, CallbackId, HostError, ProxyId, host};

use crate::interp::Interp;
use crate::object::{Builtin, BuiltinFn, HashTable, Obj};

type Result<T> = std::result::Result<T, HostError>;

fn signal(symbol: &str, message: impl Into<String>) -> HostError {
    HostError::signal(symbol, message)
}

fn wrong_type(predicate: &str, obj: &Obj) -> HostError {
    signal("wrong-type-argument", format!("{predicate} {}", obj.print()))
}

fn expect_args(name: &str, args: &[Obj], min: usize, max: Option<usize>) -> Result<()> {
    let too_many = max.is_some_and(|max| args.len() > max);
    if args.len() < min || too_many {
        return Err(signal(
            "wrong-number-of-arguments",
            format!("{name} {}", args.len()),
        ));
    }
    Ok(())
}

fn int_arg(obj: &Obj) -> Result<i64> {
    obj.as_int().ok_or_else(|| wrong_type("integerp", obj))
}

fn str_arg(obj: &Obj) -> Result<&str> {
    obj.as_str().ok_or_else(|| wrong_type("stringp", obj))
}

fn key_part(obj: &Obj) -> Result<u32> {
    u32::try_from(int_arg(obj)?).map_err(|_| wrong_type("natnump", obj))
}

pub(crate) fn install(interp: &Interp) {
    let table: &[(&'static str, BuiltinFn)] = &[
        // Lists
        ("list", |_, _, args| Ok(Obj::list(args))),
        ("cons", cons),
        ("car", car),
        ("cdr", cdr),
        ("setcar", setcar),
        ("nth", nth),
        ("length", length),
        ("reverse", reverse),
        ("plist-get", plist_get),
        // Predicates
        ("consp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Cons(_)))),
        ("listp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Cons(_) | Obj::Nil))),
        ("null", |i, _, args| pred(i, &args, Obj::is_nil)),
        ("not", |i, _, args| pred(i, &args, Obj::is_nil)),
        ("stringp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Str(_)))),
        ("numberp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Int(_) | Obj::Float(_)))),
        ("integerp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Int(_)))),
        ("symbolp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Symbol(_) | Obj::Nil))),
        ("vectorp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Vector(_)))),
        ("bufferp", |i, _, args| pred(i, &args, |o| matches!(o, Obj::Buffer(_)))),
        ("hash-table-p", |i, _, args| pred(i, &args, |o| matches!(o, Obj::HashTable(_)))),
        ("functionp", |i, _, args| {
            pred(i, &args, |o| matches!(o, Obj::Closure(_) | Obj::Builtin(_)))
        }),
        ("eq", |i, _, args| binary(i, &args, Obj::eq)),
        ("equal", |i, _, args| binary(i, &args, Obj::equal)),
        ("identity", |_, _, args| Ok(args.into_iter().next().unwrap_or(Obj::Nil))),
        ("ignore", |_, _, _| Ok(Obj::Nil)),
        // Numbers
        ("+", |_, _, args| arith(&args, 0, i64::checked_add, |a, b| a + b)),
        ("*", |_, _, args| arith(&args, 1, i64::checked_mul, |a, b| a * b)),
        ("-", minus),
        ("/", divide),
        ("1+", |_, _, args| {
            expect_args("1+", &args, 1, Some(1))?;
            arith(&[args[0].clone(), Obj::Int(1)], 0, i64::checked_add, |a, b| a + b)
        }),
        ("=", |i, _, args| compare(i, &args, |a, b| a == b)),
        ("<", |i, _, args| compare(i, &args, |a, b| a < b)),
        (">", |i, _, args| compare(i, &args, |a, b| a > b)),
        ("<=", |i, _, args| compare(i, &args, |a, b| a <= b)),
        (">=", |i, _, args| compare(i, &args, |a, b| a >= b)),
        // Strings
        ("concat", concat),
        // Vectors
        ("vector", |_, _, args| Ok(Obj::vector(args))),
        ("make-vector", make_vector),
        ("aref", aref),
        ("aset", aset),
        // Symbols
        ("intern", |i, _, args| {
            expect_args("intern", &args, 1, Some(1))?;
            Ok(i.intern(str_arg(&args[0])?))
        }),
        ("unintern", unintern),
        ("symbol-name", symbol_name),
        ("symbol-value", symbol_value),
        ("symbol-function", symbol_function),
        ("boundp", |i, _, args| {
            expect_args("boundp", &args, 1, Some(1))?;
            let bound = match &args[0] {
                Obj::Symbol(s) => s.is_keyword() || s.value.borrow().is_some(),
                _ => true,
            };
            Ok(i.bool(bound))
        }),
        ("fboundp", |i, _, args| {
            expect_args("fboundp", &args, 1, Some(1))?;
            let bound = args[0]
                .as_symbol()
                .is_some_and(|s| s.function.borrow().is_some());
            Ok(i.bool(bound))
        }),
        ("set", set),
        ("fset", fset),
        // Evaluation
        ("funcall", funcall),
        ("apply", apply),
        ("eval", |i, bridge, args| {
            expect_args("eval", &args, 1, Some(2))?;
            i.eval(bridge, &args[0])
        }),
        ("error", error),
        ("signal", |_, _, args| {
            expect_args("signal", &args, 2, Some(2))?;
            let symbol = args[0].as_symbol().ok_or_else(|| wrong_type("symbolp", &args[0]))?;
            Err(signal(&symbol.name, args[1].print()))
        }),
        ("documentation", documentation),
        ("commandp", commandp),
        // Hash tables and keymaps
        ("make-hash-table", |_, _, _| Ok(new_hash_table())),
        ("make-sparse-keymap", |_, _, _| Ok(new_hash_table())),
        ("puthash", puthash),
        ("gethash", gethash),
        ("hash-table-count", hash_table_count),
        ("define-key", define_key),
        ("lookup-key", lookup_key),
        // Buffers
        ("current-buffer", |i, _, _| Ok(Obj::Buffer(i.current_buffer()))),
        ("buffer-name", buffer_name),
        ("get-buffer", |i, _, args| {
            expect_args("get-buffer", &args, 1, Some(1))?;
            Ok(i.get_buffer(str_arg(&args[0])?).map_or(Obj::Nil, Obj::Buffer))
        }),
        ("get-buffer-create", |i, _, args| {
            expect_args("get-buffer-create", &args, 1, Some(1))?;
            Ok(Obj::Buffer(i.get_buffer_create(str_arg(&args[0])?)))
        }),
        ("set-buffer", |i, _, args| {
            expect_args("set-buffer", &args, 1, Some(1))?;
            let buffer = i.buffer_arg(&args[0])?;
            i.set_current_buffer(buffer.clone());
            Ok(Obj::Buffer(buffer))
        }),
        ("kill-buffer", |i, _, args| {
            let buffer = match args.first() {
                Some(obj) => i.buffer_arg(obj)?,
                None => i.current_buffer(),
            };
            i.kill_buffer(&buffer);
            Ok(i.t())
        }),
        ("insert", insert),
        ("buffer-string", |i, _, _| Ok(Obj::string(&i.current_buffer().text.borrow()))),
        // Bridge protocol
        (host::REENTER, reenter),
        (host::CLEAR, |i, bridge, args| {
            expect_args(host::CLEAR, &args, 2, Some(2))?;
            bridge.invalidate_callback(CallbackId::from_parts(key_part(&args[0])?, key_part(&args[1])?));
            Ok(i.t())
        }),
        (host::CLEAR_PROXY, |i, bridge, args| {
            expect_args(host::CLEAR_PROXY, &args, 2, Some(2))?;
            bridge.invalidate_reverse_proxy(ProxyId::from_parts(key_part(&args[0])?, key_part(&args[1])?));
            Ok(i.t())
        }),
        ("garbage-collect", |_, bridge, _| {
            let released = bridge.reconcile_liveness();
            Ok(Obj::Int(i64::try_from(released).unwrap_or(i64::MAX)))
        }),
        ("eval-js", |i, bridge, args| {
            expect_args("eval-js", &args, 1, Some(1))?;
            let wire = bridge.evaluate_literal(str_arg(&args[0])?)?;
            i.decode(&wire)
        }),
        ("recursive-edit", |_, _, _| Ok(Obj::Nil)),
    ];

    for &(name, func) in table {
        let symbol = interp.intern_symbol(name);
        *symbol.function.borrow_mut() = Some(Obj::Builtin(Rc::new(Builtin { name, func })));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge protocol
// ─────────────────────────────────────────────────────────────────────────────

/// `(bridge--reenter INDEX GENERATION ARGS)`
fn reenter(interp: &Interp, bridge: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args(host::REENTER, &args, 3, Some(3))?;
    let id = CallbackId::from_parts(key_part(&args[0])?, key_part(&args[1])?);
    let call_args = args[2]
        .to_vec()
        .ok_or_else(|| wrong_type("listp", &args[2]))?;

    let wires = call_args
        .iter()
        .map(|arg| interp.encode(arg))
        .collect::<Result<Vec<_>>>()?;

    let result = bridge.invoke_callback(id, wires)?;
    interp.decode(&result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn pred(interp: &Interp, args: &[Obj], test: impl Fn(&Obj) -> bool) -> Result<Obj> {
    expect_args("predicate", args, 1, Some(1))?;
    Ok(interp.bool(test(&args[0])))
}

fn binary(interp: &Interp, args: &[Obj], test: impl Fn(&Obj, &Obj) -> bool) -> Result<Obj> {
    expect_args("comparison", args, 2, Some(2))?;
    Ok(interp.bool(test(&args[0], &args[1])))
}

enum Num {
    Int(i64),
    Float(f64),
}

fn num(obj: &Obj) -> Result<Num> {
    match obj {
        Obj::Int(i) => Ok(Num::Int(*i)),
        Obj::Float(f) => Ok(Num::Float(*f)),
        other => Err(wrong_type("number-or-marker-p", other)),
    }
}

fn as_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Float(f) => *f,
    }
}

fn combine(
    a: Num,
    b: &Obj,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Num> {
    Ok(match (a, num(b)?) {
        (Num::Int(a), Num::Int(n)) => {
            Num::Int(int_op(a, n).ok_or_else(|| signal("overflow-error", b.print()))?)
        }
        (a, n) => Num::Float(float_op(as_f64(&a), as_f64(&n))),
    })
}

fn from_num(n: Num) -> Obj {
    match n {
        Num::Int(i) => Obj::Int(i),
        Num::Float(f) => Obj::Float(f),
    }
}

fn arith(
    args: &[Obj],
    identity: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Obj> {
    let mut acc = Num::Int(identity);
    for arg in args {
        acc = combine(acc, arg, int_op, float_op)?;
    }
    Ok(from_num(acc))
}

fn minus(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    let Some((first, rest)) = args.split_first() else {
        return Ok(Obj::Int(0));
    };
    if rest.is_empty() {
        return arith(&[Obj::Int(0), first.clone()], 0, i64::checked_sub, |a, b| a - b);
    }
    let mut acc = num(first)?;
    for arg in rest {
        acc = combine(acc, arg, i64::checked_sub, |a, b| a - b)?;
    }
    Ok(from_num(acc))
}

fn divide(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("/", &args, 1, None)?;
    let mut acc = num(&args[0])?;
    for arg in &args[1..] {
        acc = match (acc, num(arg)?) {
            (Num::Int(_), Num::Int(0)) => return Err(signal("arith-error", "division by zero")),
            (Num::Int(a), Num::Int(b)) => Num::Int(a / b),
            (a, b) => Num::Float(as_f64(&a) / as_f64(&b)),
        };
    }
    Ok(from_num(acc))
}

fn compare(interp: &Interp, args: &[Obj], test: fn(f64, f64) -> bool) -> Result<Obj> {
    expect_args("comparison", args, 1, None)?;
    let values = args.iter().map(num).collect::<Result<Vec<_>>>()?;
    let holds = values
        .windows(2)
        .all(|pair| test(as_f64(&pair[0]), as_f64(&pair[1])));
    Ok(interp.bool(holds))
}

fn new_hash_table() -> Obj {
    Obj::HashTable(Rc::new(RefCell::new(HashTable::default())))
}

fn hash_table_arg(obj: &Obj) -> Result<&Rc<RefCell<HashTable>>> {
    match obj {
        Obj::HashTable(table) => Ok(table),
        other => Err(wrong_type("hash-table-p", other)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lists and sequences
// ─────────────────────────────────────────────────────────────────────────────

fn cons(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("cons", &args, 2, Some(2))?;
    let mut args = args.into_iter();
    let car = args.next().unwrap_or(Obj::Nil);
    let cdr = args.next().unwrap_or(Obj::Nil);
    Ok(Obj::cons(car, cdr))
}

fn car(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("car", &args, 1, Some(1))?;
    match &args[0] {
        Obj::Cons(_) | Obj::Nil => Ok(args[0].car()),
        other => Err(wrong_type("listp", other)),
    }
}

fn cdr(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("cdr", &args, 1, Some(1))?;
    match &args[0] {
        Obj::Cons(_) | Obj::Nil => Ok(args[0].cdr()),
        other => Err(wrong_type("listp", other)),
    }
}

fn setcar(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("setcar", &args, 2, Some(2))?;
    let Obj::Cons(cell) = &args[0] else {
        return Err(wrong_type("consp", &args[0]));
    };
    *cell.car.borrow_mut() = args[1].clone();
    Ok(args[1].clone())
}

fn nth(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("nth", &args, 2, Some(2))?;
    let n = usize::try_from(int_arg(&args[0])?).unwrap_or(0);
    let items = args[1]
        .to_vec()
        .ok_or_else(|| wrong_type("listp", &args[1]))?;
    Ok(items.get(n).cloned().unwrap_or(Obj::Nil))
}

fn length(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("length", &args, 1, Some(1))?;
    let len = match &args[0] {
        Obj::Str(s) => s.chars().count(),
        Obj::Vector(items) => items.borrow().len(),
        other => other
            .to_vec()
            .ok_or_else(|| wrong_type("sequencep", other))?
            .len(),
    };
    Ok(Obj::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

fn reverse(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("reverse", &args, 1, Some(1))?;
    match &args[0] {
        Obj::Vector(items) => Ok(Obj::vector(items.borrow().iter().rev().cloned().collect())),
        other => {
            let items = other.to_vec().ok_or_else(|| wrong_type("sequencep", other))?;
            Ok(Obj::list(items.into_iter().rev()))
        }
    }
}

fn plist_get(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("plist-get", &args, 2, Some(2))?;
    let items = args[0].to_vec().unwrap_or_default();
    Ok(items
        .chunks(2)
        .find(|pair| pair[0].eq(&args[1]))
        .and_then(|pair| pair.get(1).cloned())
        .unwrap_or(Obj::Nil))
}

fn concat(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    let mut out = String::new();
    for arg in &args {
        match arg {
            Obj::Nil => {}
            other => out.push_str(str_arg(other)?),
        }
    }
    Ok(Obj::string(&out))
}

fn make_vector(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("make-vector", &args, 2, Some(2))?;
    let len = usize::try_from(int_arg(&args[0])?).map_err(|_| wrong_type("wholenump", &args[0]))?;
    Ok(Obj::vector(vec![args[1].clone(); len]))
}

fn vector_index(args: &[Obj]) -> Result<(Rc<RefCell<Vec<Obj>>>, usize)> {
    let Obj::Vector(items) = &args[0] else {
        return Err(wrong_type("arrayp", &args[0]));
    };
    let index = usize::try_from(int_arg(&args[1])?).map_err(|_| wrong_type("natnump", &args[1]))?;
    if index >= items.borrow().len() {
        return Err(signal("args-out-of-range", args[1].print()));
    }
    Ok((items.clone(), index))
}

fn aref(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("aref", &args, 2, Some(2))?;
    let (items, index) = vector_index(&args)?;
    let value = items.borrow()[index].clone();
    Ok(value)
}

fn aset(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("aset", &args, 3, Some(3))?;
    let (items, index) = vector_index(&args)?;
    items.borrow_mut()[index] = args[2].clone();
    Ok(args[2].clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Symbols and evaluation
// ─────────────────────────────────────────────────────────────────────────────

fn unintern(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("unintern", &args, 1, Some(2))?;
    let name = match &args[0] {
        Obj::Symbol(s) => s.name.clone(),
        other => str_arg(other)?.to_string(),
    };
    Ok(interp.bool(interp.unintern(&name)))
}

fn symbol_name(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("symbol-name", &args, 1, Some(1))?;
    match &args[0] {
        Obj::Nil => Ok(Obj::string("nil")),
        Obj::Symbol(s) => Ok(Obj::string(&s.name)),
        other => Err(wrong_type("symbolp", other)),
    }
}

fn symbol_value(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("symbol-value", &args, 1, Some(1))?;
    match &args[0] {
        Obj::Nil => Ok(Obj::Nil),
        Obj::Symbol(s) if s.is_keyword() => Ok(args[0].clone()),
        Obj::Symbol(s) => s
            .value
            .borrow()
            .clone()
            .ok_or_else(|| signal("void-variable", s.name.clone())),
        other => Err(wrong_type("symbolp", other)),
    }
}

fn symbol_function(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("symbol-function", &args, 1, Some(1))?;
    let symbol = interp.symbol_arg(&args[0])?;
    let function = symbol.function.borrow().clone();
    Ok(function.unwrap_or(Obj::Nil))
}

fn set(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("set", &args, 2, Some(2))?;
    let symbol = interp.symbol_arg(&args[0])?;
    *symbol.value.borrow_mut() = Some(args[1].clone());
    Ok(args[1].clone())
}

fn fset(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("fset", &args, 2, Some(2))?;
    let symbol = interp.symbol_arg(&args[0])?;
    *symbol.function.borrow_mut() = Some(args[1].clone());
    Ok(args[1].clone())
}

fn funcall(interp: &Interp, bridge: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("funcall", &args, 1, None)?;
    let mut args = args.into_iter();
    let function = args.next().unwrap_or(Obj::Nil);
    interp.apply(bridge, &function, args.collect())
}

fn apply(interp: &Interp, bridge: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("apply", &args, 2, None)?;
    let Some((last, init)) = args.split_last() else {
        return Err(signal("wrong-number-of-arguments", "apply"));
    };
    let mut call_args: Vec<Obj> = init[1..].to_vec();
    call_args.extend(last.to_vec().ok_or_else(|| wrong_type("listp", last))?);
    interp.apply(bridge, &init[0], call_args)
}

/// `(error FORMAT ARGS...)`, with `%s` and `%d` substituted in order.
fn error(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("error", &args, 1, None)?;
    let format = str_arg(&args[0])?;
    let mut rest = args[1..].iter();
    let mut message = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('%', Some('s' | 'd')) => {
                chars.next();
                match rest.next() {
                    Some(Obj::Str(s)) => message.push_str(s),
                    Some(other) => message.push_str(&other.print()),
                    None => return Err(signal("error", "Not enough arguments for format string")),
                }
            }
            _ => message.push(c),
        }
    }
    Err(signal("error", message))
}

fn function_cell(interp: &Interp, obj: &Obj) -> Result<Obj> {
    match obj {
        Obj::Symbol(_) => {
            let symbol = interp.symbol_arg(obj)?;
            let function = symbol.function.borrow().clone();
            function.ok_or_else(|| signal("void-function", symbol.name.clone()))
        }
        other => Ok(other.clone()),
    }
}

fn documentation(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("documentation", &args, 1, Some(2))?;
    match function_cell(interp, &args[0])? {
        Obj::Closure(closure) => Ok(closure.doc.as_deref().map_or(Obj::Nil, Obj::string)),
        _ => Ok(Obj::Nil),
    }
}

fn commandp(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("commandp", &args, 1, Some(2))?;
    let is_command = match function_cell(interp, &args[0]) {
        Ok(Obj::Closure(closure)) => closure.interactive.is_some(),
        _ => false,
    };
    Ok(interp.bool(is_command))
}

// ─────────────────────────────────────────────────────────────────────────────
// Hash tables and keymaps
// ─────────────────────────────────────────────────────────────────────────────

fn puthash(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("puthash", &args, 3, Some(3))?;
    hash_table_arg(&args[2])?
        .borrow_mut()
        .put(args[0].clone(), args[1].clone());
    Ok(args[1].clone())
}

fn gethash(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("gethash", &args, 2, Some(3))?;
    let table = hash_table_arg(&args[1])?.borrow();
    let default = args.get(2).cloned().unwrap_or(Obj::Nil);
    Ok(table.get(&args[0]).cloned().unwrap_or(default))
}

fn hash_table_count(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("hash-table-count", &args, 1, Some(1))?;
    let count = hash_table_arg(&args[0])?.borrow().entries.len();
    Ok(Obj::Int(i64::try_from(count).unwrap_or(i64::MAX)))
}

fn define_key(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("define-key", &args, 3, Some(3))?;
    hash_table_arg(&args[0])
        .map_err(|_| wrong_type("keymapp", &args[0]))?
        .borrow_mut()
        .put(args[1].clone(), args[2].clone());
    Ok(args[2].clone())
}

fn lookup_key(_: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("lookup-key", &args, 2, Some(2))?;
    let table = hash_table_arg(&args[0])
        .map_err(|_| wrong_type("keymapp", &args[0]))?
        .borrow();
    Ok(table.get(&args[1]).cloned().unwrap_or(Obj::Nil))
}

// ─────────────────────────────────────────────────────────────────────────────
// Buffers
// ─────────────────────────────────────────────────────────────────────────────

fn buffer_name(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    expect_args("buffer-name", &args, 0, Some(1))?;
    let buffer = match args.first() {
        Some(Obj::Buffer(b)) if !b.live.get() => return Ok(Obj::Nil),
        Some(obj) => interp.buffer_arg(obj)?,
        None => interp.current_buffer(),
    };
    Ok(Obj::string(&buffer.name))
}

fn insert(interp: &Interp, _: &dyn BridgeEntry, args: Vec<Obj>) -> Result<Obj> {
    let buffer = interp.current_buffer();
    for arg in &args {
        buffer.text.borrow_mut().push_str(str_arg(arg)?);
    }
    Ok(Obj::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lisp_bridge::{BridgeError, Wire};

    struct NoBridge;

    impl BridgeEntry for NoBridge {
        fn invoke_callback(&self, id: CallbackId, _: Vec<Wire>) -> std::result::Result<Wire, BridgeError> {
            Err(BridgeError::InvalidCallback(id))
        }
        fn invalidate_callback(&self, _: CallbackId) {}
        fn invalidate_reverse_proxy(&self, _: ProxyId) {}
        fn reconcile_liveness(&self) -> usize {
            0
        }
        fn evaluate_literal(&self, _: &str) -> std::result::Result<Wire, BridgeError> {
            Ok(Wire::null())
        }
    }

    fn eval(source: &str) -> String {
        let interp = Interp::new();
        interp.eval_str(&NoBridge, source).unwrap().print()
    }

    fn eval_err(source: &str) -> String {
        let interp = Interp::new();
        match interp.eval_str(&NoBridge, source) {
            Err(HostError::Signal { symbol, .. }) => symbol,
            other => panic!("expected a signal, got {:?}", other.map(|o| o.print())),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("(+ 1 2 3)"), "6");
        assert_eq!(eval("(+ 1 2.5)"), "3.5");
        assert_eq!(eval("(- 10 3 2)"), "5");
        assert_eq!(eval("(- 4)"), "-4");
        assert_eq!(eval("(/ 7 2)"), "3");
        assert_eq!(eval("(* 2 3)"), "6");
        assert_eq!(eval("(list (< 1 2 3) (> 1 2) (= 2 2.0))"), "(t nil t)");
        assert_eq!(eval_err("(/ 1 0)"), "arith-error");
        assert_eq!(eval_err("(+ 1 \"a\")"), "wrong-type-argument");
    }

    #[test]
    fn test_lists_and_vectors() {
        assert_eq!(eval("(reverse (list 1 2 3))"), "(3 2 1)");
        assert_eq!(eval("(length [1 2])"), "2");
        assert_eq!(eval("(let ((v (make-vector 2 0))) (aset v 1 9) v)"), "[0 9]");
        assert_eq!(eval("(plist-get '(:a 1 :b 2) :b)"), "2");
        assert_eq!(eval("(nth 1 '(a b c))"), "b");
        assert_eq!(eval_err("(aref [1] 4)"), "args-out-of-range");
    }

    #[test]
    fn test_hash_tables_and_keymaps() {
        assert_eq!(
            eval("(let ((h (make-hash-table :test 'equal))) (puthash \"k\" 1 h) (gethash \"k\" h))"),
            "1"
        );
        assert_eq!(
            eval("(let ((m (make-sparse-keymap))) (define-key m \"C-c a\" 'ignore) (lookup-key m \"C-c a\"))"),
            "ignore"
        );
    }

    #[test]
    fn test_error_formats_message() {
        let interp = Interp::new();
        match interp.eval_str(&NoBridge, "(error \"bad %s: %d\" \"thing\" 3)") {
            Err(HostError::Signal { symbol, message }) => {
                assert_eq!(symbol, "error");
                assert_eq!(message, "bad thing: 3");
            }
            other => panic!("unexpected: {:?}", other.map(|o| o.print())),
        }
    }

    #[test]
    fn test_documentation_and_commandp() {
        assert_eq!(
            eval("(defun f () \"Doc.\" (interactive) 1) (list (documentation 'f) (commandp 'f) (commandp 'car))"),
            "(\"Doc.\" t nil)"
        );
    }
}
