//! Host object model.
//!
//! Immediates (`nil`, integers, floats) are plain values. Everything else lives
//! behind an `Rc` and has pointer identity, which is what `eq` compares and
//! what the bridge sees as a [`HostId`](lisp_bridge::HostId).

use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::rc::Rc;

use lisp_bridge::{BridgeEntry, HostError};

use crate::interp::Interp;

pub type BuiltinFn = fn(&Interp, &dyn BridgeEntry, Vec<Obj>) -> Result<Obj, HostError>;

pub struct Symbol {
    pub name: String,
    pub value: RefCell<Option<Obj>>,
    pub function: RefCell<Option<Obj>>,
}

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: RefCell::new(None),
            function: RefCell::new(None),
        }
    }

    pub fn is_keyword(&self) -> bool {
        self.name.starts_with(':')
    }
}

pub struct Cons {
    pub car: RefCell<Obj>,
    pub cdr: RefCell<Obj>,
}

pub struct Closure {
    pub params: Vec<Rc<Symbol>>,
    pub optional: Vec<Rc<Symbol>>,
    pub rest: Option<Rc<Symbol>>,
    pub doc: Option<String>,
    pub interactive: Option<Obj>,
    pub body: Vec<Obj>,
}

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

pub struct Buffer {
    pub name: String,
    pub text: RefCell<String>,
    pub live: Cell<bool>,
}

#[derive(Default)]
pub struct HashTable {
    pub entries: Vec<(Obj, Obj)>,
}

impl HashTable {
    pub fn get(&self, key: &Obj) -> Option<&Obj> {
        self.entries
            .iter()
            .find(|(k, _)| k.equal(key))
            .map(|(_, v)| v)
    }

    pub fn put(&mut self, key: Obj, value: Obj) {
        match self.entries.iter_mut().find(|(k, _)| k.equal(&key)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

#[derive(Clone)]
pub enum Obj {
    Nil,
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Symbol(Rc<Symbol>),
    Cons(Rc<Cons>),
    Vector(Rc<RefCell<Vec<Obj>>>),
    HashTable(Rc<RefCell<HashTable>>),
    Closure(Rc<Closure>),
    Builtin(Rc<Builtin>),
    Buffer(Rc<Buffer>),
}

#[cfg(test)]
impl std::fmt::Debug for Obj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.print())
    }
}

impl Obj {
    pub fn string(s: &str) -> Self {
        Obj::Str(Rc::from(s))
    }

    pub fn cons(car: Obj, cdr: Obj) -> Self {
        Obj::Cons(Rc::new(Cons {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }))
    }

    pub fn list(items: impl IntoIterator<Item = Obj>) -> Self {
        let items: Vec<Obj> = items.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(Obj::Nil, |tail, item| Obj::cons(item, tail))
    }

    pub fn vector(items: Vec<Obj>) -> Self {
        Obj::Vector(Rc::new(RefCell::new(items)))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Obj::Nil)
    }

    pub fn as_symbol(&self) -> Option<&Rc<Symbol>> {
        match self {
            Obj::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Obj::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Obj::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn car(&self) -> Obj {
        match self {
            Obj::Cons(c) => c.car.borrow().clone(),
            _ => Obj::Nil,
        }
    }

    pub fn cdr(&self) -> Obj {
        match self {
            Obj::Cons(c) => c.cdr.borrow().clone(),
            _ => Obj::Nil,
        }
    }

    /// Elements of a proper list, or `None` for anything else.
    pub fn to_vec(&self) -> Option<Vec<Obj>> {
        let mut items = Vec::new();
        let mut cursor = self.clone();
        loop {
            match cursor {
                Obj::Nil => return Some(items),
                Obj::Cons(cell) => {
                    items.push(cell.car.borrow().clone());
                    let next = cell.cdr.borrow().clone();
                    cursor = next;
                }
                _ => return None,
            }
        }
    }

    /// Pointer identity of heap objects; immediates have none.
    pub fn identity(&self) -> Option<usize> {
        Some(match self {
            Obj::Nil | Obj::Int(_) | Obj::Float(_) => return None,
            Obj::Str(s) => Rc::as_ptr(s).cast::<()>() as usize,
            Obj::Symbol(s) => Rc::as_ptr(s).cast::<()>() as usize,
            Obj::Cons(c) => Rc::as_ptr(c).cast::<()>() as usize,
            Obj::Vector(v) => Rc::as_ptr(v).cast::<()>() as usize,
            Obj::HashTable(h) => Rc::as_ptr(h).cast::<()>() as usize,
            Obj::Closure(c) => Rc::as_ptr(c).cast::<()>() as usize,
            Obj::Builtin(b) => Rc::as_ptr(b).cast::<()>() as usize,
            Obj::Buffer(b) => Rc::as_ptr(b).cast::<()>() as usize,
        })
    }

    pub fn eq(&self, other: &Obj) -> bool {
        match (self, other) {
            (Obj::Nil, Obj::Nil) => true,
            (Obj::Int(a), Obj::Int(b)) => a == b,
            (Obj::Float(a), Obj::Float(b)) => a.to_bits() == b.to_bits(),
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    pub fn equal(&self, other: &Obj) -> bool {
        match (self, other) {
            (Obj::Str(a), Obj::Str(b)) => a == b,
            (Obj::Cons(a), Obj::Cons(b)) => {
                a.car.borrow().equal(&b.car.borrow()) && a.cdr.borrow().equal(&b.cdr.borrow())
            }
            (Obj::Vector(a), Obj::Vector(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equal(y))
            }
            _ => self.eq(other),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::Nil => "nil",
            Obj::Int(_) => "integer",
            Obj::Float(_) => "float",
            Obj::Str(_) => "string",
            Obj::Symbol(_) => "symbol",
            Obj::Cons(_) => "cons",
            Obj::Vector(_) => "vector",
            Obj::HashTable(_) => "hash-table",
            Obj::Closure(_) => "closure",
            Obj::Builtin(_) => "subr",
            Obj::Buffer(_) => "buffer",
        }
    }

    /// Printed representation, as `prin1` would show it.
    pub fn print(&self) -> String {
        let mut out = String::new();
        self.print_into(&mut out);
        out
    }

    fn print_into(&self, out: &mut String) {
        match self {
            Obj::Nil => out.push_str("nil"),
            Obj::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Obj::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                let _ = write!(out, "{f:.1}");
            }
            Obj::Float(f) => {
                let _ = write!(out, "{f}");
            }
            Obj::Str(s) => {
                let _ = write!(out, "{s:?}");
            }
            Obj::Symbol(s) => out.push_str(&s.name),
            Obj::Cons(_) => {
                out.push('(');
                let mut cursor = self.clone();
                let mut first = true;
                while let Obj::Cons(cell) = cursor {
                    if !first {
                        out.push(' ');
                    }
                    first = false;
                    cell.car.borrow().print_into(out);
                    let next = cell.cdr.borrow().clone();
                    cursor = next;
                }
                if !cursor.is_nil() {
                    out.push_str(" . ");
                    cursor.print_into(out);
                }
                out.push(')');
            }
            Obj::Vector(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    item.print_into(out);
                }
                out.push(']');
            }
            Obj::HashTable(table) => {
                let _ = write!(out, "#<hash-table {}>", table.borrow().entries.len());
            }
            Obj::Closure(_) => out.push_str("#<closure>"),
            Obj::Builtin(b) => {
                let _ = write!(out, "#<subr {}>", b.name);
            }
            Obj::Buffer(b) if b.live.get() => {
                let _ = write!(out, "#<buffer {}>", b.name);
            }
            Obj::Buffer(_) => out.push_str("#<killed buffer>"),
        }
    }
}
