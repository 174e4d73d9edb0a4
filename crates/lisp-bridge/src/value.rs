//! Script-side values.
//!
//! `Value` is what script code hands to and receives from the bridge. Plain
//! data (null, booleans, numbers, strings, arrays, objects) crosses by value;
//! handles, callables and opaque objects carry identity and never get copied.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;

/// Body of a script callable.
pub type NativeFn = dyn Fn(&Bridge, &[Value]) -> BridgeResult<Value>;

/// Declared parameter count of a script callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => n == count,
            Arity::Variadic => true,
        }
    }

    /// Whether the callable can be invoked with no arguments.
    pub fn is_nullary(self) -> bool {
        self.accepts(0)
    }
}

/// A script callable with a declared parameter count.
#[derive(Clone)]
pub struct ScriptFn {
    arity: Arity,
    name: Option<Rc<str>>,
    body: Rc<NativeFn>,
}

impl ScriptFn {
    pub fn new<F>(arity: usize, body: F) -> Self
    where
        F: Fn(&Bridge, &[Value]) -> BridgeResult<Value> + 'static,
    {
        Self::with_arity(Arity::Exact(arity), body)
    }

    /// A callable accepting any number of arguments.
    pub fn variadic<F>(body: F) -> Self
    where
        F: Fn(&Bridge, &[Value]) -> BridgeResult<Value> + 'static,
    {
        Self::with_arity(Arity::Variadic, body)
    }

    pub fn with_arity<F>(arity: Arity, body: F) -> Self
    where
        F: Fn(&Bridge, &[Value]) -> BridgeResult<Value> + 'static,
    {
        Self {
            arity,
            name: None,
            body: Rc::new(body),
        }
    }

    pub fn named<F>(name: &str, arity: usize, body: F) -> Self
    where
        F: Fn(&Bridge, &[Value]) -> BridgeResult<Value> + 'static,
    {
        Self {
            name: Some(Rc::from(name)),
            ..Self::new(arity, body)
        }
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn call(&self, bridge: &Bridge, args: &[Value]) -> BridgeResult<Value> {
        (self.body)(bridge, args)
    }

    pub fn ptr_eq(&self, other: &ScriptFn) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for ScriptFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFn")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// An arbitrary script object the host cannot interpret.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({:p})", Rc::as_ptr(&self.0))
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Handle(Handle),
    Function(ScriptFn),
    Opaque(Opaque),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Reference identity for handles, callables and opaque objects; plain
    /// data has no identity and never compares the same.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Handle(a), Value::Handle(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Convert plain data to JSON. Identity-carrying values cannot be embedded
    /// in structured data and are rejected.
    pub fn to_json(&self) -> BridgeResult<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| BridgeError::encoding(format!("{f} has no wire representation")))?,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<BridgeResult<_>>()?,
            ),
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<BridgeResult<_>>()?,
            ),
            Value::Handle(_) | Value::Function(_) | Value::Opaque(_) => {
                return Err(BridgeError::encoding(format!(
                    "{} cannot be embedded in structured data",
                    self.kind()
                )));
            }
        })
    }

    pub fn from_json(datum: serde_json::Value) -> Self {
        match datum {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Handle(_) => "handle",
            Value::Function(_) => "function",
            Value::Opaque(_) => "opaque object",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Handle(h)
    }
}

impl From<ScriptFn> for Value {
    fn from(f: ScriptFn) -> Self {
        Value::Function(f)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}
