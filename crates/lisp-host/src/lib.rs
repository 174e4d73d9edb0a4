//! Lisp Host
//!
//! A small dynamically scoped Lisp interpreter that implements
//! [`lisp_bridge::Host`]. It is the reference host the bridge is exercised
//! against.
//!
//! Heap objects cross the bridge by reference: the interpreter keeps each one
//! in a retained table under a [`HostId`](lisp_bridge::HostId) until the
//! bridge releases it. Script callbacks come back in through the
//! `bridge--reenter` builtin.

mod builtins;
mod codec;
mod interp;
mod object;
mod reader;

pub use interp::Interp;
pub use object::{Buffer, Builtin, BuiltinFn, Closure, Cons, HashTable, Obj, Symbol};
pub use reader::{ReadError, Reader};
