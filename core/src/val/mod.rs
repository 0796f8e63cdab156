use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::rt::Coroutine;
use crate::vm::Callable;

mod cell;
pub mod ops;
mod table;

pub use cell::Variable;
pub use table::{TKey, Table};


/// Opaque host object: the whole foreign-object interop surface.
///
/// The engine never looks inside `data`; member access and calls go through
/// the metatable the host attaches, via ordinary dispatch.
pub struct Userdata {
    data: Box<dyn Any + Send + Sync>,
    meta: RwLock<Option<Arc<Table>>>,
}

impl Userdata {
    pub fn new<T: Any + Send + Sync>(data: T) -> Arc<Userdata> {
        Arc::new(Userdata {
            data: Box::new(data),
            meta: RwLock::new(None),
        })
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn metatable(&self) -> Option<Arc<Table>> {
        self.meta.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_metatable(&self, meta: Option<Arc<Table>>) {
        *self.meta.write().unwrap_or_else(PoisonError::into_inner) = meta;
    }
}

impl fmt::Debug for Userdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Userdata({:p})", self as *const _)
    }
}

/// A dynamically typed value.
#[derive(Default, Clone)]
pub enum Val {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Strings are immutable and shared; cloning is a refcount bump.
    Str(Arc<str>),
    Table(Arc<Table>),
    /// Any invocable: compiled closures, natives, protected-call wrappers.
    Func(Arc<dyn Callable>),
    Userdata(Arc<Userdata>),
    Thread(Arc<Coroutine>),
}

impl Val {
    pub fn str<S: AsRef<str>>(s: S) -> Val {
        Val::Str(Arc::from(s.as_ref()))
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Nil => "nil",
            Val::Bool(_) => "boolean",
            Val::Int(_) | Val::Float(_) => "number",
            Val::Str(_) => "string",
            Val::Table(_) => "table",
            Val::Func(_) => "function",
            Val::Userdata(_) => "userdata",
            Val::Thread(_) => "thread",
        }
    }

    /// Only nil and false are falsy.
    #[inline]
    pub fn truthy(&self) -> bool {
        !matches!(self, Val::Nil | Val::Bool(false))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Val::Nil)
    }

    /// Values that compare and key by identity rather than content.
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self, Val::Table(_) | Val::Func(_) | Val::Userdata(_) | Val::Thread(_))
    }

    /// Stable address for identity comparison and reference table keys.
    pub(crate) fn identity_addr(&self) -> usize {
        match self {
            Val::Table(t) => Arc::as_ptr(t) as usize,
            Val::Func(f) => Arc::as_ptr(f) as *const () as usize,
            Val::Userdata(u) => Arc::as_ptr(u) as usize,
            Val::Thread(t) => Arc::as_ptr(t) as usize,
            _ => 0,
        }
    }
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Nil => write!(f, "Nil"),
            Val::Bool(b) => write!(f, "Bool({b})"),
            Val::Int(i) => write!(f, "Int({i})"),
            Val::Float(x) => write!(f, "Float({x})"),
            Val::Str(s) => write!(f, "Str({:?})", s.as_ref()),
            Val::Table(t) => write!(f, "Table({:p})", Arc::as_ptr(t)),
            // Never recurse into a function's captured environment.
            Val::Func(c) => write!(f, "Func({})", c.name()),
            Val::Userdata(u) => write!(f, "Userdata({:p})", Arc::as_ptr(u)),
            Val::Thread(t) => write!(f, "Thread({:p})", Arc::as_ptr(t)),
        }
    }
}

/// Raw (metamethod-free) equality; `__eq` lives in dispatch.
impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        ops::raw_eq(self, other)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Nil => write!(f, "nil"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Int(i) => write!(f, "{i}"),
            Val::Float(x) => {
                let mut buf = ryu::Buffer::new();
                write!(f, "{}", buf.format(*x))
            }
            Val::Str(s) => write!(f, "{}", s.as_ref()),
            Val::Table(t) => write!(f, "table: {:p}", Arc::as_ptr(t)),
            Val::Func(c) => write!(f, "function: {}", c.name()),
            Val::Userdata(u) => write!(f, "userdata: {:p}", Arc::as_ptr(u)),
            Val::Thread(t) => write!(f, "thread: {:p}", Arc::as_ptr(t)),
        }
    }
}

/// JSON-oriented host export. Tables serialize their entries (string-keyed
/// fields by name, everything else under a rendered key); invocables and
/// opaque values become placeholders. Not cycle-safe.
impl Serialize for Val {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Val::Nil => serializer.serialize_unit(),
            Val::Bool(b) => serializer.serialize_bool(*b),
            Val::Int(i) => serializer.serialize_i64(*i),
            Val::Float(x) => serializer.serialize_f64(*x),
            Val::Str(s) => serializer.serialize_str(s.as_ref()),
            Val::Table(t) => {
                let entries = t.entries();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    let key = match k {
                        TKey::Str(s) => s.as_ref().to_string(),
                        TKey::Int(i) => i.to_string(),
                        TKey::Num(bits) => f64::from_bits(bits).to_string(),
                        TKey::Bool(b) => b.to_string(),
                        TKey::Ref(_) => "<ref>".to_string(),
                    };
                    map.serialize_entry(&key, &v)?;
                }
                map.end()
            }
            Val::Func(_) => serializer.serialize_str("<function>"),
            Val::Userdata(_) => serializer.serialize_str("<userdata>"),
            Val::Thread(_) => serializer.serialize_str("<thread>"),
        }
    }
}
