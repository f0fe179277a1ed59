use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use arc_gc::{
    arc::{GCArc, GCArcWeak},
    traceable::GCTraceable,
};
use indexmap::IndexMap;

use crate::{
    lambda::runnable::RuntimeError,
    types::{function::Function, shared::EntryId},
};

/// 表的键。只允许标量，浮点数在整数值时归一化为整数。
///
/// 非整数的浮点键按位存储（`Float` 保存 `f64::to_bits`），NaN 不能作为键。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(Arc<str>),
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::Boolean(b) => Value::Boolean(*b),
            Key::Integer(i) => Value::Integer(*i),
            Key::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Key::String(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(Arc::from(s))
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Integer(i)
    }
}

pub type Table = IndexMap<Key, Value>;

/// 上下文本地堆上的表，由该上下文的 `GC` 管理，不能离开创建它的线程。
pub struct ObjectCell(pub RwLock<Table>);

impl ObjectCell {
    pub fn new() -> Self {
        ObjectCell(RwLock::new(Table::new()))
    }

    #[inline(always)]
    pub fn try_borrow(&self) -> Result<RwLockReadGuard<'_, Table>, RuntimeError> {
        self.0.read().map_err(|_| {
            RuntimeError::BorrowError("Failed to borrow ObjectCell at `try_borrow`".into())
        })
    }

    #[inline(always)]
    pub fn try_borrow_mut(&self) -> Result<RwLockWriteGuard<'_, Table>, RuntimeError> {
        self.0.write().map_err(|_| {
            RuntimeError::BorrowError("Failed to borrow ObjectCell at `try_borrow_mut`".into())
        })
    }
}

impl Default for ObjectCell {
    fn default() -> Self {
        ObjectCell::new()
    }
}

impl GCTraceable<ObjectCell> for ObjectCell {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        if let Ok(table) = self.0.read() {
            for value in table.values() {
                if let Value::Table(nested) = value {
                    queue.push_back(nested.as_weak());
                }
            }
        }
    }
}

impl Debug for ObjectCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.read() {
            Ok(table) => write!(f, "Table(len: {})", table.len()),
            Err(_) => write!(f, "Table(<poisoned>)"),
        }
    }
}

/// A value as seen from inside one execution context.
///
/// `Table` lives on the context's own heap; `Shared` names a registry entry
/// the context has checked out and may be visible to other contexts too.
#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Table(GCArc<ObjectCell>),
    Shared(EntryId),
    Function(Function),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) | Value::Shared(_) => "table",
            Value::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_key(&self) -> Result<Key, RuntimeError> {
        match self {
            Value::Boolean(b) => Ok(Key::Boolean(*b)),
            Value::Integer(i) => Ok(Key::Integer(*i)),
            Value::Float(f) if f.is_nan() => Err(RuntimeError::InvalidType(
                "table index is NaN".into(),
            )),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Ok(Key::Integer(*f as i64))
            }
            Value::Float(f) => Ok(Key::Float(f.to_bits())),
            Value::String(s) => Ok(Key::String(s.clone())),
            other => Err(RuntimeError::InvalidType(
                format!("table index is {}", other.type_name()).into(),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => std::ptr::eq(a.as_ref(), b.as_ref()),
            (Value::Shared(a), Value::Shared(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.is_same(b),
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Table(cell) => write!(f, "{:?}", cell.as_ref()),
            Value::Shared(id) => write!(f, "SharedTable({:?})", id),
            Value::Function(function) => write!(f, "{:?}", function),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}
