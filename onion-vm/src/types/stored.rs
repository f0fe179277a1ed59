use std::{
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rustc_hash::FxHashMap;

use crate::{
    context::Context,
    lambda::runnable::RuntimeError,
    types::{
        function::Function,
        object::{ObjectCell, Value},
        shared::{EntryId, GcRegistry, Holder, SharedTable},
    },
};

/// 指向共享表的句柄，自身持有一个强引用。
///
/// 强引用在 [`GcHandle::release_strong_reference`] 或析构时归还。复制句柄会
/// 为副本登记新的强引用，因此每个句柄的生命周期互不影响。
pub struct GcHandle {
    id: EntryId,
    holder: Holder,
    registry: Arc<GcRegistry>,
    strong: AtomicBool,
}

impl GcHandle {
    /// Takes a new strong reference on an existing entry.
    pub fn attach(registry: &Arc<GcRegistry>, id: EntryId) -> Result<Self, RuntimeError> {
        let holder = Holder::Store(registry.next_holder_id());
        registry.add_reference(id, holder)?;
        Ok(GcHandle {
            id,
            holder,
            registry: registry.clone(),
            strong: AtomicBool::new(true),
        })
    }

    /// Registers `table` as a new entry owned by the returned handle.
    pub fn create(registry: &Arc<GcRegistry>, table: SharedTable) -> Self {
        let holder = Holder::Store(registry.next_holder_id());
        let id = registry.create(table, holder);
        GcHandle {
            id,
            holder,
            registry: registry.clone(),
            strong: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn registry(&self) -> &Arc<GcRegistry> {
        &self.registry
    }

    pub fn belongs_to(&self, registry: &Arc<GcRegistry>) -> bool {
        Arc::ptr_eq(&self.registry, registry)
    }

    pub fn has_strong_reference(&self) -> bool {
        self.strong.load(Ordering::Acquire)
    }

    /// Gives up this handle's own reference. The destination must have
    /// registered its reference before this is called.
    pub fn release_strong_reference(&self) {
        if self.strong.swap(false, Ordering::AcqRel) {
            self.registry.release(self.id, self.holder);
        }
    }
}

impl Clone for GcHandle {
    fn clone(&self) -> Self {
        let holder = Holder::Store(self.registry.next_holder_id());
        let strong = self.registry.add_reference(self.id, holder).is_ok();
        GcHandle {
            id: self.id,
            holder,
            registry: self.registry.clone(),
            strong: AtomicBool::new(strong),
        }
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.release_strong_reference();
    }
}

impl Debug for GcHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GcHandle({:?}, strong: {})",
            self.id,
            self.has_strong_reference()
        )
    }
}

/// A value boxed so it can outlive the context that produced it.
#[derive(Clone)]
pub enum StoredObject {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Function(Function),
    Shared(GcHandle),
}

impl StoredObject {
    pub fn string(s: impl AsRef<str>) -> Self {
        StoredObject::String(Arc::from(s.as_ref()))
    }

    pub fn gc_handle(&self) -> Option<EntryId> {
        match self {
            StoredObject::Shared(handle) => Some(handle.id()),
            _ => None,
        }
    }

    pub fn release_strong_reference(&self) {
        if let StoredObject::Shared(handle) = self {
            handle.release_strong_reference();
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            StoredObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StoredObject::Nil => "nil",
            StoredObject::Boolean(_) => "boolean",
            StoredObject::Integer(_) | StoredObject::Float(_) => "number",
            StoredObject::String(_) => "string",
            StoredObject::Function(_) => "function",
            StoredObject::Shared(_) => "table",
        }
    }

    /// Captures `value`. Local tables are copied into new shared entries,
    /// shared tables get a new strong reference on their existing entry.
    pub fn from_value(value: &Value, registry: &Arc<GcRegistry>) -> Result<Self, RuntimeError> {
        Capture::new(registry).store(value)
    }

    /// Fails unless this object's table lives in `registry`.
    pub fn check_registry(&self, registry: &Arc<GcRegistry>) -> Result<(), RuntimeError> {
        match self {
            StoredObject::Shared(handle) if !handle.belongs_to(registry) => Err(
                RuntimeError::InvalidOperation("table belongs to a different registry".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Materializes the stored value inside `ctx`. Shared tables are checked
    /// out by the context until it is destroyed.
    pub fn to_value(&self, ctx: &mut Context) -> Result<Value, RuntimeError> {
        Ok(match self {
            StoredObject::Nil => Value::Nil,
            StoredObject::Boolean(b) => Value::Boolean(*b),
            StoredObject::Integer(i) => Value::Integer(*i),
            StoredObject::Float(x) => Value::Float(*x),
            StoredObject::String(s) => Value::String(s.clone()),
            StoredObject::Function(function) => Value::Function(function.clone()),
            StoredObject::Shared(handle) => {
                self.check_registry(ctx.registry())?;
                ctx.add_reference(handle.id())?;
                Value::Shared(handle.id())
            }
        })
    }
}

/// One capture pass over a group of values.
///
/// 同一个本地表无论经由多少条路径到达，都只复制一次，所有出现位置共享同一条目。
/// 只有回到祖先的边（环）会被拒绝。
pub struct Capture<'r> {
    registry: &'r Arc<GcRegistry>,
    visiting: Vec<*const ObjectCell>,
    captured: FxHashMap<*const ObjectCell, GcHandle>,
}

impl<'r> Capture<'r> {
    pub fn new(registry: &'r Arc<GcRegistry>) -> Self {
        Capture {
            registry,
            visiting: Vec::new(),
            captured: FxHashMap::default(),
        }
    }

    pub fn store(&mut self, value: &Value) -> Result<StoredObject, RuntimeError> {
        Ok(match value {
            Value::Nil => StoredObject::Nil,
            Value::Boolean(b) => StoredObject::Boolean(*b),
            Value::Integer(i) => StoredObject::Integer(*i),
            Value::Float(x) => StoredObject::Float(*x),
            Value::String(s) => StoredObject::String(s.clone()),
            Value::Function(function) => StoredObject::Function(function.clone()),
            Value::Shared(id) => StoredObject::Shared(GcHandle::attach(self.registry, *id)?),
            Value::Table(cell) => {
                let ptr: *const ObjectCell = cell.as_ref();
                if self.visiting.contains(&ptr) {
                    return Err(RuntimeError::InvalidType(
                        "cyclic table cannot be shared".into(),
                    ));
                }
                if let Some(handle) = self.captured.get(&ptr) {
                    return Ok(StoredObject::Shared(handle.clone()));
                }
                self.visiting.push(ptr);
                let mut shared = SharedTable::new();
                {
                    let table = cell.as_ref().try_borrow()?;
                    for (key, nested) in table.iter() {
                        shared.insert(key.clone(), self.store(nested)?);
                    }
                }
                self.visiting.pop();
                let handle = GcHandle::create(self.registry, shared);
                self.captured.insert(ptr, handle.clone());
                StoredObject::Shared(handle)
            }
        })
    }
}

impl PartialEq for StoredObject {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StoredObject::Nil, StoredObject::Nil) => true,
            (StoredObject::Boolean(a), StoredObject::Boolean(b)) => a == b,
            (StoredObject::Integer(a), StoredObject::Integer(b)) => a == b,
            (StoredObject::Float(a), StoredObject::Float(b)) => a == b,
            (StoredObject::String(a), StoredObject::String(b)) => a == b,
            (StoredObject::Function(a), StoredObject::Function(b)) => a.is_same(b),
            (StoredObject::Shared(a), StoredObject::Shared(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl Debug for StoredObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredObject::Nil => write!(f, "nil"),
            StoredObject::Boolean(b) => write!(f, "{}", b),
            StoredObject::Integer(i) => write!(f, "{}", i),
            StoredObject::Float(x) => write!(f, "{}", x),
            StoredObject::String(s) => write!(f, "{:?}", s),
            StoredObject::Function(function) => write!(f, "{:?}", function),
            StoredObject::Shared(handle) => write!(f, "{:?}", handle),
        }
    }
}

impl From<bool> for StoredObject {
    fn from(b: bool) -> Self {
        StoredObject::Boolean(b)
    }
}

impl From<i64> for StoredObject {
    fn from(i: i64) -> Self {
        StoredObject::Integer(i)
    }
}

impl From<f64> for StoredObject {
    fn from(x: f64) -> Self {
        StoredObject::Float(x)
    }
}

impl From<&str> for StoredObject {
    fn from(s: &str) -> Self {
        StoredObject::string(s)
    }
}

impl From<String> for StoredObject {
    fn from(s: String) -> Self {
        StoredObject::string(s)
    }
}
