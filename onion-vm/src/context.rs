//! 执行上下文：一个独立的解释器实例。
//!
//! 上下文本身不含本地堆（`GC<ObjectCell>` 由调用方在所在线程上创建并传入），
//! 因此可以在一个线程上配置好再移交给工作线程。上下文持有：
//! - 模块搜索路径 `path` / `cpath`
//! - 周期性钩子及其步数
//! - 错误处理器
//! - 已检出的共享表集合，在 [`Context::destroy`] 时统一归还
use std::{
    fmt::{Debug, Formatter},
    path::{PathBuf, MAIN_SEPARATOR_STR},
    sync::Arc,
};

use arc_gc::gc::GC;
use rustc_hash::FxHashSet;

use crate::{
    lambda::{
        runnable::{RuntimeError, Unwind},
        scheduler::Scheduler,
    },
    types::{
        function::Function,
        object::{ObjectCell, Value},
        shared::{EntryId, GcRegistry, Holder, SharedTable},
        stored::{Capture, StoredObject},
    },
};

/// Something blocked in a library call that can be woken early.
pub trait Interruptable: Send + Sync {
    fn interrupt(&self);
}

/// Raised by a [`Hook`] to unwind the whole call stack. It is not a
/// [`RuntimeError`], so protected calls cannot catch it.
#[derive(Debug, Default)]
pub struct StopSignal {
    _private: (),
}

impl StopSignal {
    pub fn new() -> Self {
        StopSignal { _private: () }
    }
}

/// Control surface a context reports to while it runs.
pub trait Hook: Send + Sync {
    /// Full check, called every `step` instructions and on explicit yields.
    /// May block (pause) and may ask the context to stop.
    fn tick(&self) -> Result<(), StopSignal>;

    /// Cancellation-only check used by blocking library calls.
    fn interruption_point(&self) -> Result<(), StopSignal>;

    /// Replaces the current interruptable target and returns the previous one.
    fn set_interruptable(
        &self,
        target: Option<Arc<dyn Interruptable>>,
    ) -> Option<Arc<dyn Interruptable>>;
}

pub type ErrorHandler = Arc<dyn Fn(&RuntimeError, &[String]) -> String + Send + Sync>;

pub struct Context {
    id: u64,
    registry: Arc<GcRegistry>,
    package_path: String,
    package_cpath: String,
    hook: Option<Arc<dyn Hook>>,
    hook_step: u32,
    executed: u32,
    stopping: bool,
    error_handler: Option<ErrorHandler>,
    references: FxHashSet<EntryId>,
    destroyed: bool,
}

impl Context {
    pub fn new(registry: Arc<GcRegistry>) -> Self {
        Context {
            id: registry.next_holder_id(),
            registry,
            package_path: String::new(),
            package_cpath: String::new(),
            hook: None,
            hook_step: 0,
            executed: 0,
            stopping: false,
            error_handler: None,
            references: FxHashSet::default(),
            destroyed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &Arc<GcRegistry> {
        &self.registry
    }

    pub fn package_path(&self) -> &str {
        &self.package_path
    }

    pub fn set_package_path(&mut self, path: &str) {
        self.package_path = path.to_string();
    }

    pub fn package_cpath(&self) -> &str {
        &self.package_cpath
    }

    pub fn set_package_cpath(&mut self, cpath: &str) {
        self.package_cpath = cpath.to_string();
    }

    /// Resolves a dotted module name against `path`, like `package.searchpath`.
    pub fn search_path(&self, name: &str) -> Option<PathBuf> {
        search(&self.package_path, name)
    }

    /// Same as [`Context::search_path`] but for native modules on `cpath`.
    pub fn search_cpath(&self, name: &str) -> Option<PathBuf> {
        search(&self.package_cpath, name)
    }

    /// Installs `hook`. With `step == 0` there is no periodic tick, only
    /// explicit yields and interruption points reach the hook.
    pub fn set_hook(&mut self, hook: Arc<dyn Hook>, step: u32) {
        self.hook = Some(hook);
        self.hook_step = step;
        self.executed = 0;
    }

    pub fn hook(&self) -> Option<&Arc<dyn Hook>> {
        self.hook.as_ref()
    }

    pub fn hook_step(&self) -> u32 {
        self.hook_step
    }

    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.error_handler = handler;
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_handler.is_some()
    }

    /// 默认的错误处理器：错误信息后附上被展开的栈帧
    pub fn traceback_handler() -> ErrorHandler {
        Arc::new(|err: &RuntimeError, frames: &[String]| {
            let mut traceback = err.message();
            traceback.push_str("\nstack traceback:");
            for frame in frames {
                traceback.push_str("\n\t");
                traceback.push_str(frame);
            }
            traceback
        })
    }

    pub(crate) fn handle_error(&self, err: RuntimeError, frames: &[String]) -> RuntimeError {
        match &self.error_handler {
            Some(handler) => RuntimeError::Handled(handler(&err, frames).into()),
            None => err,
        }
    }

    fn observe(&mut self, checked: Result<(), StopSignal>) -> Result<(), StopSignal> {
        if checked.is_err() {
            self.stopping = true;
        }
        checked
    }

    /// Counts one executed instruction and ticks the hook every `step`.
    pub fn count_instruction(&mut self) -> Result<(), StopSignal> {
        if self.stopping {
            return Err(StopSignal::new());
        }
        if self.hook_step == 0 {
            return Ok(());
        }
        self.executed += 1;
        if self.executed < self.hook_step {
            return Ok(());
        }
        self.executed = 0;
        self.yield_point()
    }

    /// Runs the full hook immediately.
    pub fn yield_point(&mut self) -> Result<(), StopSignal> {
        let checked = match &self.hook {
            Some(hook) => hook.tick(),
            None => Ok(()),
        };
        self.observe(checked)
    }

    pub fn interruption_point(&mut self) -> Result<(), StopSignal> {
        let checked = match &self.hook {
            Some(hook) => hook.interruption_point(),
            None => Ok(()),
        };
        self.observe(checked)
    }

    pub(crate) fn stop_requested(&self) -> Option<StopSignal> {
        self.stopping.then(StopSignal::new)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Protected invocation: loads `function` with `arguments` and runs it
    /// to completion on a fresh scheduler.
    pub fn call(
        &mut self,
        function: &Function,
        arguments: Vec<Value>,
        gc: &mut GC<ObjectCell>,
    ) -> Result<Vec<Value>, Unwind> {
        if let Some(signal) = self.stop_requested() {
            return Err(Unwind::Stop(signal));
        }
        let runnable = function
            .load(arguments)
            .map_err(|err| self.handle_error(err, &[]))?;
        Scheduler::new(vec![runnable]).run(self, gc)
    }

    /// Checks `id` out for the lifetime of this context.
    pub fn add_reference(&mut self, id: EntryId) -> Result<(), RuntimeError> {
        if self.references.contains(&id) {
            return Ok(());
        }
        self.registry.add_reference(id, Holder::Context(self.id))?;
        self.references.insert(id);
        Ok(())
    }

    pub fn holds_reference(&self, id: EntryId) -> bool {
        self.references.contains(&id)
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn new_table(&self, gc: &mut GC<ObjectCell>) -> Value {
        Value::Table(gc.create(ObjectCell::new()))
    }

    pub fn new_shared_table(&mut self) -> Value {
        let id = self
            .registry
            .create(SharedTable::new(), Holder::Context(self.id));
        self.references.insert(id);
        Value::Shared(id)
    }

    pub fn get(&mut self, table: &Value, key: &Value) -> Result<Value, RuntimeError> {
        let key = key.to_key()?;
        match table {
            Value::Table(cell) => Ok(cell
                .as_ref()
                .try_borrow()?
                .get(&key)
                .cloned()
                .unwrap_or(Value::Nil)),
            Value::Shared(id) => {
                let stored = self
                    .registry
                    .with_table(*id, |shared| Ok(shared.get(&key).cloned()))?;
                match stored {
                    Some(stored) => stored.to_value(self),
                    None => Ok(Value::Nil),
                }
            }
            other => Err(RuntimeError::InvalidOperation(
                format!("attempt to index a {} value", other.type_name()).into(),
            )),
        }
    }

    /// Assigns `table[key] = value`; assigning nil removes the key.
    pub fn set(&mut self, table: &Value, key: &Value, value: &Value) -> Result<(), RuntimeError> {
        let key = key.to_key()?;
        match table {
            Value::Table(cell) => {
                let mut local = cell.as_ref().try_borrow_mut()?;
                if value.is_nil() {
                    local.shift_remove(&key);
                } else {
                    local.insert(key, value.clone());
                }
                Ok(())
            }
            Value::Shared(id) => {
                let stored = match value {
                    Value::Nil => None,
                    other => Some(StoredObject::from_value(other, &self.registry)?),
                };
                let replaced = self.registry.with_table_mut(*id, |shared| {
                    Ok(match stored {
                        Some(stored) => shared.insert(key, stored),
                        None => shared.shift_remove(&key),
                    })
                })?;
                drop(replaced);
                Ok(())
            }
            other => Err(RuntimeError::InvalidOperation(
                format!("attempt to index a {} value", other.type_name()).into(),
            )),
        }
    }

    pub fn length(&self, table: &Value) -> Result<usize, RuntimeError> {
        match table {
            Value::Table(cell) => Ok(cell.as_ref().try_borrow()?.len()),
            Value::Shared(id) => self.registry.with_table(*id, |shared| Ok(shared.len())),
            other => Err(RuntimeError::InvalidOperation(
                format!("attempt to get length of a {} value", other.type_name()).into(),
            )),
        }
    }

    pub fn store(&self, value: &Value) -> Result<StoredObject, RuntimeError> {
        StoredObject::from_value(value, &self.registry)
    }

    /// Starts a capture that keeps aliasing between the values stored
    /// through it, e.g. all arguments of one call.
    pub fn capture(&self) -> Capture<'_> {
        Capture::new(&self.registry)
    }

    pub fn load(&mut self, stored: &StoredObject) -> Result<Value, RuntimeError> {
        stored.to_value(self)
    }

    /// Releases everything this context checked out and drops its hook.
    /// Idempotent; also runs on drop.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.hook = None;
        self.error_handler = None;
        let references: Vec<EntryId> = self.references.drain().collect();
        self.registry
            .release_all(Holder::Context(self.id), references);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("hook_step", &self.hook_step)
            .field("references", &self.references.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

fn search(templates: &str, name: &str) -> Option<PathBuf> {
    let file_name = name.replace('.', MAIN_SEPARATOR_STR);
    templates
        .split(';')
        .filter(|template| !template.is_empty())
        .map(|template| PathBuf::from(template.replace('?', &file_name)))
        .find(|candidate| candidate.is_file())
}
