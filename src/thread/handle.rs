//! 单个工作线程的状态机。
//!
//! 状态（`Status`）由工作线程写入，命令（`Command`）由控制方写入，二者在同一把
//! 锁下读写，对应通知器的 `reset`/`notify` 也在这把锁内完成，从而保证：
//! - `change_status` 先于唤醒等待者生效
//! - 终止状态之后的命令被丢弃
//! - 暂停只能由 `Run` 或 `Cancel` 解除
use std::{
    fmt::{Debug, Display, Formatter},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::trace;
use onion_vm::{
    context::{Context, Hook, Interruptable, StopSignal},
    lambda::runnable::RuntimeError,
    types::{
        shared::{EntryId, GcRegistry, Holder},
        stored::StoredObject,
    },
};
use rustc_hash::FxHashSet;

use crate::{notifier::Notifier, shutdown::Shutdown};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde_support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde_support", serde(rename_all = "lowercase"))]
pub enum Status {
    Running,
    Paused,
    Canceled,
    Completed,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Canceled | Status::Completed | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Paused => "paused",
            Status::Canceled => "canceled",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde_support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde_support", serde(rename_all = "lowercase"))]
pub enum Command {
    Run,
    Cancel,
    Pause,
}

struct State {
    status: Status,
    command: Command,
}

fn recover<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

pub struct ThreadHandle {
    id: u64,
    state: Mutex<State>,
    status_notifier: Notifier,
    command_notifier: Notifier,
    completion_notifier: Notifier,
    interruptable: Mutex<Option<Arc<dyn Interruptable>>>,
    /// 工作线程启动时取走；函数返回后立即销毁
    context: Mutex<Option<Context>>,
    result: Mutex<Vec<StoredObject>>,
    /// 以本句柄名义登记的共享表（参数和结果），随句柄一起释放
    references: Mutex<FxHashSet<EntryId>>,
    registry: Arc<GcRegistry>,
    shutdown: Arc<Shutdown>,
}

impl ThreadHandle {
    pub fn new(registry: Arc<GcRegistry>, shutdown: Arc<Shutdown>) -> Self {
        ThreadHandle {
            id: registry.next_holder_id(),
            state: Mutex::new(State {
                status: Status::Running,
                command: Command::Run,
            }),
            status_notifier: Notifier::new(),
            command_notifier: Notifier::new(),
            completion_notifier: Notifier::new(),
            interruptable: Mutex::new(None),
            context: Mutex::new(Some(Context::new(registry.clone()))),
            result: Mutex::new(Vec::new()),
            references: Mutex::new(FxHashSet::default()),
            registry,
            shutdown,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> MutexGuard<'_, State> {
        recover(self.state.lock())
    }

    pub fn status(&self) -> Status {
        self.state().status
    }

    pub fn command(&self) -> Command {
        self.state().command
    }

    /// Records the controller's intent. Dropped once the worker is terminal.
    pub fn put_command(&self, cmd: Command) {
        let mut state = self.state();
        if state.status.is_terminal() {
            trace!("thread {}: {:?} ignored, already {}", self.id, cmd, state.status);
            return;
        }
        trace!("thread {}: command {:?}", self.id, cmd);
        state.command = cmd;
        // 控制方接下来会等待工作线程对该命令的反应
        self.status_notifier.reset();
        self.command_notifier.notify();
    }

    pub fn change_status(&self, stat: Status) {
        let mut state = self.state();
        trace!("thread {}: {} -> {}", self.id, state.status, stat);
        state.status = stat;
        self.command_notifier.reset();
        self.status_notifier.notify();
        if stat.is_terminal() {
            self.completion_notifier.notify();
        }
    }

    /// Enters (or re-announces) `Paused` if `Pause` is still the latest command.
    /// Otherwise the command notifier stays latched so the pause loop picks up
    /// the newer command right away.
    fn acknowledge_pause(&self) {
        let mut state = self.state();
        if state.command != Command::Pause {
            return;
        }
        trace!("thread {}: {} -> paused", self.id, state.status);
        state.status = Status::Paused;
        self.command_notifier.reset();
        self.status_notifier.notify();
    }

    pub fn wait_for_status_change(&self, timeout: Option<Duration>) -> Status {
        self.status_notifier.wait_for(timeout);
        self.status()
    }

    pub fn wait_for_command_change(&self, timeout: Option<Duration>) -> Command {
        self.command_notifier.wait_for(timeout);
        self.command()
    }

    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.completion_notifier.wait_for(timeout)
    }

    /// Wakes the worker if it is blocked in an interruptable library call.
    pub fn interrupt(&self) {
        let target = recover(self.interruptable.lock()).clone();
        if let Some(target) = target {
            target.interrupt();
        }
    }

    pub(crate) fn with_context<T, F>(&self, f: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(&mut Context) -> Result<T, RuntimeError>,
    {
        match recover(self.context.lock()).as_mut() {
            Some(ctx) => f(ctx),
            None => Err(RuntimeError::InvalidOperation(
                "thread context has already been released".into(),
            )),
        }
    }

    pub(crate) fn take_context(&self) -> Option<Context> {
        recover(self.context.lock()).take()
    }

    /// Keeps entry `id` alive for as long as this handle exists.
    pub fn add_reference(&self, id: EntryId) -> Result<(), RuntimeError> {
        let mut references = recover(self.references.lock());
        if references.contains(&id) {
            return Ok(());
        }
        self.registry.add_reference(id, Holder::Thread(self.id))?;
        references.insert(id);
        Ok(())
    }

    /// Moves `store` under this handle's lifetime: the handle registers its
    /// reference first, then the store's own strong reference is released.
    pub fn adopt(&self, store: StoredObject) -> Result<StoredObject, RuntimeError> {
        store.check_registry(&self.registry)?;
        if let Some(id) = store.gc_handle() {
            self.add_reference(id)?;
            store.release_strong_reference();
        }
        Ok(store)
    }

    pub fn result(&self) -> Vec<StoredObject> {
        recover(self.result.lock()).clone()
    }

    pub(crate) fn set_result(&self, result: Vec<StoredObject>) {
        *recover(self.result.lock()) = result;
    }

    fn stop(&self) -> Result<(), StopSignal> {
        self.change_status(Status::Canceled);
        Err(StopSignal::new())
    }
}

impl Hook for ThreadHandle {
    fn tick(&self) -> Result<(), StopSignal> {
        if self.shutdown.requested() {
            return self.stop();
        }
        match self.command() {
            Command::Run => Ok(()),
            Command::Cancel => self.stop(),
            Command::Pause => {
                self.acknowledge_pause();
                loop {
                    match self.wait_for_command_change(None) {
                        Command::Run => {
                            self.change_status(Status::Running);
                            return Ok(());
                        }
                        Command::Cancel => return self.stop(),
                        Command::Pause => self.acknowledge_pause(),
                    }
                }
            }
        }
    }

    fn interruption_point(&self) -> Result<(), StopSignal> {
        if self.shutdown.requested() || self.command() == Command::Cancel {
            return self.stop();
        }
        Ok(())
    }

    fn set_interruptable(
        &self,
        target: Option<Arc<dyn Interruptable>>,
    ) -> Option<Arc<dyn Interruptable>> {
        std::mem::replace(&mut *recover(self.interruptable.lock()), target)
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        let references: Vec<EntryId> = recover(self.references.lock()).drain().collect();
        self.registry
            .release_all(Holder::Thread(self.id), references);
    }
}

impl Debug for ThreadHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        write!(
            f,
            "ThreadHandle(id: {}, status: {}, command: {:?})",
            self.id, state.status, state.command
        )
    }
}
