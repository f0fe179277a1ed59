//! 工作线程的创建与控制。
//!
//! [`Thread::spawn`] 在调用方线程上准备好句柄与上下文，然后启动一个独立的
//! 系统线程执行 [`run_thread`]。控制方只通过 [`ThreadHandle`] 上的通知器等待。
pub mod handle;
pub mod runner;

#[cfg(test)]
mod thread_test;

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use arc_gc::gc::GC;
use log::{debug, warn};
use onion_vm::{
    context::{Context, Hook},
    lambda::runnable::{RuntimeError, Unwind},
    types::{function::Function, stored::StoredObject},
};

use crate::{config::ThreadConfig, runtime::Runtime, shutdown::ActiveThread};

use self::handle::{Command, Status, ThreadHandle};

/// Collection threshold of each worker's local heap.
const WORKER_HEAP_THRESHOLD: usize = 1024 * 1024;

/// `onion.thread: bad argument #N (reason)`
pub(crate) fn bad_argument(position: usize, err: &RuntimeError) -> RuntimeError {
    RuntimeError::DetailedError(
        format!("onion.thread: bad argument #{} ({})", position, err.message()).into(),
    )
}

/// Controller-side view of a worker. Cloning shares the same worker.
#[derive(Clone, Debug)]
pub struct Thread {
    handle: Arc<ThreadHandle>,
}

impl Thread {
    /// Starts `function` on a new OS thread with `arguments`.
    ///
    /// Composite arguments are handed over to the worker: the thread handle
    /// registers its own reference before each argument's strong reference
    /// is released.
    pub fn spawn(
        runtime: &Runtime,
        config: &ThreadConfig,
        function: Function,
        arguments: Vec<StoredObject>,
    ) -> Result<Thread, RuntimeError> {
        let active = runtime.shutdown_state().thread_start();
        if runtime.is_shutting_down() {
            return Err(RuntimeError::InvalidOperation(
                "onion.thread: runtime is shutting down".into(),
            ));
        }

        let handle = Arc::new(ThreadHandle::new(
            runtime.registry().clone(),
            runtime.shutdown_state().clone(),
        ));

        let mut adopted = Vec::with_capacity(arguments.len());
        for (index, argument) in arguments.into_iter().enumerate() {
            adopted.push(
                handle
                    .adopt(argument)
                    .map_err(|err| bad_argument(index + 1, &err))?,
            );
        }

        let hook: Arc<dyn Hook> = handle.clone();
        handle.with_context(|ctx| {
            ctx.set_package_path(&config.path);
            ctx.set_package_cpath(&config.cpath);
            ctx.set_hook(hook, config.step);
            if config.traceback {
                ctx.set_error_handler(Some(Context::traceback_handler()));
            }
            Ok(())
        })?;

        let worker = handle.clone();
        let started = std::thread::Builder::new()
            .name(format!("onion-thread-{}", handle.id()))
            .spawn(move || run_thread(worker, active, function, adopted));
        if let Err(err) = started {
            // 上下文持有指向句柄自身的钩子，必须手动拆掉
            if let Some(mut ctx) = handle.take_context() {
                ctx.destroy();
            }
            return Err(RuntimeError::InvalidOperation(
                format!("onion.thread: failed to start worker: {}", err).into(),
            ));
        }

        runtime.track(&handle);
        debug!("thread {} spawned (step {})", handle.id(), config.step);
        Ok(Thread { handle })
    }

    pub fn handle(&self) -> &Arc<ThreadHandle> {
        &self.handle
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    /// `["failed", message]` for a failed worker, otherwise the lowercase
    /// status name as a single element.
    pub fn status(&self) -> Vec<StoredObject> {
        match self.handle.status() {
            Status::Failed => self.handle.result(),
            status => vec![StoredObject::string(status.as_str())],
        }
    }

    /// Waits for a terminal status (at most `timeout`) and reports `status()`.
    pub fn wait(&self, timeout: Option<Duration>) -> Vec<StoredObject> {
        self.handle.wait_for_completion(timeout);
        self.status()
    }

    /// The worker's results if it completed within `timeout`, otherwise an
    /// empty list.
    pub fn get(&self, timeout: Option<Duration>) -> Vec<StoredObject> {
        if self.handle.wait_for_completion(timeout) && self.handle.status() == Status::Completed {
            self.handle.result()
        } else {
            Vec::new()
        }
    }

    /// Asks the worker to stop and wakes it if it is blocked. Returns whether
    /// the worker reached a terminal status within `timeout`.
    pub fn cancel(&self, timeout: Option<Duration>) -> bool {
        self.handle.put_command(Command::Cancel);
        self.handle.interrupt();
        self.handle.wait_for_status_change(timeout).is_terminal()
    }

    /// Returns whether the worker reported `Paused` within `timeout`.
    pub fn pause(&self, timeout: Option<Duration>) -> bool {
        self.handle.put_command(Command::Pause);
        self.handle.wait_for_status_change(timeout) == Status::Paused
    }

    pub fn resume(&self) {
        self.handle.put_command(Command::Run);
    }
}

/// Worker body. The context is destroyed however the call ends, and the
/// active-worker guard is held until the status is final.
fn run_thread(
    handle: Arc<ThreadHandle>,
    _active: ActiveThread,
    function: Function,
    arguments: Vec<StoredObject>,
) {
    let Some(mut ctx) = handle.take_context() else {
        warn!("thread {}: context already taken", handle.id());
        return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        execute(&handle, &mut ctx, &function, arguments)
    }));
    ctx.destroy();
    drop(ctx);

    match outcome {
        Ok(Ok(results)) => {
            debug!("thread {} completed with {} result(s)", handle.id(), results.len());
            handle.set_result(results);
            handle.change_status(Status::Completed);
        }
        Ok(Err(Unwind::Stop(_))) => {
            debug!("thread {} canceled", handle.id());
            if handle.status() != Status::Canceled {
                handle.change_status(Status::Canceled);
            }
        }
        Ok(Err(Unwind::Error(err))) => fail(&handle, err.message()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("thread {} panicked: {}", handle.id(), message);
            fail(&handle, format!("worker panicked: {}", message));
        }
    }
}

fn execute(
    handle: &ThreadHandle,
    ctx: &mut Context,
    function: &Function,
    arguments: Vec<StoredObject>,
) -> Result<Vec<StoredObject>, Unwind> {
    let mut gc = GC::new_with_memory_threshold(WORKER_HEAP_THRESHOLD);
    let values = arguments
        .iter()
        .map(|argument| ctx.load(argument))
        .collect::<Result<Vec<_>, _>>()?;
    drop(arguments);

    let returned = ctx.call(function, values, &mut gc)?;
    let mut capture = ctx.capture();
    let mut results = Vec::with_capacity(returned.len());
    for value in &returned {
        results.push(handle.adopt(capture.store(value)?)?);
    }
    Ok(results)
}

fn fail(handle: &ThreadHandle, description: String) {
    // 取消过程中被打断的调用可能以普通错误的形式返回
    if handle.status() == Status::Canceled {
        debug!("thread {} canceled ({})", handle.id(), description);
        return;
    }
    debug!("thread {} failed: {}", handle.id(), description);
    handle.set_result(vec![
        StoredObject::string("failed"),
        StoredObject::string(description),
    ]);
    handle.change_status(Status::Failed);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
