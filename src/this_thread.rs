//! 工作线程内部可调用的库函数：睡眠、让出、中断点。
//!
//! 所有会阻塞的调用都先把自己的 [`Notifier`] 注册为当前上下文的可中断目标，
//! 这样控制方的 `cancel` 可以立即唤醒它们。
use std::{num::NonZeroUsize, sync::Arc, thread, time::Duration};

use onion_vm::{
    context::{Context, Hook, Interruptable},
    lambda::runnable::{RuntimeError, Unwind},
    types::object::Value,
};

use crate::{notifier::Notifier, time::from_onion_time};

/// Registers `target` with the context's hook for as long as the guard lives,
/// then puts back whatever was registered before. Without a hook this does
/// nothing.
pub struct ScopedSetInterruptable {
    hook: Option<Arc<dyn Hook>>,
    previous: Option<Arc<dyn Interruptable>>,
}

impl ScopedSetInterruptable {
    pub fn new(ctx: &Context, target: Arc<dyn Interruptable>) -> Self {
        let hook = ctx.hook().cloned();
        let previous = hook
            .as_ref()
            .and_then(|hook| hook.set_interruptable(Some(target)));
        ScopedSetInterruptable { hook, previous }
    }
}

impl Drop for ScopedSetInterruptable {
    fn drop(&mut self) {
        if let Some(hook) = &self.hook {
            hook.set_interruptable(self.previous.take());
        }
    }
}

pub fn interruption_point(ctx: &mut Context) -> Result<(), Unwind> {
    ctx.interruption_point()?;
    Ok(())
}

/// Runs the full hook (pause included) and yields the OS thread.
pub fn yield_now(ctx: &mut Context) -> Result<(), Unwind> {
    ctx.yield_point()?;
    thread::yield_now();
    Ok(())
}

/// Blocks for `duration` unless the worker is cancelled first.
pub fn sleep_for(ctx: &mut Context, duration: Duration) -> Result<(), Unwind> {
    let notifier = Arc::new(Notifier::new());
    let _scope = ScopedSetInterruptable::new(ctx, notifier.clone());
    ctx.interruption_point()?;
    notifier.wait_for(Some(duration));
    ctx.interruption_point()?;
    Ok(())
}

fn bad_sleep_argument(position: usize, reason: &str) -> RuntimeError {
    RuntimeError::DetailedError(
        format!("bad argument #{} to 'onion.sleep' ({})", position, reason).into(),
    )
}

/// `onion.sleep(duration [, metric])`. Without a duration it is a yield.
pub fn sleep(
    ctx: &mut Context,
    duration: Option<&Value>,
    metric: Option<&Value>,
) -> Result<(), Unwind> {
    let duration = match duration {
        None | Some(Value::Nil) => return yield_now(ctx),
        Some(value) => value.as_integer().ok_or_else(|| {
            bad_sleep_argument(1, &format!("number expected, got {}", value.type_name()))
        })?,
    };
    let metric = match metric {
        None | Some(Value::Nil) => None,
        Some(value) => Some(value.as_str().ok_or_else(|| {
            bad_sleep_argument(2, &format!("string expected, got {}", value.type_name()))
        })?),
    };
    let duration = from_onion_time(duration, metric)
        .map_err(|err| bad_sleep_argument(1, &err.message()))?;
    sleep_for(ctx, duration)
}

/// Textual id of the calling OS thread.
pub fn thread_id() -> String {
    format!("{:?}", thread::current().id())
}

pub fn hardware_threads() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
