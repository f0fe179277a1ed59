use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use onion_vm::context::Interruptable;

/// 可复用的条件信号。
///
/// `notify` 会锁存，之后的 `wait_for` 立即返回，直到 `reset` 清除锁存。
/// `notify` 与 `reset` 并发时没有顺序保证，调用方需在外部互斥下串行化二者。
#[derive(Debug, Default)]
pub struct Notifier {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier::default()
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.notified.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        let mut notified = self.state();
        *notified = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.state() = false;
    }

    pub fn is_notified(&self) -> bool {
        *self.state()
    }

    /// Blocks until notified or until `timeout` elapses; `None` waits forever.
    /// Returns whether the notifier was signalled.
    pub fn wait_for(&self, timeout: Option<Duration>) -> bool {
        let mut notified = self.state();
        match timeout {
            None => {
                while !*notified {
                    notified = self
                        .condvar
                        .wait(notified)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now().checked_add(timeout);
                while !*notified {
                    let remaining = match deadline {
                        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                        // 超出 Instant 表示范围，视为无限等待
                        None => Duration::MAX,
                    };
                    if remaining.is_zero() {
                        break;
                    }
                    notified = self
                        .condvar
                        .wait_timeout(notified, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                *notified
            }
        }
    }
}

impl Interruptable for Notifier {
    fn interrupt(&self) {
        self.notify();
    }
}
