//! 进程级运行时：共享表登记处、关闭协调以及仍在运行的工作线程。
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use log::debug;
use onion_vm::{context::Context, types::shared::GcRegistry};

use crate::{
    shutdown::Shutdown,
    thread::handle::{Command, ThreadHandle},
};

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

#[derive(Clone, Debug, Default)]
pub struct Runtime {
    registry: Arc<GcRegistry>,
    shutdown: Arc<Shutdown>,
    threads: Arc<Mutex<Vec<Weak<ThreadHandle>>>>,
}

impl Runtime {
    pub fn new() -> Self {
        Runtime::default()
    }

    /// The process-wide runtime used by [`crate::shutdown`].
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(Runtime::new)
    }

    pub fn registry(&self) -> &Arc<GcRegistry> {
        &self.registry
    }

    pub fn shutdown_state(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// A fresh controller-side context bound to this runtime's registry.
    pub fn new_context(&self) -> Context {
        Context::new(self.registry.clone())
    }

    pub(crate) fn track(&self, handle: &Arc<ThreadHandle>) {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        threads.retain(|thread| thread.strong_count() > 0);
        threads.push(Arc::downgrade(handle));
    }

    fn live_threads(&self) -> Vec<Arc<ThreadHandle>> {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Refuses new workers, cancels the running ones and blocks until every
    /// worker has exited. Paused and sleeping workers are woken so they can
    /// observe the cancel.
    pub fn shutdown(&self) {
        self.shutdown.request();
        let live = self.live_threads();
        debug!("shutdown: cancelling {} thread(s)", live.len());
        for handle in live {
            handle.put_command(Command::Cancel);
            handle.interrupt();
        }
        self.shutdown.shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.requested()
    }
}
