use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::debug;

/// Polling interval used while draining active workers.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 进程级的关闭协调：关闭标记加活跃工作线程计数。
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    active_threads: AtomicUsize,
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown::default()
    }

    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn active_threads(&self) -> usize {
        self.active_threads.load(Ordering::SeqCst)
    }

    /// Marks a worker as running until the returned guard is dropped.
    /// The guard is taken before the OS thread starts and moves into it;
    /// callers check [`Shutdown::requested`] after taking it.
    pub fn thread_start(self: &Arc<Self>) -> ActiveThread {
        self.active_threads.fetch_add(1, Ordering::SeqCst);
        ActiveThread {
            shutdown: self.clone(),
        }
    }

    /// Sets the flag without waiting.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Sets the shutdown flag and polls until every worker has exited.
    pub fn shutdown(&self) {
        self.request();
        let mut active = self.active_threads();
        if active > 0 {
            debug!("shutdown: waiting for {} active thread(s)", active);
        }
        while active > 0 {
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
            active = self.active_threads();
        }
        debug!("shutdown: complete");
    }
}

pub struct ActiveThread {
    shutdown: Arc<Shutdown>,
}

impl Drop for ActiveThread {
    fn drop(&mut self) {
        self.shutdown.active_threads.fetch_sub(1, Ordering::SeqCst);
    }
}
