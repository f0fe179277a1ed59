use std::sync::Arc;

use onion_vm::{
    context::Context,
    lambda::runnable::RuntimeError,
    types::{function::Function, object::Value, stored::StoredObject},
};

use crate::{config::ThreadConfig, runtime::Runtime};

use super::{bad_argument, Thread};

/// A function bound to a thread configuration, ready to be started any
/// number of times.
#[derive(Clone, Debug)]
pub struct ThreadRunner {
    runtime: Runtime,
    function: Function,
    config: ThreadConfig,
}

impl ThreadRunner {
    pub fn new(runtime: &Runtime, function: Function) -> Self {
        ThreadRunner {
            runtime: runtime.clone(),
            function,
            config: ThreadConfig::default(),
        }
    }

    /// Like [`ThreadRunner::new`], but module paths are taken from `ctx`.
    pub fn inherit(runtime: &Runtime, ctx: &Context, function: Function) -> Self {
        let mut runner = ThreadRunner::new(runtime, function);
        runner.config.path = ctx.package_path().to_string();
        runner.config.cpath = ctx.package_cpath().to_string();
        runner
    }

    pub fn with_config(mut self, config: ThreadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.config.path = path.to_string();
        self
    }

    pub fn cpath(mut self, cpath: &str) -> Self {
        self.config.cpath = cpath.to_string();
        self
    }

    pub fn step(mut self, step: u32) -> Self {
        self.config.step = step;
        self
    }

    pub fn traceback(mut self, traceback: bool) -> Self {
        self.config.traceback = traceback;
        self
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn spawn(&self, arguments: Vec<StoredObject>) -> Result<Thread, RuntimeError> {
        Thread::spawn(
            &self.runtime,
            &self.config,
            self.function.clone(),
            arguments,
        )
    }

    /// Captures `arguments` from `ctx` and starts a worker with them.
    pub fn call(&self, ctx: &Context, arguments: &[Value]) -> Result<Thread, RuntimeError> {
        if !Arc::ptr_eq(ctx.registry(), self.runtime.registry()) {
            return Err(RuntimeError::InvalidOperation(
                "onion.thread: context belongs to a different runtime".into(),
            ));
        }
        let mut capture = ctx.capture();
        let mut stored = Vec::with_capacity(arguments.len());
        for (index, argument) in arguments.iter().enumerate() {
            stored.push(
                capture
                    .store(argument)
                    .map_err(|err| bad_argument(index + 1, &err))?,
            );
        }
        drop(capture);
        self.spawn(stored)
    }
}
