//! 基于栈的调度器：推进一组 Runnable 直到最外层返回。
//!
//! 每执行一步都会经过 [`Context::count_instruction`]，上下文据此按配置的步数
//! 调用钩子。钩子发出的停止信号不会交给任何 Runnable 的 `receive`，
//! 而是直接清空整个栈。
use arc_gc::gc::GC;

use crate::{
    context::Context,
    lambda::runnable::{Runnable, RuntimeError, StepResult, Unwind},
    types::object::{ObjectCell, Value},
};

pub struct Scheduler {
    /// 任务栈，栈顶为当前活跃任务
    runnable_stack: Vec<Box<dyn Runnable>>,
}

impl Scheduler {
    pub fn new(runnable_stack: Vec<Box<dyn Runnable>>) -> Self {
        Scheduler { runnable_stack }
    }

    pub fn depth(&self) -> usize {
        self.runnable_stack.len()
    }

    /// Runs until the bottom runnable returns, an error escapes the whole
    /// stack, or the context is asked to stop.
    pub fn run(
        &mut self,
        ctx: &mut Context,
        gc: &mut GC<ObjectCell>,
    ) -> Result<Vec<Value>, Unwind> {
        loop {
            ctx.count_instruction()?;

            let Some(runnable) = self.runnable_stack.last_mut() else {
                return Err(RuntimeError::DetailedError("No runnable in stack".into()).into());
            };
            let stepped = runnable.step(ctx, gc);

            // 即使 Runnable 吞掉了停止信号，上下文上的标记也会让整个栈展开
            if let Some(signal) = ctx.stop_requested() {
                self.runnable_stack.clear();
                return Err(Unwind::Stop(signal));
            }

            match stepped {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::NewRunnable(new_runnable)) => {
                    self.runnable_stack.push(new_runnable);
                }
                Ok(StepResult::Return(values)) => {
                    self.runnable_stack.pop();
                    let Some(parent) = self.runnable_stack.last_mut() else {
                        return Ok(values);
                    };
                    if let Err(err) = parent.receive(Ok(values), ctx, gc) {
                        self.unwind_error(err, ctx, gc)?;
                    }
                }
                Err(Unwind::Stop(signal)) => {
                    self.runnable_stack.clear();
                    return Err(Unwind::Stop(signal));
                }
                Err(Unwind::Error(err)) => {
                    self.unwind_error(err, ctx, gc)?;
                }
            }
        }
    }

    /// Offers `err` to each frame below the failing one, popping frames until
    /// one accepts it. If nobody does, the error escapes the scheduler and the
    /// context's error handler (if any) gets to describe it.
    fn unwind_error(
        &mut self,
        err: RuntimeError,
        ctx: &mut Context,
        gc: &mut GC<ObjectCell>,
    ) -> Result<(), Unwind> {
        let mut frames = Vec::new();
        let mut err = err;
        loop {
            match self.runnable_stack.pop() {
                Some(failed) => frames.push(failed.format_context()),
                None => return Err(ctx.handle_error(err, &frames).into()),
            }
            let Some(parent) = self.runnable_stack.last_mut() else {
                return Err(ctx.handle_error(err, &frames).into());
            };
            match parent.receive(Err(err), ctx, gc) {
                Ok(()) => return Ok(()),
                Err(next) => err = next,
            }
        }
    }

    /// 以栈帧形式输出所有活跃任务的上下文，从栈顶到栈底
    pub fn format_context(&self) -> String {
        if self.runnable_stack.is_empty() {
            return "Scheduler: No active runnables.".to_string();
        }
        self.runnable_stack
            .iter()
            .rev()
            .enumerate()
            .map(|(index, runnable)| {
                format!("--- Frame #{} ---\n{}", index, runnable.format_context())
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
