use std::fmt::Display;

use arc_gc::gc::GC;

use crate::{
    context::{Context, StopSignal},
    types::object::{ObjectCell, Value},
};

#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    StepError(Box<str>),
    DetailedError(Box<str>),
    InvalidType(Box<str>),
    InvalidOperation(Box<str>),
    BorrowError(Box<str>),
    BrokenReference,
    /// 用户代码主动抛出的错误，原样显示
    Raised(Box<str>),
    /// 错误处理器的输出（通常是 traceback）
    Handled(Box<str>),
}

impl RuntimeError {
    pub fn raise(message: impl Into<Box<str>>) -> Self {
        RuntimeError::Raised(message.into())
    }

    /// Prefix the message with the name of the operation that produced it,
    /// e.g. `onion.thread: invalid time metric: h`.
    pub fn with_prefix(self, prefix: &str) -> Self {
        RuntimeError::DetailedError(format!("{}: {}", prefix, self.message()).into())
    }

    /// The message without the variant label.
    pub fn message(&self) -> String {
        match self {
            RuntimeError::StepError(msg)
            | RuntimeError::DetailedError(msg)
            | RuntimeError::InvalidType(msg)
            | RuntimeError::InvalidOperation(msg)
            | RuntimeError::BorrowError(msg)
            | RuntimeError::Raised(msg)
            | RuntimeError::Handled(msg) => msg.to_string(),
            RuntimeError::BrokenReference => "broken reference".to_string(),
        }
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::StepError(msg) => write!(f, "Step Error: {}", msg),
            RuntimeError::DetailedError(msg) => write!(f, "{}", msg),
            RuntimeError::InvalidType(msg) => write!(f, "Invalid Type: {}", msg),
            RuntimeError::InvalidOperation(msg) => write!(f, "Invalid Operation: {}", msg),
            RuntimeError::BorrowError(msg) => write!(f, "Borrow Error: {}", msg),
            RuntimeError::BrokenReference => write!(f, "Broken Reference"),
            RuntimeError::Raised(msg) | RuntimeError::Handled(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// 运行中止的原因。
///
/// `Stop` 与普通错误走不同的通道：调度器只会把 `Error` 交给
/// [`Runnable::receive`]，因此用户层的错误处理无法拦截取消。
#[derive(Debug)]
pub enum Unwind {
    Error(RuntimeError),
    Stop(StopSignal),
}

impl From<RuntimeError> for Unwind {
    fn from(err: RuntimeError) -> Self {
        Unwind::Error(err)
    }
}

impl From<StopSignal> for Unwind {
    fn from(signal: StopSignal) -> Self {
        Unwind::Stop(signal)
    }
}

pub enum StepResult {
    Continue,
    NewRunnable(Box<dyn Runnable>),
    Return(Vec<Value>),
}

#[allow(unused_variables)]
pub trait Runnable {
    fn step(&mut self, ctx: &mut Context, gc: &mut GC<ObjectCell>) -> Result<StepResult, Unwind>;

    /// Receives the outcome of a child pushed with `StepResult::NewRunnable`.
    /// Errors are propagated to the parent unless overridden.
    fn receive(
        &mut self,
        result: Result<Vec<Value>, RuntimeError>,
        ctx: &mut Context,
        gc: &mut GC<ObjectCell>,
    ) -> Result<(), RuntimeError> {
        match result {
            Ok(_) => Err(RuntimeError::DetailedError(
                "receive not implemented".into(),
            )),
            Err(err) => Err(err),
        }
    }

    fn format_context(&self) -> String {
        "<runnable>".to_string()
    }
}
