use std::sync::Arc;

use arc_gc::gc::GC;

use crate::{
    context::Context,
    lambda::runnable::{Runnable, RuntimeError, StepResult, Unwind},
    types::{
        function::NativeBody,
        object::{ObjectCell, Value},
    },
};

pub struct NativeCall {
    name: Arc<str>,
    body: Arc<NativeBody>,
    arguments: Option<Vec<Value>>,
}

impl NativeCall {
    pub fn new(name: Arc<str>, body: Arc<NativeBody>, arguments: Vec<Value>) -> Self {
        NativeCall {
            name,
            body,
            arguments: Some(arguments),
        }
    }
}

impl Runnable for NativeCall {
    fn step(&mut self, ctx: &mut Context, gc: &mut GC<ObjectCell>) -> Result<StepResult, Unwind> {
        let arguments = self.arguments.take().ok_or_else(|| {
            RuntimeError::StepError(format!("native function '{}' already returned", self.name).into())
        })?;
        (self.body)(ctx, gc, arguments).map(StepResult::Return)
    }

    fn format_context(&self) -> String {
        format!("-> Executing Native Function: {}", self.name)
    }
}
