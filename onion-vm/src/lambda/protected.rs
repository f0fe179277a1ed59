use arc_gc::gc::GC;

use crate::{
    context::Context,
    lambda::runnable::{Runnable, RuntimeError, StepResult, Unwind},
    types::{
        function::Function,
        object::{ObjectCell, Value},
    },
};

enum ProtectedPhase {
    Launch(Vec<Value>),
    Waiting,
    Done(Vec<Value>),
}

/// Protected call: runs `function` and turns its outcome into values instead
/// of propagating errors. Returns `[true, results...]` on success and
/// `[false, message]` on a runtime error.
///
/// Only [`RuntimeError`]s reach [`Runnable::receive`], so a cancellation
/// passes straight through.
pub struct Protected {
    function: Function,
    phase: ProtectedPhase,
}

impl Protected {
    pub fn new(function: Function, arguments: Vec<Value>) -> Self {
        Protected {
            function,
            phase: ProtectedPhase::Launch(arguments),
        }
    }
}

impl Runnable for Protected {
    fn step(&mut self, _ctx: &mut Context, _gc: &mut GC<ObjectCell>) -> Result<StepResult, Unwind> {
        match std::mem::replace(&mut self.phase, ProtectedPhase::Waiting) {
            ProtectedPhase::Launch(arguments) => match self.function.load(arguments) {
                Ok(runnable) => Ok(StepResult::NewRunnable(runnable)),
                Err(err) => Ok(StepResult::Return(failure(&err))),
            },
            ProtectedPhase::Waiting => Err(RuntimeError::StepError(
                "protected call stepped while waiting for its callee".into(),
            )
            .into()),
            ProtectedPhase::Done(values) => Ok(StepResult::Return(values)),
        }
    }

    fn receive(
        &mut self,
        result: Result<Vec<Value>, RuntimeError>,
        _ctx: &mut Context,
        _gc: &mut GC<ObjectCell>,
    ) -> Result<(), RuntimeError> {
        let values = match result {
            Ok(mut values) => {
                values.insert(0, Value::Boolean(true));
                values
            }
            Err(err) => failure(&err),
        };
        self.phase = ProtectedPhase::Done(values);
        Ok(())
    }

    fn format_context(&self) -> String {
        format!("-> Protected call of '{}'", self.function.name())
    }
}

fn failure(err: &RuntimeError) -> Vec<Value> {
    vec![Value::Boolean(false), Value::string(err.message())]
}
