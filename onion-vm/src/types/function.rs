use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use arc_gc::gc::GC;

use crate::{
    context::Context,
    lambda::{
        native::NativeCall,
        runnable::{Runnable, RuntimeError, Unwind},
    },
    types::object::{ObjectCell, Value},
};

type Loader = dyn Fn(Vec<Value>) -> Result<Box<dyn Runnable>, RuntimeError> + Send + Sync;

pub type NativeBody =
    dyn Fn(&mut Context, &mut GC<ObjectCell>, Vec<Value>) -> Result<Vec<Value>, Unwind>
        + Send
        + Sync;

/// 可跨上下文传递的函数。
///
/// 函数本身不持有任何上下文状态：`load` 在目标上下文里把参数绑定成一个新的
/// Runnable，因此同一个 `Function` 可以同时被多个工作线程加载。
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    loader: Arc<Loader>,
}

impl Function {
    pub fn new<F>(name: &str, loader: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Box<dyn Runnable>, RuntimeError> + Send + Sync + 'static,
    {
        Function {
            name: Arc::from(name),
            loader: Arc::new(loader),
        }
    }

    /// A function whose whole body runs in a single scheduler step.
    pub fn native<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut Context, &mut GC<ObjectCell>, Vec<Value>) -> Result<Vec<Value>, Unwind>
            + Send
            + Sync
            + 'static,
    {
        let body: Arc<NativeBody> = Arc::new(body);
        let call_name: Arc<str> = Arc::from(name);
        Function::new(name, move |arguments| {
            Ok(Box::new(NativeCall::new(
                call_name.clone(),
                body.clone(),
                arguments,
            )))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn load(&self, arguments: Vec<Value>) -> Result<Box<dyn Runnable>, RuntimeError> {
        (self.loader)(arguments)
    }

    pub fn is_same(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.loader, &other.loader)
    }
}

impl Debug for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function({})", self.name)
    }
}
