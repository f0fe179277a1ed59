//! Onion 的工作线程。
//!
//! 每个工作线程运行在独立的系统线程与独立的执行上下文中，拥有自己的本地堆。
//! 线程之间只能通过 [`StoredObject`] 交换值：标量按值复制，函数共享，表则登记在
//! 进程级的 [`GcRegistry`] 中并按持有者计数。
//!
//! 控制方可以对工作线程执行 `pause` / `resume` / `cancel`。这些命令只在安全点
//! 生效：每执行 `step` 条指令一次的钩子，以及 `sleep` 等可中断的库调用。取消以
//! [`StopSignal`] 的形式展开调用栈，受保护调用无法拦截它。
//!
//! ```no_run
//! use onion_thread::{Runtime, StoredObject, Thread, ThreadConfig};
//! use onion_vm::types::{function::Function, object::Value};
//!
//! let runtime = Runtime::new();
//! let answer = Function::native("answer", |_, _, _| Ok(vec![Value::Integer(42)]));
//! let thread = Thread::spawn(&runtime, &ThreadConfig::default(), answer, vec![]).unwrap();
//! assert_eq!(thread.get(None), vec![StoredObject::Integer(42)]);
//! runtime.shutdown();
//! ```
pub mod config;
pub mod notifier;
pub mod runtime;
pub mod shutdown;
pub mod this_thread;
pub mod thread;
pub mod time;

pub use config::ThreadConfig;
pub use notifier::Notifier;
pub use onion_vm::context::StopSignal;
pub use onion_vm::types::shared::GcRegistry;
pub use onion_vm::types::stored::StoredObject;
pub use runtime::Runtime;
pub use thread::handle::{Command, Status, ThreadHandle};
pub use thread::runner::ThreadRunner;
pub use thread::Thread;

/// Shuts down the process-wide [`Runtime`]: refuses new workers, cancels the
/// running ones and blocks until all of them have exited.
pub fn shutdown() {
    Runtime::global().shutdown();
}
