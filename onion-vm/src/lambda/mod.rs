//! Onion 虚拟机 lambda 子系统模块。
//!
//! - `runnable`：可调度对象的 trait、错误与停止信号的传播通道。
//! - `scheduler`：基于栈的调度器，负责按步数触发钩子。
//! - `native`：单步执行的原生函数。
//! - `protected`：受保护调用，只捕获运行时错误。

pub mod native;
pub mod protected;
pub mod runnable;
pub mod scheduler;
