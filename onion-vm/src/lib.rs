//! Onion 执行上下文与跨上下文值存储。
//!
//! - `context`：解释器实例、周期性钩子与中断点
//! - `lambda`：Runnable、调度器、受保护调用
//! - `types`：上下文内的值、共享表登记处与可跨线程存储的对象

pub mod context;
pub mod lambda;
pub mod types;


pub use arc_gc::arc::GCArc;
pub use arc_gc::arc::GCArcWeak;
pub use arc_gc::gc::GC;
pub use arc_gc::traceable::GCTraceable;
