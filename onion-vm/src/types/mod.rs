//! Onion 运行时核心类型模块。
//!
//! # 子模块
//! - `object`：上下文内的值与本地堆上的表
//! - `function`：可跨上下文加载的函数
//! - `shared`：共享表登记处，按持有者集合决定条目生命周期
//! - `stored`：可跨线程传递的存储对象与 GC 句柄

pub mod function;
pub mod object;
pub mod shared;
pub mod stored;
