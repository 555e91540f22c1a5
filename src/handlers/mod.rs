//! 处理器：任务类型到异步执行函数的映射，以及内置处理器

pub mod builtin;
pub mod registry;

pub use builtin::{register_defaults, DelegatingHandler};
pub use registry::{FnHandler, HandlerRegistry, TaskHandler};
