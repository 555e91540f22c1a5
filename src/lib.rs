//! Autopilot - Rust 自主任务编排循环
//!
//! 模块划分：
//! - **agent**: 对外门面（start / stop / add_task / create_task_chain / get_state）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、状态快照、Observe/Think/Act/Reflect 主控循环、优雅关闭
//! - **engine**: 决策引擎与执行引擎
//! - **events**: 生命周期事件与 broadcast 事件总线
//! - **handlers**: 任务处理器 trait、注册表与内置处理器
//! - **memory**: 短期 / 长期两级记忆与反思得到的 Learning
//! - **observability**: 日志初始化
//! - **task**: 任务模型与任务注册表（队列 + 已完成日志）

pub mod agent;
pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod handlers;
pub mod memory;
pub mod observability;
pub mod task;

pub use agent::Agent;
pub use config::{load_config, AppConfig};
pub use core::{AgentError, AgentState, AgentStatus};
pub use events::AgentEvent;
pub use handlers::{FnHandler, TaskHandler};
pub use task::{Payload, Task, TaskId, TaskPriority, TaskSpec, TaskStatus, TaskType};
