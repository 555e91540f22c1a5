//! Agent 错误类型
//!
//! 任务级错误（处理器失败、缺少处理器、取消）只落到任务状态与记忆里；
//! 周期级错误在 tick 边界被捕获，置 AgentStatus::Error 并发布 agent:error，循环继续。

use thiserror::Error;

use crate::task::{TaskId, TaskStatus, TaskType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid transition for task {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("No handler registered for task type '{0}'")]
    HandlerMissing(TaskType),

    #[error("Task cancelled: {0}")]
    Cancelled(TaskId),

    #[error("Agent loop is already running")]
    AlreadyRunning,

    #[error("Command channel closed")]
    ChannelClosed,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
