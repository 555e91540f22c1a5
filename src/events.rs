//! 生命周期事件：类型化的事件枚举 + 基于 broadcast 的事件总线
//!
//! 事件可序列化为 JSON 供外部观察者（UI、Webhook 转发）使用；投递为进程内、尽力而为，
//! 没有订阅者或订阅者落后时事件直接丢弃。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::state::AgentStatus;
use crate::engine::decision::Decision;
use crate::memory::Learning;
use crate::task::{Task, TaskId};

/// 单个生命周期事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentStarted { name: String },
    AgentStopped { name: String, cycle_count: u64 },
    /// 周期级错误（被 tick 边界捕获）
    AgentError { cycle: u64, message: String },
    AgentActed { cycle: u64, decision: Decision },
    AgentReflected {
        cycle: u64,
        examined: usize,
        new_learnings: usize,
    },
    TaskAdded { task: Task },
    TaskReady { task: Task },
    TaskStarted { task: Task },
    TaskCompleted { task: Task },
    TaskFailed { task: Task },
    TaskCancelled { task: Task },
    TaskTriggered { task_id: TaskId, triggered_by: TaskId },
    ChainCreated { task_ids: Vec<TaskId> },
    /// 主动系统检查的结果
    ProactiveSystemCheck {
        status: AgentStatus,
        pending: usize,
        completed: usize,
        short_term_memory: usize,
        long_term_memory: usize,
        learnings: usize,
    },
    LearningAdded { learning: Learning },
}

impl AgentEvent {
    /// 对外的事件名（如 `task:completed`）
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::AgentStarted { .. } => "agent:started",
            AgentEvent::AgentStopped { .. } => "agent:stopped",
            AgentEvent::AgentError { .. } => "agent:error",
            AgentEvent::AgentActed { .. } => "agent:acted",
            AgentEvent::AgentReflected { .. } => "agent:reflected",
            AgentEvent::TaskAdded { .. } => "task:added",
            AgentEvent::TaskReady { .. } => "task:ready",
            AgentEvent::TaskStarted { .. } => "task:started",
            AgentEvent::TaskCompleted { .. } => "task:completed",
            AgentEvent::TaskFailed { .. } => "task:failed",
            AgentEvent::TaskCancelled { .. } => "task:cancelled",
            AgentEvent::TaskTriggered { .. } => "task:triggered",
            AgentEvent::ChainCreated { .. } => "chain:created",
            AgentEvent::ProactiveSystemCheck { .. } => "proactive:system_check",
            AgentEvent::LearningAdded { .. } => "learning:added",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn publish(&self, event: AgentEvent) {
        tracing::debug!(event = event.name(), "publish");
        // 没有订阅者时 send 返回 Err，属正常情况
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
