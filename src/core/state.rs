//! 状态定义：AgentStatus 与对外只读的 AgentState 快照
//!
//! 调度器独占内部状态，每次 tick 结束（以及命令被处理后）投影出一份深拷贝快照；
//! 快照可序列化，宿主需要持久化时自行保存并用 `Agent::from_snapshot` 恢复。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{LearningBook, MemoryStore};
use crate::task::Task;

/// 当前周期最后进入的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Executing,
    /// 本周期没有可做的事
    Waiting,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub current_task: Option<Task>,
    pub task_queue: Vec<Task>,
    pub completed_tasks: Vec<Task>,
    pub memory: MemoryStore,
    pub learnings: LearningBook,
    /// 最近一次真正执行了任务或主动动作的时间
    pub last_activity: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycle_count: u64,
}

impl AgentState {
    pub fn new(memory: MemoryStore) -> Self {
        Self {
            status: AgentStatus::Idle,
            current_task: None,
            task_queue: Vec::new(),
            completed_tasks: Vec::new(),
            memory,
            learnings: LearningBook::new(),
            last_activity: Utc::now(),
            last_cycle_at: None,
            cycle_count: 0,
        }
    }

    pub fn find_task(&self, id: &str) -> Option<&Task> {
        self.task_queue
            .iter()
            .chain(self.completed_tasks.iter())
            .find(|t| t.id == id)
    }
}
