//! 任务模型：类型、优先级、状态、依赖
//!
//! Task 由 TaskSpec 创建（生成 ID 与创建时间）；状态只能 Pending → Running → 终态（Completed / Failed / Cancelled）。

pub mod registry;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use registry::TaskRegistry;

/// 任务 ID（形如 `task_<uuid>`）
pub type TaskId = String;

/// 任务输入 / 输出载荷
pub type Payload = serde_json::Map<String, serde_json::Value>;

pub fn new_task_id() -> TaskId {
    format!("task_{}", uuid::Uuid::new_v4())
}

/// 任务类型：内置六种，其余由宿主注册处理器时自定义
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    CodeExecution,
    WebSearch,
    FileAnalysis,
    Decision,
    Learning,
    Monitoring,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::CodeExecution => "code_execution",
            TaskType::WebSearch => "web_search",
            TaskType::FileAnalysis => "file_analysis",
            TaskType::Decision => "decision",
            TaskType::Learning => "learning",
            TaskType::Monitoring => "monitoring",
            TaskType::Custom(name) => name,
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s {
            "code_execution" => TaskType::CodeExecution,
            "web_search" => TaskType::WebSearch,
            "file_analysis" => TaskType::FileAnalysis,
            "decision" => TaskType::Decision,
            "learning" => TaskType::Learning,
            "monitoring" => TaskType::Monitoring,
            other => TaskType::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        TaskType::from(s.as_str())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务优先级；声明顺序即排序（Critical 最小），只用于就绪任务之间的先后
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl TaskPriority {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待执行（依赖可能尚未满足）
    Pending,
    /// 正在执行
    Running,
    /// 已完成
    Completed,
    /// 执行失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// 调用方提交的任务描述；ID 与时间戳在入队时生成
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub input: Payload,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub next_tasks: Vec<TaskId>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<TaskType>, description: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            description: description.into(),
            priority: TaskPriority::default(),
            input: Payload::new(),
            depends_on: Vec::new(),
            next_tasks: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn then(mut self, id: impl Into<TaskId>) -> Self {
        self.next_tasks.push(id.into());
        self
    }
}

/// 调度中的任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub input: Payload,
    /// 仅成功时设置
    pub output: Option<Payload>,
    /// 仅失败 / 取消时设置
    pub error: Option<String>,
    pub depends_on: Vec<TaskId>,
    /// 哪个任务的完成释放了本任务
    pub triggered_by: Option<TaskId>,
    pub next_tasks: Vec<TaskId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self::with_id(new_task_id(), spec)
    }

    /// 使用预先分配的 ID 创建（链式任务需要先知道彼此的 ID）
    pub fn with_id(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            task_type: spec.task_type,
            description: spec.description,
            priority: spec.priority,
            status: TaskStatus::Pending,
            input: spec.input,
            output: None,
            error: None,
            depends_on: dedup(spec.depends_on),
            triggered_by: None,
            next_tasks: dedup(spec.next_tasks),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 依赖 / 后继按集合语义保存，保留首次出现的顺序
fn dedup(ids: Vec<TaskId>) -> Vec<TaskId> {
    let mut out: Vec<TaskId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
