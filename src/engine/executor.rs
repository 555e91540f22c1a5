//! 执行引擎
//!
//! start(id) 将任务置为 Running 并发布 task:started；run(task) 按类型查找处理器并在独立 tokio 任务中调用，
//! 与该任务的取消令牌赛跑；结果经 mark_terminal 落入已完成日志，随后写入记忆、发布事件并输出 JSON 审计日志。
//! 缺少处理器、处理器返回 Err 或 panic 都只让该任务失败，不影响循环。

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::events::{AgentEvent, EventBus};
use crate::handlers::HandlerRegistry;
use crate::memory::{MemoryItem, MemoryStore, MemoryType};
use crate::task::registry::{Outcome, TerminalTransition};
use crate::task::{Task, TaskId, TaskRegistry, TaskStatus};

const RESULT_IMPORTANCE: f32 = 0.8;
const ERROR_IMPORTANCE: f32 = 0.9;

/// 正在执行的任务及其取消令牌；Agent 门面与执行引擎共享
#[derive(Debug, Clone, Default)]
pub struct InFlightSlot {
    inner: Arc<Mutex<Option<(TaskId, CancellationToken)>>>,
}

impl InFlightSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((id.to_string(), token.clone()));
        token
    }

    fn clear(&self) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// 若 id 正在执行则触发取消并返回 true
    pub fn cancel(&self, id: &str) -> bool {
        let slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((running, token)) if running == id => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<TaskId> {
        let slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|(id, _)| id.clone())
    }
}

pub struct ExecutionEngine {
    handlers: HandlerRegistry,
    events: EventBus,
    in_flight: InFlightSlot,
}

impl ExecutionEngine {
    pub fn new(handlers: HandlerRegistry, events: EventBus, in_flight: InFlightSlot) -> Self {
        Self {
            handlers,
            events,
            in_flight,
        }
    }

    /// Pending -> Running，发布 task:started，返回任务副本
    pub fn start(&self, tasks: &mut TaskRegistry, id: &str) -> Result<Task, AgentError> {
        let task = tasks.mark_running(id)?.clone();
        tracing::info!(task_id = %task.id, task_type = %task.task_type, "task started");
        self.events.publish(AgentEvent::TaskStarted { task: task.clone() });
        Ok(task)
    }

    /// 调用处理器直到得到结果（或被取消），再完成终态转换
    pub async fn run(
        &self,
        tasks: &mut TaskRegistry,
        memory: &mut MemoryStore,
        task: Task,
    ) -> Result<TerminalTransition, AgentError> {
        let start = Instant::now();
        let outcome = self.invoke(&task).await;
        let transition = tasks.mark_terminal(&task.id, outcome)?;
        self.settle(memory, &transition);

        let audit = serde_json::json!({
            "event": "task_audit",
            "task_id": transition.task.id,
            "task_type": transition.task.task_type.as_str(),
            "ok": transition.task.status == TaskStatus::Completed,
            "outcome": status_label(transition.task.status),
            "duration_ms": start.elapsed().as_millis() as u64,
            "triggered": transition.triggered.len(),
        });
        tracing::info!(audit = %audit.to_string(), "task");

        Ok(transition)
    }

    /// 终态后的副作用：写入 result / error 记忆并发布对应事件（也用于取消尚未开始的任务）
    pub fn settle(&self, memory: &mut MemoryStore, transition: &TerminalTransition) {
        let task = &transition.task;
        let item = match task.status {
            TaskStatus::Completed => MemoryItem::new(
                MemoryType::Result,
                format!("Task {} ({}) completed: {}", task.id, task.task_type, task.description),
                RESULT_IMPORTANCE,
            ),
            status => MemoryItem::new(
                MemoryType::Error,
                format!(
                    "Task {} ({}) {}: {}",
                    task.id,
                    task.task_type,
                    status_label(status),
                    task.error.as_deref().unwrap_or("unknown error")
                ),
                ERROR_IMPORTANCE,
            ),
        };
        memory.append(item.with_tag("task").with_tag(task.task_type.as_str()));

        let event = match task.status {
            TaskStatus::Completed => AgentEvent::TaskCompleted { task: task.clone() },
            TaskStatus::Cancelled => AgentEvent::TaskCancelled { task: task.clone() },
            _ => {
                tracing::warn!(task_id = %task.id, error = ?task.error, "task failed");
                AgentEvent::TaskFailed { task: task.clone() }
            }
        };
        self.events.publish(event);

        for id in &transition.triggered {
            self.events.publish(AgentEvent::TaskTriggered {
                task_id: id.clone(),
                triggered_by: task.id.clone(),
            });
        }
    }

    async fn invoke(&self, task: &Task) -> Outcome {
        let Some(handler) = self.handlers.get(&task.task_type) else {
            return Outcome::Failed(AgentError::HandlerMissing(task.task_type.clone()).to_string());
        };

        let token = self.in_flight.arm(&task.id);
        let owned = task.clone();
        let mut join = tokio::spawn(async move { handler.handle(&owned).await });

        let outcome = tokio::select! {
            res = &mut join => match res {
                Ok(Ok(output)) => Outcome::Completed(output),
                Ok(Err(message)) => Outcome::Failed(message),
                Err(e) if e.is_panic() => Outcome::Failed(format!("handler panicked: {e}")),
                Err(e) => Outcome::Failed(e.to_string()),
            },
            _ = token.cancelled() => {
                join.abort();
                Outcome::Cancelled(AgentError::Cancelled(task.id.clone()).to_string())
            }
        };
        self.in_flight.clear();
        outcome
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}
