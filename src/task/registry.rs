//! 任务注册表：待执行队列 + 已完成日志
//!
//! 任务 ID 任一时刻只在二者之一出现；进入终态后移入已完成日志且不再入队。
//! 依赖就绪判断只看已完成日志里状态为 Completed 的条目，失败 / 取消的依赖永久阻塞下游。

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::core::AgentError;
use crate::task::{new_task_id, Payload, Task, TaskId, TaskSpec, TaskStatus};

/// 终态结果
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(Payload),
    Failed(String),
    Cancelled(String),
}

impl Outcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Outcome::Completed(_) => TaskStatus::Completed,
            Outcome::Failed(_) => TaskStatus::Failed,
            Outcome::Cancelled(_) => TaskStatus::Cancelled,
        }
    }
}

/// mark_terminal 的结果：移入日志后的任务，以及成功时被触发的后继 ID
#[derive(Debug, Clone)]
pub struct TerminalTransition {
    pub task: Task,
    pub triggered: Vec<TaskId>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    queue: Vec<Task>,
    completed: Vec<Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从快照恢复；快照中仍为 Running 的任务从未到达终态，退回 Pending
    pub fn restore(queue: Vec<Task>, completed: Vec<Task>) -> Self {
        let queue = queue
            .into_iter()
            .map(|mut t| {
                if t.status == TaskStatus::Running {
                    t.status = TaskStatus::Pending;
                    t.started_at = None;
                }
                t
            })
            .collect();
        Self { queue, completed }
    }

    pub fn enqueue(&mut self, spec: TaskSpec) -> TaskId {
        let task = Task::from_spec(spec);
        let id = task.id.clone();
        self.insert(task);
        id
    }

    /// 插入已构造好的任务（由命令通道转交）
    pub fn insert(&mut self, task: Task) {
        if self.contains(&task.id) {
            tracing::warn!(task_id = %task.id, "duplicate task id ignored");
            return;
        }
        self.queue.push(task);
    }

    /// 构造严格线性链：第 i+1 个依赖第 i 个，第 i 个的 next_tasks 指向第 i+1 个
    pub fn build_chain(specs: Vec<TaskSpec>) -> Vec<Task> {
        let ids: Vec<TaskId> = specs.iter().map(|_| new_task_id()).collect();
        specs
            .into_iter()
            .enumerate()
            .map(|(i, mut spec)| {
                if i > 0 && !spec.depends_on.contains(&ids[i - 1]) {
                    spec.depends_on.push(ids[i - 1].clone());
                }
                if let Some(next) = ids.get(i + 1) {
                    if !spec.next_tasks.contains(next) {
                        spec.next_tasks.push(next.clone());
                    }
                }
                Task::with_id(ids[i].clone(), spec)
            })
            .collect()
    }

    pub fn create_chain(&mut self, specs: Vec<TaskSpec>) -> Vec<TaskId> {
        let tasks = Self::build_chain(specs);
        let ids = tasks.iter().map(|t| t.id.clone()).collect();
        for task in tasks {
            self.insert(task);
        }
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.queue.iter().any(|t| t.id == id) || self.completed.iter().any(|t| t.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.queue
            .iter()
            .find(|t| t.id == id)
            .or_else(|| self.completed.iter().find(|t| t.id == id))
    }

    pub fn queue(&self) -> &[Task] {
        &self.queue
    }

    pub fn completed(&self) -> &[Task] {
        &self.completed
    }

    /// 依赖全部以 Completed 状态出现在已完成日志中的待执行任务（保持入队顺序）
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let done: HashSet<&str> = self
            .completed
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect();
        self.queue
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.depends_on.iter().all(|d| done.contains(d.as_str())))
            .collect()
    }

    pub fn mark_running(&mut self, id: &str) -> Result<&Task, AgentError> {
        let task = self
            .queue
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        if task.status != TaskStatus::Pending {
            return Err(AgentError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to: TaskStatus::Running,
            });
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        Ok(task)
    }

    /// 将任务从队列移入已完成日志；成功时触发 next_tasks 中仍在队列里的任务
    pub fn mark_terminal(
        &mut self,
        id: &str,
        outcome: Outcome,
    ) -> Result<TerminalTransition, AgentError> {
        let idx = match self.queue.iter().position(|t| t.id == id) {
            Some(idx) => idx,
            None => {
                return match self.completed.iter().find(|t| t.id == id) {
                    Some(t) => Err(AgentError::InvalidTransition {
                        id: id.to_string(),
                        from: t.status,
                        to: outcome.status(),
                    }),
                    None => Err(AgentError::TaskNotFound(id.to_string())),
                };
            }
        };

        let mut task = self.queue.remove(idx);
        task.status = outcome.status();
        task.completed_at = Some(Utc::now());
        match outcome {
            Outcome::Completed(output) => task.output = Some(output),
            Outcome::Failed(err) | Outcome::Cancelled(err) => task.error = Some(err),
        }

        let triggered = if task.status == TaskStatus::Completed {
            self.trigger(&task.id, &task.next_tasks)
        } else {
            Vec::new()
        };

        self.completed.push(task.clone());
        Ok(TerminalTransition { task, triggered })
    }

    /// 标记后继任务由 `from` 释放；只影响仍在队列中的任务，返回实际被触发的 ID
    pub fn trigger(&mut self, from: &str, ids: &[TaskId]) -> Vec<TaskId> {
        let mut triggered = Vec::new();
        for id in ids {
            if let Some(t) = self
                .queue
                .iter_mut()
                .find(|t| &t.id == id && t.status == TaskStatus::Pending)
            {
                t.triggered_by = Some(from.to_string());
                triggered.push(id.clone());
            }
        }
        triggered
    }

    /// 取消尚未开始的任务
    pub fn cancel_pending(&mut self, id: &str, reason: &str) -> Result<TerminalTransition, AgentError> {
        match self.queue.iter().find(|t| t.id == id) {
            Some(t) if t.status == TaskStatus::Pending => {}
            Some(t) => {
                return Err(AgentError::InvalidTransition {
                    id: id.to_string(),
                    from: t.status,
                    to: TaskStatus::Cancelled,
                })
            }
            None => return Err(AgentError::TaskNotFound(id.to_string())),
        }
        self.mark_terminal(id, Outcome::Cancelled(reason.to_string()))
    }

    /// 最近 n 个以 Completed / Failed 结束的任务（按进入日志的顺序）
    pub fn recent_outcomes(&self, n: usize) -> Vec<&Task> {
        let mut recent: Vec<&Task> = self
            .completed
            .iter()
            .rev()
            .filter(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed))
            .take(n)
            .collect();
        recent.reverse();
        recent
    }

    /// 已完成日志中早于 cutoff 的条目数
    pub fn stale_count(&self, cutoff: DateTime<Utc>) -> usize {
        self.completed
            .iter()
            .filter(|t| t.completed_at.map_or(false, |at| at < cutoff))
            .count()
    }

    /// 回收已完成日志中早于 cutoff 的任务，返回回收数量
    pub fn prune_completed(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.completed.len();
        self.completed
            .retain(|t| t.completed_at.map_or(true, |at| at >= cutoff));
        before - self.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPriority, TaskType};

    fn spec(desc: &str) -> TaskSpec {
        TaskSpec::new(TaskType::Monitoring, desc)
    }

    fn ok_output() -> Payload {
        let mut p = Payload::new();
        p.insert("ok".into(), serde_json::Value::Bool(true));
        p
    }

    #[test]
    fn task_without_dependencies_is_ready_immediately() {
        let mut reg = TaskRegistry::new();
        let id = reg.enqueue(spec("health check"));
        let ready = reg.ready_tasks();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, id);
    }

    #[test]
    fn chain_links_dependencies_and_next_tasks() {
        let mut reg = TaskRegistry::new();
        let ids = reg.create_chain(vec![spec("one"), spec("two"), spec("three")]);
        assert_eq!(ids.len(), 3);

        let t1 = reg.get(&ids[0]).unwrap();
        let t2 = reg.get(&ids[1]).unwrap();
        let t3 = reg.get(&ids[2]).unwrap();
        assert!(t1.depends_on.is_empty());
        assert_eq!(t1.next_tasks, vec![ids[1].clone()]);
        assert_eq!(t2.depends_on, vec![ids[0].clone()]);
        assert_eq!(t2.next_tasks, vec![ids[2].clone()]);
        assert_eq!(t3.depends_on, vec![ids[1].clone()]);
        assert!(t3.next_tasks.is_empty());

        let ready: Vec<_> = reg.ready_tasks().into_iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![ids[0].clone()]);
    }

    #[test]
    fn completing_dependency_releases_and_triggers_dependent() {
        let mut reg = TaskRegistry::new();
        let ids = reg.create_chain(vec![spec("a"), spec("b")]);
        reg.mark_running(&ids[0]).unwrap();
        let transition = reg.mark_terminal(&ids[0], Outcome::Completed(ok_output())).unwrap();

        assert_eq!(transition.task.status, TaskStatus::Completed);
        assert_eq!(transition.triggered, vec![ids[1].clone()]);
        let b = reg.get(&ids[1]).unwrap();
        assert_eq!(b.triggered_by.as_deref(), Some(ids[0].as_str()));
        assert_eq!(reg.ready_tasks()[0].id, ids[1]);
    }

    #[test]
    fn failed_dependency_blocks_dependent_forever() {
        let mut reg = TaskRegistry::new();
        let ids = reg.create_chain(vec![spec("a"), spec("b")]);
        reg.mark_running(&ids[0]).unwrap();
        let transition = reg.mark_terminal(&ids[0], Outcome::Failed("boom".into())).unwrap();

        assert!(transition.triggered.is_empty());
        assert_eq!(reg.completed().len(), 1);
        assert_eq!(reg.completed()[0].error.as_deref(), Some("boom"));
        assert!(reg.completed()[0].output.is_none());
        assert!(reg.ready_tasks().is_empty());
        assert_eq!(reg.get(&ids[1]).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn terminal_task_cannot_transition_again() {
        let mut reg = TaskRegistry::new();
        let id = reg.enqueue(spec("once"));
        reg.mark_running(&id).unwrap();
        reg.mark_terminal(&id, Outcome::Completed(ok_output())).unwrap();

        let err = reg.mark_terminal(&id, Outcome::Failed("again".into())).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));
        assert!(matches!(reg.mark_running(&id), Err(AgentError::TaskNotFound(_))));
        assert!(reg.queue().is_empty());
    }

    #[test]
    fn mark_running_rejects_unknown_and_running_tasks() {
        let mut reg = TaskRegistry::new();
        assert!(matches!(reg.mark_running("nope"), Err(AgentError::TaskNotFound(_))));
        let id = reg.enqueue(spec("x"));
        reg.mark_running(&id).unwrap();
        assert!(matches!(
            reg.mark_running(&id),
            Err(AgentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn cancel_pending_moves_task_to_log() {
        let mut reg = TaskRegistry::new();
        let ids = reg.create_chain(vec![spec("a"), spec("b")]);
        let t = reg.cancel_pending(&ids[0], "user request").unwrap();
        assert_eq!(t.task.status, TaskStatus::Cancelled);
        assert!(reg.ready_tasks().is_empty());
    }

    #[test]
    fn recent_outcomes_skips_cancelled_and_keeps_order() {
        let mut reg = TaskRegistry::new();
        let a = reg.enqueue(spec("a"));
        let b = reg.enqueue(spec("b"));
        let c = reg.enqueue(spec("c").with_priority(TaskPriority::Low));
        reg.mark_terminal(&a, Outcome::Failed("x".into())).unwrap();
        reg.cancel_pending(&b, "skip").unwrap();
        reg.mark_terminal(&c, Outcome::Completed(ok_output())).unwrap();

        let recent: Vec<_> = reg.recent_outcomes(10).into_iter().map(|t| t.id.clone()).collect();
        assert_eq!(recent, vec![a, c]);
    }

    #[test]
    fn prune_completed_drops_entries_before_cutoff() {
        let mut reg = TaskRegistry::new();
        let id = reg.enqueue(spec("old"));
        reg.mark_terminal(&id, Outcome::Completed(ok_output())).unwrap();

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(reg.stale_count(future), 1);
        assert_eq!(reg.prune_completed(future), 1);
        assert!(reg.completed().is_empty());
        assert!(!reg.contains(&id));
    }

    #[test]
    fn restore_resets_running_tasks_to_pending() {
        let mut task = Task::from_spec(spec("interrupted"));
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let reg = TaskRegistry::restore(vec![task], Vec::new());
        assert_eq!(reg.queue()[0].status, TaskStatus::Pending);
        assert!(reg.queue()[0].started_at.is_none());
        assert_eq!(reg.ready_tasks().len(), 1);
    }
}
