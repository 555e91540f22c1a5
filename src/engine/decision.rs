//! 决策引擎：从就绪任务中按优先级选一个；空闲过久时合成主动动作
//!
//! 同优先级按入队顺序（稳定）；confidence 只是附带信息，不参与控制流。

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::AppConfig;
use crate::task::{Task, TaskId, TaskPriority};

/// 空闲时可执行的内置动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactiveAction {
    SystemCheck,
    MemoryAnalysis,
    /// 回收过期的已完成任务
    StateOptimization,
}

impl ProactiveAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ProactiveAction::SystemCheck => "system_check",
            ProactiveAction::MemoryAnalysis => "memory_analysis",
            ProactiveAction::StateOptimization => "state_optimization",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    RunTask {
        task_id: TaskId,
        priority: TaskPriority,
        confidence: f32,
        reasoning: String,
    },
    Proactive {
        action: ProactiveAction,
        reasoning: String,
        confidence: f32,
        alternatives: Vec<String>,
        risks: Vec<String>,
    },
}

impl Decision {
    pub fn describe(&self) -> String {
        match self {
            Decision::RunTask { task_id, reasoning, .. } => format!("run {task_id}: {reasoning}"),
            Decision::Proactive { action, reasoning, .. } => {
                format!("proactive {}: {reasoning}", action.as_str())
            }
        }
    }
}

/// 决策时需要的调度器状态摘要
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub now: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// 超过保留时长的已完成任务数
    pub stale_completed: usize,
    /// 短期记忆自上次分析以来又写满一轮
    pub memory_unanalyzed: bool,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    proactive_mode: bool,
    idle_threshold: Duration,
}

impl DecisionEngine {
    pub fn new(proactive_mode: bool, idle_threshold_secs: u64) -> Self {
        Self {
            proactive_mode,
            idle_threshold: Duration::seconds(idle_threshold_secs.min(1 << 40) as i64),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.agent.proactive_mode, cfg.agent.idle_threshold_secs)
    }

    pub fn decide(&self, ready: &[&Task], ctx: &DecisionContext) -> Option<Decision> {
        if let Some(task) = select_task(ready) {
            return Some(Decision::RunTask {
                task_id: task.id.clone(),
                priority: task.priority,
                confidence: advisory_confidence(task.priority),
                reasoning: format!(
                    "highest priority ready task ({:?}, {} ready)",
                    task.priority,
                    ready.len()
                ),
            });
        }

        if !self.proactive_mode {
            return None;
        }
        let idle = ctx.now - ctx.last_activity;
        if idle <= self.idle_threshold {
            return None;
        }

        let (action, reasoning) = if ctx.stale_completed > 0 {
            (
                ProactiveAction::StateOptimization,
                format!("{} completed tasks exceed the retention window", ctx.stale_completed),
            )
        } else if ctx.memory_unanalyzed {
            (
                ProactiveAction::MemoryAnalysis,
                "short-term memory filled a retain window since the last analysis".to_string(),
            )
        } else {
            (
                ProactiveAction::SystemCheck,
                format!("idle for {}s with an empty ready queue", idle.num_seconds()),
            )
        };

        Some(Decision::Proactive {
            action,
            reasoning,
            confidence: 0.6,
            alternatives: Vec::new(),
            risks: Vec::new(),
        })
    }
}

/// 优先级最小者；并列时 min_by_key 返回第一个，即入队最早的
pub fn select_task<'a>(ready: &[&'a Task]) -> Option<&'a Task> {
    ready.iter().copied().min_by_key(|t| t.priority.rank())
}

fn advisory_confidence(priority: TaskPriority) -> f32 {
    match priority {
        TaskPriority::Critical => 0.95,
        TaskPriority::High => 0.85,
        TaskPriority::Medium => 0.75,
        TaskPriority::Low => 0.65,
    }
}
