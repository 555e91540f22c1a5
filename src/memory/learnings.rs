//! 反思得到的经验：同一类型任务在最近窗口内反复失败时沉淀为 Learning
//!
//! 相同 pattern 不重复记录：再次检测到时累加 applications 并刷新 confidence。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskStatus, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub pattern: String,
    pub insight: String,
    pub confidence: f32,
    /// 该模式被再次确认的次数
    pub applications: u32,
    pub created_at: DateTime<Utc>,
}

/// 检测到的重复失败模式
#[derive(Debug, Clone, PartialEq)]
pub struct FailurePattern {
    pub task_type: TaskType,
    pub failures: usize,
    pub examined: usize,
    /// 最近一次失败的错误信息
    pub last_error: Option<String>,
}

impl FailurePattern {
    pub fn pattern_key(&self) -> String {
        format!("repeated_failure:{}", self.task_type)
    }

    pub fn confidence(&self) -> f32 {
        if self.examined == 0 {
            return 0.0;
        }
        (self.failures as f32 / self.examined as f32).clamp(0.0, 1.0)
    }

    pub fn to_learning(&self) -> Learning {
        let reason = self
            .last_error
            .as_deref()
            .map(|e| format!(" Last error: {e}"))
            .unwrap_or_default();
        Learning {
            pattern: self.pattern_key(),
            insight: format!(
                "Tasks of type '{}' failed {} of the last {} outcomes; check its handler before dispatching more.{}",
                self.task_type, self.failures, self.examined, reason
            ),
            confidence: self.confidence(),
            applications: 0,
            created_at: Utc::now(),
        }
    }
}

/// 在最近的终态任务中统计各类型失败次数，达到阈值即视为模式（按类型名排序，结果稳定）
pub fn detect_failure_patterns(recent: &[&Task], failure_threshold: usize) -> Vec<FailurePattern> {
    let mut by_type: BTreeMap<String, FailurePattern> = BTreeMap::new();
    for task in recent {
        let entry = by_type
            .entry(task.task_type.to_string())
            .or_insert_with(|| FailurePattern {
                task_type: task.task_type.clone(),
                failures: 0,
                examined: 0,
                last_error: None,
            });
        entry.examined += 1;
        if task.status == TaskStatus::Failed {
            entry.failures += 1;
            entry.last_error = task.error.clone();
        }
    }
    by_type
        .into_values()
        .filter(|p| p.failures >= failure_threshold.max(1))
        .collect()
}

/// Learning 集合
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningBook {
    entries: Vec<Learning>,
}

impl LearningBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Learning] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 新模式返回新建的 Learning；已存在的模式只累加 applications，返回 None
    pub fn record(&mut self, pattern: &FailurePattern) -> Option<Learning> {
        let key = pattern.pattern_key();
        if let Some(existing) = self.entries.iter_mut().find(|l| l.pattern == key) {
            existing.applications += 1;
            existing.confidence = pattern.confidence();
            return None;
        }
        let learning = pattern.to_learning();
        self.entries.push(learning.clone());
        Some(learning)
    }
}
