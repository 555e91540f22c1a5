//! 两级记忆：所有条目写入短期；importance 超过阈值的同时写入长期
//!
//! 短期超过上限时批量裁剪到最近 retain 条（不是固定窗口滑动）；长期在进程生命周期内只增不减。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MemorySection;

/// 记忆条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Observation,
    Decision,
    Result,
    Error,
    Insight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    /// [0, 1]
    pub importance: f32,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(memory_type: MemoryType, content: impl Into<String>, importance: f32) -> Self {
        Self {
            memory_type,
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            tags: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStore {
    short_term: Vec<MemoryItem>,
    long_term: Vec<MemoryItem>,
    short_term_cap: usize,
    short_term_retain: usize,
    promotion_threshold: f32,
    /// 累计写入条数（裁剪不回退）
    #[serde(default)]
    appended: u64,
}

impl MemoryStore {
    pub fn new(cfg: &MemorySection) -> Self {
        Self {
            short_term: Vec::new(),
            long_term: Vec::new(),
            short_term_cap: cfg.short_term_cap.max(1),
            short_term_retain: cfg.short_term_retain.min(cfg.short_term_cap).max(1),
            promotion_threshold: cfg.promotion_threshold,
            appended: 0,
        }
    }

    pub fn append(&mut self, item: MemoryItem) {
        if item.importance > self.promotion_threshold {
            self.long_term.push(item.clone());
        }
        self.short_term.push(item);
        self.appended += 1;
        let n = self.short_term.len();
        if n > self.short_term_cap {
            self.short_term.drain(0..n - self.short_term_retain);
            tracing::debug!(
                dropped = n - self.short_term_retain,
                retained = self.short_term_retain,
                "short-term memory trimmed"
            );
        }
    }

    pub fn short_term(&self) -> &[MemoryItem] {
        &self.short_term
    }

    pub fn long_term(&self) -> &[MemoryItem] {
        &self.long_term
    }

    /// 短期记忆是否已达到裁剪后保留的规模
    pub fn is_saturated(&self) -> bool {
        self.short_term.len() >= self.short_term_retain
    }

    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// 已饱和，且自 `analyzed_at`（上次分析时的 appended）以来又写入了一整轮保留窗口
    pub fn needs_analysis(&self, analyzed_at: u64) -> bool {
        self.is_saturated()
            && self.appended.saturating_sub(analyzed_at) >= self.short_term_retain as u64
    }

    /// 按类型统计短期记忆条数
    pub fn counts_by_type(&self) -> BTreeMap<MemoryType, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.short_term {
            *counts.entry(item.memory_type).or_insert(0) += 1;
        }
        counts
    }

}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&MemorySection::default())
    }
}
