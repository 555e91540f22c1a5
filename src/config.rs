//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AUTOPILOT__*` 覆盖（双下划线表示嵌套，如 `AUTOPILOT__AGENT__PROACTIVE_MODE=true`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub reflection: ReflectionSection,
    #[serde(default)]
    pub maintenance: MaintenanceSection,
}

/// [agent] 段：周期间隔、主动模式、学习开关
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// 两次 tick 之间的间隔（毫秒），在上一次 tick 完全返回后才开始计时
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// 队列为空且空闲超过阈值时是否合成主动动作
    #[serde(default)]
    pub proactive_mode: bool,
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    /// 是否运行 Reflect 阶段
    #[serde(default = "default_true")]
    pub learning_enabled: bool,
    /// 仅记录，不强制：每个 tick 只派发一个任务
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// 事件总线缓冲（慢订阅者超出后丢事件）
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_agent_name() -> String {
    "autopilot".to_string()
}

fn default_cycle_interval_ms() -> u64 {
    1000
}

fn default_idle_threshold_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_tasks() -> usize {
    1
}

fn default_event_capacity() -> usize {
    256
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            cycle_interval_ms: default_cycle_interval_ms(),
            proactive_mode: false,
            idle_threshold_secs: default_idle_threshold_secs(),
            learning_enabled: true,
            max_concurrent_tasks: default_max_concurrent_tasks(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl AgentSection {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

/// [memory] 段：短期上限、裁剪后保留条数、长期提升阈值
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_short_term_cap")]
    pub short_term_cap: usize,
    #[serde(default = "default_short_term_retain")]
    pub short_term_retain: usize,
    /// importance 严格大于该值时额外写入长期记忆
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f32,
}

fn default_short_term_cap() -> usize {
    100
}

fn default_short_term_retain() -> usize {
    50
}

fn default_promotion_threshold() -> f32 {
    0.7
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            short_term_cap: default_short_term_cap(),
            short_term_retain: default_short_term_retain(),
            promotion_threshold: default_promotion_threshold(),
        }
    }
}

/// [reflection] 段：检查最近多少个终态任务、同类失败几次视为模式
#[derive(Debug, Clone, Deserialize)]
pub struct ReflectionSection {
    #[serde(default = "default_reflection_window")]
    pub window: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
}

fn default_reflection_window() -> usize {
    10
}

fn default_failure_threshold() -> usize {
    3
}

impl Default for ReflectionSection {
    fn default() -> Self {
        Self {
            window: default_reflection_window(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// [maintenance] 段：已完成任务保留时长（state_optimization 回收更早的任务）
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceSection {
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,
}

fn default_completed_retention_secs() -> u64 {
    3600
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            completed_retention_secs: default_completed_retention_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 AUTOPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AUTOPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AUTOPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
