//! 内置处理器
//!
//! decision / learning / monitoring 为纯函数式处理；code_execution / web_search / file_analysis
//! 只是委托占位，返回 `delegated: true`，宿主应注册真正访问外部服务的处理器覆盖它们。

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::handlers::{HandlerRegistry, TaskHandler};
use crate::task::{Payload, Task, TaskType};

/// 注册全部内置处理器（已存在的同类型处理器会被覆盖）
pub fn register_defaults(registry: &HandlerRegistry) {
    registry.register(TaskType::Decision, DecisionHandler);
    registry.register(TaskType::Learning, LearningHandler);
    registry.register(TaskType::Monitoring, MonitoringHandler);
    registry.register(TaskType::CodeExecution, DelegatingHandler::new(TaskType::CodeExecution));
    registry.register(TaskType::WebSearch, DelegatingHandler::new(TaskType::WebSearch));
    registry.register(TaskType::FileAnalysis, DelegatingHandler::new(TaskType::FileAnalysis));
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut p = Payload::new();
            p.insert("result".into(), other);
            p
        }
    }
}

/// 从 input.options 中选第一项；没有选项时选择 "proceed"
pub struct DecisionHandler;

#[async_trait]
impl TaskHandler for DecisionHandler {
    fn name(&self) -> &str {
        "decision"
    }

    async fn handle(&self, task: &Task) -> Result<Payload, String> {
        let options: Vec<String> = task
            .input
            .get("options")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|o| o.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let chosen = options.first().cloned().unwrap_or_else(|| "proceed".to_string());
        let alternatives: Vec<String> = options.iter().skip(1).cloned().collect();
        Ok(payload(json!({
            "decision": chosen,
            "reasoning": format!("selected first viable option for: {}", task.description),
            "alternatives": alternatives,
        })))
    }
}

/// 确认收到一条经验（input.insight），原样回写
pub struct LearningHandler;

#[async_trait]
impl TaskHandler for LearningHandler {
    fn name(&self) -> &str {
        "learning"
    }

    async fn handle(&self, task: &Task) -> Result<Payload, String> {
        let insight = task
            .input
            .get("insight")
            .and_then(|v| v.as_str())
            .unwrap_or(task.description.as_str());
        Ok(payload(json!({
            "acknowledged": true,
            "insight": insight,
        })))
    }
}

/// 健康检查：报告目标（input.target，缺省为 "agent"）状态
pub struct MonitoringHandler;

#[async_trait]
impl TaskHandler for MonitoringHandler {
    fn name(&self) -> &str {
        "monitoring"
    }

    async fn handle(&self, task: &Task) -> Result<Payload, String> {
        let target = task
            .input
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or("agent");
        Ok(payload(json!({
            "target": target,
            "status": "healthy",
            "checked_at": Utc::now().to_rfc3339(),
        })))
    }
}

/// 委托占位：不失败，返回 delegated 标记
pub struct DelegatingHandler {
    task_type: TaskType,
}

impl DelegatingHandler {
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }
}

#[async_trait]
impl TaskHandler for DelegatingHandler {
    fn name(&self) -> &str {
        self.task_type.as_str()
    }

    async fn handle(&self, task: &Task) -> Result<Payload, String> {
        tracing::debug!(task_id = %task.id, task_type = %self.task_type, "no host handler, returning delegated marker");
        Ok(payload(json!({
            "delegated": true,
            "task_type": self.task_type.as_str(),
            "message": format!("register a '{}' handler to execute this task", self.task_type),
        })))
    }
}
