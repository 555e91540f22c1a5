//! 处理器注册表
//!
//! 所有处理器实现 TaskHandler trait，由 HandlerRegistry 按任务类型注册与查找；
//! 注册表可克隆（共享同一张表），宿主在循环运行期间也能覆盖处理器。

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::task::{Payload, Task, TaskType};

/// 处理器 trait：收到完整 Task，返回输出载荷或错误信息
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 处理器名称（用于日志）
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, task: &Task) -> Result<Payload, String>;
}

/// 将异步闭包适配为 TaskHandler
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, String>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, task: &Task) -> Result<Payload, String> {
        (self.f)(task.clone()).await
    }
}

/// 任务类型 -> 处理器
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或覆盖某类型的处理器
    pub fn register(&self, task_type: impl Into<TaskType>, handler: impl TaskHandler + 'static) {
        self.register_arc(task_type.into(), Arc::new(handler));
    }

    pub fn register_arc(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        tracing::debug!(task_type = %task_type, handler = handler.name(), "handler registered");
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        map.insert(task_type, handler);
    }

    /// 取出处理器句柄；调用方在锁外执行，避免持锁跨 await
    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        map.get(task_type).cloned()
    }
}
