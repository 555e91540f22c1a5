//! Agent 门面：宿主程序唯一需要接触的入口
//!
//! 停止状态下门面直接持有 AgentCore，命令立即生效；start() 后 AgentCore 被移入后台 tokio 任务，
//! 门面只保留命令发送端、状态 watch 接收端与事件总线。stop() 等待后台任务返回 AgentCore 再收回。

use std::future::Future;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentCore, AgentError, AgentState, Command};
use crate::engine::InFlightSlot;
use crate::events::{AgentEvent, EventBus};
use crate::handlers::{register_defaults, FnHandler, HandlerRegistry, TaskHandler};
use crate::memory::MemoryStore;
use crate::task::{Payload, Task, TaskId, TaskRegistry, TaskSpec, TaskType};

struct Runner {
    shutdown: CancellationToken,
    handle: JoinHandle<AgentCore>,
}

pub struct Agent {
    config: AppConfig,
    handlers: HandlerRegistry,
    events: EventBus,
    in_flight: InFlightSlot,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<AgentState>,
    /// 停止时为 Some
    core: Option<AgentCore>,
    /// 运行时为 Some
    runner: Option<Runner>,
}

impl Agent {
    pub fn new(config: AppConfig) -> Self {
        let state = AgentState::new(MemoryStore::new(&config.memory));
        Self::from_snapshot(config, state)
    }

    /// 从之前保存的快照恢复（快照中 Running 的任务退回 Pending）
    pub fn from_snapshot(config: AppConfig, state: AgentState) -> Self {
        if config.agent.max_concurrent_tasks > 1 {
            tracing::warn!(
                max_concurrent_tasks = config.agent.max_concurrent_tasks,
                "max_concurrent_tasks > 1 is accepted but only one task is dispatched per cycle"
            );
        }

        let handlers = HandlerRegistry::new();
        register_defaults(&handlers);
        let events = EventBus::new(config.agent.event_capacity);
        let in_flight = InFlightSlot::new();
        let (core, commands, state_rx) = AgentCore::new(
            config.clone(),
            handlers.clone(),
            events.clone(),
            in_flight.clone(),
            state,
        );

        Self {
            config,
            handlers,
            events,
            in_flight,
            commands,
            state_rx,
            core: Some(core),
            runner: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.agent.name
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }

    /// 启动后台循环；已在运行时什么也不做
    pub fn start(&mut self) {
        let Some(mut core) = self.core.take() else {
            tracing::debug!("start ignored, loop already running");
            return;
        };
        core.touch();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(core.run(shutdown.clone()));
        self.runner = Some(Runner { shutdown, handle });

        tracing::info!(agent = %self.config.agent.name, "agent started");
        self.events.publish(AgentEvent::AgentStarted {
            name: self.config.agent.name.clone(),
        });
    }

    /// 停止后台循环：取消下一次 tick，等待正在执行的 tick 返回；未运行时什么也不做
    pub async fn stop(&mut self) {
        let Some(runner) = self.runner.take() else {
            return;
        };
        runner.shutdown.cancel();

        let mut core = match runner.handle.await {
            Ok(core) => core,
            Err(e) => {
                tracing::error!(error = %e, "cycle loop task aborted, rebuilding from last snapshot");
                let state = self.state_rx.borrow().clone();
                let (core, commands, state_rx) = AgentCore::new(
                    self.config.clone(),
                    self.handlers.clone(),
                    self.events.clone(),
                    self.in_flight.clone(),
                    state,
                );
                self.commands = commands;
                self.state_rx = state_rx;
                core
            }
        };
        // 循环退出后才到达的命令
        core.drain_commands();
        core.publish_snapshot();
        let cycle_count = core.cycle_count();
        self.core = Some(core);

        tracing::info!(agent = %self.config.agent.name, cycle_count, "agent stopped");
        self.events.publish(AgentEvent::AgentStopped {
            name: self.config.agent.name.clone(),
            cycle_count,
        });
    }

    /// 手动执行一个周期（仅在未启动时可用）
    pub async fn tick(&mut self) -> Result<(), AgentError> {
        let core = self.core.as_mut().ok_or(AgentError::AlreadyRunning)?;
        core.tick().await;
        Ok(())
    }

    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId, AgentError> {
        let task = Task::from_spec(spec);
        let id = task.id.clone();
        self.dispatch(Command::AddTask(task))?;
        Ok(id)
    }

    /// 构建严格线性链并一次性入队
    pub fn create_task_chain(&mut self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>, AgentError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let tasks = TaskRegistry::build_chain(specs);
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        self.dispatch(Command::AddChain(tasks))?;
        Ok(ids)
    }

    /// 取消任务：正在执行的任务中断其处理器；尚未开始的任务直接移入已完成日志
    pub async fn cancel_task(&mut self, id: &str) -> Result<(), AgentError> {
        if self.in_flight.cancel(id) {
            tracing::info!(task_id = %id, "cancelling in-flight task");
            return Ok(());
        }
        if let Some(core) = self.core.as_mut() {
            let result = core.cancel(id);
            core.publish_snapshot();
            return result;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Cancel {
                id: id.to_string(),
                reply: Some(reply_tx),
            })
            .map_err(|_| AgentError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AgentError::ChannelClosed)?
    }

    /// 注册或覆盖某类型的处理器
    pub fn register_task_handler(
        &self,
        task_type: impl Into<TaskType>,
        handler: impl TaskHandler + 'static,
    ) {
        self.handlers.register(task_type, handler);
    }

    /// 以异步闭包注册处理器
    pub fn register_fn<F, Fut>(&self, task_type: impl Into<TaskType>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, String>> + Send + 'static,
    {
        let task_type = task_type.into();
        let name = task_type.as_str().to_string();
        self.handlers.register(task_type, FnHandler::new(name, f));
    }

    /// 最近一次发布的快照（深拷贝）
    pub fn get_state(&self) -> AgentState {
        self.state_rx.borrow().clone()
    }

    /// 快照变更通知
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    fn dispatch(&mut self, cmd: Command) -> Result<(), AgentError> {
        match self.core.as_mut() {
            Some(core) => {
                core.apply(cmd);
                core.publish_snapshot();
                Ok(())
            }
            None => self.commands.send(cmd).map_err(|_| AgentError::ChannelClosed),
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(runner) = &self.runner {
            runner.shutdown.cancel();
        }
    }
}
