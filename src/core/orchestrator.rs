//! 主控循环：Observe → Think → Act → Reflect
//!
//! AgentCore 独占任务注册表、记忆与经验集；外部只通过命令通道（AddTask / AddChain / Cancel）写入，
//! 通过 watch 通道读取每次变更后的深拷贝快照。两个 tick 不会重叠：下一次计时在上一次 tick 完全返回后才开始。
//! 任一阶段返回 Err 时在 tick 边界被捕获：状态置为 Error、发布 agent:error，循环继续。

use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, AgentState, AgentStatus};
use crate::engine::{Decision, DecisionContext, DecisionEngine, ExecutionEngine, InFlightSlot, ProactiveAction};
use crate::events::{AgentEvent, EventBus};
use crate::handlers::HandlerRegistry;
use crate::memory::{detect_failure_patterns, LearningBook, MemoryItem, MemoryStore, MemoryType};
use crate::task::{Task, TaskId, TaskRegistry};

const OBSERVATION_IMPORTANCE: f32 = 0.3;
const DECISION_IMPORTANCE: f32 = 0.6;
const INSIGHT_IMPORTANCE: f32 = 0.8;
const ANALYSIS_IMPORTANCE: f32 = 0.5;
/// chrono::Duration 的安全上限
const MAX_WINDOW_SECS: u64 = 1 << 40;

/// 从 Agent 门面发往主控循环的命令
#[derive(Debug)]
pub enum Command {
    AddTask(Task),
    /// 整条链一次性入队，读者不会看到半条链
    AddChain(Vec<Task>),
    Cancel {
        id: TaskId,
        reply: Option<oneshot::Sender<Result<(), AgentError>>>,
    },
}

pub struct AgentCore {
    config: AppConfig,
    tasks: TaskRegistry,
    memory: MemoryStore,
    learnings: LearningBook,
    status: AgentStatus,
    current_task: Option<Task>,
    last_activity: DateTime<Utc>,
    last_cycle_at: Option<DateTime<Utc>>,
    cycle_count: u64,
    /// 已发布过 task:ready 的任务
    announced: HashSet<TaskId>,
    /// 终态转换计数；与 reflected_seq 不同时才需要反思
    terminal_seq: u64,
    reflected_seq: u64,
    /// 上次记忆分析时 MemoryStore::appended 的值
    analyzed_at: u64,
    decision: DecisionEngine,
    executor: ExecutionEngine,
    events: EventBus,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<AgentState>,
}

impl AgentCore {
    /// 由快照构建核心，返回命令发送端与状态接收端
    pub fn new(
        config: AppConfig,
        handlers: HandlerRegistry,
        events: EventBus,
        in_flight: InFlightSlot,
        state: AgentState,
    ) -> (
        Self,
        mpsc::UnboundedSender<Command>,
        watch::Receiver<AgentState>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (state_tx, state_rx) = watch::channel(state.clone());

        let core = Self {
            decision: DecisionEngine::from_config(&config),
            executor: ExecutionEngine::new(handlers, events.clone(), in_flight),
            config,
            tasks: TaskRegistry::restore(state.task_queue, state.completed_tasks),
            memory: state.memory,
            learnings: state.learnings,
            status: AgentStatus::Idle,
            current_task: None,
            last_activity: state.last_activity,
            last_cycle_at: state.last_cycle_at,
            cycle_count: state.cycle_count,
            announced: HashSet::new(),
            terminal_seq: 0,
            reflected_seq: 0,
            analyzed_at: 0,
            events,
            commands: cmd_rx,
            state_tx,
        };
        core.publish_snapshot();
        (core, cmd_tx, state_rx)
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// 启动时刷新活动时间，空闲计时从此刻开始
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.publish_snapshot();
    }

    pub fn snapshot(&self) -> AgentState {
        AgentState {
            status: self.status,
            current_task: self.current_task.clone(),
            task_queue: self.tasks.queue().to_vec(),
            completed_tasks: self.tasks.completed().to_vec(),
            memory: self.memory.clone(),
            learnings: self.learnings.clone(),
            last_activity: self.last_activity,
            last_cycle_at: self.last_cycle_at,
            cycle_count: self.cycle_count,
        }
    }

    pub fn publish_snapshot(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    /// 应用一条命令；task:added / chain:created 在入队时由这里发布，先于任何 task:ready
    pub fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::AddTask(task) => {
                tracing::debug!(task_id = %task.id, task_type = %task.task_type, "task queued");
                self.tasks.insert(task.clone());
                self.events.publish(AgentEvent::TaskAdded { task });
            }
            Command::AddChain(tasks) => {
                tracing::debug!(len = tasks.len(), "chain queued");
                let task_ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
                for task in &tasks {
                    self.tasks.insert(task.clone());
                }
                for task in tasks {
                    self.events.publish(AgentEvent::TaskAdded { task });
                }
                self.events.publish(AgentEvent::ChainCreated { task_ids });
            }
            Command::Cancel { id, reply } => {
                let result = self.cancel(&id);
                if let Err(e) = &result {
                    tracing::debug!(task_id = %id, error = %e, "cancel rejected");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// 取消尚未开始的任务（正在执行的任务经 InFlightSlot 取消）
    pub fn cancel(&mut self, id: &str) -> Result<(), AgentError> {
        let transition = self.tasks.cancel_pending(id, "cancelled before start")?;
        self.terminal_seq += 1;
        self.announced.remove(id);
        self.executor.settle(&mut self.memory, &transition);
        tracing::info!(task_id = %id, "task cancelled");
        Ok(())
    }

    pub fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply(cmd);
        }
    }

    /// 后台运行直到 shutdown 被取消，返回自身以便门面在停止后继续持有状态
    pub async fn run(mut self, shutdown: CancellationToken) -> Self {
        let interval = self.config.agent.cycle_interval();
        let mut next_tick = Instant::now();
        tracing::info!(
            agent = %self.config.agent.name,
            interval_ms = interval.as_millis() as u64,
            "cycle loop running"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(cmd) = self.commands.recv() => {
                    self.apply(cmd);
                    self.publish_snapshot();
                }
                _ = tokio::time::sleep_until(next_tick) => {
                    self.tick().await;
                    next_tick = Instant::now() + interval;
                }
            }
        }

        tracing::info!(cycles = self.cycle_count, "cycle loop exited");
        self
    }

    /// 执行一个完整周期；错误不会逃出本函数
    pub async fn tick(&mut self) {
        self.cycle_count += 1;
        let now = Utc::now();
        self.last_cycle_at = Some(now);
        self.status = AgentStatus::Thinking;
        self.drain_commands();

        if let Err(e) = self.run_phases(now).await {
            self.record_cycle_error(e);
        }
        self.publish_snapshot();
    }

    async fn run_phases(&mut self, now: DateTime<Utc>) -> Result<(), AgentError> {
        self.observe();
        match self.think(now) {
            Some(decision) => {
                self.act(decision, now).await?;
                self.status = AgentStatus::Idle;
            }
            None => self.status = AgentStatus::Waiting,
        }
        if self.config.agent.learning_enabled {
            self.reflect();
        }
        Ok(())
    }

    fn record_cycle_error(&mut self, e: AgentError) {
        tracing::error!(cycle = self.cycle_count, error = %e, "cycle failed");
        self.status = AgentStatus::Error;
        self.current_task = None;
        self.events.publish(AgentEvent::AgentError {
            cycle: self.cycle_count,
            message: e.to_string(),
        });
    }

    fn observe(&mut self) {
        let ready: Vec<Task> = self.tasks.ready_tasks().into_iter().cloned().collect();
        for task in &ready {
            if self.announced.insert(task.id.clone()) {
                self.events.publish(AgentEvent::TaskReady { task: task.clone() });
            }
        }
        // 已离开队列的任务不再需要去重记录
        let tasks = &self.tasks;
        self.announced.retain(|id| tasks.queue().iter().any(|t| &t.id == id));

        let summary = format!(
            "Cycle {}: {} queued, {} ready, {} finished",
            self.cycle_count,
            self.tasks.queue().len(),
            ready.len(),
            self.tasks.completed().len()
        );
        tracing::debug!("{}", summary);
        self.memory.append(
            MemoryItem::new(MemoryType::Observation, summary, OBSERVATION_IMPORTANCE).with_tag("observe"),
        );
    }

    fn think(&self, now: DateTime<Utc>) -> Option<Decision> {
        let ready = self.tasks.ready_tasks();
        let ctx = DecisionContext {
            now,
            last_activity: self.last_activity,
            stale_completed: self.tasks.stale_count(self.retention_cutoff(now)),
            memory_unanalyzed: self.memory.needs_analysis(self.analyzed_at),
        };
        self.decision.decide(&ready, &ctx)
    }

    async fn act(&mut self, decision: Decision, now: DateTime<Utc>) -> Result<(), AgentError> {
        self.status = AgentStatus::Executing;
        self.memory.append(
            MemoryItem::new(MemoryType::Decision, decision.describe(), DECISION_IMPORTANCE)
                .with_tag("decision"),
        );

        match &decision {
            Decision::RunTask { task_id, .. } => {
                let task = self.executor.start(&mut self.tasks, task_id)?;
                self.current_task = Some(task.clone());
                self.publish_snapshot();

                let result = self.executor.run(&mut self.tasks, &mut self.memory, task).await;
                self.current_task = None;
                let transition = result?;
                self.terminal_seq += 1;
                self.announced.remove(&transition.task.id);
            }
            Decision::Proactive { action, .. } => self.run_proactive(*action, now),
        }

        self.last_activity = Utc::now();
        self.events.publish(AgentEvent::AgentActed {
            cycle: self.cycle_count,
            decision,
        });
        Ok(())
    }

    fn run_proactive(&mut self, action: ProactiveAction, now: DateTime<Utc>) {
        tracing::info!(action = action.as_str(), "proactive action");
        match action {
            ProactiveAction::SystemCheck => {
                self.events.publish(AgentEvent::ProactiveSystemCheck {
                    status: self.status,
                    pending: self.tasks.queue().len(),
                    completed: self.tasks.completed().len(),
                    short_term_memory: self.memory.short_term().len(),
                    long_term_memory: self.memory.long_term().len(),
                    learnings: self.learnings.len(),
                });
            }
            ProactiveAction::MemoryAnalysis => {
                let breakdown = self
                    .memory
                    .counts_by_type()
                    .into_iter()
                    .map(|(t, n)| format!("{t:?}={n}").to_lowercase())
                    .collect::<Vec<_>>()
                    .join(", ");
                let content = format!(
                    "Memory analysis: {} short-term, {} long-term ({})",
                    self.memory.short_term().len(),
                    self.memory.long_term().len(),
                    breakdown
                );
                self.memory.append(
                    MemoryItem::new(MemoryType::Insight, content, ANALYSIS_IMPORTANCE)
                        .with_tag("memory_analysis"),
                );
                self.analyzed_at = self.memory.appended();
            }
            ProactiveAction::StateOptimization => {
                let pruned = self.tasks.prune_completed(self.retention_cutoff(now));
                tracing::info!(pruned, "completed tasks pruned");
                self.memory.append(
                    MemoryItem::new(
                        MemoryType::Observation,
                        format!("State optimization pruned {pruned} completed tasks"),
                        OBSERVATION_IMPORTANCE,
                    )
                    .with_tag("state_optimization"),
                );
            }
        }
    }

    fn reflect(&mut self) {
        if self.terminal_seq == self.reflected_seq {
            return;
        }
        self.reflected_seq = self.terminal_seq;

        let recent = self.tasks.recent_outcomes(self.config.reflection.window);
        let examined = recent.len();
        let patterns = detect_failure_patterns(&recent, self.config.reflection.failure_threshold);

        let mut new_learnings = 0;
        for pattern in &patterns {
            let Some(learning) = self.learnings.record(pattern) else {
                continue;
            };
            tracing::info!(pattern = %learning.pattern, confidence = learning.confidence, "learning added");
            self.memory.append(
                MemoryItem::new(MemoryType::Insight, learning.insight.clone(), INSIGHT_IMPORTANCE)
                    .with_tag("learning")
                    .with_tag(pattern.task_type.as_str()),
            );
            self.events.publish(AgentEvent::LearningAdded { learning });
            new_learnings += 1;
        }

        self.events.publish(AgentEvent::AgentReflected {
            cycle: self.cycle_count,
            examined,
            new_learnings,
        });
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.config.maintenance.completed_retention_secs.min(MAX_WINDOW_SECS) as i64;
        now - ChronoDuration::seconds(secs)
    }
}
