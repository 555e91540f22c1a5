//! Autopilot 演示程序
//!
//! 初始化日志、加载配置、注册一个 code_execution 处理器，投递一个监控任务和一条三步任务链，
//! 以 JSON 行打印生命周期事件，直到 Ctrl+C / SIGTERM（或 `--run-for <秒>` 到期）后停止。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use autopilot::core::ShutdownManager;
use autopilot::{load_config, Agent, AppConfig, Payload, Task, TaskPriority, TaskSpec, TaskType};
use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

/// Autopilot 演示：运行编排循环并以 JSON 行打印生命周期事件
#[derive(Parser)]
#[command(name = "autopilot", about = "Autonomous task orchestration loop demo")]
struct Args {
    /// 配置文件路径（默认 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,
    /// 运行指定秒数后自动停止
    #[arg(long)]
    run_for: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    autopilot::observability::init();
    let args = Args::parse();

    let cfg = load_config(args.config).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut agent = Agent::new(cfg);

    // 宿主覆盖委托占位：这里只是统计代码行数
    agent.register_fn(TaskType::CodeExecution, |task: Task| async move {
        let code = task
            .input
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "input.code is required".to_string())?;
        let mut out = Payload::new();
        out.insert("lines".into(), json!(code.lines().count()));
        out.insert("exit_code".into(), json!(0));
        Ok::<_, String>(out)
    });

    let mut events = agent.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "event not serializable"),
                },
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    agent
        .add_task(
            TaskSpec::new(TaskType::Monitoring, "Check agent health")
                .with_priority(TaskPriority::High)
                .with_input("target", json!("autopilot")),
        )
        .context("Failed to enqueue monitoring task")?;

    agent
        .create_task_chain(vec![
            TaskSpec::new(TaskType::Decision, "Choose a rollout strategy")
                .with_input("options", json!(["canary", "blue_green"])),
            TaskSpec::new(TaskType::CodeExecution, "Run the migration script")
                .with_input("code", json!("step one\nstep two\nstep three")),
            TaskSpec::new(TaskType::Learning, "Record rollout notes")
                .with_input("insight", json!("canary rollout finished cleanly")),
        ])
        .context("Failed to create task chain")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    if let Some(secs) = args.run_for {
        shutdown.shutdown_after(Duration::from_secs(secs));
    }

    let mut reasons = shutdown.subscribe();
    agent.start();
    shutdown.wait_for_shutdown().await;
    if let Ok(reason) = reasons.try_recv() {
        tracing::info!(?reason, "stopping agent");
    }
    agent.stop().await;

    let state = agent.get_state();
    tracing::info!(
        agent = agent.name(),
        cycles = state.cycle_count,
        completed = state.completed_tasks.len(),
        pending = state.task_queue.len(),
        learnings = state.learnings.len(),
        "final state"
    );

    drop(agent);
    printer.abort();
    Ok(())
}
