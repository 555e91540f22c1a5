//! 主控循环集成测试：通过 Agent 门面驱动完整的 Observe/Think/Act/Reflect 周期

use std::time::Duration;

use autopilot::{
    Agent, AgentError, AgentEvent, AgentState, AgentStatus, AppConfig, Payload, Task,
    TaskPriority, TaskSpec, TaskStatus, TaskType,
};
use serde_json::json;
use tokio::sync::broadcast;

fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.agent.cycle_interval_ms = 10;
    cfg
}

fn drain(rx: &mut broadcast::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn names(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

async fn wait_for(agent: &Agent, pred: impl Fn(&AgentState) -> bool) -> AgentState {
    let mut rx = agent.watch_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if pred(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("timed out waiting for state")
}

fn register_failing(agent: &Agent, task_type: &str) {
    agent.register_fn(task_type, |_task: Task| async move {
        Err::<Payload, _>("handler exploded".to_string())
    });
}

#[tokio::test]
async fn single_task_without_dependencies_runs_on_first_tick() {
    let mut agent = Agent::new(AppConfig::default());
    let mut rx = agent.subscribe();
    let id = agent
        .add_task(TaskSpec::new(TaskType::Monitoring, "health check").with_input("target", json!("db")))
        .unwrap();

    agent.tick().await.unwrap();

    let state = agent.get_state();
    assert!(state.task_queue.is_empty());
    assert_eq!(state.completed_tasks.len(), 1);
    let task = &state.completed_tasks[0];
    assert_eq!(task.id, id);
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.started_at.is_some() && task.completed_at.is_some());
    let output = task.output.as_ref().unwrap();
    assert_eq!(output.get("target"), Some(&json!("db")));
    assert_eq!(output.get("status"), Some(&json!("healthy")));
    assert_eq!(state.status, AgentStatus::Idle);

    let seen = names(&drain(&mut rx));
    assert_eq!(
        seen,
        vec![
            "task:added",
            "task:ready",
            "task:started",
            "task:completed",
            "agent:acted",
            "agent:reflected",
        ]
    );
}

#[tokio::test]
async fn tasks_run_in_priority_order_one_per_tick() {
    let mut agent = Agent::new(AppConfig::default());
    for (desc, priority) in [
        ("low", TaskPriority::Low),
        ("critical", TaskPriority::Critical),
        ("medium", TaskPriority::Medium),
        ("high", TaskPriority::High),
    ] {
        agent
            .add_task(TaskSpec::new(TaskType::Monitoring, desc).with_priority(priority))
            .unwrap();
    }

    agent.tick().await.unwrap();
    assert_eq!(agent.get_state().completed_tasks.len(), 1);

    for _ in 0..3 {
        agent.tick().await.unwrap();
    }
    let order: Vec<String> = agent
        .get_state()
        .completed_tasks
        .iter()
        .map(|t| t.description.clone())
        .collect();
    assert_eq!(order, vec!["critical", "high", "medium", "low"]);
}

#[tokio::test]
async fn equal_priority_keeps_queue_order() {
    let mut agent = Agent::new(AppConfig::default());
    let first = agent.add_task(TaskSpec::new(TaskType::Monitoring, "first")).unwrap();
    let second = agent.add_task(TaskSpec::new(TaskType::Monitoring, "second")).unwrap();
    agent.tick().await.unwrap();
    agent.tick().await.unwrap();
    let ids: Vec<String> = agent
        .get_state()
        .completed_tasks
        .iter()
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(ids, vec![first, second]);
}

#[tokio::test]
async fn cycle_count_matches_number_of_ticks() {
    let mut agent = Agent::new(AppConfig::default());
    for _ in 0..5 {
        agent.tick().await.unwrap();
    }
    let state = agent.get_state();
    assert_eq!(state.cycle_count, 5);
    assert_eq!(state.status, AgentStatus::Waiting);
}

#[tokio::test]
async fn chain_runs_in_order_and_records_triggers() {
    let mut agent = Agent::new(AppConfig::default());
    let mut rx = agent.subscribe();
    let ids = agent
        .create_task_chain(vec![
            TaskSpec::new(TaskType::Decision, "pick").with_input("options", json!(["a", "b"])),
            TaskSpec::new(TaskType::Monitoring, "check"),
            TaskSpec::new(TaskType::Learning, "note"),
        ])
        .unwrap();

    let state = agent.get_state();
    assert_eq!(state.task_queue.len(), 3);
    assert!(state.task_queue[0].depends_on.is_empty());
    assert_eq!(state.task_queue[1].depends_on, vec![ids[0].clone()]);
    assert_eq!(state.task_queue[2].depends_on, vec![ids[1].clone()]);

    for _ in 0..3 {
        agent.tick().await.unwrap();
    }

    let state = agent.get_state();
    let done: Vec<&str> = state.completed_tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(done, ids.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(state
        .completed_tasks
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
    assert_eq!(state.completed_tasks[1].triggered_by.as_deref(), Some(ids[0].as_str()));
    assert_eq!(state.completed_tasks[2].triggered_by.as_deref(), Some(ids[1].as_str()));
    assert_eq!(
        state.completed_tasks[0]
            .output
            .as_ref()
            .and_then(|o| o.get("decision")),
        Some(&json!("a"))
    );

    let events = drain(&mut rx);
    let seen = names(&events);
    assert_eq!(seen.iter().filter(|n| **n == "chain:created").count(), 1);
    assert_eq!(seen.iter().filter(|n| **n == "task:triggered").count(), 2);
}

#[tokio::test]
async fn failed_dependency_leaves_dependent_pending() {
    let mut agent = Agent::new(AppConfig::default());
    register_failing(&agent, "web_search");
    let ids = agent
        .create_task_chain(vec![
            TaskSpec::new(TaskType::WebSearch, "search"),
            TaskSpec::new(TaskType::Monitoring, "after search"),
        ])
        .unwrap();

    for _ in 0..20 {
        agent.tick().await.unwrap();
    }

    let state = agent.get_state();
    assert_eq!(state.completed_tasks.len(), 1);
    let failed = state.find_task(&ids[0]).unwrap();
    assert_eq!(failed.id, ids[0]);
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("handler exploded"));
    assert!(failed.output.is_none());

    assert_eq!(state.task_queue.len(), 1);
    assert_eq!(state.task_queue[0].id, ids[1]);
    assert_eq!(state.find_task(&ids[1]).unwrap().status, TaskStatus::Pending);
    assert_eq!(state.status, AgentStatus::Waiting);
}

#[tokio::test]
async fn missing_handler_fails_task_but_not_the_loop() {
    let mut agent = Agent::new(AppConfig::default());
    agent.add_task(TaskSpec::new("translate", "bonjour")).unwrap();
    agent.tick().await.unwrap();
    agent.tick().await.unwrap();

    let state = agent.get_state();
    assert_eq!(state.cycle_count, 2);
    let task = &state.completed_tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("translate"));
}

#[tokio::test]
async fn delegating_stubs_return_marker() {
    let mut agent = Agent::new(AppConfig::default());
    agent
        .add_task(TaskSpec::new(TaskType::FileAnalysis, "inspect report.pdf"))
        .unwrap();
    agent.tick().await.unwrap();
    let state = agent.get_state();
    let task = &state.completed_tasks[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        task.output.as_ref().and_then(|o| o.get("delegated")),
        Some(&json!(true))
    );
}

#[tokio::test]
async fn outcomes_land_in_memory_with_promotion() {
    let mut agent = Agent::new(AppConfig::default());
    register_failing(&agent, "flaky");
    agent.add_task(TaskSpec::new(TaskType::Monitoring, "ok")).unwrap();
    agent.add_task(TaskSpec::new("flaky", "bad")).unwrap();
    agent.tick().await.unwrap();
    agent.tick().await.unwrap();

    let state = agent.get_state();
    let long_term = state.memory.long_term();
    // result 0.8 与 error 0.9 进入长期记忆；observation 0.3 与 decision 0.6 不会
    assert_eq!(long_term.len(), 2);
    assert!(long_term.iter().all(|m| m.importance > 0.7));
    assert_eq!(state.memory.short_term().len(), 6);
}

#[tokio::test]
async fn repeated_failures_produce_one_learning() {
    let mut agent = Agent::new(AppConfig::default());
    let mut rx = agent.subscribe();
    register_failing(&agent, "flaky");
    for i in 0..3 {
        agent
            .add_task(TaskSpec::new("flaky", format!("attempt {i}")))
            .unwrap();
    }

    agent.tick().await.unwrap();
    agent.tick().await.unwrap();
    assert!(agent.get_state().learnings.is_empty());

    agent.tick().await.unwrap();
    let state = agent.get_state();
    assert_eq!(state.learnings.len(), 1);
    let learning = &state.learnings.entries()[0];
    assert_eq!(learning.pattern, "repeated_failure:flaky");
    assert_eq!(learning.applications, 0);
    assert!(learning.insight.contains("flaky"));

    // 再失败一次：不新增，只累加 applications
    agent.add_task(TaskSpec::new("flaky", "attempt 3")).unwrap();
    agent.tick().await.unwrap();
    let state = agent.get_state();
    assert_eq!(state.learnings.len(), 1);
    assert_eq!(state.learnings.entries()[0].applications, 1);

    let added = drain(&mut rx)
        .iter()
        .filter(|e| e.name() == "learning:added")
        .count();
    assert_eq!(added, 1);
}

#[tokio::test]
async fn learning_disabled_skips_reflection() {
    let mut cfg = AppConfig::default();
    cfg.agent.learning_enabled = false;
    let mut agent = Agent::new(cfg);
    let mut rx = agent.subscribe();
    register_failing(&agent, "flaky");
    for _ in 0..3 {
        agent.add_task(TaskSpec::new("flaky", "x")).unwrap();
    }
    for _ in 0..3 {
        agent.tick().await.unwrap();
    }
    assert!(agent.get_state().learnings.is_empty());
    assert!(!names(&drain(&mut rx)).contains(&"agent:reflected"));
}

#[tokio::test]
async fn idle_agent_runs_proactive_system_check() {
    let mut cfg = AppConfig::default();
    cfg.agent.proactive_mode = true;
    cfg.agent.idle_threshold_secs = 0;
    let mut agent = Agent::new(cfg);
    let mut rx = agent.subscribe();

    tokio::time::sleep(Duration::from_millis(20)).await;
    agent.tick().await.unwrap();

    let events = drain(&mut rx);
    let acted = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::AgentActed { decision, .. } => Some(decision.clone()),
            _ => None,
        })
        .expect("proactive decision");
    let json = serde_json::to_value(&acted).unwrap();
    assert_eq!(json["kind"], "proactive");
    assert_eq!(json["action"], "system_check");
    assert_eq!(json["alternatives"], json!([]));
    assert_eq!(json["risks"], json!([]));
    assert!(names(&events).contains(&"proactive:system_check"));
    assert_eq!(agent.get_state().status, AgentStatus::Idle);
}

#[tokio::test]
async fn proactive_mode_off_means_waiting() {
    let mut cfg = AppConfig::default();
    cfg.agent.idle_threshold_secs = 0;
    let mut agent = Agent::new(cfg);
    let mut rx = agent.subscribe();
    tokio::time::sleep(Duration::from_millis(20)).await;
    agent.tick().await.unwrap();
    assert!(!names(&drain(&mut rx)).contains(&"agent:acted"));
    assert_eq!(agent.get_state().status, AgentStatus::Waiting);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let mut agent = Agent::new(fast_config());
    let mut rx = agent.subscribe();

    agent.start();
    agent.start();
    assert!(agent.is_running());
    wait_for(&agent, |s| s.cycle_count >= 2).await;

    agent.stop().await;
    agent.stop().await;
    assert!(!agent.is_running());

    let seen = names(&drain(&mut rx));
    assert_eq!(seen.iter().filter(|n| **n == "agent:started").count(), 1);
    assert_eq!(seen.iter().filter(|n| **n == "agent:stopped").count(), 1);

    // 停止后不再有新的周期
    let cycles = agent.get_state().cycle_count;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(agent.get_state().cycle_count, cycles);
}

#[tokio::test]
async fn running_loop_picks_up_new_tasks() {
    let mut agent = Agent::new(fast_config());
    agent.start();

    let ids = agent
        .create_task_chain(vec![
            TaskSpec::new(TaskType::Monitoring, "one"),
            TaskSpec::new(TaskType::Monitoring, "two"),
        ])
        .unwrap();
    let last = ids[1].clone();
    let state = wait_for(&agent, |s| {
        s.completed_tasks.iter().any(|t| t.id == last)
    })
    .await;
    assert!(state.task_queue.is_empty());
    assert!(state.cycle_count >= 2);

    agent.stop().await;
}

#[tokio::test]
async fn pending_task_can_be_cancelled() {
    let mut agent = Agent::new(AppConfig::default());
    let mut rx = agent.subscribe();
    let ids = agent
        .create_task_chain(vec![
            TaskSpec::new(TaskType::Monitoring, "first"),
            TaskSpec::new(TaskType::Monitoring, "second"),
        ])
        .unwrap();

    agent.cancel_task(&ids[0]).await.unwrap();
    agent.tick().await.unwrap();

    let state = agent.get_state();
    assert_eq!(state.completed_tasks.len(), 1);
    assert_eq!(state.completed_tasks[0].status, TaskStatus::Cancelled);
    assert_eq!(state.task_queue[0].id, ids[1]);
    assert_eq!(state.task_queue[0].status, TaskStatus::Pending);
    assert!(names(&drain(&mut rx)).contains(&"task:cancelled"));

    assert!(matches!(
        agent.cancel_task(&ids[0]).await,
        Err(AgentError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn in_flight_task_can_be_cancelled() {
    let mut agent = Agent::new(fast_config());
    agent.register_fn(TaskType::CodeExecution, |_task: Task| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, String>(Payload::new())
    });
    agent.start();
    let id = agent
        .add_task(TaskSpec::new(TaskType::CodeExecution, "hang"))
        .unwrap();

    let running = id.clone();
    wait_for(&agent, |s| {
        s.current_task.as_ref().map(|t| t.id == running).unwrap_or(false)
    })
    .await;
    assert_eq!(agent.get_state().status, AgentStatus::Executing);

    agent.cancel_task(&id).await.unwrap();
    let state = wait_for(&agent, |s| s.completed_tasks.iter().any(|t| t.id == running)).await;
    assert_eq!(state.completed_tasks[0].status, TaskStatus::Cancelled);

    agent.stop().await;
    assert!(agent.get_state().current_task.is_none());
}

#[tokio::test]
async fn snapshot_round_trips_through_json() {
    let mut agent = Agent::new(AppConfig::default());
    agent.add_task(TaskSpec::new(TaskType::Monitoring, "done")).unwrap();
    agent.tick().await.unwrap();
    let waiting = agent
        .add_task(TaskSpec::new(TaskType::Monitoring, "later"))
        .unwrap();

    let json = serde_json::to_string(&agent.get_state()).unwrap();
    let mut restored: AgentState = serde_json::from_str(&json).unwrap();
    // 模拟在执行中途保存的快照
    restored.task_queue[0].status = TaskStatus::Running;

    let mut revived = Agent::from_snapshot(AppConfig::default(), restored);
    let state = revived.get_state();
    assert_eq!(state.cycle_count, 1);
    assert_eq!(state.completed_tasks.len(), 1);
    assert_eq!(state.task_queue[0].id, waiting);
    assert_eq!(state.task_queue[0].status, TaskStatus::Pending);
    assert_eq!(
        state.memory.short_term().len(),
        agent.get_state().memory.short_term().len()
    );

    revived.tick().await.unwrap();
    let state = revived.get_state();
    assert_eq!(state.cycle_count, 2);
    assert_eq!(state.completed_tasks.len(), 2);
}
