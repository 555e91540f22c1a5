//! 优雅关闭
//!
//! 统一监听 Ctrl+C / SIGTERM，触发后取消共享的 CancellationToken；
//! 宿主等待该信号后调用 `Agent::stop`，让正在执行的 tick 跑完再退出。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 宿主在运行指定时长后主动退出
    Deadline,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 触发关闭；重复调用只有第一次的原因会被记录到日志
    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!(reason = ?reason, "shutdown requested");
        }
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 到期后自动触发关闭（演示程序 `--run-for` 用）
    pub fn shutdown_after(self: &Arc<Self>, after: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => manager.shutdown(ShutdownReason::Deadline),
                _ = manager.wait_for_shutdown() => {}
            }
        });
    }

    /// 安装系统信号处理器（Ctrl+C，unix 下另有 SIGTERM）
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, stopping agent...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, stopping agent...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
