//! 核心编排层：错误、状态快照、主控循环、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;

pub use error::AgentError;
pub use orchestrator::{AgentCore, Command};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{AgentState, AgentStatus};
