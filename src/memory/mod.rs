//! 记忆层：短期 / 长期两级追加日志 + 反思得到的 Learning

pub mod learnings;
pub mod store;

pub use learnings::{detect_failure_patterns, FailurePattern, Learning, LearningBook};
pub use store::{MemoryItem, MemoryStore, MemoryType};
