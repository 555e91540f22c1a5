//! 决策与执行：Think 阶段选出要做的事，Act 阶段把任务交给处理器

pub mod decision;
pub mod executor;

pub use decision::{Decision, DecisionContext, DecisionEngine, ProactiveAction};
pub use executor::{ExecutionEngine, InFlightSlot};
