//! 规划层：每轮 prompt 构建、Architect 规划循环、过程事件

pub mod events;
pub mod loop_;
pub mod prompt;
pub mod related;

pub use events::{AgentEvent, EventSink};
pub use loop_::{LoopOptions, LoopReport, LoopState, PlanningLoop};
pub use prompt::{build_messages, goal_message, CodeIntelligence, PromptInput, NO_PLAN_PLACEHOLDER};
pub use related::MentionIndex;
