//! 记忆层：规划循环的对话记录

pub mod conversation;

pub use conversation::{Message, Role, ToolExecutionRequest, Transcript};
