//! Agent 错误类型
//!
//! 区分三类失败：模型调用失败（终止规划循环）、用户取消（终止但不弹错误）、
//! 工具缺陷（工具未自行捕获的错误，Dispatcher 原样上抛）。工具内部可恢复的失败不走这里，
//! 而是编码为 ToolExecutionResult 文本。

use thiserror::Error;

use crate::context::ContextId;
use crate::llm::LlmError;

/// 编排核心内所有可上抛的错误
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// 用户取消（或外层任务被中断）；调用方据此抑制错误 UI
    #[error("Cancelled")]
    Cancelled,

    #[error("LLM error: {0}")]
    Llm(LlmError),

    /// 模型返回了没有任何可执行内容的响应
    #[error("Empty LLM response")]
    EmptyResponse,

    /// 工具实现让错误逃逸（缺陷），规划循环以 Error 终止
    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Context {0} not found in history")]
    ContextNotFound(ContextId),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Task {task} panicked: {message}")]
    TaskPanicked { task: String, message: String },

    #[error("Scheduler is shut down")]
    SchedulerClosed,
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => AgentError::Cancelled,
            other => AgentError::Llm(other),
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(e.to_string())
    }
}
