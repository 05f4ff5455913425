//! 子 Agent 契约
//!
//! 每个子 Agent 只有一种能力："给定自然语言指令与当前 Context，产出片段或片段列表"。
//! - SearchAgent：只读调查，返回结果与参考过的文件；不直接修改 ContextHistory
//! - CodeAgent：可修改磁盘文件，报告结构化停止原因与 FileEdit，由调用方 push 新 Context
//! - ContextAgent：推荐相关片段（无副作用）
//! - ValidationAgent：给出与目标相关的测试文件（无副作用）

pub mod deep_scan;
pub mod model_backed;
pub mod validation;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::{Context, FileEdit, Fragment};
use crate::core::AgentError;
use crate::project::{ProjectFile, ProjectFiles};

pub use deep_scan::{apply_recommendations, merge, DeepScan, DeepScanResult};
pub use model_backed::{ModelCodeAgent, ModelContextAgent, ModelSearchAgent};
pub use validation::TestFileValidationAgent;

/// Search Agent 结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub text: String,
    /// 参考过的文件 / 符号
    pub sources: Vec<String>,
}

/// Code Agent 停止原因
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Success,
    /// 没有需要修改的内容
    NoOp,
    /// 多次尝试仍无法产出有效编辑
    ToolLoopExhausted,
    /// 被用户中断
    Interrupted,
    LlmError(String),
    Error(String),
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Success => "success",
            StopReason::NoOp => "no_op",
            StopReason::ToolLoopExhausted => "tool_loop_exhausted",
            StopReason::Interrupted => "interrupted",
            StopReason::LlmError(_) => "llm_error",
            StopReason::Error(_) => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::Success)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::LlmError(detail) | StopReason::Error(detail) => {
                write!(f, "{}: {}", self.as_str(), detail)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Code Agent 结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeOutcome {
    pub stop: StopReason,
    pub summary: String,
    /// 实际写入磁盘的修改（按写入顺序）
    pub edits: Vec<FileEdit>,
}

impl CodeOutcome {
    pub fn stopped(stop: StopReason, summary: impl Into<String>) -> Self {
        Self {
            stop,
            summary: summary.into(),
            edits: Vec::new(),
        }
    }
}

/// Context 推荐结果：理由 + 片段
#[derive(Clone, Debug, Default)]
pub struct RecommendationResult {
    pub reasoning: String,
    pub fragments: Vec<Fragment>,
}

#[async_trait]
pub trait SearchAgent: Send + Sync {
    async fn search(&self, query: &str, context: &Context) -> Result<SearchOutcome, AgentError>;
}

#[async_trait]
pub trait CodeAgent: Send + Sync {
    /// 内部错误编码为 StopReason，不返回 Err
    async fn run(
        &self,
        instructions: &str,
        context: &Context,
        project: Arc<dyn ProjectFiles>,
    ) -> CodeOutcome;
}

#[async_trait]
pub trait ContextAgent: Send + Sync {
    async fn recommend(&self, goal: &str, context: &Context)
        -> Result<RecommendationResult, AgentError>;
}

#[async_trait]
pub trait ValidationAgent: Send + Sync {
    async fn relevant_tests(
        &self,
        goal: &str,
        context: &Context,
    ) -> Result<Vec<ProjectFile>, AgentError>;
}

/// 子 Agent 集合；未配置的 Agent 对应的工具不会提供给模型
#[derive(Clone, Default)]
pub struct SubAgents {
    pub search: Option<Arc<dyn SearchAgent>>,
    pub code: Option<Arc<dyn CodeAgent>>,
    pub context: Option<Arc<dyn ContextAgent>>,
    pub validation: Option<Arc<dyn ValidationAgent>>,
}

impl fmt::Debug for SubAgents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubAgents")
            .field("search", &self.search.is_some())
            .field("code", &self.code.is_some())
            .field("context", &self.context.is_some())
            .field("validation", &self.validation.is_some())
            .finish()
    }
}
