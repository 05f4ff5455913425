//! 规划过程事件：用于 UI / headless runner 展示阶段变化、工具调用、结果与通知

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::LoopPhase;
use crate::llm::TokenUsage;
use crate::tools::ToolStatus;

/// 单个过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 规划循环阶段变化
    PhaseChanged { phase: LoopPhase },
    /// 第几轮开始
    TurnStarted { turn: usize },
    /// 即将执行的工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具结果（预览，避免过长）
    ToolResult {
        tool: String,
        status: ToolStatus,
        preview: String,
    },
    /// 面向用户的错误提示；每次失败只发一次
    ToolError { message: String },
    /// 面向用户的输出（如 "# Architect complete"）
    Output { text: String },
    /// 普通通知（如 "Deep Scan cancelled."）
    Notification { text: String },
    /// ContextHistory 新增快照
    ContextPushed { context_id: String, action: String },
    /// Deep Scan 完成：按项目代码 / 测试代码分组的推荐
    DeepScanCompleted {
        reasoning: String,
        project_files: Vec<String>,
        test_files: Vec<String>,
    },
    /// Token 使用统计（本轮增量 + 累计）
    TokenUsage {
        turn: TokenUsage,
        cumulative: TokenUsage,
    },
}

/// 事件出口；未接收方时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// 创建一对 (sink, receiver)
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn notify(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Notification { text: text.into() });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "user-visible error");
        self.emit(AgentEvent::ToolError { message });
    }
}

/// 结果预览：截断到 max_chars 个字符
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
