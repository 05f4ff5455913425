//! 规划循环状态机
//!
//! Running -> AwaitingModel -> (Running | Terminated-*)；终止态携带结束原因，供 UI 投影与调用方判断。

use serde::Serialize;

/// 规划循环所处阶段（通过 AgentEvent::PhaseChanged 推送给 UI）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LoopPhase {
    /// 正常轮次：构建 prompt、分发工具
    Running,
    /// 挂起在模型调用上
    AwaitingModel,
    Terminated { kind: TerminationKind },
}

/// 终止类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationKind {
    Finished,
    Aborted,
    Error,
    Cancelled,
}

/// 循环终止结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// projectFinished：记录最终答复
    Finished { explanation: String },
    /// abortProject（或超出 max_turns）：记录中止原因
    Aborted { reason: String },
    /// 模型/传输错误、空响应或工具缺陷
    Error { message: String },
    /// 用户取消
    Cancelled,
}

impl Termination {
    pub fn kind(&self) -> TerminationKind {
        match self {
            Termination::Finished { .. } => TerminationKind::Finished,
            Termination::Aborted { .. } => TerminationKind::Aborted,
            Termination::Error { .. } => TerminationKind::Error,
            Termination::Cancelled => TerminationKind::Cancelled,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        LoopPhase::Terminated { kind: self.kind() }
    }
}
