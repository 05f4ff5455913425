//! 会话监管：规划循环的中断管理
//!
//! 每个运行中的规划循环持有一个 CancellationToken；用户点击 Stop 时取消当前循环。
//! 循环内的工具经 ToolEnv 共享同一个 token，并发的 Search 任务在循环放弃等待时一并取消。

use tokio_util::sync::CancellationToken;

/// 单个规划循环的生命周期管理
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（用户 Stop）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_handed_out_tokens() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.cancel_token();
        assert!(!token.is_cancelled());
        supervisor.cancel();
        assert!(supervisor.is_cancelled());
        assert!(token.is_cancelled());
    }
}
