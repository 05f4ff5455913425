//! 核心层：错误类型、循环状态、会话监管、三通道任务调度

pub mod error;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use error::AgentError;
pub use session_supervisor::SessionSupervisor;
pub use state::{LoopPhase, Termination, TerminationKind};
pub use task_scheduler::{join_both, Lane, TaskHandle, TaskScheduler};
