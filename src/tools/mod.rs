//! 工具层：注册表、分发器与内置工具（规划、工作区、委派）

pub mod delegation;
pub mod executor;
pub mod planning;
pub mod registry;
pub mod workspace;

pub use executor::{dedup_requests, DispatchOutcome, Dispatcher};
pub use registry::{
    ToolCategory, ToolEnv, ToolExecutionResult, ToolHandler, ToolName, ToolOutput, ToolRegistry,
    ToolStatus,
};
