//! Architect - 编码智能体的编排核心
//!
//! 模块划分：
//! - **agent**: Architect 门面（按配置组装组件，目标执行、撤销 / 重做、Deep Scan）
//! - **agents**: 子 Agent 契约（Search / Code / Context / Validation）、模型驱动实现与 Deep Scan
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 工作区片段、不可变 Context 快照、线性可撤销历史与文件恢复
//! - **core**: 错误、循环状态、会话监管、三通道任务调度
//! - **llm**: LLM 客户端抽象与脚本化实现
//! - **memory**: 规划循环的对话记录
//! - **project**: 项目文件路径与沙箱文件系统
//! - **react**: 规划循环、每轮 prompt 构建与过程事件
//! - **tools**: 工具注册表、分发器与内置工具

pub mod agent;
pub mod agents;
pub mod config;
pub mod context;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod project;
pub mod react;
pub mod tools;

pub use agent::Architect;
pub use config::{load_config, AppConfig};
pub use core::{AgentError, Termination};
