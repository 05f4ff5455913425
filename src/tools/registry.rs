//! 工具注册表
//!
//! 工具名是一个封闭枚举 ToolName：类别（决定分发顺序）与处理器都通过穷尽 match 给出，
//! 新增工具时编译器会要求同时补齐注册与排序表。每个处理器实现 ToolHandler
//! （description / parameters_schema / execute），由 ToolRegistry 在启动时显式注册。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agents::SubAgents;
use crate::context::Context;
use crate::core::{AgentError, TaskScheduler, Termination};
use crate::llm::ToolSpec;
use crate::memory::{Message, ToolExecutionRequest};
use crate::project::ProjectFiles;
use crate::react::EventSink;
use crate::tools::{delegation, planning, workspace};

/// 可被模型调用的工具
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolName {
    ProjectFinished,
    AbortProject,
    UpdatePlan,
    CallSearchAgent,
    CallCodeAgent,
    AddFilesToWorkspace,
    AddReadOnlyFilesToWorkspace,
    AddTextToWorkspace,
    DropWorkspaceFragments,
    UndoLastChanges,
}

/// 分发类别，按声明顺序执行
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolCategory {
    Terminal,
    PlanMutating,
    Generic,
    /// 只读调查类委派（Search Agent）
    Investigative,
    /// 修改代码的委派（Code Agent），最后执行
    CodeMutating,
}

impl ToolName {
    pub const ALL: [ToolName; 10] = [
        ToolName::ProjectFinished,
        ToolName::AbortProject,
        ToolName::UpdatePlan,
        ToolName::CallSearchAgent,
        ToolName::CallCodeAgent,
        ToolName::AddFilesToWorkspace,
        ToolName::AddReadOnlyFilesToWorkspace,
        ToolName::AddTextToWorkspace,
        ToolName::DropWorkspaceFragments,
        ToolName::UndoLastChanges,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ProjectFinished => "projectFinished",
            ToolName::AbortProject => "abortProject",
            ToolName::UpdatePlan => "updatePlan",
            ToolName::CallSearchAgent => "callSearchAgent",
            ToolName::CallCodeAgent => "callCodeAgent",
            ToolName::AddFilesToWorkspace => "addFilesToWorkspace",
            ToolName::AddReadOnlyFilesToWorkspace => "addReadOnlyFilesToWorkspace",
            ToolName::AddTextToWorkspace => "addTextToWorkspace",
            ToolName::DropWorkspaceFragments => "dropWorkspaceFragments",
            ToolName::UndoLastChanges => "undoLastChanges",
        }
    }

    pub fn parse(name: &str) -> Option<ToolName> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn category(self) -> ToolCategory {
        match self {
            ToolName::ProjectFinished | ToolName::AbortProject => ToolCategory::Terminal,
            ToolName::UpdatePlan => ToolCategory::PlanMutating,
            ToolName::CallSearchAgent => ToolCategory::Investigative,
            ToolName::CallCodeAgent => ToolCategory::CodeMutating,
            ToolName::AddFilesToWorkspace
            | ToolName::AddReadOnlyFilesToWorkspace
            | ToolName::AddTextToWorkspace
            | ToolName::DropWorkspaceFragments
            | ToolName::UndoLastChanges => ToolCategory::Generic,
        }
    }

    /// Generic 类内部的稳定排序权重：先删片段，再加只读，再加可编辑，其余最后
    pub fn rank(self) -> u8 {
        match self {
            ToolName::DropWorkspaceFragments => 1,
            ToolName::AddReadOnlyFilesToWorkspace => 2,
            ToolName::AddFilesToWorkspace => 3,
            _ => 4,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// 工具处理器的输出；终止类工具附带 Termination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub status: ToolStatus,
    pub termination: Option<Termination>,
    /// 本次调用留下了可撤销的半成品修改，下一轮提供 undoLastChanges
    pub offers_undo: bool,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: ToolStatus::Success,
            termination: None,
            offers_undo: false,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: ToolStatus::Failure,
            termination: None,
            offers_undo: false,
        }
    }

    pub fn with_undo_offer(mut self) -> Self {
        self.offers_undo = true;
        self
    }

    pub fn terminal(text: impl Into<String>, termination: Termination) -> Self {
        Self {
            termination: Some(termination),
            ..Self::success(text)
        }
    }
}

/// 单次工具调用的结果；总能转成一条 tool 消息
#[derive(Clone, Debug)]
pub struct ToolExecutionResult {
    pub request: ToolExecutionRequest,
    pub text: String,
    pub status: ToolStatus,
    pub offers_undo: bool,
}

impl ToolExecutionResult {
    pub fn new(request: ToolExecutionRequest, output: ToolOutput) -> Self {
        Self {
            request,
            text: output.text,
            status: output.status,
            offers_undo: output.offers_undo,
        }
    }

    pub fn failure(request: ToolExecutionRequest, text: impl Into<String>) -> Self {
        Self::new(request, ToolOutput::failure(text))
    }

    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.request, self.text.clone())
    }
}

/// 工具执行环境：调度器、项目文件、子 Agent 与取消令牌
#[derive(Clone)]
pub struct ToolEnv {
    pub scheduler: TaskScheduler,
    pub project: Arc<dyn ProjectFiles>,
    pub agents: SubAgents,
    pub cancel: CancellationToken,
    pub events: EventSink,
    /// 单次调用的超时令牌；超时后排队中的 push 不再生效
    pub deadline: Option<CancellationToken>,
}

impl ToolEnv {
    pub fn current_context(&self) -> Arc<Context> {
        self.scheduler.current_context()
    }

    /// 通过 context 通道 push 一个由当前 Context 派生的新快照
    pub async fn push_context<F>(&self, name: &str, derive: F) -> Result<Arc<Context>, AgentError>
    where
        F: FnOnce(&Context) -> Context + Send + 'static,
    {
        let (current, ()) = self.push_context_with(name, move |c| (derive(c), ())).await?;
        Ok(current)
    }

    /// 同 push_context，派生时可带出额外结果
    pub async fn push_context_with<T, F>(
        &self,
        name: &str,
        derive: F,
    ) -> Result<(Arc<Context>, T), AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> (Context, T) + Send + 'static,
    {
        self.scheduler
            .push_derived(name, &self.events, self.deadline.clone(), derive)
            .await
    }
}

/// 工具处理器 trait
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> ToolName;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value;

    /// 执行工具；可恢复的失败编码为 ToolOutput::failure，只有缺陷/取消返回 Err
    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError>;
}

/// 由 schemars 生成参数 schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

/// 解析工具参数；失败时给出可直接返回给模型的 ToolOutput
pub fn parse_args<T: DeserializeOwned>(tool: ToolName, args: Value) -> Result<T, ToolOutput> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| ToolOutput::failure(format!("Invalid arguments for {tool}: {e}")))
}

/// 工具注册表
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<ToolName, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置工具
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in ToolName::ALL {
            registry.register(default_handler(name));
        }
        registry
    }

    /// 注册（或替换）处理器
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(&name).cloned()
    }

    pub fn spec(&self, name: ToolName) -> Option<ToolSpec> {
        self.handlers.get(&name).map(|h| ToolSpec {
            name: name.as_str().to_string(),
            description: h.description().to_string(),
            parameters: h.parameters_schema(),
        })
    }

    /// 按给定顺序生成工具声明；未注册的名称跳过
    pub fn specs(&self, names: &[ToolName]) -> Vec<ToolSpec> {
        names.iter().filter_map(|n| self.spec(*n)).collect()
    }

    pub fn tool_names(&self) -> Vec<ToolName> {
        let mut names: Vec<ToolName> = self.handlers.keys().copied().collect();
        names.sort();
        names
    }
}

fn default_handler(name: ToolName) -> Arc<dyn ToolHandler> {
    match name {
        ToolName::ProjectFinished => Arc::new(planning::ProjectFinished),
        ToolName::AbortProject => Arc::new(planning::AbortProject),
        ToolName::UpdatePlan => Arc::new(planning::UpdatePlan),
        ToolName::CallSearchAgent => Arc::new(delegation::CallSearchAgent),
        ToolName::CallCodeAgent => Arc::new(delegation::CallCodeAgent),
        ToolName::AddFilesToWorkspace => Arc::new(workspace::AddFilesToWorkspace),
        ToolName::AddReadOnlyFilesToWorkspace => Arc::new(workspace::AddReadOnlyFilesToWorkspace),
        ToolName::AddTextToWorkspace => Arc::new(workspace::AddTextToWorkspace),
        ToolName::DropWorkspaceFragments => Arc::new(workspace::DropWorkspaceFragments),
        ToolName::UndoLastChanges => Arc::new(workspace::UndoLastChanges),
    }
}
