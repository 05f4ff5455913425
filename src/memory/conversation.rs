//! 对话记录（transcript）
//!
//! 一次规划循环私有的推理轨迹：按轮追加 user prompt、assistant 响应（含 tool call）与 tool 结果，
//! 循环内单调增长，循环结束即丢弃。与 ContextHistory（工作区状态轨迹）相互独立。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 模型请求调用某个工具；本身不携带顺序信息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRequest {
    #[serde(default = "new_request_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

fn new_request_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

impl ToolExecutionRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: new_request_id(),
            name: name.into(),
            arguments,
        }
    }

    /// 去重键：名称 + 参数（id 不参与）
    pub fn same_call(&self, other: &ToolExecutionRequest) -> bool {
        self.name == other.name && self.arguments == other.arguments
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// assistant 消息携带的 tool call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<ToolExecutionRequest>,
    /// tool 结果消息对应的请求 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_requests: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_requests: Vec<ToolExecutionRequest>,
    ) -> Self {
        Self {
            tool_requests,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// tool 结果：按请求 id 关联，与执行顺序无关
    pub fn tool_result(request: &ToolExecutionRequest, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(request.id.clone()),
            ..Self::plain(Role::Tool, text)
        }
    }
}

/// 规划循环的对话记录
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.messages.extend(msgs);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 所有 tool 结果消息（按追加顺序）
    pub fn tool_results(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Tool)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
