//! 每轮 prompt 构建
//!
//! 顺序：system 框架（含工作区清单与文本 / 摘要片段正文）→ 可选的相关上下文提示（仅当代码索引可用且结果非空）
//! → 本次循环的 transcript 原样带入 → 最后一条 user 消息：目标 + 当前 Plan（无 Plan 时为占位文本）。

use crate::context::{Context, Plan};
use crate::memory::{Message, Transcript};
use crate::project::ProjectFile;

/// 无 Plan 时的占位文本
pub const NO_PLAN_PLACEHOLDER: &str = "(no plan yet; use updatePlan to create one)";

const ARCHITECT_SYSTEM_PROMPT: &str = "You are the Architect, the planning agent of a coding assistant. \
You accomplish the user's goal by calling tools; every reply must contain at least one tool call.
- Keep a plan with updatePlan and revise it as you learn.
- Use callSearchAgent to investigate the codebase; it is read-only.
- Curate the workspace with the workspace tools so the Code Agent sees the right files.
- Use callCodeAgent with complete, self-contained instructions to change code.
- Call projectFinished when the goal is accomplished, or abortProject if it cannot be.
A batch that contains projectFinished or abortProject executes only that tool.";

/// 代码索引：按工作区文件给出可能相关的项目文件
pub trait CodeIntelligence: Send + Sync {
    /// 索引是否为空（空索引不产出提示）
    fn is_empty(&self) -> bool;

    fn related_files(&self, seeds: &[ProjectFile], limit: usize) -> Vec<ProjectFile>;
}

/// 单轮 prompt 所需的输入
pub struct PromptInput<'a> {
    pub goal: &'a str,
    pub context: &'a Context,
    pub transcript: &'a Transcript,
    pub code_intelligence: Option<&'a dyn CodeIntelligence>,
    pub related_limit: usize,
}

fn system_message(context: &Context) -> Message {
    let workspace = if context.is_empty() {
        "(empty)".to_string()
    } else {
        context.workspace_summary()
    };
    let mut text = format!("{ARCHITECT_SYSTEM_PROMPT}\n\n<workspace>\n{workspace}\n</workspace>");
    let contents = context.fragment_contents();
    if !contents.is_empty() {
        text.push_str(&format!("\n\n<workspace_fragments>\n{contents}\n</workspace_fragments>"));
    }
    if !context.task_history().is_empty() {
        let history: Vec<String> = context
            .task_history()
            .iter()
            .map(|t| match &t.stop_reason {
                Some(reason) => format!("- {} [{}]: {}", t.description, reason, t.summary),
                None => format!("- {}: {}", t.description, t.summary),
            })
            .collect();
        text.push_str(&format!("\n\n<task_history>\n{}\n</task_history>", history.join("\n")));
    }
    Message::system(text)
}

/// 相关上下文提示：user 提示 + assistant 确认；无索引或无结果时为空
fn related_context_messages(input: &PromptInput<'_>) -> Vec<Message> {
    let Some(index) = input.code_intelligence else {
        return Vec::new();
    };
    if index.is_empty() || input.related_limit == 0 {
        return Vec::new();
    }
    let workspace = input.context.workspace_files();
    let mut seeds: Vec<ProjectFile> = workspace.iter().cloned().collect();
    seeds.sort();
    let related: Vec<ProjectFile> = index
        .related_files(&seeds, input.related_limit)
        .into_iter()
        .filter(|f| !workspace.contains(f))
        .take(input.related_limit)
        .collect();
    if related.is_empty() {
        return Vec::new();
    }
    let list: Vec<&str> = related.iter().map(ProjectFile::as_str).collect();
    vec![
        Message::user(format!(
            "These files may be related to the workspace; add them if they help:\n{}",
            list.join("\n")
        )),
        Message::assistant("Noted, I will consider these related files."),
    ]
}

/// 本轮最后一条 user 消息：目标与当前 Plan
pub fn goal_message(goal: &str, plan: Option<&Plan>) -> Message {
    let plan = plan.map(Plan::text).unwrap_or(NO_PLAN_PLACEHOLDER);
    Message::user(format!(
        "<goal>\n{goal}\n</goal>\n\n<plan>\n{plan}\n</plan>\n\nDecide the next tool calls."
    ))
}

/// 构建本轮完整消息列表
pub fn build_messages(input: &PromptInput<'_>) -> Vec<Message> {
    let mut messages = vec![system_message(input.context)];
    messages.extend(related_context_messages(input));
    messages.extend(input.transcript.messages().iter().cloned());
    messages.push(goal_message(input.goal, input.context.plan()));
    messages
}
