//! 基于 LlmClient 的子 Agent 适配器
//!
//! - ModelSearchAgent：把查询与工作区清单交给模型，回答中提到的项目文件作为 sources
//! - ModelCodeAgent：模型以 JSON 返回整文件编辑，校验后写盘并记录 FileEdit；
//!   回复无效时把错误反馈给模型重试，超过 max_attempts 即 ToolLoopExhausted
//! - ModelContextAgent：模型以 JSON 推荐相关文件（可附摘要）

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::agents::{
    CodeAgent, CodeOutcome, ContextAgent, RecommendationResult, SearchAgent, SearchOutcome,
    StopReason,
};
use crate::context::{Context, FileEdit, Fragment};
use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError, ModelRequest, ToolChoice};
use crate::memory::Message;
use crate::project::{run_blocking, ProjectFile, ProjectFiles};

/// prompt 中最多列出的项目文件数
const MAX_LISTED_FILES: usize = 300;
const DEFAULT_MAX_ATTEMPTS: usize = 3;

const SEARCH_SYSTEM_PROMPT: &str = "You are the Search Agent of a coding assistant. \
Investigate the question using the workspace and the project file list. \
Answer concisely with concrete findings and cite project file paths you relied on. \
You cannot modify anything.";

const CODE_SYSTEM_PROMPT: &str = "You are the Code Agent of a coding assistant. \
Implement the instructions by editing the editable files shown below. \
Reply with a single JSON object and nothing else: \
{\"summary\": \"what you changed\", \"edits\": [{\"file\": \"relative/path\", \"content\": \"complete new file content\"}]}. \
Only editable files may be changed. Use an empty edits array if nothing needs to change.";

const CONTEXT_SYSTEM_PROMPT: &str = "You recommend which project files are relevant to a goal. \
Reply with a single JSON object and nothing else: \
{\"reasoning\": \"why these files\", \"files\": [{\"file\": \"relative/path\", \"summary\": \"optional summary of the relevant declarations\"}]}.";

/// 从模型回复中提取 JSON 对象（容忍 ``` 代码块与前后说明文字）
pub(crate) fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let start = text.find('{').ok_or("no JSON object found")?;
    let end = text.rfind('}').ok_or("no JSON object found")?;
    if end < start {
        return Err("no JSON object found".to_string());
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| e.to_string())
}

fn listing(files: &[ProjectFile]) -> String {
    let mut listing: Vec<&str> = files.iter().take(MAX_LISTED_FILES).map(ProjectFile::as_str).collect();
    if files.len() > MAX_LISTED_FILES {
        listing.push("...");
    }
    listing.join("\n")
}

/// 工作区清单加上文本 / 摘要片段正文
fn workspace_block(context: &Context) -> String {
    let contents = context.fragment_contents();
    if contents.is_empty() {
        context.workspace_summary()
    } else {
        format!("{}\n\n{}", context.workspace_summary(), contents)
    }
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '/' | '.')
}

/// 文本是否完整提到了该路径（前后不能紧接路径字符，末尾的句号除外）
fn mentions_path(text: &str, path: &str) -> bool {
    text.match_indices(path).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let mut after = text[start + path.len()..].chars();
        let next = after.next();
        let next_ok = match next {
            None => true,
            Some('.') => !after.next().is_some_and(is_path_char),
            Some(c) => !is_path_char(c),
        };
        !before.is_some_and(is_path_char) && next_ok
    })
}

/// 读取一组文件内容，拼成 `=== path ===` 分段
fn file_sections<'a>(
    project: &dyn ProjectFiles,
    files: impl Iterator<Item = &'a ProjectFile>,
) -> String {
    let mut out = String::new();
    for file in files {
        let content = if project.exists(file) {
            project.read(file).unwrap_or_else(|e| format!("<unreadable: {e}>"))
        } else {
            "<file does not exist yet>".to_string()
        };
        out.push_str(&format!("=== {file} ===\n{content}\n\n"));
    }
    out
}

pub struct ModelSearchAgent {
    llm: Arc<dyn LlmClient>,
    project: Arc<dyn ProjectFiles>,
}

impl ModelSearchAgent {
    pub fn new(llm: Arc<dyn LlmClient>, project: Arc<dyn ProjectFiles>) -> Self {
        Self { llm, project }
    }
}

#[async_trait]
impl SearchAgent for ModelSearchAgent {
    async fn search(&self, query: &str, context: &Context) -> Result<SearchOutcome, AgentError> {
        let files = run_blocking(&self.project, |p| p.list_files()).await?;
        let prompt = format!(
            "Workspace:\n{}\n\nProject files:\n{}\n\nQuestion: {}",
            workspace_block(context),
            listing(&files),
            query
        );
        let request = ModelRequest::new(vec![Message::system(SEARCH_SYSTEM_PROMPT), Message::user(prompt)])
            .with_tools(Vec::new(), ToolChoice::None);
        let response = self.llm.send(request).await?;
        if response.text.trim().is_empty() {
            return Err(AgentError::EmptyResponse);
        }
        let sources = files
            .into_iter()
            .filter(|f| mentions_path(&response.text, f.as_str()))
            .map(|f| f.to_string())
            .collect();
        Ok(SearchOutcome {
            text: response.text,
            sources,
        })
    }
}

#[derive(Deserialize)]
struct CodeReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    edits: Vec<EditReply>,
}

#[derive(Deserialize)]
struct EditReply {
    file: String,
    content: String,
}

pub struct ModelCodeAgent {
    llm: Arc<dyn LlmClient>,
    max_attempts: usize,
}

impl ModelCodeAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 校验回复：路径合法且都在可编辑集合内
    fn validate(
        reply: CodeReply,
        project: &dyn ProjectFiles,
        editable: &HashSet<ProjectFile>,
    ) -> Result<(String, Vec<(ProjectFile, String)>), String> {
        let mut edits = Vec::with_capacity(reply.edits.len());
        for edit in reply.edits {
            let file = project.resolve(&edit.file).map_err(|e| e.to_string())?;
            if !editable.contains(&file) {
                return Err(format!("{file} is not an editable file"));
            }
            edits.push((file, edit.content));
        }
        Ok((reply.summary, edits))
    }

    fn apply(
        project: &dyn ProjectFiles,
        summary: String,
        edits: Vec<(ProjectFile, String)>,
    ) -> CodeOutcome {
        let mut applied = Vec::with_capacity(edits.len());
        for (file, content) in edits {
            let before = if project.exists(&file) {
                match project.read(&file) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        return CodeOutcome {
                            stop: StopReason::Error(e.to_string()),
                            summary,
                            edits: applied,
                        }
                    }
                }
            } else {
                None
            };
            if before.as_deref() == Some(content.as_str()) {
                continue;
            }
            if let Err(e) = project.write(&file, &content) {
                return CodeOutcome {
                    stop: StopReason::Error(e.to_string()),
                    summary,
                    edits: applied,
                };
            }
            applied.push(FileEdit {
                file,
                before,
                after: Some(content),
            });
        }
        let stop = if applied.is_empty() {
            StopReason::NoOp
        } else {
            StopReason::Success
        };
        CodeOutcome {
            stop,
            summary,
            edits: applied,
        }
    }
}

#[async_trait]
impl CodeAgent for ModelCodeAgent {
    async fn run(
        &self,
        instructions: &str,
        context: &Context,
        project: Arc<dyn ProjectFiles>,
    ) -> CodeOutcome {
        let editable: Vec<ProjectFile> = context.editable_files().cloned().collect();
        if editable.is_empty() {
            return CodeOutcome::stopped(
                StopReason::Error("no editable files in the workspace".to_string()),
                "Add the files to edit with addFilesToWorkspace first.",
            );
        }
        let readonly: Vec<ProjectFile> = context.readonly_files().cloned().collect();
        let shown = editable.clone();
        let sections = run_blocking(&project, move |p| {
            (
                file_sections(p, shown.iter()),
                file_sections(p, readonly.iter()),
            )
        })
        .await;
        let (editable_sections, readonly_sections) = match sections {
            Ok(s) => s,
            Err(e) => return CodeOutcome::stopped(StopReason::Error(e.to_string()), ""),
        };
        let mut prompt = format!(
            "Instructions:\n{instructions}\n\nEditable files:\n{editable_sections}Read-only files:\n{readonly_sections}"
        );
        let notes = context.fragment_contents();
        if !notes.is_empty() {
            prompt.push_str(&format!("Workspace notes:\n{notes}\n"));
        }
        let mut messages = vec![Message::system(CODE_SYSTEM_PROMPT), Message::user(prompt)];
        let editable: Arc<HashSet<ProjectFile>> = Arc::new(editable.into_iter().collect());

        for attempt in 1..=self.max_attempts {
            let request = ModelRequest::new(messages.clone()).with_tools(Vec::new(), ToolChoice::None);
            let response = match self.llm.send(request).await {
                Ok(r) => r,
                Err(LlmError::Cancelled) => {
                    return CodeOutcome::stopped(StopReason::Interrupted, "Interrupted")
                }
                Err(e) => return CodeOutcome::stopped(StopReason::LlmError(e.to_string()), ""),
            };
            let problem = match extract_json::<CodeReply>(&response.text) {
                Ok(reply) => {
                    let allowed = editable.clone();
                    let applied = run_blocking(&project, move |p| {
                        Self::validate(reply, p, &allowed)
                            .map(|(summary, edits)| Self::apply(p, summary, edits))
                    })
                    .await;
                    match applied {
                        Ok(Ok(outcome)) => return outcome,
                        Ok(Err(e)) => e,
                        Err(e) => return CodeOutcome::stopped(StopReason::Error(e.to_string()), ""),
                    }
                }
                Err(e) => format!("reply is not valid JSON: {e}"),
            };
            tracing::debug!(attempt, %problem, "code agent reply rejected");
            messages.push(Message::assistant(response.text));
            messages.push(Message::user(format!(
                "Your reply was rejected: {problem}. Reply again with the JSON object only."
            )));
        }
        CodeOutcome::stopped(
            StopReason::ToolLoopExhausted,
            format!("No valid edit after {} attempts", self.max_attempts),
        )
    }
}

#[derive(Deserialize)]
struct RecommendationReply {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    files: Vec<RecommendedFile>,
}

#[derive(Deserialize)]
struct RecommendedFile {
    file: String,
    #[serde(default)]
    summary: Option<String>,
}

pub struct ModelContextAgent {
    llm: Arc<dyn LlmClient>,
    project: Arc<dyn ProjectFiles>,
    limit: usize,
}

impl ModelContextAgent {
    pub fn new(llm: Arc<dyn LlmClient>, project: Arc<dyn ProjectFiles>, limit: usize) -> Self {
        Self {
            llm,
            project,
            limit,
        }
    }
}

#[async_trait]
impl ContextAgent for ModelContextAgent {
    async fn recommend(
        &self,
        goal: &str,
        context: &Context,
    ) -> Result<RecommendationResult, AgentError> {
        let files = run_blocking(&self.project, |p| p.list_files()).await?;
        let prompt = format!(
            "Goal: {}\n\nAlready in the workspace:\n{}\n\nProject files:\n{}\n\nRecommend at most {} files.",
            goal,
            workspace_block(context),
            listing(&files),
            self.limit
        );
        let request = ModelRequest::new(vec![Message::system(CONTEXT_SYSTEM_PROMPT), Message::user(prompt)])
            .with_tools(Vec::new(), ToolChoice::None);
        let response = self.llm.send(request).await?;
        let reply: RecommendationReply = extract_json(&response.text).map_err(|e| {
            AgentError::Llm(LlmError::Provider(format!("invalid recommendation reply: {e}")))
        })?;

        let present = context.workspace_files();
        let limit = self.limit;
        let fragments = run_blocking(&self.project, move |project| {
            let mut fragments: Vec<Fragment> = Vec::new();
            for rec in reply.files {
                let file = match project.resolve(&rec.file) {
                    Ok(f) if project.exists(&f) => f,
                    Ok(f) => {
                        tracing::debug!(file = %f, "recommended file does not exist");
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(file = %rec.file, error = %e, "recommended path rejected");
                        continue;
                    }
                };
                if present.contains(&file) || fragments.iter().any(|f| f.primary_file() == Some(&file)) {
                    continue;
                }
                let fragment = match rec.summary.filter(|s| !s.trim().is_empty()) {
                    Some(summary) => Fragment::summary(file, summary),
                    None => Fragment::project_path(file),
                };
                fragments.push(fragment);
                if fragments.len() >= limit {
                    break;
                }
            }
            fragments
        })
        .await?;
        Ok(RecommendationResult {
            reasoning: reply.reasoning,
            fragments,
        })
    }
}
