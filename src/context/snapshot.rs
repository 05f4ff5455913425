//! Context：不可变的工作区快照
//!
//! 包含可编辑文件、只读文件、虚拟片段、任务历史、可选 Plan 与 action 标签。
//! 任何修改都通过 `with_*` / `add_*` 产生新的 Context（新 id），再由 ContextHistory::push 入栈。

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{Fragment, FragmentId, FragmentKind};
use crate::project::ProjectFile;

/// prompt 中单个片段正文的最大字符数
pub const MAX_FRAGMENT_CHARS: usize = 4_000;

/// Context ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 当前多步目标的自由文本；替换即整体替换，不做合并
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan(String);

impl Plan {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}

/// 任务历史条目（Code Agent 等产生的对话派生记录）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub description: String,
    pub summary: String,
    /// Code Agent 的停止原因（如 "success"、"no_op"）
    pub stop_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskEntry {
    pub fn new(description: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            summary: summary.into(),
            stop_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_stop_reason(mut self, reason: impl Into<String>) -> Self {
        self.stop_reason = Some(reason.into());
        self
    }
}

/// 单个文件的修改记录；None 表示文件不存在。undo 写回 before，redo 写回 after
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub file: ProjectFile,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    id: ContextId,
    editable: Vec<Fragment>,
    readonly: Vec<Fragment>,
    virtual_fragments: Vec<Fragment>,
    task_history: Vec<TaskEntry>,
    plan: Option<Plan>,
    action: String,
    /// 产生本 Context 的磁盘修改（仅 Code Agent 推入的 Context 非空）
    edits: Vec<FileEdit>,
    created_at: DateTime<Utc>,
}

impl Context {
    /// 根 Context：历史永远至少包含它
    pub fn empty() -> Self {
        Self {
            id: ContextId::new(),
            editable: Vec::new(),
            readonly: Vec::new(),
            virtual_fragments: Vec::new(),
            task_history: Vec::new(),
            plan: None,
            action: "Initial context".to_string(),
            edits: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn task_history(&self) -> &[TaskEntry] {
        &self.task_history
    }

    pub fn edits(&self) -> &[FileEdit] {
        &self.edits
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn editable_fragments(&self) -> &[Fragment] {
        &self.editable
    }

    pub fn readonly_fragments(&self) -> &[Fragment] {
        &self.readonly
    }

    pub fn virtual_fragments(&self) -> &[Fragment] {
        &self.virtual_fragments
    }

    pub fn all_fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.editable
            .iter()
            .chain(self.readonly.iter())
            .chain(self.virtual_fragments.iter())
    }

    pub fn editable_files(&self) -> impl Iterator<Item = &ProjectFile> {
        self.editable.iter().filter_map(Fragment::primary_file)
    }

    pub fn readonly_files(&self) -> impl Iterator<Item = &ProjectFile> {
        self.readonly.iter().filter_map(Fragment::primary_file)
    }

    /// 可编辑 + 只读文件（去重）
    pub fn workspace_files(&self) -> HashSet<ProjectFile> {
        self.editable_files()
            .chain(self.readonly_files())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.all_fragments().next().is_none()
    }

    /// 派生新快照：新 id、新时间戳、清空 edits
    fn derive(&self, action: impl Into<String>) -> Self {
        Self {
            id: ContextId::new(),
            action: action.into(),
            edits: Vec::new(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn with_plan(&self, plan: Plan) -> Self {
        let mut next = self.derive("Update plan");
        next.plan = Some(plan);
        next
    }

    /// 加入可编辑文件；已在只读集合中的文件会移到可编辑集合
    pub fn add_editable_files(&self, files: &[ProjectFile]) -> Self {
        let mut next = self.derive(format!("Edit {}", join_files(files)));
        for file in files {
            next.readonly.retain(|f| {
                !(matches!(f.kind, FragmentKind::ProjectPath { .. }) && f.primary_file() == Some(file))
            });
            if !next.editable_files().any(|f| f == file) {
                next.editable.push(Fragment::project_path(file.clone()));
            }
        }
        next
    }

    /// 加入只读文件；已可编辑的文件保持不变
    pub fn add_readonly_files(&self, files: &[ProjectFile]) -> Self {
        let mut next = self.derive(format!("Read {}", join_files(files)));
        for file in files {
            let present = next.editable_files().any(|f| f == file)
                || next.readonly_files().any(|f| f == file);
            if !present {
                next.readonly.push(Fragment::project_path(file.clone()));
            }
        }
        next
    }

    pub fn add_virtual_fragment(&self, fragment: Fragment) -> Self {
        let mut next = self.derive(format!("Add {}", fragment.description()));
        next.virtual_fragments.push(fragment);
        next
    }

    /// 批量加入片段：ProjectPath 进入可编辑集合，其余进入虚拟片段
    pub fn add_fragments(&self, fragments: Vec<Fragment>, action: impl Into<String>) -> Self {
        let mut next = self.derive(action);
        for fragment in fragments {
            match &fragment.kind {
                FragmentKind::ProjectPath { file } => {
                    if !next.editable_files().any(|f| f == file) {
                        next.editable.push(fragment);
                    }
                }
                _ => next.virtual_fragments.push(fragment),
            }
        }
        next
    }

    /// 按 id 删除片段，返回新 Context 与实际删除数量
    pub fn remove_fragments(&self, ids: &[FragmentId]) -> (Self, usize) {
        let wanted: HashSet<FragmentId> = ids.iter().copied().collect();
        let before = self.all_fragments().count();
        let mut next = self.derive("Drop fragments");
        next.editable.retain(|f| !wanted.contains(&f.id));
        next.readonly.retain(|f| !wanted.contains(&f.id));
        next.virtual_fragments.retain(|f| !wanted.contains(&f.id));
        let removed = before - next.all_fragments().count();
        (next, removed)
    }

    /// 追加任务历史条目，并记录本步的磁盘修改
    pub fn add_task_entry(&self, entry: TaskEntry, edits: Vec<FileEdit>) -> Self {
        let mut next = self.derive(entry.description.clone());
        next.task_history.push(entry);
        next.edits = edits;
        next
    }

    /// reset：复制 source 的文件 / 片段 / Plan 到一个新 Context；
    /// include_history 为 true 时同时采用 source 的任务历史，否则保留 current 的任务历史
    pub fn create_from(source: &Context, current: &Context, include_history: bool) -> Self {
        let (task_history, action) = if include_history {
            (
                source.task_history.clone(),
                "Reset context and history to historical state",
            )
        } else {
            (
                current.task_history.clone(),
                "Reset context to historical state",
            )
        };
        Self {
            id: ContextId::new(),
            editable: source.editable.clone(),
            readonly: source.readonly.clone(),
            virtual_fragments: source.virtual_fragments.clone(),
            task_history,
            plan: source.plan.clone(),
            action: action.to_string(),
            edits: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// 工作区清单（供 prompt 使用）：每行 `[id] (editable|read-only|virtual) 描述`
    pub fn workspace_summary(&self) -> String {
        let mut lines = Vec::new();
        for f in &self.editable {
            lines.push(format!("[{}] editable: {}", f.id, f.description()));
        }
        for f in &self.readonly {
            lines.push(format!("[{}] read-only: {}", f.id, f.description()));
        }
        for f in &self.virtual_fragments {
            lines.push(format!("[{}] virtual: {}", f.id, f.description()));
        }
        lines.join("\n")
    }

    /// 带正文片段的内容块：`<fragment id=.. description=..>正文</fragment>`，正文超长时截断
    pub fn fragment_contents(&self) -> String {
        self.all_fragments()
            .filter_map(|f| f.body().map(|body| (f, body)))
            .map(|(f, body)| {
                format!(
                    "<fragment id=\"{}\" description=\"{}\">\n{}\n</fragment>",
                    f.id,
                    f.description(),
                    clip(body, MAX_FRAGMENT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

fn join_files(files: &[ProjectFile]) -> String {
    files
        .iter()
        .map(ProjectFile::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_plan_replaces_wholesale() {
        let ctx = Context::empty().with_plan(Plan::new("step 1\nstep 2"));
        let ctx = ctx.with_plan(Plan::new("only step"));
        assert_eq!(ctx.plan().map(Plan::text), Some("only step"));
        assert_eq!(ctx.action(), "Update plan");
    }

    #[test]
    fn test_derive_produces_new_id() {
        let root = Context::empty();
        let next = root.add_readonly_files(&[ProjectFile::new("a.rs")]);
        assert_ne!(root.id(), next.id());
        assert!(root.is_empty());
        assert_eq!(next.readonly_files().count(), 1);
    }

    #[test]
    fn test_readonly_file_promoted_to_editable() {
        let file = ProjectFile::new("src/lib.rs");
        let ctx = Context::empty()
            .add_readonly_files(&[file.clone()])
            .add_editable_files(&[file.clone()]);
        assert_eq!(ctx.readonly_files().count(), 0);
        assert_eq!(ctx.editable_files().collect::<Vec<_>>(), vec![&file]);

        // 已可编辑的文件不会重复加入只读
        let ctx = ctx.add_readonly_files(&[file]);
        assert_eq!(ctx.readonly_files().count(), 0);
    }

    #[test]
    fn test_remove_fragments_by_id() {
        let ctx = Context::empty()
            .add_editable_files(&[ProjectFile::new("a.rs"), ProjectFile::new("b.rs")])
            .add_virtual_fragment(Fragment::text("note", "remember this"));
        let target = ctx.editable_fragments()[0].id;
        let (next, removed) = ctx.remove_fragments(&[target, FragmentId::new()]);
        assert_eq!(removed, 1);
        assert_eq!(next.all_fragments().count(), 2);
    }

    #[test]
    fn test_fragment_contents_carry_bodies() {
        let ctx = Context::empty()
            .add_editable_files(&[ProjectFile::new("src/lib.rs")])
            .add_virtual_fragment(Fragment::text("requirements", "must support UTF-16"))
            .add_fragments(
                vec![Fragment::summary(ProjectFile::new("src/parser.rs"), "pub fn parse(src: &str)")],
                "Add summary",
            );
        let contents = ctx.fragment_contents();
        assert!(contents.contains("description=\"requirements\">\nmust support UTF-16"));
        assert!(contents.contains("pub fn parse(src: &str)"));
        assert!(!contents.contains("src/lib.rs"));

        let long = "字".repeat(MAX_FRAGMENT_CHARS + 10);
        let ctx = Context::empty().add_virtual_fragment(Fragment::text("long", long));
        let contents = ctx.fragment_contents();
        assert!(contents.contains("[truncated]"));
        assert_eq!(contents.matches('字').count(), MAX_FRAGMENT_CHARS);
    }

    #[test]
    fn test_create_from_keeps_current_history_unless_requested() {
        let old = Context::empty()
            .add_editable_files(&[ProjectFile::new("old.rs")])
            .add_task_entry(TaskEntry::new("old task", "did old things"), Vec::new());
        let current = Context::empty()
            .add_task_entry(TaskEntry::new("new task", "did new things"), Vec::new());

        let reset = Context::create_from(&old, &current, false);
        assert_eq!(reset.editable_files().count(), 1);
        assert_eq!(reset.task_history()[0].description, "new task");

        let reset = Context::create_from(&old, &current, true);
        assert_eq!(reset.task_history()[0].description, "old task");
    }
}
