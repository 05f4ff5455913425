//! 通用工作区工具：增删文件与片段、撤销上一步修改
//!
//! 每个工具的一次调用最多 push 一个 Context；路径解析错误逐项报告，不中断其它路径。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::context::{restore, CursorMove, Fragment, FragmentId};
use crate::core::AgentError;
use crate::project::{run_blocking, ProjectFile, ProjectFiles};
use crate::tools::registry::{parse_args, schema_of, ToolEnv, ToolHandler, ToolName, ToolOutput};

#[derive(Deserialize, JsonSchema)]
struct PathsArgs {
    /// 项目相对路径；addFilesToWorkspace 也接受 glob（如 `src/**/*.rs`）
    paths: Vec<String>,
}

#[derive(Deserialize, JsonSchema)]
struct AddTextArgs {
    /// 简短描述
    description: String,
    text: String,
}

#[derive(Deserialize, JsonSchema)]
struct DropFragmentsArgs {
    /// 要移除的片段 id（见工作区清单中的 `[id]`）
    fragment_ids: Vec<u64>,
}

#[derive(Deserialize, JsonSchema)]
struct NoArgs {}

fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// 解析路径与 glob；返回 (文件, 错误信息)
fn resolve_paths(
    project: &dyn ProjectFiles,
    paths: &[String],
    allow_glob: bool,
    must_exist: bool,
) -> (Vec<ProjectFile>, Vec<String>) {
    let mut files: Vec<ProjectFile> = Vec::new();
    let mut errors = Vec::new();
    let mut listing: Option<Vec<ProjectFile>> = None;
    for path in paths {
        if allow_glob && is_glob(path) {
            let pattern = match glob::Pattern::new(path) {
                Ok(p) => p,
                Err(e) => {
                    errors.push(format!("{path}: invalid pattern ({e})"));
                    continue;
                }
            };
            let all = listing.get_or_insert_with(|| project.list_files());
            let matched: Vec<ProjectFile> = all
                .iter()
                .filter(|f| pattern.matches(f.as_str()))
                .cloned()
                .collect();
            if matched.is_empty() {
                errors.push(format!("{path}: no files match"));
            }
            for f in matched {
                if !files.contains(&f) {
                    files.push(f);
                }
            }
            continue;
        }
        match project.resolve(path) {
            Ok(f) if must_exist && !project.exists(&f) => {
                errors.push(format!("{path}: file does not exist"));
            }
            Ok(f) => {
                if !files.contains(&f) {
                    files.push(f);
                }
            }
            Err(e) => errors.push(format!("{path}: {e}")),
        }
    }
    (files, errors)
}

fn describe(verb: &str, files: &[ProjectFile], errors: &[String]) -> ToolOutput {
    let mut text = String::new();
    if !files.is_empty() {
        let names: Vec<&str> = files.iter().map(ProjectFile::as_str).collect();
        text.push_str(&format!("{verb}: {}", names.join(", ")));
    }
    if !errors.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("Errors:\n{}", errors.join("\n")));
    }
    if files.is_empty() {
        ToolOutput::failure(if text.is_empty() {
            "No paths given".to_string()
        } else {
            text
        })
    } else {
        ToolOutput::success(text)
    }
}

pub struct AddFilesToWorkspace;

#[async_trait]
impl ToolHandler for AddFilesToWorkspace {
    fn name(&self) -> ToolName {
        ToolName::AddFilesToWorkspace
    }

    fn description(&self) -> &str {
        "Add project files to the workspace as editable. Accepts relative paths or glob patterns. Files that do not exist yet may be added so they can be created."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PathsArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: PathsArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        let paths = args.paths;
        let (files, errors) =
            run_blocking(&env.project, move |p| resolve_paths(p, &paths, true, false)).await?;
        if !files.is_empty() {
            let added = files.clone();
            env.push_context("Add editable files", move |c| c.add_editable_files(&added))
                .await?;
        }
        Ok(describe("Added editable", &files, &errors))
    }
}

pub struct AddReadOnlyFilesToWorkspace;

#[async_trait]
impl ToolHandler for AddReadOnlyFilesToWorkspace {
    fn name(&self) -> ToolName {
        ToolName::AddReadOnlyFilesToWorkspace
    }

    fn description(&self) -> &str {
        "Add existing project files to the workspace as read-only reference. Files already editable stay editable."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PathsArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: PathsArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        let paths = args.paths;
        let (files, errors) =
            run_blocking(&env.project, move |p| resolve_paths(p, &paths, true, true)).await?;
        if !files.is_empty() {
            let added = files.clone();
            env.push_context("Add read-only files", move |c| c.add_readonly_files(&added))
                .await?;
        }
        Ok(describe("Added read-only", &files, &errors))
    }
}

pub struct AddTextToWorkspace;

#[async_trait]
impl ToolHandler for AddTextToWorkspace {
    fn name(&self) -> ToolName {
        ToolName::AddTextToWorkspace
    }

    fn description(&self) -> &str {
        "Add a free-form text note (findings, requirements, snippets) to the workspace."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<AddTextArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: AddTextArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        if args.text.trim().is_empty() {
            return Ok(ToolOutput::failure("Text must not be empty"));
        }
        let fragment = Fragment::text(args.description, args.text);
        let id = fragment.id;
        env.push_context("Add text", move |c| c.add_virtual_fragment(fragment))
            .await?;
        Ok(ToolOutput::success(format!("Added text fragment [{id}]")))
    }
}

pub struct DropWorkspaceFragments;

#[async_trait]
impl ToolHandler for DropWorkspaceFragments {
    fn name(&self) -> ToolName {
        ToolName::DropWorkspaceFragments
    }

    fn description(&self) -> &str {
        "Remove fragments that are no longer relevant from the workspace, by fragment id."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DropFragmentsArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: DropFragmentsArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        let ids: Vec<FragmentId> = args.fragment_ids.into_iter().map(FragmentId::from).collect();
        let wanted = ids.len();
        let (_, removed) = env
            .push_context_with("Drop fragments", move |c| {
                let (next, removed) = c.remove_fragments(&ids);
                if removed > 0 {
                    (next, removed)
                } else {
                    (c.clone(), 0)
                }
            })
            .await?;
        if removed == 0 {
            return Ok(ToolOutput::failure("No matching fragments in the workspace"));
        }
        Ok(ToolOutput::success(format!(
            "Dropped {removed} of {wanted} fragment(s)"
        )))
    }
}

pub struct UndoLastChanges;

#[async_trait]
impl ToolHandler for UndoLastChanges {
    fn name(&self) -> ToolName {
        ToolName::UndoLastChanges
    }

    fn description(&self) -> &str {
        "Undo the most recent workspace change, restoring any files the Code Agent modified."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<NoArgs>()
    }

    async fn execute(&self, env: &ToolEnv, _args: Value) -> Result<ToolOutput, AgentError> {
        let project: Arc<dyn ProjectFiles> = env.project.clone();
        let result = env
            .scheduler
            .submit_context("Undo last changes", move |history| {
                let undone = history.undo_steps(1);
                let action = undone.first().map(|c| c.action().to_string());
                let report = restore::apply_cursor_move(project.as_ref(), &CursorMove::Undo(undone));
                action.map(|a| (a, report))
            })
            .join()
            .await?;
        match result {
            None => Ok(ToolOutput::failure("Nothing to undo")),
            Some((action, report)) if report.failures.is_empty() => Ok(ToolOutput::success(
                format!(
                    "Undid \"{action}\"; restored {} file(s)",
                    report.restored.len()
                ),
            )),
            Some((action, report)) => Ok(ToolOutput::failure(format!(
                "Undid \"{action}\" but some files could not be restored:\n{}",
                report.failures.join("\n")
            ))),
        }
    }
}
