//! Deep Scan：并发运行 Context 推荐与 Validation 两个 Agent 并合并结果
//!
//! 两个 background 任务同时提交；外层 user 任务用 join_both 等待两者：
//! 任一内部任务失败（非中断）则记录日志、只通知一次并异常结束，不产出部分结果；
//! 外层任务被中断时两个内部任务都会被取消。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::agents::validation::is_test_file;
use crate::agents::{ContextAgent, RecommendationResult, ValidationAgent};
use crate::context::{Context, Fragment};
use crate::core::{join_both, AgentError, TaskHandle, TaskScheduler};
use crate::project::ProjectFile;
use crate::react::{AgentEvent, EventSink};

const APPLY_ACTION: &str = "Add Deep Scan recommendations";

/// 合并后的推荐，按文件路径排序并分为项目代码与测试代码
#[derive(Clone, Debug, Default)]
pub struct DeepScanResult {
    pub reasoning: String,
    pub project_code: Vec<Fragment>,
    pub test_code: Vec<Fragment>,
}

impl DeepScanResult {
    pub fn is_empty(&self) -> bool {
        self.project_code.is_empty() && self.test_code.is_empty()
    }

    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.project_code.iter().chain(self.test_code.iter())
    }
}

/// 合并规则：同一文件以 Context Agent 的片段为准（可能带摘要）；
/// 已在工作区的 Validation 文件被过滤
pub fn merge(
    recommendation: RecommendationResult,
    validation_files: Vec<ProjectFile>,
    workspace: &HashSet<ProjectFile>,
) -> DeepScanResult {
    let mut by_file: BTreeMap<ProjectFile, Fragment> = BTreeMap::new();
    let mut loose: Vec<Fragment> = Vec::new();
    for fragment in recommendation.fragments {
        match fragment.primary_file().cloned() {
            Some(file) => {
                by_file.entry(file).or_insert(fragment);
            }
            None => loose.push(fragment),
        }
    }
    for file in validation_files {
        if workspace.contains(&file) {
            continue;
        }
        by_file
            .entry(file.clone())
            .or_insert_with(|| Fragment::project_path(file));
    }

    let mut result = DeepScanResult {
        reasoning: recommendation.reasoning,
        ..DeepScanResult::default()
    };
    for (file, fragment) in by_file {
        if is_test_file(&file) {
            result.test_code.push(fragment);
        } else {
            result.project_code.push(fragment);
        }
    }
    result.project_code.extend(loose);
    result
}

/// 未解除时在 drop 时发出一次 "Deep Scan cancelled." 通知
struct CancelNotice {
    events: EventSink,
    armed: bool,
}

impl Drop for CancelNotice {
    fn drop(&mut self) {
        if self.armed {
            self.events.notify("Deep Scan cancelled.");
        }
    }
}

fn file_names<'a>(fragments: impl Iterator<Item = &'a Fragment>) -> Vec<String> {
    fragments
        .map(|f| f.primary_file().map_or_else(|| f.description(), ProjectFile::to_string))
        .collect()
}

pub struct DeepScan {
    scheduler: TaskScheduler,
    context_agent: Arc<dyn ContextAgent>,
    validation_agent: Arc<dyn ValidationAgent>,
    events: EventSink,
}

impl DeepScan {
    pub fn new(
        scheduler: TaskScheduler,
        context_agent: Arc<dyn ContextAgent>,
        validation_agent: Arc<dyn ValidationAgent>,
        events: EventSink,
    ) -> Self {
        Self {
            scheduler,
            context_agent,
            validation_agent,
            events,
        }
    }

    /// 启动 Deep Scan；返回外层 user 任务的句柄
    pub fn start(&self, goal: impl Into<String>) -> TaskHandle<DeepScanResult> {
        let goal: Arc<str> = Arc::from(goal.into());
        let context: Arc<Context> = self.scheduler.current_context();
        let workspace = context.workspace_files();

        let recommend = {
            let agent = self.context_agent.clone();
            let goal = goal.clone();
            let context = context.clone();
            self.scheduler
                .submit_background("Deep Scan: context agent", async move {
                    agent.recommend(&goal, &context).await
                })
        };
        let validate = {
            let agent = self.validation_agent.clone();
            let goal = goal.clone();
            let context = context.clone();
            self.scheduler
                .submit_background("Deep Scan: validation agent", async move {
                    agent.relevant_tests(&goal, &context).await
                })
        };

        let events = self.events.clone();
        self.scheduler.submit_user("Deep Scan", async move {
            let mut notice = CancelNotice {
                events: events.clone(),
                armed: true,
            };
            match join_both(recommend, validate).await {
                Ok((recommendation, files)) => {
                    notice.armed = false;
                    let result = merge(recommendation, files, &workspace);
                    tracing::info!(
                        project = result.project_code.len(),
                        tests = result.test_code.len(),
                        "deep scan completed"
                    );
                    events.emit(AgentEvent::DeepScanCompleted {
                        reasoning: result.reasoning.clone(),
                        project_files: file_names(result.project_code.iter()),
                        test_files: file_names(result.test_code.iter()),
                    });
                    Ok(result)
                }
                Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
                Err(e) => {
                    notice.armed = false;
                    tracing::error!(error = %e, "deep scan failed");
                    events.error(format!("Deep Scan failed: {e}"));
                    Err(e)
                }
            }
        })
    }
}

/// 把选中的推荐片段一次性加入工作区（context 通道上单次 push）
pub async fn apply_recommendations(
    scheduler: &TaskScheduler,
    events: &EventSink,
    fragments: Vec<Fragment>,
) -> Result<Option<Arc<Context>>, AgentError> {
    if fragments.is_empty() {
        return Ok(None);
    }
    let (pushed, ()) = scheduler
        .push_derived(APPLY_ACTION, events, None, move |c| {
            (c.add_fragments(fragments, APPLY_ACTION), ())
        })
        .await?;
    Ok(Some(pushed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_context_agent_fragment() {
        let shared = ProjectFile::new("src/parser.rs");
        let recommendation = RecommendationResult {
            reasoning: "parser is central".to_string(),
            fragments: vec![Fragment::summary(shared.clone(), "pub fn parse()")],
        };
        let result = merge(
            recommendation,
            vec![
                shared.clone(),
                ProjectFile::new("tests/parser_test.rs"),
                ProjectFile::new("tests/in_workspace_test.rs"),
            ],
            &HashSet::from([ProjectFile::new("tests/in_workspace_test.rs")]),
        );

        assert_eq!(result.project_code.len(), 1);
        assert!(result.project_code[0].is_summary());
        assert_eq!(result.test_code.len(), 1);
        assert_eq!(
            result.test_code[0].primary_file(),
            Some(&ProjectFile::new("tests/parser_test.rs"))
        );
    }

    #[test]
    fn test_merge_sorts_by_path() {
        let recommendation = RecommendationResult {
            reasoning: String::new(),
            fragments: vec![
                Fragment::project_path(ProjectFile::new("src/z.rs")),
                Fragment::project_path(ProjectFile::new("src/a.rs")),
            ],
        };
        let result = merge(
            recommendation,
            vec![ProjectFile::new("src/m.rs")],
            &HashSet::new(),
        );
        let files: Vec<&str> = result
            .project_code
            .iter()
            .filter_map(|f| f.primary_file().map(ProjectFile::as_str))
            .collect();
        assert_eq!(files, vec!["src/a.rs", "src/m.rs", "src/z.rs"]);
    }
}
