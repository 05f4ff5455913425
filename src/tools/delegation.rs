//! 委派类工具：callSearchAgent（只读调查）与 callCodeAgent（修改代码）
//!
//! 子 Agent 的失败都编码为结果文本；只有取消向上传播。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::agents::StopReason;
use crate::context::TaskEntry;
use crate::core::AgentError;
use crate::project::ProjectFile;
use crate::tools::registry::{parse_args, schema_of, ToolEnv, ToolHandler, ToolName, ToolOutput};

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// 需要调查的问题（如 "find all usages of foo"）
    query: String,
}

#[derive(Deserialize, JsonSchema)]
struct CodeArgs {
    /// 给 Code Agent 的完整修改指令
    instructions: String,
}

pub struct CallSearchAgent;

#[async_trait]
impl ToolHandler for CallSearchAgent {
    fn name(&self) -> ToolName {
        ToolName::CallSearchAgent
    }

    fn description(&self) -> &str {
        "Invoke the Search Agent to investigate the codebase (find symbols, usages, relevant files). Read-only; returns its findings."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: SearchArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        let Some(agent) = env.agents.search.clone() else {
            return Ok(ToolOutput::failure("Search Agent is not available"));
        };
        let context = env.current_context();
        tracing::debug!(query = %args.query, "search agent");
        let result = tokio::select! {
            _ = env.cancel.cancelled() => Err(AgentError::Cancelled),
            r = agent.search(&args.query, &context) => r,
        };
        match result {
            Ok(outcome) => {
                let mut text = format!("Search Agent findings for \"{}\":\n{}", args.query, outcome.text);
                if !outcome.sources.is_empty() {
                    text.push_str(&format!("\n\nSources: {}", outcome.sources.join(", ")));
                }
                Ok(ToolOutput::success(text))
            }
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "search agent failed");
                Ok(ToolOutput::failure(format!("Error executing Search Agent: {e}")))
            }
        }
    }
}

pub struct CallCodeAgent;

impl CallCodeAgent {
    /// 让 Validation Agent 找出相关测试，把不在工作区的加入为可编辑
    async fn add_relevant_tests(&self, env: &ToolEnv, instructions: &str) -> Result<(), AgentError> {
        let Some(validation) = env.agents.validation.clone() else {
            return Ok(());
        };
        let context = env.current_context();
        let tests = match validation.relevant_tests(instructions, &context).await {
            Ok(files) => files,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "validation agent failed, continuing without tests");
                return Ok(());
            }
        };
        let present = context.workspace_files();
        let missing: Vec<ProjectFile> = tests
            .into_iter()
            .filter(|f| !present.contains(f))
            .collect();
        if !missing.is_empty() {
            tracing::debug!(files = ?missing, "adding relevant tests before code edit");
            env.push_context("Add relevant tests", move |c| c.add_editable_files(&missing))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ToolHandler for CallCodeAgent {
    fn name(&self) -> ToolName {
        ToolName::CallCodeAgent
    }

    fn description(&self) -> &str {
        "Invoke the Code Agent to implement changes in the editable workspace files. Give complete, self-contained instructions. Returns whether it succeeded."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CodeArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: CodeArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        let Some(agent) = env.agents.code.clone() else {
            return Ok(ToolOutput::failure("Code Agent is not available"));
        };

        self.add_relevant_tests(env, &args.instructions).await?;

        let context = env.current_context();
        let outcome = tokio::select! {
            _ = env.cancel.cancelled() => return Err(AgentError::Cancelled),
            o = agent.run(&args.instructions, &context, env.project.clone()) => o,
        };
        if outcome.stop == StopReason::Interrupted {
            return Err(AgentError::Cancelled);
        }

        let entry = TaskEntry::new(args.instructions.clone(), outcome.summary.clone())
            .with_stop_reason(outcome.stop.as_str());
        let edits = outcome.edits.clone();
        env.push_context("Code Agent", move |c| c.add_task_entry(entry, edits))
            .await?;

        if outcome.stop.is_success() {
            Ok(ToolOutput::success(format!("CodeAgent success!\n{}", outcome.summary)))
        } else {
            tracing::info!(stop = %outcome.stop, "code agent did not succeed");
            // 只有 Code Agent 真正运行并留下了快照时才提供撤销
            Ok(ToolOutput::failure(format!(
                "CodeAgent was not able to get to a clean working state. Stop reason: {}\n{}",
                outcome.stop, outcome.summary
            ))
            .with_undo_offer())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::agents::{CodeAgent, CodeOutcome, SearchAgent, SearchOutcome, SubAgents, ValidationAgent};
    use crate::context::{Context, ContextHistory};
    use crate::core::TaskScheduler;
    use crate::project::{ProjectFiles, SafeFs};
    use crate::react::EventSink;
    use crate::tools::ToolStatus;

    /// 记录运行时工作区中的可编辑文件
    struct RecordingCodeAgent {
        stop: StopReason,
        seen_editable: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CodeAgent for RecordingCodeAgent {
        async fn run(&self, _instructions: &str, context: &Context, _project: Arc<dyn ProjectFiles>) -> CodeOutcome {
            if let Ok(mut seen) = self.seen_editable.lock() {
                seen.extend(context.editable_files().map(|f| f.to_string()));
            }
            CodeOutcome::stopped(self.stop.clone(), "tried")
        }
    }

    struct FixedTests(Vec<ProjectFile>);

    #[async_trait]
    impl ValidationAgent for FixedTests {
        async fn relevant_tests(&self, _goal: &str, _context: &Context) -> Result<Vec<ProjectFile>, AgentError> {
            Ok(self.0.clone())
        }
    }

    struct NeverSearch;

    #[async_trait]
    impl SearchAgent for NeverSearch {
        async fn search(&self, _query: &str, _context: &Context) -> Result<SearchOutcome, AgentError> {
            std::future::pending().await
        }
    }

    fn env(dir: &std::path::Path, agents: SubAgents) -> ToolEnv {
        ToolEnv {
            scheduler: TaskScheduler::new(ContextHistory::default(), 2),
            project: Arc::new(SafeFs::new(dir)),
            agents,
            cancel: CancellationToken::new(),
            events: EventSink::disabled(),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn test_code_agent_sees_relevant_tests_and_records_task() {
        let dir = tempfile::tempdir().unwrap();
        let code = Arc::new(RecordingCodeAgent {
            stop: StopReason::Success,
            seen_editable: Mutex::new(Vec::new()),
        });
        let env = env(
            dir.path(),
            SubAgents {
                code: Some(code.clone()),
                validation: Some(Arc::new(FixedTests(vec![ProjectFile::new("tests/parse_test.rs")]))),
                ..SubAgents::default()
            },
        );

        let out = CallCodeAgent
            .execute(&env, json!({"instructions": "speed up parse"}))
            .await
            .unwrap();

        assert_eq!(out.status, ToolStatus::Success);
        assert!(!out.offers_undo);
        assert!(out.text.starts_with("CodeAgent success!"));
        assert_eq!(code.seen_editable.lock().unwrap().clone(), vec!["tests/parse_test.rs"]);
        let current = env.current_context();
        assert_eq!(current.task_history().len(), 1);
        assert_eq!(current.task_history()[0].stop_reason.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_code_agent_failure_is_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(
            dir.path(),
            SubAgents {
                code: Some(Arc::new(RecordingCodeAgent {
                    stop: StopReason::ToolLoopExhausted,
                    seen_editable: Mutex::new(Vec::new()),
                })),
                ..SubAgents::default()
            },
        );

        let out = CallCodeAgent
            .execute(&env, json!({"instructions": "rewrite everything"}))
            .await
            .unwrap();

        assert_eq!(out.status, ToolStatus::Failure);
        assert!(out.offers_undo);
        assert!(out.text.contains("not able to get to a clean working state"));
        // 失败也记录任务条目
        assert_eq!(env.current_context().task_history().len(), 1);
    }

    #[tokio::test]
    async fn test_code_agent_that_never_ran_offers_no_undo() {
        let dir = tempfile::tempdir().unwrap();
        let code = Arc::new(RecordingCodeAgent {
            stop: StopReason::Success,
            seen_editable: Mutex::new(Vec::new()),
        });
        let with_agent = env(
            dir.path(),
            SubAgents {
                code: Some(code),
                ..SubAgents::default()
            },
        );
        let bad_args = CallCodeAgent
            .execute(&with_agent, json!({"instr": "oops"}))
            .await
            .unwrap();
        assert_eq!(bad_args.status, ToolStatus::Failure);
        assert!(!bad_args.offers_undo);

        let without_agent = env(dir.path(), SubAgents::default());
        let missing = CallCodeAgent
            .execute(&without_agent, json!({"instructions": "anything"}))
            .await
            .unwrap();
        assert_eq!(missing.text, "Code Agent is not available");
        assert!(!missing.offers_undo);
        assert!(with_agent.current_context().task_history().is_empty());
    }

    #[tokio::test]
    async fn test_search_cancel_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(
            dir.path(),
            SubAgents {
                search: Some(Arc::new(NeverSearch)),
                ..SubAgents::default()
            },
        );
        env.cancel.cancel();

        let err = CallSearchAgent
            .execute(&env, json!({"query": "foo"}))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
