//! 规划循环（Architect）
//!
//! 每轮：构建 prompt -> 调用模型（AwaitingModel）-> 去重 tool call -> Dispatcher 按优先级执行
//! -> 结果按请求 id 写回 transcript -> 下一轮；直到终止工具、模型错误 / 空响应、取消或超出 max_turns。
//! 循环状态（transcript、token 统计、轮数、是否提供 undo）放在 LoopState 中逐轮传递，不作为实例可变字段。

use std::sync::Arc;

use crate::core::{AgentError, LoopPhase, Termination};
use crate::llm::{LlmClient, LlmError, ModelRequest, TokenUsage, ToolChoice};
use crate::memory::{Message, Transcript};
use crate::react::prompt::{self, CodeIntelligence, PromptInput};
use crate::react::AgentEvent;
use crate::tools::{dedup_requests, Dispatcher, ToolEnv, ToolName};

/// 规划循环选项
#[derive(Clone, Debug)]
pub struct LoopOptions {
    /// 超出后以 Aborted 结束；None 表示不限
    pub max_turns: Option<usize>,
    /// 相关上下文提示最多列出的文件数
    pub related_context_limit: usize,
    /// 第一轮前运行一次 Context 推荐
    pub context_pre_pass: bool,
    pub include_workspace_tools: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_turns: None,
            related_context_limit: 10,
            context_pre_pass: true,
            include_workspace_tools: true,
        }
    }
}

/// 逐轮传递的循环状态
#[derive(Debug, Default)]
pub struct LoopState {
    pub transcript: Transcript,
    pub usage: TokenUsage,
    pub turn: usize,
    /// 上一轮 Code Agent 未成功时，本轮额外提供 undoLastChanges
    pub offer_undo: bool,
}

/// 循环结束报告
#[derive(Debug)]
pub struct LoopReport {
    pub termination: Termination,
    pub usage: TokenUsage,
    pub turns: usize,
    pub transcript: Transcript,
}

enum TurnOutcome {
    Continue(LoopState),
    Done(LoopState, Termination),
}

/// 错误映射：取消单独区分，其余为 Error
fn termination_for(error: AgentError) -> Termination {
    match error {
        AgentError::Cancelled => Termination::Cancelled,
        other => Termination::Error {
            message: other.to_string(),
        },
    }
}

pub struct PlanningLoop {
    llm: Arc<dyn LlmClient>,
    dispatcher: Dispatcher,
    env: ToolEnv,
    code_intelligence: Option<Arc<dyn CodeIntelligence>>,
    options: LoopOptions,
}

impl PlanningLoop {
    pub fn new(llm: Arc<dyn LlmClient>, dispatcher: Dispatcher, env: ToolEnv) -> Self {
        Self {
            llm,
            dispatcher,
            env,
            code_intelligence: None,
            options: LoopOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_code_intelligence(mut self, index: Arc<dyn CodeIntelligence>) -> Self {
        self.code_intelligence = Some(index);
        self
    }

    /// 本轮提供给模型的工具
    pub fn offered_tools(&self, offer_undo: bool) -> Vec<ToolName> {
        let mut tools = vec![
            ToolName::ProjectFinished,
            ToolName::AbortProject,
            ToolName::UpdatePlan,
        ];
        if self.options.include_workspace_tools {
            tools.extend([
                ToolName::AddFilesToWorkspace,
                ToolName::AddReadOnlyFilesToWorkspace,
                ToolName::AddTextToWorkspace,
                ToolName::DropWorkspaceFragments,
            ]);
        }
        if self.env.agents.search.is_some() {
            tools.push(ToolName::CallSearchAgent);
        }
        if self.env.agents.code.is_some() {
            tools.push(ToolName::CallCodeAgent);
        }
        if offer_undo {
            tools.push(ToolName::UndoLastChanges);
        }
        tools
    }

    /// 运行直到终止
    pub async fn execute(&self, goal: &str) -> LoopReport {
        tracing::info!(%goal, "architect started");
        let mut state = LoopState::default();

        let termination = match self.context_pre_pass(goal).await {
            Err(e) => termination_for(e),
            Ok(()) => loop {
                match self.run_turn(goal, state).await {
                    TurnOutcome::Continue(next) => state = next,
                    TurnOutcome::Done(last, termination) => {
                        state = last;
                        break termination;
                    }
                }
            },
        };

        self.finish(&termination);
        LoopReport {
            termination,
            usage: state.usage,
            turns: state.turn,
            transcript: state.transcript,
        }
    }

    /// 第一轮前把 Context Agent 的推荐加入工作区；失败只记日志
    async fn context_pre_pass(&self, goal: &str) -> Result<(), AgentError> {
        if !self.options.context_pre_pass {
            return Ok(());
        }
        let Some(agent) = self.env.agents.context.clone() else {
            return Ok(());
        };
        let context = self.env.current_context();
        let result = tokio::select! {
            _ = self.env.cancel.cancelled() => Err(AgentError::Cancelled),
            r = agent.recommend(goal, &context) => r,
        };
        match result {
            Ok(rec) if rec.fragments.is_empty() => Ok(()),
            Ok(rec) => {
                tracing::info!(count = rec.fragments.len(), reasoning = %rec.reasoning, "adding recommended context");
                self.env
                    .push_context("Add recommended context", move |c| {
                        c.add_fragments(rec.fragments, "Add recommended context")
                    })
                    .await
                    .map(|_| ())
            }
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "context agent failed, continuing without recommendations");
                Ok(())
            }
        }
    }

    fn set_phase(&self, phase: LoopPhase) {
        self.env.events.emit(AgentEvent::PhaseChanged { phase });
    }

    async fn run_turn(&self, goal: &str, mut state: LoopState) -> TurnOutcome {
        if self.env.cancel.is_cancelled() {
            return TurnOutcome::Done(state, Termination::Cancelled);
        }
        if let Some(max) = self.options.max_turns {
            if state.turn >= max {
                let reason = format!("Reached the maximum of {max} turns");
                self.env.events.emit(AgentEvent::Output {
                    text: format!("# Architect aborted\n\n{reason}"),
                });
                return TurnOutcome::Done(state, Termination::Aborted { reason });
            }
        }
        state.turn += 1;
        self.env.events.emit(AgentEvent::TurnStarted { turn: state.turn });
        self.set_phase(LoopPhase::Running);

        let context = self.env.current_context();
        let offered = self.offered_tools(state.offer_undo);
        let messages = prompt::build_messages(&PromptInput {
            goal,
            context: &context,
            transcript: &state.transcript,
            code_intelligence: self.code_intelligence.as_deref(),
            related_limit: self.options.related_context_limit,
        });
        // 本轮的目标消息也进入 transcript，下一轮原样带入
        let prompt_message = messages
            .last()
            .cloned()
            .unwrap_or_else(|| prompt::goal_message(goal, context.plan()));
        let request = ModelRequest::new(messages)
            .with_tools(self.dispatcher.registry().specs(&offered), ToolChoice::Required);

        self.set_phase(LoopPhase::AwaitingModel);
        let response = tokio::select! {
            _ = self.env.cancel.cancelled() => Err(LlmError::Cancelled),
            r = self.llm.send(request) => r,
        };
        let response = match response {
            Ok(r) => r,
            Err(LlmError::Cancelled) => return TurnOutcome::Done(state, Termination::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, turn = state.turn, "model call failed");
                return TurnOutcome::Done(state, termination_for(AgentError::from(e)));
            }
        };
        state.usage.add(&response.usage);
        self.env.events.emit(AgentEvent::TokenUsage {
            turn: response.usage,
            cumulative: state.usage,
        });

        let requests = dedup_requests(response.tool_requests);
        if requests.is_empty() {
            tracing::warn!(turn = state.turn, "model response had no tool calls");
            return TurnOutcome::Done(state, termination_for(AgentError::EmptyResponse));
        }
        state.transcript.push(prompt_message);
        state
            .transcript
            .push(Message::assistant_with_tools(response.text, requests.clone()));

        self.set_phase(LoopPhase::Running);
        let dispatched = tokio::select! {
            _ = self.env.cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.dispatcher.dispatch(&self.env, requests, &offered) => r,
        };
        let outcome = match dispatched {
            Ok(o) => o,
            Err(e) => return TurnOutcome::Done(state, termination_for(e)),
        };
        state
            .transcript
            .extend(outcome.results.iter().map(|r| r.to_message()));
        state.offer_undo = outcome.offers_undo();

        match outcome.termination {
            Some(termination) => TurnOutcome::Done(state, termination),
            None => TurnOutcome::Continue(state),
        }
    }

    fn finish(&self, termination: &Termination) {
        match termination {
            Termination::Finished { .. } => tracing::info!("architect finished"),
            Termination::Aborted { reason } => tracing::info!(%reason, "architect aborted"),
            Termination::Cancelled => {
                tracing::info!("architect cancelled");
                self.env.events.notify("Architect cancelled.");
            }
            Termination::Error { message } => {
                tracing::error!(%message, "architect terminated with error");
                self.env.events.error(message.clone());
            }
        }
        self.set_phase(termination.phase());
    }
}
