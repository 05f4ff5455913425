//! 工具分发器
//!
//! 一轮模型响应里的 tool call 按名称分入五个优先级桶，严格按序执行：
//! 终止类（至多一个，执行后本批其余工具全部跳过）→ updatePlan → 通用工具（按 rank 稳定排序）
//! → Search 委派（background 通道并发，按批次顺序收集）→ Code 委派（按批次顺序串行，最后执行）。
//! 非委派工具带全局超时；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::ContextId;
use crate::core::task_scheduler::CancelOnDrop;
use crate::core::{AgentError, Termination};
use crate::memory::ToolExecutionRequest;
use crate::react::events::preview;
use crate::react::AgentEvent;
use crate::tools::registry::{
    ToolCategory, ToolEnv, ToolExecutionResult, ToolHandler, ToolName, ToolOutput, ToolRegistry,
    ToolStatus,
};

/// 结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 一批工具的执行结果（按实际执行顺序）
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub results: Vec<ToolExecutionResult>,
    /// 终止类工具生效时的结束原因
    pub termination: Option<Termination>,
}

impl DispatchOutcome {
    /// 是否有工具留下了可撤销的半成品修改
    pub fn offers_undo(&self) -> bool {
        self.results.iter().any(|r| r.offers_undo)
    }
}

/// 去掉 (名称, 参数) 完全相同的重复请求，保留首次出现
pub fn dedup_requests(requests: Vec<ToolExecutionRequest>) -> Vec<ToolExecutionRequest> {
    let mut unique: Vec<ToolExecutionRequest> = Vec::with_capacity(requests.len());
    for request in requests {
        if unique.iter().any(|u| u.same_call(&request)) {
            tracing::debug!(tool = %request.name, "dropping duplicate tool request");
            continue;
        }
        unique.push(request);
    }
    unique
}

struct Planned {
    name: ToolName,
    handler: Arc<dyn ToolHandler>,
    request: ToolExecutionRequest,
}

/// 工具分发器：持有注册表与全局超时
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// tool_timeout_secs 为 0 时不加超时
    pub fn new(registry: ToolRegistry, tool_timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: (tool_timeout_secs > 0).then(|| Duration::from_secs(tool_timeout_secs)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行一批请求；allowed 为本轮提供给模型的工具
    pub async fn dispatch(
        &self,
        env: &ToolEnv,
        requests: Vec<ToolExecutionRequest>,
        allowed: &[ToolName],
    ) -> Result<DispatchOutcome, AgentError> {
        let mut outcome = DispatchOutcome::default();
        let mut buckets: [Vec<Planned>; 5] = Default::default();

        for request in requests {
            let name = match ToolName::parse(&request.name) {
                Some(n) if allowed.contains(&n) => n,
                Some(_) => {
                    let text = format!("Tool {} is not available right now", request.name);
                    outcome.results.push(ToolExecutionResult::failure(request, text));
                    continue;
                }
                None => {
                    let text = format!("Unknown tool: {}", request.name);
                    outcome.results.push(ToolExecutionResult::failure(request, text));
                    continue;
                }
            };
            let Some(handler) = self.registry.get(name) else {
                let text = format!("Tool {name} is not registered");
                outcome.results.push(ToolExecutionResult::failure(request, text));
                continue;
            };
            buckets[bucket_index(name.category())].push(Planned {
                name,
                handler,
                request,
            });
        }
        let [terminal, plan, mut generic, search, code] = buckets;

        // 终止类：projectFinished 优先于 abortProject；生效后不执行本批任何其它工具
        if let Some(chosen) = terminal
            .into_iter()
            .min_by_key(|p| p.name != ToolName::ProjectFinished)
        {
            let (result, termination) = self.run_one(env, chosen, true).await?;
            outcome.results.push(result);
            if let Some(termination) = termination {
                // 已记录的拒绝结果保留，保证每个请求都有对应结果
                tracing::debug!(?termination, "terminal tool executed, skipping rest of batch");
                outcome.termination = Some(termination);
                return Ok(outcome);
            }
        }

        for planned in plan {
            outcome.results.push(self.run_one(env, planned, true).await?.0);
        }

        generic.sort_by_key(|p| p.name.rank());
        for planned in generic {
            outcome.results.push(self.run_one(env, planned, true).await?.0);
        }

        outcome.results.extend(self.run_searches(env, search).await?);

        for planned in code {
            outcome.results.push(self.run_one(env, planned, false).await?.0);
        }

        Ok(outcome)
    }

    /// 执行单个工具；timed 为 false 时不加超时（委派类工具）
    async fn run_one(
        &self,
        env: &ToolEnv,
        planned: Planned,
        timed: bool,
    ) -> Result<(ToolExecutionResult, Option<Termination>), AgentError> {
        let Planned {
            name,
            handler,
            request,
        } = planned;
        emit_call(env, &request);
        let start = Instant::now();
        let args = request.arguments.clone();
        let result = match self.timeout.filter(|_| timed) {
            Some(limit) => {
                let deadline = CancellationToken::new();
                let call_env = ToolEnv {
                    deadline: Some(deadline.clone()),
                    ..env.clone()
                };
                let before = env.current_context().id();
                match tokio::time::timeout(limit, handler.execute(&call_env, args)).await {
                    Ok(r) => r,
                    Err(_) => {
                        deadline.cancel();
                        timed_out(env, name, limit, before).await
                    }
                }
            }
            None => handler.execute(env, args).await,
        };
        let output = escalate(name, result)?;
        audit(name, &request.arguments, &output, start);
        let termination = output.termination.clone();
        let result = ToolExecutionResult::new(request, output);
        emit_result(env, &result);
        Ok((result, termination))
    }

    /// Search 委派：并发提交到 background 通道，按批次顺序收集
    async fn run_searches(
        &self,
        env: &ToolEnv,
        searches: Vec<Planned>,
    ) -> Result<Vec<ToolExecutionResult>, AgentError> {
        if searches.is_empty() {
            return Ok(Vec::new());
        }
        let mut pending = Vec::with_capacity(searches.len());
        for Planned {
            name,
            handler,
            request,
        } in searches
        {
            emit_call(env, &request);
            let task_env = env.clone();
            let args = request.arguments.clone();
            let handle = env.scheduler.submit_background(
                format!("{name}: {}", preview(&request.arguments.to_string(), 60)),
                async move { handler.execute(&task_env, args).await },
            );
            pending.push((name, request, handle, Instant::now()));
        }

        // 提前返回（中断 / 外层 future 被 drop）时取消其余搜索
        let mut guard = CancelOnDrop::new(pending.iter().map(|(_, _, h, _)| h.cancel_token()).collect());
        let mut results = Vec::with_capacity(pending.len());
        for (name, request, handle, start) in pending {
            let output = match handle.join().await {
                Ok(output) => output,
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    tracing::error!(tool = %name, error = %e, "search task failed");
                    ToolOutput::failure(format!("Error executing Search Agent: {e}"))
                }
            };
            audit(name, &request.arguments, &output, start);
            let result = ToolExecutionResult::new(request, output);
            emit_result(env, &result);
            results.push(result);
        }
        guard.disarm();
        Ok(results)
    }
}

/// 超时后等 context 通道排空：排队中的 push 已因 deadline 跳过，超时前已生效的 push 如实报告
async fn timed_out(
    env: &ToolEnv,
    name: ToolName,
    limit: Duration,
    before: ContextId,
) -> Result<ToolOutput, AgentError> {
    let current = env
        .scheduler
        .submit_context("Timeout check", |history| history.current().id())
        .join()
        .await?;
    let mut text = format!("Tool {name} timed out after {}s", limit.as_secs());
    if current != before {
        text.push_str("; the workspace change it made before timing out was kept");
    }
    tracing::warn!(tool = %name, "tool timed out");
    Ok(ToolOutput::failure(text))
}

fn bucket_index(category: ToolCategory) -> usize {
    match category {
        ToolCategory::Terminal => 0,
        ToolCategory::PlanMutating => 1,
        ToolCategory::Generic => 2,
        ToolCategory::Investigative => 3,
        ToolCategory::CodeMutating => 4,
    }
}

/// 工具逃逸的错误是缺陷：取消原样返回，其余包装为 ToolFailed
fn escalate(name: ToolName, result: Result<ToolOutput, AgentError>) -> Result<ToolOutput, AgentError> {
    match result {
        Ok(output) => Ok(output),
        Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
        Err(e @ AgentError::ToolFailed { .. }) => Err(e),
        Err(e) => {
            tracing::error!(tool = %name, error = %e, "tool let an error escape");
            Err(AgentError::ToolFailed {
                tool: name.as_str().to_string(),
                message: e.to_string(),
            })
        }
    }
}

fn emit_call(env: &ToolEnv, request: &ToolExecutionRequest) {
    env.events.emit(AgentEvent::ToolCall {
        tool: request.name.clone(),
        args: request.arguments.clone(),
    });
}

fn emit_result(env: &ToolEnv, result: &ToolExecutionResult) {
    env.events.emit(AgentEvent::ToolResult {
        tool: result.request.name.clone(),
        status: result.status,
        preview: preview(&result.text, RESULT_PREVIEW_CHARS),
    });
}

fn audit(name: ToolName, args: &Value, output: &ToolOutput, start: Instant) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": name.as_str(),
        "ok": output.status == ToolStatus::Success,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": preview(&args.to_string(), 200),
    });
    tracing::info!(audit = %audit, "tool");
}
