//! 规划类工具：projectFinished / abortProject（终止）与 updatePlan

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::context::Plan;
use crate::core::{AgentError, Termination};
use crate::react::AgentEvent;
use crate::tools::registry::{parse_args, schema_of, ToolEnv, ToolHandler, ToolName, ToolOutput};

#[derive(Deserialize, JsonSchema)]
struct ProjectFinishedArgs {
    /// 对完成结果的最终说明
    explanation: String,
}

#[derive(Deserialize, JsonSchema)]
struct AbortProjectArgs {
    /// 无法继续的原因
    reason: String,
}

#[derive(Deserialize, JsonSchema)]
struct UpdatePlanArgs {
    /// 新的完整计划文本（整体替换旧计划）
    plan: String,
}

pub struct ProjectFinished;

#[async_trait]
impl ToolHandler for ProjectFinished {
    fn name(&self) -> ToolName {
        ToolName::ProjectFinished
    }

    fn description(&self) -> &str {
        "Signal that the goal has been fully accomplished. Provide a final explanation for the user. Ends the session."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ProjectFinishedArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: ProjectFinishedArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        env.events.emit(AgentEvent::Output {
            text: format!("# Architect complete\n\n{}", args.explanation),
        });
        Ok(ToolOutput::terminal(
            args.explanation.clone(),
            Termination::Finished {
                explanation: args.explanation,
            },
        ))
    }
}

pub struct AbortProject;

#[async_trait]
impl ToolHandler for AbortProject {
    fn name(&self) -> ToolName {
        ToolName::AbortProject
    }

    fn description(&self) -> &str {
        "Abort the session because the goal cannot be accomplished. Provide the reason."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<AbortProjectArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: AbortProjectArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        env.events.emit(AgentEvent::Output {
            text: format!("# Architect aborted\n\n{}", args.reason),
        });
        Ok(ToolOutput::terminal(
            format!("Aborted: {}", args.reason),
            Termination::Aborted { reason: args.reason },
        ))
    }
}

pub struct UpdatePlan;

#[async_trait]
impl ToolHandler for UpdatePlan {
    fn name(&self) -> ToolName {
        ToolName::UpdatePlan
    }

    fn description(&self) -> &str {
        "Replace the current multi-step plan with a new one. The previous plan is discarded entirely."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<UpdatePlanArgs>()
    }

    async fn execute(&self, env: &ToolEnv, args: Value) -> Result<ToolOutput, AgentError> {
        let args: UpdatePlanArgs = match parse_args(self.name(), args) {
            Ok(a) => a,
            Err(out) => return Ok(out),
        };
        if args.plan.trim().is_empty() {
            return Ok(ToolOutput::failure("Plan must not be empty"));
        }
        let plan = Plan::new(args.plan);
        env.push_context("Update plan", move |c| c.with_plan(plan))
            .await?;
        Ok(ToolOutput::success("Plan updated"))
    }
}
