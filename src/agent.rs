//! Architect 运行时门面
//!
//! 按配置组装调度器、工具分发器与子 Agent，对外提供：
//! 目标执行（user 通道上的规划循环）、历史操作（undo / redo / undoUntil / resetTo，
//! 均经 context 通道串行执行并写回文件）、Deep Scan 及其推荐的应用。

use std::sync::Arc;

use tokio::sync::watch;

use crate::agents::deep_scan::{apply_recommendations, DeepScan, DeepScanResult};
use crate::agents::{
    CodeAgent, ContextAgent, ModelCodeAgent, ModelContextAgent, ModelSearchAgent, SearchAgent,
    SubAgents, TestFileValidationAgent, ValidationAgent,
};
use crate::config::AppConfig;
use crate::context::{
    apply_cursor_move, Context, ContextHistory, ContextId, CursorMove, Fragment, RestoreReport,
};
use crate::core::{AgentError, SessionSupervisor, TaskHandle, TaskScheduler};
use crate::llm::LlmClient;
use crate::project::ProjectFiles;
use crate::react::{CodeIntelligence, EventSink, LoopOptions, LoopReport, PlanningLoop};
use crate::tools::{Dispatcher, ToolEnv, ToolRegistry};

pub struct Architect {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    project: Arc<dyn ProjectFiles>,
    scheduler: TaskScheduler,
    dispatcher: Dispatcher,
    agents: SubAgents,
    code_intelligence: Option<Arc<dyn CodeIntelligence>>,
    events: EventSink,
}

/// 按 include_* 开关构建模型驱动的子 Agent
fn default_sub_agents(
    config: &AppConfig,
    llm: &Arc<dyn LlmClient>,
    project: &Arc<dyn ProjectFiles>,
) -> SubAgents {
    let flags = &config.architect;
    SubAgents {
        search: flags.include_search_agent.then(|| {
            Arc::new(ModelSearchAgent::new(llm.clone(), project.clone())) as Arc<dyn SearchAgent>
        }),
        code: flags
            .include_code_agent
            .then(|| Arc::new(ModelCodeAgent::new(llm.clone())) as Arc<dyn CodeAgent>),
        context: flags.include_context_agent.then(|| {
            Arc::new(ModelContextAgent::new(
                llm.clone(),
                project.clone(),
                flags.related_context_limit,
            )) as Arc<dyn ContextAgent>
        }),
        validation: flags.include_validation_agent.then(|| {
            Arc::new(TestFileValidationAgent::new(project.clone())) as Arc<dyn ValidationAgent>
        }),
    }
}

impl Architect {
    /// 必须在 tokio 运行时内调用（调度器会启动 context worker）
    pub fn new(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        project: Arc<dyn ProjectFiles>,
        events: EventSink,
    ) -> Self {
        let history = ContextHistory::new(Context::empty()).with_max_depth(config.history.max_depth);
        let scheduler = TaskScheduler::new(history, config.scheduler.max_background_tasks);
        let dispatcher = Dispatcher::new(ToolRegistry::with_defaults(), config.tools.tool_timeout_secs);
        let agents = default_sub_agents(&config, &llm, &project);
        tracing::info!(?agents, "architect components ready");
        Self {
            config,
            llm,
            project,
            scheduler,
            dispatcher,
            agents,
            code_intelligence: None,
            events,
        }
    }

    /// 替换子 Agent（如测试替身）
    pub fn with_sub_agents(mut self, agents: SubAgents) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_code_intelligence(mut self, index: Arc<dyn CodeIntelligence>) -> Self {
        self.code_intelligence = Some(index);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn current_context(&self) -> Arc<Context> {
        self.scheduler.current_context()
    }

    /// 订阅当前 Context 的变化
    pub fn subscribe(&self) -> watch::Receiver<Arc<Context>> {
        self.scheduler.subscribe()
    }

    fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            max_turns: self.config.architect.max_turns,
            related_context_limit: self.config.architect.related_context_limit,
            context_pre_pass: self.config.architect.include_context_agent,
            include_workspace_tools: self.config.architect.include_workspace_tools,
        }
    }

    fn planning_loop(&self, supervisor: &SessionSupervisor) -> PlanningLoop {
        let env = ToolEnv {
            scheduler: self.scheduler.clone(),
            project: self.project.clone(),
            agents: self.agents.clone(),
            cancel: supervisor.cancel_token(),
            events: self.events.clone(),
            deadline: None,
        };
        let planning = PlanningLoop::new(self.llm.clone(), self.dispatcher.clone(), env)
            .with_options(self.loop_options());
        match &self.code_intelligence {
            Some(index) => planning.with_code_intelligence(index.clone()),
            None => planning,
        }
    }

    /// 在 user 通道上启动规划循环；通过返回的 SessionSupervisor 中断（用户 Stop）
    pub fn spawn_goal(&self, goal: impl Into<String>) -> (SessionSupervisor, TaskHandle<LoopReport>) {
        let supervisor = SessionSupervisor::new();
        let planning = self.planning_loop(&supervisor);
        let goal = goal.into();
        let handle = self
            .scheduler
            .submit_user("Architect", async move { Ok(planning.execute(&goal).await) });
        (supervisor, handle)
    }

    /// 运行目标直到终止
    pub async fn run_goal(&self, goal: impl Into<String>) -> Result<LoopReport, AgentError> {
        let (_supervisor, handle) = self.spawn_goal(goal);
        handle.join().await
    }

    /// 撤销一步并把被撤销快照的文件改动写回；已在根部时返回 None
    pub async fn undo(&self) -> Result<Option<RestoreReport>, AgentError> {
        let project = self.project.clone();
        self.scheduler
            .submit_context("Undo", move |history| {
                let undone = history.undo_steps(1);
                (!undone.is_empty())
                    .then(|| apply_cursor_move(project.as_ref(), &CursorMove::Undo(undone)))
            })
            .join()
            .await
    }

    /// 重做一步；已在末尾时返回 None
    pub async fn redo(&self) -> Result<Option<RestoreReport>, AgentError> {
        let project = self.project.clone();
        self.scheduler
            .submit_context("Redo", move |history| {
                history
                    .redo_step()
                    .map(|ctx| apply_cursor_move(project.as_ref(), &CursorMove::Redo(vec![ctx])))
            })
            .join()
            .await
    }

    /// 光标直接移到 target（可前可后）
    pub async fn undo_until(&self, target: ContextId) -> Result<RestoreReport, AgentError> {
        let project = self.project.clone();
        self.scheduler
            .submit_context("Undo until", move |history| {
                history
                    .undo_until(target)
                    .map(|movement| apply_cursor_move(project.as_ref(), &movement))
            })
            .join()
            .await?
    }

    /// 以 target 的工作区状态新建快照并 push；不改动磁盘文件
    pub async fn reset_to(
        &self,
        target: ContextId,
        include_history: bool,
    ) -> Result<Arc<Context>, AgentError> {
        self.scheduler
            .submit_context("Reset context", move |history| {
                history.reset_to(target, include_history)
            })
            .join()
            .await?
    }

    /// 启动 Deep Scan；未配置 Context 或 Validation Agent 时返回 None
    pub fn deep_scan(&self, goal: impl Into<String>) -> Option<TaskHandle<DeepScanResult>> {
        let context_agent = self.agents.context.clone()?;
        let validation_agent = self.agents.validation.clone()?;
        let scan = DeepScan::new(
            self.scheduler.clone(),
            context_agent,
            validation_agent,
            self.events.clone(),
        );
        Some(scan.start(goal))
    }

    /// 把用户选中的 Deep Scan 推荐一次性加入工作区
    pub async fn apply_deep_scan(
        &self,
        fragments: Vec<Fragment>,
    ) -> Result<Option<Arc<Context>>, AgentError> {
        apply_recommendations(&self.scheduler, &self.events, fragments).await
    }

    pub fn shutdown(&self) {
        tracing::info!("architect shutting down");
        self.scheduler.shutdown();
    }
}
