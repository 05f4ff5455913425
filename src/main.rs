//! Architect headless runner
//!
//! 用法：`architect <script.json> <goal…>`
//! 按顺序回放脚本中的模型响应（JSON 数组，每项为一个 ModelResponse），对配置的工作区执行目标，
//! 并把过程事件逐行以 JSON 打印到 stdout。子 Agent 与规划循环共用同一个脚本。

use std::sync::Arc;

use anyhow::Context;
use architect::{
    config::load_config,
    llm::ScriptedLlmClient,
    observability,
    project::SafeFs,
    react::{CodeIntelligence, EventSink, MentionIndex},
    Architect,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let script_path = args
        .next()
        .context("usage: architect <script.json> <goal...>")?;
    let goal = args.collect::<Vec<_>>().join(" ");
    anyhow::ensure!(!goal.trim().is_empty(), "usage: architect <script.json> <goal...>");

    let cfg = load_config(None).context("Failed to load config")?;
    let root = cfg.workspace_root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create workspace {}", root.display()))?;
    tracing::info!(
        app = cfg.app.name.as_deref().unwrap_or("architect"),
        workspace = %root.display(),
        "starting"
    );

    let script = std::fs::read_to_string(&script_path)
        .with_context(|| format!("Failed to read script {script_path}"))?;
    let llm = ScriptedLlmClient::from_json(&script).context("Invalid script")?;

    let (events, mut rx) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            }
        }
    });

    let project = Arc::new(SafeFs::new(&root));
    let index = {
        let project = project.clone();
        tokio::task::spawn_blocking(move || MentionIndex::build(&*project))
            .await
            .context("Failed to index workspace")?
    };
    let mut architect = Architect::new(cfg, Arc::new(llm), project, events);
    if !index.is_empty() {
        architect = architect.with_code_intelligence(Arc::new(index));
    }
    let (supervisor, handle) = architect.spawn_goal(goal);

    // Ctrl-C 等同于用户 Stop：循环以 Cancelled 结束后仍正常收尾
    let join = handle.join();
    tokio::pin!(join);
    let report = tokio::select! {
        r = &mut join => r,
        _ = tokio::signal::ctrl_c() => {
            supervisor.cancel();
            join.await
        }
    }
    .context("Architect task failed")?;
    tracing::info!(
        termination = ?report.termination,
        turns = report.turns,
        total_tokens = report.usage.total_tokens,
        "goal finished"
    );

    architect.shutdown();
    drop(architect);
    let _ = printer.await;
    Ok(())
}
