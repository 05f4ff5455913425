//! Deep Scan 集成测试：并发推荐、合并、失败通知与外层取消

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use architect::agents::{ContextAgent, RecommendationResult, SubAgents, ValidationAgent};
use architect::config::AppConfig;
use architect::context::{Context, Fragment};
use architect::core::AgentError;
use architect::llm::ScriptedLlmClient;
use architect::project::{ProjectFile, SafeFs};
use architect::react::{AgentEvent, EventSink};
use architect::Architect;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// drop 时置位，用来观察任务是否被取消
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct FixedContextAgent {
    delay: Duration,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl ContextAgent for FixedContextAgent {
    async fn recommend(&self, _goal: &str, _context: &Context) -> Result<RecommendationResult, AgentError> {
        let _flag = DropFlag(self.dropped.clone());
        tokio::time::sleep(self.delay).await;
        Ok(RecommendationResult {
            reasoning: "parser and lexer carry the grammar".to_string(),
            fragments: vec![
                Fragment::summary(ProjectFile::new("src/parser.rs"), "pub fn parse(src: &str)"),
                Fragment::project_path(ProjectFile::new("src/lexer.rs")),
            ],
        })
    }
}

enum ValidationBehavior {
    Files(Vec<ProjectFile>),
    Fail,
}

struct ScriptedValidation {
    behavior: ValidationBehavior,
    delay: Duration,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl ValidationAgent for ScriptedValidation {
    async fn relevant_tests(&self, _goal: &str, _context: &Context) -> Result<Vec<ProjectFile>, AgentError> {
        let _flag = DropFlag(self.dropped.clone());
        tokio::time::sleep(self.delay).await;
        match &self.behavior {
            ValidationBehavior::Files(files) => Ok(files.clone()),
            ValidationBehavior::Fail => Err(AgentError::Io("test index unavailable".to_string())),
        }
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    architect: Architect,
    events: UnboundedReceiver<AgentEvent>,
    context_dropped: Arc<AtomicBool>,
    validation_dropped: Arc<AtomicBool>,
}

fn fixture(context_delay: Duration, validation: ValidationBehavior, validation_delay: Duration) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let (sink, events) = EventSink::channel();
    let context_dropped = Arc::new(AtomicBool::new(false));
    let validation_dropped = Arc::new(AtomicBool::new(false));
    let agents = SubAgents {
        context: Some(Arc::new(FixedContextAgent {
            delay: context_delay,
            dropped: context_dropped.clone(),
        })),
        validation: Some(Arc::new(ScriptedValidation {
            behavior: validation,
            delay: validation_delay,
            dropped: validation_dropped.clone(),
        })),
        ..SubAgents::default()
    };
    let architect = Architect::new(
        AppConfig::default(),
        Arc::new(ScriptedLlmClient::default()),
        Arc::new(SafeFs::new(dir.path())),
        sink,
    )
    .with_sub_agents(agents);
    Fixture {
        _dir: dir,
        architect,
        events,
        context_dropped,
        validation_dropped,
    }
}

fn drain(rx: &mut UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_for(flag: &AtomicBool) -> bool {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_deep_scan_merges_and_applies_in_one_push() {
    let mut f = fixture(
        Duration::from_millis(20),
        ValidationBehavior::Files(vec![
            ProjectFile::new("tests/parser_test.rs"),
            ProjectFile::new("src/parser.rs"),
        ]),
        Duration::ZERO,
    );

    let handle = f.architect.deep_scan("make the parser faster").unwrap();
    let result = handle.join().await.unwrap();

    let project: Vec<&str> = result
        .project_code
        .iter()
        .filter_map(|f| f.primary_file().map(ProjectFile::as_str))
        .collect();
    assert_eq!(project, vec!["src/lexer.rs", "src/parser.rs"]);
    // 同一文件以 Context Agent 的摘要片段为准
    assert!(result.project_code[1].is_summary());
    assert_eq!(result.test_code.len(), 1);

    let events = drain(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::DeepScanCompleted { test_files, .. } if test_files == &vec!["tests/parser_test.rs".to_string()]
    )));

    let applied = f
        .architect
        .apply_deep_scan(result.fragments().cloned().collect())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(applied.action(), "Add Deep Scan recommendations");
    assert_eq!(applied.all_fragments().count(), 3);
    let pushed: Vec<String> = drain(&mut f.events)
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::ContextPushed { action, .. } => Some(action),
            _ => None,
        })
        .collect();
    assert_eq!(pushed, vec!["Add Deep Scan recommendations".to_string()]);
    let len = f
        .architect
        .scheduler()
        .submit_context("count", |h| h.len())
        .join()
        .await
        .unwrap();
    assert_eq!(len, 2);

    // 空选择不 push
    assert!(f.architect.apply_deep_scan(Vec::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deep_scan_failure_notifies_once_and_cancels_sibling() {
    let mut f = fixture(Duration::from_secs(30), ValidationBehavior::Fail, Duration::ZERO);

    let handle = f.architect.deep_scan("anything").unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("deep scan did not fail fast")
        .unwrap_err();
    assert!(matches!(err, AgentError::Io(_)));
    assert!(wait_for(&f.context_dropped).await);

    let events = drain(&mut f.events);
    let errors: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolError { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Deep Scan failed"));
    assert!(!events
        .iter()
        .any(|e| matches!(e, AgentEvent::Notification { text } if text == "Deep Scan cancelled.")));
    // 失败不产出部分结果
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::DeepScanCompleted { .. })));
}

#[tokio::test]
async fn test_cancelling_deep_scan_cancels_both_agents() {
    let mut f = fixture(
        Duration::from_secs(30),
        ValidationBehavior::Files(Vec::new()),
        Duration::from_secs(30),
    );

    let handle = f.architect.deep_scan("anything").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    assert!(matches!(handle.join().await, Err(AgentError::Cancelled)));
    assert!(wait_for(&f.context_dropped).await);
    assert!(wait_for(&f.validation_dropped).await);

    let events = drain(&mut f.events);
    let notices = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Notification { text } if text == "Deep Scan cancelled."))
        .count();
    assert_eq!(notices, 1);
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolError { .. })));
}

#[tokio::test]
async fn test_deep_scan_requires_both_agents() {
    let dir = tempfile::tempdir().unwrap();
    let architect = Architect::new(
        AppConfig::default(),
        Arc::new(ScriptedLlmClient::default()),
        Arc::new(SafeFs::new(dir.path())),
        EventSink::disabled(),
    )
    .with_sub_agents(SubAgents::default());
    assert!(architect.deep_scan("anything").is_none());
}
