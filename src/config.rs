//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ARCHITECT__*` 覆盖（双下划线表示嵌套，如 `ARCHITECT__TOOLS__TOOL_TIMEOUT_SECS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::context::DEFAULT_MAX_DEPTH;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub architect: ArchitectSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub tools: ToolsSection,
}

impl AppConfig {
    /// 项目根目录，未设置时用 ./workspace
    pub fn workspace_root(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录
    pub workspace_root: Option<PathBuf>,
}

/// [architect] 段：规划循环提供哪些工具与 Agent
#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectSection {
    #[serde(default = "default_true")]
    pub include_context_agent: bool,
    #[serde(default = "default_true")]
    pub include_validation_agent: bool,
    #[serde(default = "default_true")]
    pub include_workspace_tools: bool,
    #[serde(default = "default_true")]
    pub include_search_agent: bool,
    #[serde(default = "default_true")]
    pub include_code_agent: bool,
    /// 未设置表示不限轮数
    #[serde(default)]
    pub max_turns: Option<usize>,
    #[serde(default = "default_related_context_limit")]
    pub related_context_limit: usize,
}

impl Default for ArchitectSection {
    fn default() -> Self {
        Self {
            include_context_agent: true,
            include_validation_agent: true,
            include_workspace_tools: true,
            include_search_agent: true,
            include_code_agent: true,
            max_turns: None,
            related_context_limit: default_related_context_limit(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_related_context_limit() -> usize {
    10
}

/// [scheduler] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// background 通道并发上限
    #[serde(default = "default_max_background_tasks")]
    pub max_background_tasks: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_background_tasks: default_max_background_tasks(),
        }
    }
}

fn default_max_background_tasks() -> usize {
    4
}

/// [history] 段
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），0 表示不限；委派类工具不受此限制
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// 从 config 目录加载配置，环境变量 ARCHITECT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ARCHITECT__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ARCHITECT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
