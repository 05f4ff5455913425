//! 上下文片段：工作区里的文件、代码摘要、文本
//!
//! 每个片段有进程内唯一的 FragmentId，供 dropWorkspaceFragments 按 id 删除。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::project::ProjectFile;

static NEXT_FRAGMENT_ID: AtomicU64 = AtomicU64::new(1);

/// 片段 ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(u64);

impl FragmentId {
    pub fn new() -> Self {
        Self(NEXT_FRAGMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for FragmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for FragmentId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 片段内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentKind {
    /// 整个项目文件
    ProjectPath { file: ProjectFile },
    /// 代码摘要（签名 / 骨架），比整文件更省 token
    Summary { file: ProjectFile, text: String },
    /// 任意文本（粘贴内容、笔记、其它 Agent 的结论）
    Text { description: String, text: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    #[serde(flatten)]
    pub kind: FragmentKind,
}

impl Fragment {
    pub fn new(kind: FragmentKind) -> Self {
        Self {
            id: FragmentId::new(),
            kind,
        }
    }

    pub fn project_path(file: ProjectFile) -> Self {
        Self::new(FragmentKind::ProjectPath { file })
    }

    pub fn summary(file: ProjectFile, text: impl Into<String>) -> Self {
        Self::new(FragmentKind::Summary {
            file,
            text: text.into(),
        })
    }

    pub fn text(description: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(FragmentKind::Text {
            description: description.into(),
            text: text.into(),
        })
    }

    /// 片段对应的主文件（去重 / 合并时以此为键）
    pub fn primary_file(&self) -> Option<&ProjectFile> {
        match &self.kind {
            FragmentKind::ProjectPath { file } | FragmentKind::Summary { file, .. } => Some(file),
            FragmentKind::Text { .. } => None,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.kind, FragmentKind::Summary { .. })
    }

    /// 片段自带的正文（摘要 / 文本）；整文件片段的内容在磁盘上
    pub fn body(&self) -> Option<&str> {
        match &self.kind {
            FragmentKind::ProjectPath { .. } => None,
            FragmentKind::Summary { text, .. } | FragmentKind::Text { text, .. } => Some(text),
        }
    }

    /// 单行描述，用于 prompt 中的工作区清单
    pub fn description(&self) -> String {
        match &self.kind {
            FragmentKind::ProjectPath { file } => file.to_string(),
            FragmentKind::Summary { file, .. } => format!("Summary of {}", file),
            FragmentKind::Text { description, .. } => description.clone(),
        }
    }
}
