//! 项目文件：解析 / 读取 / 写入
//!
//! ProjectFile 是相对项目根目录的规范化路径；ProjectFiles 是编排核心唯一的文件系统入口。
//! SafeFs 绑定 root_dir，所有路径必须落在根目录内（禁止 ../ 逃逸）。

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::core::AgentError;

/// 相对项目根目录的文件路径（统一使用 `/` 分隔）
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectFile(String);

impl ProjectFile {
    pub fn new(relative: impl AsRef<str>) -> Self {
        let normalized = relative.as_ref().replace('\\', "/");
        let trimmed = normalized.trim_start_matches("./").trim_start_matches('/');
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ProjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 项目文件访问契约（外部协作者）
pub trait ProjectFiles: Send + Sync {
    /// 将用户/模型给出的路径解析为 ProjectFile；越界路径返回 PathEscape
    fn resolve(&self, path: &str) -> Result<ProjectFile, AgentError>;

    fn exists(&self, file: &ProjectFile) -> bool;

    fn read(&self, file: &ProjectFile) -> Result<String, AgentError>;

    fn write(&self, file: &ProjectFile, content: &str) -> Result<(), AgentError>;

    fn remove(&self, file: &ProjectFile) -> Result<(), AgentError>;

    /// 项目内全部文件（跳过隐藏目录与 target），按路径排序
    fn list_files(&self) -> Vec<ProjectFile>;
}

/// 在阻塞线程池上执行文件操作，避免 std::fs 占用 async worker
pub async fn run_blocking<T, F>(project: &Arc<dyn ProjectFiles>, work: F) -> Result<T, AgentError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProjectFiles) -> T + Send + 'static,
{
    let project = project.clone();
    tokio::task::spawn_blocking(move || work(project.as_ref()))
        .await
        .map_err(|e| AgentError::TaskPanicked {
            task: "file io".to_string(),
            message: e.to_string(),
        })
}

/// 沙箱文件系统：绑定根目录
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn abs_path(&self, file: &ProjectFile) -> PathBuf {
        self.root_dir.join(file.as_str())
    }
}

impl ProjectFiles for SafeFs {
    fn resolve(&self, path: &str) -> Result<ProjectFile, AgentError> {
        let mut parts: Vec<String> = Vec::new();
        for component in Path::new(path.trim()).components() {
            match component {
                Component::Normal(p) => parts.push(p.to_string_lossy().to_string()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(AgentError::PathEscape(path.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AgentError::PathEscape(path.to_string()));
                }
            }
        }
        if parts.is_empty() {
            return Err(AgentError::InvalidArguments(format!("empty path: '{}'", path)));
        }
        let file = ProjectFile::new(parts.join("/"));
        // 已存在的文件再做一次 canonicalize 校验，防止符号链接逃逸
        if let Ok(canonical) = self.abs_path(&file).canonicalize() {
            if !canonical.starts_with(&self.root_dir) {
                return Err(AgentError::PathEscape(path.to_string()));
            }
        }
        Ok(file)
    }

    fn exists(&self, file: &ProjectFile) -> bool {
        self.abs_path(file).is_file()
    }

    fn read(&self, file: &ProjectFile) -> Result<String, AgentError> {
        std::fs::read_to_string(self.abs_path(file))
            .map_err(|e| AgentError::Io(format!("Read {} failed: {}", file, e)))
    }

    fn write(&self, file: &ProjectFile, content: &str) -> Result<(), AgentError> {
        let path = self.abs_path(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)
            .map_err(|e| AgentError::Io(format!("Write {} failed: {}", file, e)))
    }

    fn remove(&self, file: &ProjectFile) -> Result<(), AgentError> {
        let path = self.abs_path(file);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| AgentError::Io(format!("Remove {} failed: {}", file, e)))?;
        }
        Ok(())
    }

    fn list_files(&self) -> Vec<ProjectFile> {
        let mut files: Vec<ProjectFile> = WalkDir::new(&self.root_dir)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !(name.starts_with('.') || name == "target")
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&self.root_dir)
                    .ok()
                    .map(|rel| ProjectFile::new(rel.to_string_lossy()))
            })
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(dir.path());
        assert!(matches!(
            fs.resolve("../../etc/passwd"),
            Err(AgentError::PathEscape(_))
        ));
        assert!(matches!(fs.resolve("/etc/passwd"), Err(AgentError::PathEscape(_))));
    }

    #[test]
    fn test_resolve_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(dir.path());
        let file = fs.resolve("./src/../src/lib.rs").unwrap();
        assert_eq!(file.as_str(), "src/lib.rs");
        assert_eq!(file.file_name(), "lib.rs");
    }

    #[test]
    fn test_write_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(dir.path());
        fs.write(&ProjectFile::new("src/main.rs"), "fn main() {}").unwrap();
        fs.write(&ProjectFile::new(".git/HEAD"), "ref").unwrap();
        fs.write(&ProjectFile::new("README.md"), "# hi").unwrap();

        let files = fs.list_files();
        assert_eq!(
            files,
            vec![ProjectFile::new("README.md"), ProjectFile::new("src/main.rs")]
        );
        assert_eq!(fs.read(&ProjectFile::new("src/main.rs")).unwrap(), "fn main() {}");

        fs.remove(&ProjectFile::new("README.md")).unwrap();
        assert!(!fs.exists(&ProjectFile::new("README.md")));
    }

    #[tokio::test]
    async fn test_run_blocking_reads_through_project() {
        let dir = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(dir.path());
        fs.write(&ProjectFile::new("a.rs"), "fn a() {}").unwrap();
        let project: Arc<dyn ProjectFiles> = Arc::new(fs);

        let content = run_blocking(&project, |p| p.read(&ProjectFile::new("a.rs")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content, "fn a() {}");
    }
}
