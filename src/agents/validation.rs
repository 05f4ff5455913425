//! Validation Agent：按启发式找出与目标相关的测试文件
//!
//! 测试文件识别用路径正则（tests/ 目录、_test / .spec 后缀、test_ 前缀等）；
//! 相关度 = 路径中包含的工作区文件名 ×2 + 内容中出现的目标关键词数。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::agents::ValidationAgent;
use crate::context::Context;
use crate::core::AgentError;
use crate::project::{run_blocking, ProjectFile, ProjectFiles};

/// 默认最多返回的测试文件数
const DEFAULT_MAX_FILES: usize = 10;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "function", "method", "file",
    "files", "code", "make", "should", "when", "then", "add", "fix", "use", "all",
];

fn test_path_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(^|/)(tests?|__tests__|spec)/|(_test|_tests|_spec|Test|Tests|\.test|\.spec)\.[A-Za-z]+$|(^|/)test_[^/]+$",
        )
        .ok()
    })
    .as_ref()
}

pub(crate) fn word_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").ok())
        .as_ref()
}

/// 路径是否像测试代码
pub fn is_test_file(file: &ProjectFile) -> bool {
    test_path_regex().is_some_and(|re| re.is_match(file.as_str()))
}

/// 目标中的关键词（小写、去停用词、去重）
fn keywords(goal: &str) -> Vec<String> {
    let Some(re) = word_regex() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.find_iter(goal)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

pub(crate) fn file_stem(file: &ProjectFile) -> Option<String> {
    let name = file.file_name();
    let stem = name.split('.').next().unwrap_or(name).to_lowercase();
    (stem.len() >= 3).then_some(stem)
}

/// 基于项目文件扫描的 Validation Agent
pub struct TestFileValidationAgent {
    project: Arc<dyn ProjectFiles>,
    max_files: usize,
}

impl TestFileValidationAgent {
    pub fn new(project: Arc<dyn ProjectFiles>) -> Self {
        Self {
            project,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }
}

fn score(project: &dyn ProjectFiles, test: &ProjectFile, stems: &[String], words: &[String]) -> usize {
    let path = test.as_str().to_lowercase();
    let path_hits = stems.iter().filter(|s| path.contains(s.as_str())).count();
    let content_hits = match project.read(test) {
        Ok(content) => {
            let content = content.to_lowercase();
            words.iter().filter(|w| content.contains(w.as_str())).count()
        }
        Err(e) => {
            tracing::debug!(file = %test, error = %e, "skip unreadable test file");
            0
        }
    };
    path_hits * 2 + content_hits
}

#[async_trait]
impl ValidationAgent for TestFileValidationAgent {
    async fn relevant_tests(
        &self,
        goal: &str,
        context: &Context,
    ) -> Result<Vec<ProjectFile>, AgentError> {
        let words = keywords(goal);
        let stems: Vec<String> = context
            .editable_files()
            .chain(context.readonly_files())
            .filter(|f| !is_test_file(f))
            .filter_map(file_stem)
            .collect();
        if words.is_empty() && stems.is_empty() {
            return Ok(Vec::new());
        }

        let max_files = self.max_files;
        let files = run_blocking(&self.project, move |project| {
            let mut scored: Vec<(usize, ProjectFile)> = project
                .list_files()
                .into_iter()
                .filter(is_test_file)
                .map(|f| (score(project, &f, &stems, &words), f))
                .filter(|(score, _)| *score > 0)
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
            scored
                .into_iter()
                .take(max_files)
                .map(|(_, f)| f)
                .collect::<Vec<ProjectFile>>()
        })
        .await?;
        tracing::debug!(count = files.len(), "validation agent found tests");
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::SafeFs;

    #[test]
    fn test_is_test_file() {
        for path in [
            "tests/integration.rs",
            "src/foo_test.go",
            "src/test/java/FooTest.java",
            "web/app.spec.ts",
            "pkg/test_utils.py",
        ] {
            assert!(is_test_file(&ProjectFile::new(path)), "{path}");
        }
        for path in ["src/lib.rs", "src/contest.rs", "latest/main.rs"] {
            assert!(!is_test_file(&ProjectFile::new(path)), "{path}");
        }
    }

    #[tokio::test]
    async fn test_ranks_tests_by_relevance() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(SafeFs::new(dir.path()));
        fs.write(&ProjectFile::new("src/parser.rs"), "pub fn parse() {}").unwrap();
        fs.write(&ProjectFile::new("tests/parser_test.rs"), "parse(); tokenize();").unwrap();
        fs.write(&ProjectFile::new("tests/tokenize_test.rs"), "tokenize();").unwrap();
        fs.write(&ProjectFile::new("tests/unrelated_test.rs"), "fn other() {}").unwrap();

        let agent = TestFileValidationAgent::new(fs);
        let context = Context::empty().add_editable_files(&[ProjectFile::new("src/parser.rs")]);
        let files = agent
            .relevant_tests("make tokenize faster", &context)
            .await
            .unwrap();
        assert_eq!(
            files,
            vec![
                ProjectFile::new("tests/parser_test.rs"),
                ProjectFile::new("tests/tokenize_test.rs"),
            ]
        );
    }
}
