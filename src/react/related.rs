//! 基于文件名提及的简易代码索引
//!
//! 文件 A 的内容中出现了文件 B 的文件名（去扩展名）即视为 A、B 相关（双向）。
//! 常见的模块入口名不参与匹配。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::agents::validation::{file_stem, word_regex};
use crate::project::{ProjectFile, ProjectFiles};
use crate::react::prompt::CodeIntelligence;

const GENERIC_STEMS: &[&str] = &["mod", "lib", "main", "index", "init", "__init__", "utils", "types"];

/// 单个文件超过此大小时不扫描内容
const MAX_SCAN_BYTES: usize = 512 * 1024;

#[derive(Debug, Default, Clone)]
pub struct MentionIndex {
    edges: BTreeMap<ProjectFile, BTreeSet<ProjectFile>>,
}

impl MentionIndex {
    /// 扫描项目全部文件构建索引
    pub fn build(project: &dyn ProjectFiles) -> Self {
        let files = project.list_files();
        let mut by_stem: HashMap<String, Vec<ProjectFile>> = HashMap::new();
        for file in &files {
            if let Some(stem) = file_stem(file).filter(|s| !GENERIC_STEMS.contains(&s.as_str())) {
                by_stem.entry(stem).or_default().push(file.clone());
            }
        }

        let mut index = Self::default();
        let Some(re) = word_regex() else {
            return index;
        };
        for file in &files {
            let Ok(content) = project.read(file) else {
                continue;
            };
            if content.len() > MAX_SCAN_BYTES {
                continue;
            }
            let mentioned: BTreeSet<String> = re
                .find_iter(&content)
                .map(|m| m.as_str().to_lowercase())
                .filter(|w| by_stem.contains_key(w))
                .collect();
            for word in mentioned {
                for target in by_stem.get(&word).into_iter().flatten() {
                    if target != file {
                        index.link(file, target);
                    }
                }
            }
        }
        tracing::debug!(files = index.edges.len(), "built mention index");
        index
    }

    fn link(&mut self, a: &ProjectFile, b: &ProjectFile) {
        self.edges.entry(a.clone()).or_default().insert(b.clone());
        self.edges.entry(b.clone()).or_default().insert(a.clone());
    }
}

impl CodeIntelligence for MentionIndex {
    fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 按与种子文件的关联数降序、路径升序排列；不含种子本身
    fn related_files(&self, seeds: &[ProjectFile], limit: usize) -> Vec<ProjectFile> {
        let mut counts: BTreeMap<&ProjectFile, usize> = BTreeMap::new();
        for seed in seeds {
            for neighbor in self.edges.get(seed).into_iter().flatten() {
                if !seeds.contains(neighbor) {
                    *counts.entry(neighbor).or_default() += 1;
                }
            }
        }
        let mut ranked: Vec<(&ProjectFile, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(limit).map(|(f, _)| f.clone()).collect()
    }
}
