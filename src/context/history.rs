//! Context 历史：线性列表 + 光标
//!
//! undo / redo 只移动光标；光标落后于末尾时的任何 push 会先截断 redo 尾部再追加，
//! 因此历史始终是线性的。列表永不为空（根 Context 始终存在），光标始终在 [0, len-1] 内。
//!
//! 本结构本身不加锁：所有修改都经由 TaskScheduler 的 context 通道串行执行。

use std::sync::Arc;

use crate::context::{Context, ContextId};
use crate::core::AgentError;

/// 默认最多保留的快照数
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// 光标移动经过的快照，供 restore 写回文件
#[derive(Debug, Clone, Default)]
pub enum CursorMove {
    /// 光标未动
    #[default]
    None,
    /// 向后移动：被撤销的快照，从新到旧
    Undo(Vec<Arc<Context>>),
    /// 向前移动：被重做的快照，从旧到新
    Redo(Vec<Arc<Context>>),
}

impl CursorMove {
    pub fn steps(&self) -> usize {
        match self {
            CursorMove::None => 0,
            CursorMove::Undo(v) | CursorMove::Redo(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextHistory {
    contexts: Vec<Arc<Context>>,
    cursor: usize,
    max_depth: usize,
}

impl ContextHistory {
    pub fn new(root: Context) -> Self {
        Self {
            contexts: vec![Arc::new(root)],
            cursor: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self.truncate();
        self
    }

    /// 光标指向的当前 Context
    pub fn current(&self) -> &Arc<Context> {
        &self.contexts[self.cursor]
    }

    /// 全部快照（旧 -> 新），包括光标之后的 redo 部分
    pub fn contexts(&self) -> &[Arc<Context>] {
        &self.contexts
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn has_undo_states(&self) -> bool {
        self.cursor > 0
    }

    pub fn has_redo_states(&self) -> bool {
        self.cursor + 1 < self.contexts.len()
    }

    pub fn index_of(&self, id: ContextId) -> Option<usize> {
        self.contexts.iter().position(|c| c.id() == id)
    }

    pub fn get(&self, id: ContextId) -> Option<&Arc<Context>> {
        self.contexts.iter().find(|c| c.id() == id)
    }

    /// 在光标处追加：先丢弃 redo 尾部，再追加并把光标移到末尾
    pub fn push(&mut self, context: Context) -> Arc<Context> {
        self.contexts.truncate(self.cursor + 1);
        let context = Arc::new(context);
        self.contexts.push(context.clone());
        self.cursor = self.contexts.len() - 1;
        self.truncate();
        context
    }

    /// 与当前 Context 相同（同 id）时不入栈；返回是否入栈
    pub fn push_if_changed(&mut self, next: Context) -> bool {
        if next.id() == self.current().id() {
            return false;
        }
        self.push(next);
        true
    }

    /// 光标后退一步；已在根部时返回 false
    pub fn undo(&mut self) -> bool {
        !self.undo_steps(1).is_empty()
    }

    /// 光标后退最多 steps 步，返回被撤销的快照（从新到旧）
    pub fn undo_steps(&mut self, steps: usize) -> Vec<Arc<Context>> {
        let steps = steps.min(self.cursor);
        let undone: Vec<Arc<Context>> = (0..steps)
            .map(|i| self.contexts[self.cursor - i].clone())
            .collect();
        self.cursor -= steps;
        if steps > 0 {
            tracing::debug!(steps, cursor = self.cursor, "context history undo");
        }
        undone
    }

    /// 光标前进一步；已在末尾时返回 false
    pub fn redo(&mut self) -> bool {
        self.redo_step().is_some()
    }

    /// 光标前进一步，返回新的当前快照
    pub fn redo_step(&mut self) -> Option<Arc<Context>> {
        if !self.has_redo_states() {
            return None;
        }
        self.cursor += 1;
        tracing::debug!(cursor = self.cursor, "context history redo");
        Some(self.current().clone())
    }

    /// 把光标直接移到 target 所在位置；target 不在历史中时报错
    pub fn undo_until(&mut self, target: ContextId) -> Result<CursorMove, AgentError> {
        let idx = self
            .index_of(target)
            .ok_or(AgentError::ContextNotFound(target))?;
        let movement = if idx < self.cursor {
            CursorMove::Undo(self.undo_steps(self.cursor - idx))
        } else if idx > self.cursor {
            let redone = self.contexts[self.cursor + 1..=idx].to_vec();
            self.cursor = idx;
            CursorMove::Redo(redone)
        } else {
            CursorMove::None
        };
        Ok(movement)
    }

    /// 以 target 的文件 / 片段状态新建一个 Context 并 push 到末尾；
    /// 不回退光标，也不丢弃 target 之后的历史
    pub fn reset_to(
        &mut self,
        target: ContextId,
        include_history: bool,
    ) -> Result<Arc<Context>, AgentError> {
        let source = self
            .get(target)
            .cloned()
            .ok_or(AgentError::ContextNotFound(target))?;
        let next = Context::create_from(&source, self.current(), include_history);
        Ok(self.push(next))
    }

    /// 超出 max_depth 时丢弃最旧的快照
    fn truncate(&mut self) {
        if self.contexts.len() <= self.max_depth {
            return;
        }
        let excess = self.contexts.len() - self.max_depth;
        let excess = excess.min(self.cursor);
        if excess == 0 {
            return;
        }
        self.contexts.drain(..excess);
        self.cursor -= excess;
        tracing::debug!(removed = excess, "truncated context history");
    }
}

impl Default for ContextHistory {
    fn default() -> Self {
        Self::new(Context::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Plan;
    use crate::project::ProjectFile;

    fn ctx_with_plan(history: &ContextHistory, text: &str) -> Context {
        history.current().with_plan(Plan::new(text))
    }

    #[test]
    fn test_never_empty() {
        let mut history = ContextHistory::default();
        assert_eq!(history.len(), 1);
        assert!(!history.undo());
        assert!(!history.redo());
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_push_after_undo_discards_redo_tail() {
        let mut history = ContextHistory::default();
        let a = history.push(ctx_with_plan(&history, "A"));
        let b = history.push(ctx_with_plan(&history, "B"));
        assert!(history.undo());
        assert_eq!(history.current().id(), a.id());

        let c = history.push(ctx_with_plan(&history, "C"));
        assert!(history.index_of(b.id()).is_none());
        assert_eq!(history.current().id(), c.id());
        assert!(!history.redo());
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_undo_redo_moves_cursor_only() {
        let mut history = ContextHistory::default();
        history.push(ctx_with_plan(&history, "A"));
        let b = history.push(ctx_with_plan(&history, "B"));
        assert!(history.undo());
        assert!(history.undo());
        assert!(!history.undo());
        assert_eq!(history.len(), 3);
        assert!(history.redo());
        assert!(history.redo());
        assert!(!history.redo());
        assert_eq!(history.current().id(), b.id());
    }

    #[test]
    fn test_undo_until() {
        let mut history = ContextHistory::default();
        let root = history.current().id();
        let a = history.push(ctx_with_plan(&history, "A"));
        history.push(ctx_with_plan(&history, "B"));
        history.push(ctx_with_plan(&history, "C"));

        let moved = history.undo_until(a.id()).unwrap();
        assert!(matches!(moved, CursorMove::Undo(ref v) if v.len() == 2));
        assert_eq!(history.cursor(), 1);

        let moved = history.undo_until(a.id()).unwrap();
        assert_eq!(moved.steps(), 0);

        // 目标在 redo 区间内时向前移动
        let tip = history.contexts()[3].id();
        let moved = history.undo_until(tip).unwrap();
        assert!(matches!(moved, CursorMove::Redo(ref v) if v.len() == 2));

        history.undo_until(root).unwrap();
        assert_eq!(history.cursor(), 0);

        let missing = Context::empty().id();
        assert!(matches!(
            history.undo_until(missing),
            Err(AgentError::ContextNotFound(_))
        ));
    }

    #[test]
    fn test_reset_to_appends_one_context() {
        let mut history = ContextHistory::default();
        let a = history.push(
            history
                .current()
                .add_editable_files(&[ProjectFile::new("a.rs")]),
        );
        history.push(ctx_with_plan(&history, "B"));
        let len = history.len();
        let cursor = history.cursor();

        let reset = history.reset_to(a.id(), false).unwrap();
        assert_eq!(history.len(), len + 1);
        assert_eq!(history.cursor(), cursor + 1);
        assert_eq!(history.current().id(), reset.id());
        assert_eq!(reset.editable_files().count(), 1);
        assert!(reset.plan().is_none());
        // 之前的快照保持不变
        assert_eq!(history.contexts()[1].id(), a.id());
    }

    #[test]
    fn test_max_depth_drops_oldest() {
        let mut history = ContextHistory::default().with_max_depth(3);
        for i in 0..5 {
            history.push(ctx_with_plan(&history, &format!("P{i}")));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.cursor(), 2);
        assert_eq!(history.current().plan().map(Plan::text), Some("P4"));
    }

    #[test]
    fn test_push_if_changed_skips_identical() {
        let mut history = ContextHistory::default();
        let before = history.current().id();
        let same = history.current().as_ref().clone();
        assert!(!history.push_if_changed(same));
        assert_eq!(history.current().id(), before);
        assert_eq!(history.len(), 1);
    }
}
