//! 上下文层：片段、不可变快照、线性可撤销历史、文件恢复

pub mod fragment;
pub mod history;
pub mod restore;
pub mod snapshot;

pub use fragment::{Fragment, FragmentId, FragmentKind};
pub use history::{ContextHistory, CursorMove, DEFAULT_MAX_DEPTH};
pub use restore::{apply_cursor_move, RestoreReport};
pub use snapshot::{Context, ContextId, FileEdit, Plan, TaskEntry};
