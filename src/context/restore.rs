//! undo / redo 后把磁盘文件恢复到快照状态
//!
//! 撤销：按从新到旧的顺序写回每个 FileEdit 的 before；重做：按从旧到新写回 after。
//! 内容与磁盘一致的文件不重写；单个文件失败不影响其它文件。

use crate::context::{CursorMove, FileEdit};
use crate::project::{ProjectFile, ProjectFiles};

/// 恢复结果：实际写回的文件与失败信息
#[derive(Debug, Default, Clone)]
pub struct RestoreReport {
    pub restored: Vec<ProjectFile>,
    pub failures: Vec<String>,
}

pub fn apply_cursor_move(project: &dyn ProjectFiles, movement: &CursorMove) -> RestoreReport {
    let mut report = RestoreReport::default();
    match movement {
        CursorMove::None => {}
        CursorMove::Undo(undone) => {
            for ctx in undone {
                for edit in ctx.edits().iter().rev() {
                    write_state(project, edit, edit.before.as_deref(), &mut report);
                }
            }
        }
        CursorMove::Redo(redone) => {
            for ctx in redone {
                for edit in ctx.edits() {
                    write_state(project, edit, edit.after.as_deref(), &mut report);
                }
            }
        }
    }
    if !report.restored.is_empty() {
        tracing::info!(files = ?report.restored, "restored files from history");
    }
    report
}

fn write_state(
    project: &dyn ProjectFiles,
    edit: &FileEdit,
    desired: Option<&str>,
    report: &mut RestoreReport,
) {
    let current = if project.exists(&edit.file) {
        project.read(&edit.file).ok()
    } else {
        None
    };
    if current.as_deref() == desired {
        return;
    }
    let result = match desired {
        Some(content) => project.write(&edit.file, content),
        None => project.remove(&edit.file),
    };
    match result {
        Ok(()) => {
            if !report.restored.contains(&edit.file) {
                report.restored.push(edit.file.clone());
            }
        }
        Err(e) => {
            tracing::error!(file = %edit.file, error = %e, "failed to restore file");
            report.failures.push(format!("{}: {}", edit.file, e));
        }
    }
}
