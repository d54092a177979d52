//! Markdown summary of a completed task.

use crate::task::Task;
use crate::util::{markdown_sections, truncate_chars};

/// Results longer than this are shortened in the summary.
const MAX_RESULT_CHARS: usize = 500;

/// Build the final result of a task from its subtask results.
///
/// Each subtask gets a `## <Capability>` section. Long results are reduced
/// to their first markdown section (noting how many were left out), or
/// truncated when they have no section breaks.
pub fn build_summary(task: &Task) -> String {
    let mut out = String::from("# Task Execution Summary\n\n");

    if task.subtasks().is_empty() {
        out.push_str("*No subtasks were planned for this task*\n");
        return out;
    }

    for subtask in task.subtasks() {
        out.push_str(&format!("## {}\n\n", subtask.capability().label()));
        match subtask.result() {
            Some(result) if result.chars().count() > MAX_RESULT_CHARS => {
                let sections = markdown_sections(result);
                if sections.len() > 1 {
                    out.push_str(sections[0]);
                    out.push_str("\n\n");
                    out.push_str(&format!(
                        "*...plus {} more sections...*\n\n",
                        sections.len() - 1
                    ));
                } else {
                    out.push_str(&truncate_chars(result, MAX_RESULT_CHARS));
                    out.push_str("\n\n");
                }
            }
            Some(result) => {
                out.push_str(result);
                out.push_str("\n\n");
            }
            None => out.push_str("*No results provided*\n\n"),
        }
    }
    out
}
