//! Per-task scoping of failure fixes.
//!
//! A fix produced by failure analysis names the file it applies to. Before
//! the next attempt, each task receives only the fixes whose file lies inside
//! that task's own file list; leaking a fix across tasks makes generation
//! "repair" files it does not own.

use crate::core::types::{FixInstruction, Task};

/// Select the fixes that fall inside `task`'s file scope.
pub fn fixes_for_task<'a>(task: &Task, fixes: &'a [FixInstruction]) -> Vec<&'a FixInstruction> {
    fixes
        .iter()
        .filter(|fix| task.files.iter().any(|file| file == &fix.file))
        .collect()
}
