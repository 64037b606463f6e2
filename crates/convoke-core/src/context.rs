//! Cross-task result interpolation.
//!
//! Task inputs may reference upstream results with `{{task_id.result}}`.
//! The scheduler resolves these against the plan's task map just before
//! dispatch. Referenced tasks must exist and be completed. Replacement text
//! is JSON-escaped (marshalled to a JSON string, outer quotes stripped) so a
//! placeholder inside a JSON-encoded input cannot break the document.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use thiserror::Error;

use crate::plan::{Task, TaskStatus};

/// Errors from resolving a task input. A single failed substitution fails
/// the whole resolve.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("reference not found: task {0:?} does not exist in the plan")]
    ReferenceNotFound(String),

    #[error("reference invalid: task {id:?} is {status}, expected completed")]
    ReferenceInvalid { id: String, status: TaskStatus },
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([A-Za-z0-9_-]+)\.result\}\}").expect("static regex"))
}

/// JSON-escape `text` without the enclosing quotes.
fn json_escape(text: &str) -> String {
    let quoted = serde_json::to_string(text).expect("string serialization cannot fail");
    quoted[1..quoted.len() - 1].to_string()
}

/// Replace every `{{task_id.result}}` placeholder in `template` with the
/// escaped result of the referenced task.
pub fn resolve_input(
    template: &str,
    tasks: &HashMap<String, Arc<Task>>,
) -> Result<String, ContextError> {
    let mut failure: Option<ContextError> = None;

    let resolved = placeholder_regex().replace_all(template, |caps: &regex::Captures<'_>| {
        if failure.is_some() {
            return String::new();
        }
        let id = &caps[1];
        match tasks.get(id) {
            None => {
                failure = Some(ContextError::ReferenceNotFound(id.to_string()));
                String::new()
            }
            Some(task) => {
                let status = task.status();
                if status != TaskStatus::Completed {
                    failure = Some(ContextError::ReferenceInvalid {
                        id: id.to_string(),
                        status,
                    });
                    String::new()
                } else {
                    json_escape(&task.result())
                }
            }
        }
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(resolved.into_owned()),
    }
}
