//! Editor-facing commands.
//!
//! Input is validated here, before it reaches the store, so a rejected
//! command never leaves a partial task behind.

use crate::error::AppError;
use crate::model::{NewTask, Task, TaskId, TaskPatch, TaskState};
use crate::storage::TaskStore;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub fn add_task(store: &TaskStore, draft: NewTask, now: i64) -> Result<Task, AppError> {
    let draft = NewTask {
        title: required_text("title", &draft.title)?,
        project: required_text("project", &draft.project)?,
        description: required_text("description", &draft.description)?,
        start_time: draft.start_time,
        end_time: draft.end_time,
    };
    check_window(draft.start_time, draft.end_time)?;

    store.add(draft, now)
}

pub fn edit_task(store: &TaskStore, id: TaskId, patch: TaskPatch) -> Result<Task, AppError> {
    if patch.is_empty() {
        return Err(AppError::invalid_input("nothing to change"));
    }

    let patch = TaskPatch {
        title: optional_text("title", patch.title)?,
        project: optional_text("project", patch.project)?,
        description: optional_text("description", patch.description)?,
        start_time: patch.start_time,
        end_time: patch.end_time,
    };

    // The window is checked by the store against the task's current value.
    store.edit(id, &patch)
}

pub fn delete_task(store: &TaskStore, id: TaskId) -> Result<Task, AppError> {
    store.delete(id)
}

pub fn complete_task(store: &TaskStore, id: TaskId, now: i64) -> Result<Task, AppError> {
    store.complete(id, now)
}

pub fn get_task(store: &TaskStore, id: TaskId) -> Result<Task, AppError> {
    store.get(id)
}

pub fn list_tasks(store: &TaskStore) -> Vec<Task> {
    store.snapshot()
}

pub fn parse_task_id(raw: &str) -> Result<TaskId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("id is required"));
    }

    match trimmed.parse::<u64>() {
        Ok(value) if value > 0 => Ok(TaskId(value)),
        _ => Err(AppError::invalid_input(format!("invalid task id '{trimmed}'"))),
    }
}

/// Display label for a task as of `now`.
pub fn status_label(task: &Task, now: i64) -> &'static str {
    match task.state {
        TaskState::Completed => "completed",
        TaskState::CompletedOverdue => "completed (overdue)",
        TaskState::Active if task.is_overdue_at(now) => "active (overdue)",
        TaskState::Active => "active",
        TaskState::Next if task.is_overdue_at(now) => "next (overdue)",
        TaskState::Next => "next",
    }
}

pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Accepts RFC3339, or `YYYY-MM-DD HH:MM[:SS]` read in `offset`.
pub fn parse_datetime(raw: &str, offset: UtcOffset) -> Result<i64, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("datetime is required"));
    }

    if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(parsed.unix_timestamp());
    }

    let with_seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let without_seconds = format_description!("[year]-[month]-[day] [hour]:[minute]");
    PrimitiveDateTime::parse(trimmed, with_seconds)
        .or_else(|_| PrimitiveDateTime::parse(trimmed, without_seconds))
        .map(|local| local.assume_offset(offset).unix_timestamp())
        .map_err(|_| {
            AppError::invalid_input(format!(
                "datetime '{trimmed}' must be RFC3339 or YYYY-MM-DD HH:MM"
            ))
        })
}

pub fn format_epoch(epoch: i64, offset: UtcOffset) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]");
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|value| value.to_offset(offset).format(format).ok())
        .unwrap_or_else(|| epoch.to_string())
}

fn required_text(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn optional_text(field: &str, value: Option<String>) -> Result<Option<String>, AppError> {
    value.map(|value| required_text(field, &value)).transpose()
}

fn check_window(start_time: i64, end_time: i64) -> Result<(), AppError> {
    if end_time < start_time {
        return Err(AppError::invalid_input("end time is before start time"));
    }
    Ok(())
}
