//! Time-driven task lifecycle.
//!
//! Everything here is pure: functions take a task and the current epoch
//! second, mutate the task's bookkeeping and report which notifications are
//! due. Delivery and persistence belong to the caller.

use crate::error::AppError;
use crate::model::{Task, TaskId, TaskState};
use tracing::debug;

const MINUTE: i64 = 60;
const HOUR: i64 = 3600;

/// Hourly overdue notifications start counting from `end_time + 15m`.
pub const HOURLY_OVERDUE_AFTER_SECS: i64 = 15 * MINUTE;

/// Most hourly notices one reconciliation sends. Older missed hours are
/// recorded as sent without a notice.
pub const MAX_HOURLY_CATCH_UP: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Reminder { minutes_before: i64 },
    Missed,
    Overdue { minutes: i64 },
    HourlyOverdue { hours: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub task_id: TaskId,
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    fn new(task: &Task, kind: NoticeKind) -> Self {
        let label = task_label(task);
        let (title, message) = match kind {
            NoticeKind::Reminder { minutes_before } => (
                "Upcoming task".to_string(),
                format!("{label} starts in {minutes_before} minutes"),
            ),
            NoticeKind::Missed => (
                "Deadline missed".to_string(),
                format!("{label} was due to finish"),
            ),
            NoticeKind::Overdue { minutes } => (
                "Task overdue".to_string(),
                format!("{label} is {minutes} minutes overdue"),
            ),
            NoticeKind::HourlyOverdue { hours } => {
                let unit = if hours == 1 { "hour" } else { "hours" };
                (
                    "Task overdue".to_string(),
                    format!("{label} is {hours} {unit} overdue"),
                )
            }
        };

        Self {
            task_id: task.id,
            kind,
            title,
            message,
        }
    }
}

fn task_label(task: &Task) -> String {
    if task.project.trim().is_empty() {
        task.title.clone()
    } else {
        format!("[{}] {}", task.project, task.title)
    }
}

/// What a single reconciliation of one task did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub activated: bool,
    pub notices: Vec<Notice>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        self.activated || !self.notices.is_empty()
    }
}

/// Current wall-clock time in epoch seconds.
pub fn now_epoch() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub fn active_exists(tasks: &[Task]) -> bool {
    tasks.iter().any(Task::is_active)
}

/// Advances `task` to `now`.
///
/// `active_exists` must reflect every other task in the pass, including any
/// activated earlier in the same pass. While it is set, a `next` task is
/// neither activated nor reminded; its overdue ladder still runs.
///
/// Errors only when the task's times sit so close to the `i64` bounds that
/// the ladder thresholds cannot be computed. The task is left untouched in
/// that case.
pub fn reconcile(
    task: &mut Task,
    now: i64,
    active_exists: bool,
) -> Result<Reconciliation, AppError> {
    let mut outcome = Reconciliation::default();
    if task.state.is_terminal() {
        return Ok(outcome);
    }

    let thresholds = Thresholds::for_task(task, now)?;

    if task.state == TaskState::Next && !active_exists {
        if now < task.start_time {
            let mut due = Vec::new();
            for (slot_index, (minutes, slot)) in
                task.reminders_sent.slots_mut().into_iter().enumerate()
            {
                if slot.is_none() && now >= thresholds.reminders[slot_index] {
                    *slot = Some(now);
                    due.push(NoticeKind::Reminder {
                        minutes_before: minutes,
                    });
                }
            }
            outcome
                .notices
                .extend(due.into_iter().map(|kind| Notice::new(task, kind)));
        } else {
            task.state = TaskState::Active;
            task.started = true;
            outcome.activated = true;
        }
    }

    if now >= task.end_time {
        let mut due = Vec::new();
        for (slot_index, (minutes, slot)) in task
            .missed_notifications
            .slots_mut()
            .into_iter()
            .enumerate()
        {
            if slot.is_none() && now >= thresholds.overdue[slot_index] {
                *slot = Some(now);
                due.push(if minutes == 0 {
                    NoticeKind::Missed
                } else {
                    NoticeKind::Overdue { minutes }
                });
            }
        }

        if let Some(elapsed) = thresholds.hourly_elapsed {
            let hours_overdue = (elapsed / HOUR) as u64 + 1;
            let log = &mut task.missed_notifications;
            let backlog = hours_overdue.saturating_sub(log.last_hour_sent);
            if backlog > MAX_HOURLY_CATCH_UP {
                debug!(
                    "task {} is {hours_overdue} hours overdue; skipping {} old hourly notices",
                    task.id,
                    backlog - MAX_HOURLY_CATCH_UP
                );
                log.last_hour_sent = hours_overdue - MAX_HOURLY_CATCH_UP;
            }
            while log.last_hour_sent < hours_overdue {
                log.last_hour_sent += 1;
                due.push(NoticeKind::HourlyOverdue {
                    hours: log.last_hour_sent,
                });
            }
        }

        outcome
            .notices
            .extend(due.into_iter().map(|kind| Notice::new(task, kind)));
    }

    Ok(outcome)
}

/// Marks a live task completed at `now`.
///
/// Finishing strictly after `end_time` yields `completed_overdue`.
pub fn complete(task: &mut Task, now: i64) -> Result<TaskState, AppError> {
    if task.state.is_terminal() {
        return Err(AppError::invalid_input("task already completed"));
    }

    task.state = if now > task.end_time {
        TaskState::CompletedOverdue
    } else {
        TaskState::Completed
    };
    task.completed_time = Some(now);
    Ok(task.state)
}

struct Thresholds {
    reminders: [i64; 3],
    overdue: [i64; 4],
    /// Seconds past `end_time + 15m`, once that point has been passed.
    hourly_elapsed: Option<i64>,
}

impl Thresholds {
    fn for_task(task: &Task, now: i64) -> Result<Self, AppError> {
        let before_start = |minutes: i64| {
            task.start_time
                .checked_sub(minutes * MINUTE)
                .ok_or_else(|| AppError::invalid_data("start_time out of range"))
        };
        let after_end = |minutes: i64| {
            task.end_time
                .checked_add(minutes * MINUTE)
                .ok_or_else(|| AppError::invalid_data("end_time out of range"))
        };

        let hourly_base = task
            .end_time
            .checked_add(HOURLY_OVERDUE_AFTER_SECS)
            .ok_or_else(|| AppError::invalid_data("end_time out of range"))?;
        let hourly_elapsed = if now > hourly_base {
            Some(
                now.checked_sub(hourly_base)
                    .ok_or_else(|| AppError::invalid_data("overdue span out of range"))?,
            )
        } else {
            None
        };

        Ok(Self {
            reminders: [before_start(15)?, before_start(10)?, before_start(5)?],
            overdue: [after_end(0)?, after_end(5)?, after_end(10)?, after_end(15)?],
            hourly_elapsed,
        })
    }
}
