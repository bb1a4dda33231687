use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable task identifier, independent of the task's position in the list.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Placeholder carried by records written before ids existed.
    pub const UNASSIGNED: TaskId = TaskId(0);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Next,
    Active,
    Completed,
    CompletedOverdue,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::CompletedOverdue)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::CompletedOverdue => "completed_overdue",
        }
    }
}

/// Pre-start reminders already delivered, keyed by minutes before start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r15: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r10: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r5: Option<i64>,
}

/// Post-deadline notifications already delivered.
///
/// `missed`, `o5`, `o10` and `o15` hold the epoch second they fired at.
/// `last_hour_sent` counts hourly boundaries past `end_time + 15m`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o5: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o10: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o15: Option<i64>,
    #[serde(default)]
    pub last_hour_sent: u64,
}

impl ReminderLog {
    /// Slots paired with their lead time in minutes, earliest first.
    pub fn slots_mut(&mut self) -> [(i64, &mut Option<i64>); 3] {
        [(15, &mut self.r15), (10, &mut self.r10), (5, &mut self.r5)]
    }
}

impl OverdueLog {
    /// Slots paired with minutes past `end_time`; `missed` sits at zero.
    pub fn slots_mut(&mut self) -> [(i64, &mut Option<i64>); 4] {
        [
            (0, &mut self.missed),
            (5, &mut self.o5),
            (10, &mut self.o10),
            (15, &mut self.o15),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub completed_time: Option<i64>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub reminders_sent: ReminderLog,
    #[serde(default)]
    pub missed_notifications: OverdueLog,
}

impl Task {
    /// A fresh task in state `next` with empty notification logs.
    pub fn new(id: TaskId, draft: NewTask, created: i64) -> Self {
        Self {
            id,
            title: draft.title,
            project: draft.project,
            description: draft.description,
            start_time: draft.start_time,
            end_time: draft.end_time,
            state: TaskState::Next,
            started: false,
            completed_time: None,
            created,
            reminders_sent: ReminderLog::default(),
            missed_notifications: OverdueLog::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TaskState::Active
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn is_overdue_at(&self, now: i64) -> bool {
        self.is_live() && now >= self.end_time
    }
}

/// Fields supplied by the editor when creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub project: String,
    pub description: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Partial edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub project: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.project.is_none()
            && self.description.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(project) = &self.project {
            task.project = project.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(start_time) = self.start_time {
            task.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            task.end_time = end_time;
        }
    }
}
