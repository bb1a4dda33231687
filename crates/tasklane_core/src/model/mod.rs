mod task;

pub use task::{NewTask, OverdueLog, ReminderLog, Task, TaskId, TaskPatch, TaskState};
