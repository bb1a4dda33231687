use crate::error::AppError;
use crate::model::Task;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STORE_FILE_NAME: &str = "tasks.json";
const STORE_ENV_VAR: &str = "TASKLANE_STORE_PATH";

pub fn store_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(STORE_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join("tasklane").join(STORE_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("tasklane")
            .join(STORE_FILE_NAME))
    }
}

/// Reads the task file, falling back to an empty list on any failure.
///
/// A missing file is not an error. An unreadable or non-array file is logged
/// and treated as empty; its contents are lost on the next save.
pub fn load_tasks(path: &Path) -> Vec<Task> {
    match read_tasks(path) {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!("ignoring unreadable task file {}: {err}", path.display());
            Vec::new()
        }
    }
}

/// Strict read: the file must be a JSON array. Individual records that fail
/// to decode are dropped with a warning so one bad entry does not cost the
/// whole list.
pub fn read_tasks(path: &Path) -> Result<Vec<Task>, AppError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(AppError::io_at(path, err)),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let records: Vec<serde_json::Value> = serde_json::from_str(&content)?;
    let mut tasks = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Task>(record) {
            Ok(task) => tasks.push(task),
            Err(err) => warn!("dropping malformed task record #{index}: {err}"),
        }
    }

    debug!("loaded {} tasks from {}", tasks.len(), path.display());
    Ok(tasks)
}

/// Rewrites the whole file atomically: the list goes to a sibling temp file
/// which is synced and then renamed over `path`.
pub fn save_tasks(path: &Path, tasks: &[Task]) -> Result<(), AppError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| AppError::io_at(parent, err))?;
    }

    let content = serde_json::to_string_pretty(tasks)?;
    let tmp_path = temp_path_for(path);

    if let Err(err) = write_synced(&tmp_path, content.as_bytes()) {
        std::fs::remove_file(&tmp_path).ok();
        return Err(err);
    }

    if let Err(err) = std::fs::rename(&tmp_path, path) {
        std::fs::remove_file(&tmp_path).ok();
        return Err(AppError::io_at(path, err));
    }

    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| STORE_FILE_NAME.to_string());
    path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let mut file = std::fs::File::create(path).map_err(|err| AppError::io_at(path, err))?;
    file.write_all(bytes)
        .map_err(|err| AppError::io_at(path, err))?;
    file.sync_all().map_err(|err| AppError::io_at(path, err))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions).map_err(|err| AppError::io_at(path, err))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_tasks, read_tasks, save_tasks};
    use crate::model::{NewTask, Task, TaskId, TaskState};
    use std::fs;

    fn sample_task() -> Task {
        let mut task = Task::new(
            TaskId(3),
            NewTask {
                title: "write report".to_string(),
                project: "work".to_string(),
                description: "quarterly numbers".to_string(),
                start_time: 1_767_261_600,
                end_time: 1_767_265_200,
            },
            1_767_200_000,
        );
        task.state = TaskState::CompletedOverdue;
        task.started = true;
        task.completed_time = Some(1_767_270_000);
        task.reminders_sent.r15 = Some(1_767_260_700);
        task.reminders_sent.r10 = Some(1_767_261_000);
        task.reminders_sent.r5 = Some(1_767_261_300);
        task.missed_notifications.missed = Some(1_767_265_200);
        task.missed_notifications.o5 = Some(1_767_265_500);
        task.missed_notifications.last_hour_sent = 2;
        task
    }

    #[test]
    fn save_and_load_round_trip_preserves_json_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let task = sample_task();

        save_tasks(&path, std::slice::from_ref(&task)).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        let loaded = load_tasks(&path);
        assert_eq!(loaded, vec![task]);

        save_tasks(&path, &loaded).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn writes_expected_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        save_tasks(&path, &[sample_task()]).unwrap();
        let stored: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(stored[0]["id"], 3);
        assert_eq!(stored[0]["state"], "completed_overdue");
        assert_eq!(stored[0]["started"], true);
        assert_eq!(stored[0]["completed_time"], 1_767_270_000);
        assert_eq!(stored[0]["reminders_sent"]["r10"], 1_767_261_000);
        assert_eq!(stored[0]["missed_notifications"]["o5"], 1_767_265_500);
        assert_eq!(stored[0]["missed_notifications"]["last_hour_sent"], 2);
        assert!(stored[0]["missed_notifications"].get("o10").is_none());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = read_tasks(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(read_tasks(&path).unwrap_err().code(), "invalid_data");
        assert!(load_tasks(&path).is_empty());
    }

    #[test]
    fn accepts_records_without_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let content = serde_json::json!([
            {
                "title": "legacy",
                "project": "home",
                "description": "from the old app",
                "start_time": 100,
                "end_time": 200,
                "started": false,
                "created": 50
            }
        ]);
        fs::write(&path, content.to_string()).unwrap();

        let loaded = load_tasks(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, TaskId::UNASSIGNED);
        assert_eq!(loaded[0].state, TaskState::Next);
        assert_eq!(loaded[0].completed_time, None);
        assert_eq!(loaded[0].reminders_sent.r15, None);
        assert_eq!(loaded[0].missed_notifications.last_hour_sent, 0);
    }

    #[test]
    fn drops_only_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let content = serde_json::json!([
            { "id": 1, "title": "ok", "start_time": 100, "end_time": 200 },
            { "id": 2, "title": "bad", "start_time": "soon", "end_time": 200 },
            { "id": 3, "title": "also ok", "start_time": 300, "end_time": 400, "state": "active" }
        ]);
        fs::write(&path, content.to_string()).unwrap();

        let loaded = load_tasks(&path);
        let ids: Vec<u64> = loaded.iter().map(|task| task.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(loaded[1].state, TaskState::Active);
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        save_tasks(&path, &[sample_task()]).unwrap();
        save_tasks(&path, &[]).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["tasks.json".to_string()]);
        assert!(load_tasks(&path).is_empty());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("tasks.json");

        save_tasks(&path, &[sample_task()]).unwrap();
        assert_eq!(load_tasks(&path).len(), 1);
    }
}
