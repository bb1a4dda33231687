use crate::error::AppError;
use crate::lifecycle;
use crate::model::{NewTask, Task, TaskId, TaskPatch};
use crate::storage::json_store;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Owner of the task collection and its on-disk mirror.
///
/// All reads and writes go through one mutex. Disk writes happen outside it:
/// a mutation bumps a generation counter and clones the list under the lock,
/// then the clone is written under a separate writer lock that skips any
/// generation older than the last one written. The file therefore never
/// moves backwards even when two callers persist at once.
///
/// When a write fails the in-memory change stands and the error is logged
/// and returned; the next successful write brings the file up to date.
///
/// Another process may rewrite the file while this store is open;
/// [`TaskStore::reload_if_changed`] picks that up.
pub struct TaskStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    disk: Mutex<DiskState>,
}

struct StoreState {
    tasks: Vec<Task>,
    next_id: u64,
    generation: u64,
}

/// What this store last saw on disk.
struct DiskState {
    generation: u64,
    stamp: Option<FileStamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

struct PendingWrite {
    tasks: Vec<Task>,
    generation: u64,
}

impl StoreState {
    fn empty() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
            generation: 0,
        }
    }

    /// Installs records read from disk. Ids that cannot be kept are
    /// renumbered; returns whether any id changed.
    fn adopt(&mut self, mut tasks: Vec<Task>) -> bool {
        let assigned = self
            .reserve_ids(&tasks)
            .and_then(|()| self.assign_ids(&mut tasks));
        let renumbered = match assigned {
            Ok(renumbered) => renumbered,
            Err(err) => {
                warn!("{err}; renumbering all {} tasks", tasks.len());
                for (index, task) in tasks.iter_mut().enumerate() {
                    task.id = TaskId(index as u64 + 1);
                }
                self.next_id = tasks.len() as u64 + 1;
                true
            }
        };
        self.tasks = tasks;
        renumbered
    }

    /// Moves the id counter past every id in `tasks`.
    fn reserve_ids(&mut self, tasks: &[Task]) -> Result<(), AppError> {
        if let Some(highest) = tasks.iter().map(|task| task.id.0).max() {
            let next = highest.checked_add(1).ok_or_else(|| {
                AppError::invalid_data(format!("task id {highest} is out of range"))
            })?;
            self.next_id = self.next_id.max(next);
        }
        Ok(())
    }

    /// Gives every unassigned or duplicated id a fresh one.
    fn assign_ids(&mut self, tasks: &mut [Task]) -> Result<bool, AppError> {
        let mut seen = HashSet::new();
        let mut renumbered = false;
        for task in tasks.iter_mut() {
            if !task.id.is_assigned() || !seen.insert(task.id) {
                task.id = self.allocate_id()?;
                seen.insert(task.id);
                renumbered = true;
            }
        }
        Ok(renumbered)
    }

    fn allocate_id(&mut self) -> Result<TaskId, AppError> {
        let id = TaskId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| AppError::invalid_data("no task ids left"))?;
        Ok(id)
    }

    fn position(&self, id: TaskId) -> Result<usize, AppError> {
        self.tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| AppError::not_found(format!("task {id} not found")))
    }

    fn stage_write(&mut self) -> PendingWrite {
        self.generation += 1;
        PendingWrite {
            tasks: self.tasks.clone(),
            generation: self.generation,
        }
    }
}

impl TaskStore {
    /// Loads the collection from `path`. Unreadable files start empty.
    ///
    /// Records without a usable id (written by older versions, duplicated,
    /// or out of range) get one here; the file is rewritten right away so
    /// the ids stick.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stamp = FileStamp::read(&path);
        let mut state = StoreState::empty();
        let renumbered = state.adopt(json_store::load_tasks(&path));
        info!(
            "task store opened at {} with {} tasks",
            path.display(),
            state.tasks.len()
        );

        let store = Self {
            path,
            state: Mutex::new(state),
            disk: Mutex::new(DiskState {
                generation: 0,
                stamp,
            }),
        };

        if renumbered {
            let pending = store.state.lock().stage_write();
            // Failure is already logged; the ids remain valid in memory.
            store.write(pending).ok();
        }

        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted form straight from disk, bypassing memory.
    pub fn load(&self) -> Vec<Task> {
        json_store::load_tasks(&self.path)
    }

    /// Replaces the in-memory collection with the file's contents when the
    /// file changed since this store last read or wrote it. Returns whether
    /// it did.
    ///
    /// A missing or unparseable file leaves memory as it is.
    pub fn reload_if_changed(&self) -> bool {
        let mut disk = self.disk.lock();
        let stamp = FileStamp::read(&self.path);
        if stamp.is_none() || stamp == disk.stamp {
            return false;
        }

        let tasks = match json_store::read_tasks(&self.path) {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(
                    "keeping tasks in memory; {} changed but is unreadable: {err}",
                    self.path.display()
                );
                disk.stamp = stamp;
                return false;
            }
        };

        let pending = {
            let mut state = self.state.lock();
            let renumbered = state.adopt(tasks);
            state.generation += 1;
            disk.generation = state.generation;
            disk.stamp = stamp;
            info!(
                "reloaded {} tasks changed on disk at {}",
                state.tasks.len(),
                self.path.display()
            );
            renumbered.then(|| state.stage_write())
        };
        drop(disk);

        if let Some(pending) = pending {
            self.write(pending).ok();
        }
        true
    }

    /// Replaces the whole collection and persists it.
    pub fn save(&self, tasks: Vec<Task>) -> Result<(), AppError> {
        self.mutate(|state| {
            let mut tasks = tasks;
            state.reserve_ids(&tasks)?;
            state.assign_ids(&mut tasks)?;
            state.tasks = tasks;
            Ok(())
        })
    }

    /// Read-only copy of the collection in stable order.
    pub fn snapshot(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    pub fn get(&self, id: TaskId) -> Result<Task, AppError> {
        let state = self.state.lock();
        let index = state.position(id)?;
        Ok(state.tasks[index].clone())
    }

    pub fn add(&self, draft: NewTask, now: i64) -> Result<Task, AppError> {
        self.mutate(|state| {
            let task = Task::new(state.allocate_id()?, draft, now);
            state.tasks.push(task.clone());
            Ok(task)
        })
    }

    /// Applies `patch` to the current value of task `id`. A patch that moves
    /// either end of the window is rejected if it would leave `end_time`
    /// before `start_time`.
    pub fn edit(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, AppError> {
        self.mutate(|state| {
            let index = state.position(id)?;
            let mut edited = state.tasks[index].clone();
            patch.apply_to(&mut edited);
            let moves_window = patch.start_time.is_some() || patch.end_time.is_some();
            if moves_window && edited.end_time < edited.start_time {
                return Err(AppError::invalid_input("end time is before start time"));
            }
            state.tasks[index] = edited.clone();
            Ok(edited)
        })
    }

    pub fn delete(&self, id: TaskId) -> Result<Task, AppError> {
        self.mutate(|state| {
            let index = state.position(id)?;
            Ok(state.tasks.remove(index))
        })
    }

    pub fn complete(&self, id: TaskId, now: i64) -> Result<Task, AppError> {
        self.mutate(|state| {
            let index = state.position(id)?;
            let task = &mut state.tasks[index];
            lifecycle::complete(task, now)?;
            Ok(task.clone())
        })
    }

    /// Runs `mutation` against the current value of task `id` under the lock.
    ///
    /// The closure works on a copy. Returning `Ok(Some(_))` commits the copy
    /// and persists; `Ok(None)` or an error leaves the task untouched. Unlike
    /// the editor commands, a failed write is only logged here: the commit
    /// has happened and the caller still receives its value.
    pub fn apply<R>(
        &self,
        id: TaskId,
        mutation: impl FnOnce(&mut Task) -> Result<Option<R>, AppError>,
    ) -> Result<Option<R>, AppError> {
        let (result, pending) = {
            let mut state = self.state.lock();
            let index = state.position(id)?;
            let mut working = state.tasks[index].clone();
            match mutation(&mut working)? {
                Some(result) => {
                    state.tasks[index] = working;
                    (Some(result), Some(state.stage_write()))
                }
                None => (None, None),
            }
        };

        if let Some(pending) = pending {
            self.write(pending).ok();
        }
        Ok(result)
    }

    fn mutate<R>(
        &self,
        mutation: impl FnOnce(&mut StoreState) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let (result, pending) = {
            let mut state = self.state.lock();
            let result = mutation(&mut state)?;
            (result, state.stage_write())
        };

        self.write(pending)?;
        Ok(result)
    }

    fn write(&self, pending: PendingWrite) -> Result<(), AppError> {
        let mut disk = self.disk.lock();
        if disk.generation >= pending.generation {
            debug!(
                "skipping stale write of generation {} (on disk: {})",
                pending.generation, disk.generation
            );
            return Ok(());
        }

        match json_store::save_tasks(&self.path, &pending.tasks) {
            Ok(()) => {
                disk.generation = pending.generation;
                disk.stamp = FileStamp::read(&self.path);
                Ok(())
            }
            Err(err) => {
                error!("failed to persist tasks to {}: {err}", self.path.display());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStore;
    use crate::model::{NewTask, Task, TaskId, TaskPatch, TaskState};
    use std::sync::Arc;

    const NOW: i64 = 1_767_261_600;

    fn draft(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            project: "home".to_string(),
            description: "chores".to_string(),
            start_time: NOW + 600,
            end_time: NOW + 4200,
        }
    }

    #[test]
    fn add_assigns_increasing_ids_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));

        let first = store.add(draft("dishes"), NOW).unwrap();
        let second = store.add(draft("laundry"), NOW).unwrap();

        assert_eq!(first.id, TaskId(1));
        assert_eq!(second.id, TaskId(2));
        assert_eq!(first.created, NOW);
        assert_eq!(first.state, TaskState::Next);
        assert_eq!(store.load(), store.snapshot());
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));

        store.add(draft("a"), NOW).unwrap();
        let b = store.add(draft("b"), NOW).unwrap();
        store.delete(b.id).unwrap();
        let c = store.add(draft("c"), NOW).unwrap();

        assert_eq!(c.id, TaskId(3));
    }

    #[test]
    fn reopening_keeps_ids_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        {
            let store = TaskStore::open(&path);
            store.add(draft("a"), NOW).unwrap();
            store.add(draft("b"), NOW).unwrap();
            store.delete(TaskId(1)).unwrap();
        }

        let store = TaskStore::open(&path);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, TaskId(2));
        assert_eq!(store.add(draft("c"), NOW).unwrap().id, TaskId(3));
    }

    #[test]
    fn legacy_records_get_ids_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let legacy = serde_json::json!([
            { "title": "one", "start_time": 1, "end_time": 2 },
            { "id": 5, "title": "two", "start_time": 1, "end_time": 2 },
            { "title": "three", "start_time": 1, "end_time": 2 }
        ]);
        std::fs::write(&path, legacy.to_string()).unwrap();

        let store = TaskStore::open(&path);
        let ids: Vec<u64> = store.snapshot().iter().map(|task| task.id.0).collect();

        assert_eq!(ids, vec![6, 5, 7]);
        assert_eq!(store.load(), store.snapshot());
    }

    #[test]
    fn edit_changes_only_patched_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));
        let task = store.add(draft("dishes"), NOW).unwrap();

        let patch = TaskPatch {
            title: Some("dishes and pans".to_string()),
            end_time: Some(NOW + 7200),
            ..TaskPatch::default()
        };
        let edited = store.edit(task.id, &patch).unwrap();

        assert_eq!(edited.title, "dishes and pans");
        assert_eq!(edited.end_time, NOW + 7200);
        assert_eq!(edited.project, task.project);
        assert_eq!(edited.start_time, task.start_time);
        assert_eq!(store.load()[0], edited);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));

        assert_eq!(store.delete(TaskId(9)).unwrap_err().code(), "not_found");
        assert_eq!(
            store
                .edit(TaskId(9), &TaskPatch::default())
                .unwrap_err()
                .code(),
            "not_found"
        );
        assert_eq!(store.get(TaskId(9)).unwrap_err().code(), "not_found");
    }

    #[test]
    fn complete_sets_state_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));
        let task = store.add(draft("dishes"), NOW).unwrap();

        let done = store.complete(task.id, task.end_time + 1).unwrap();
        assert_eq!(done.state, TaskState::CompletedOverdue);
        assert_eq!(done.completed_time, Some(task.end_time + 1));
        assert_eq!(store.load()[0].state, TaskState::CompletedOverdue);
    }

    #[test]
    fn apply_commits_only_on_some() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));
        let task = store.add(draft("dishes"), NOW).unwrap();

        let skipped = store
            .apply(task.id, |task| {
                task.title = "discarded".to_string();
                Ok(None::<()>)
            })
            .unwrap();
        assert!(skipped.is_none());
        assert_eq!(store.get(task.id).unwrap().title, "dishes");

        let failed = store.apply(task.id, |task| {
            task.title = "discarded".to_string();
            Err::<Option<()>, _>(crate::error::AppError::invalid_data("boom"))
        });
        assert!(failed.is_err());
        assert_eq!(store.get(task.id).unwrap().title, "dishes");

        let applied = store
            .apply(task.id, |task| {
                task.started = true;
                Ok(Some(7))
            })
            .unwrap();
        assert_eq!(applied, Some(7));
        assert!(store.load()[0].started);
    }

    #[test]
    fn save_replaces_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));
        store.add(draft("a"), NOW).unwrap();

        let mut replacement = store.snapshot();
        replacement[0].title = "renamed".to_string();
        store.save(replacement).unwrap();

        assert_eq!(store.load()[0].title, "renamed");
        assert_eq!(store.add(draft("b"), NOW).unwrap().id, TaskId(2));
    }

    #[test]
    fn concurrent_commands_leave_file_matching_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open(dir.path().join("tasks.json")));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for round in 0..25 {
                        let task = store
                            .add(draft(&format!("w{worker}-{round}")), NOW)
                            .unwrap();
                        if round % 3 == 0 {
                            store.delete(task.id).unwrap();
                        } else if round % 3 == 1 {
                            store.complete(task.id, NOW).unwrap();
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 4 * 16);
        assert_eq!(store.load(), snapshot);
    }

    #[test]
    fn out_of_range_ids_are_renumbered_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let records = serde_json::json!([
            { "id": 3, "title": "small", "start_time": 1, "end_time": 2 },
            { "id": u64::MAX, "title": "huge", "start_time": 1, "end_time": 2 }
        ]);
        std::fs::write(&path, records.to_string()).unwrap();

        let store = TaskStore::open(&path);
        let ids: Vec<u64> = store.snapshot().iter().map(|task| task.id.0).collect();

        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.load(), store.snapshot());
        assert_eq!(store.add(draft("next"), NOW).unwrap().id, TaskId(3));
    }

    #[test]
    fn id_counter_stops_at_last_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let records = serde_json::json!([
            { "id": u64::MAX - 1, "title": "almost", "start_time": 1, "end_time": 2 }
        ]);
        std::fs::write(&path, records.to_string()).unwrap();

        let store = TaskStore::open(&path);
        assert_eq!(store.snapshot()[0].id, TaskId(u64::MAX - 1));

        let err = store.add(draft("overflow"), NOW).unwrap_err();
        assert_eq!(err.code(), "invalid_data");
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn save_rejects_out_of_range_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));
        let task = store.add(draft("a"), NOW).unwrap();

        let mut replacement = store.snapshot();
        replacement[0].id = TaskId(u64::MAX);
        assert_eq!(store.save(replacement).unwrap_err().code(), "invalid_data");
        assert_eq!(store.snapshot(), vec![task]);
    }

    #[test]
    fn failed_writes_keep_memory_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let path = blocker.join("tasks.json");
        let store = TaskStore::open(&path);

        let err = store.add(draft("dishes"), NOW).unwrap_err();
        assert_eq!(err.code(), "io_error");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "dishes");

        let applied = store
            .apply(snapshot[0].id, |task| {
                task.started = true;
                Ok(Some(()))
            })
            .unwrap();
        assert_eq!(applied, Some(()));
        assert!(store.get(snapshot[0].id).unwrap().started);
        assert!(!path.exists());

        std::fs::remove_file(&blocker).unwrap();
        std::fs::create_dir(&blocker).unwrap();
        store.add(draft("laundry"), NOW).unwrap();

        let on_disk = store.load();
        assert_eq!(on_disk, store.snapshot());
        assert_eq!(on_disk.len(), 2);
        assert!(on_disk[0].started);
    }

    #[test]
    fn reload_picks_up_changes_from_another_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let watcher = TaskStore::open(&path);
        watcher.add(draft("mine"), NOW).unwrap();
        assert!(!watcher.reload_if_changed());

        let other = TaskStore::open(&path);
        other.add(draft("theirs"), NOW).unwrap();

        assert!(watcher.reload_if_changed());
        assert_eq!(store_titles(&watcher.snapshot()), vec!["mine", "theirs"]);
        assert!(!watcher.reload_if_changed());

        let third = watcher.add(draft("later"), NOW).unwrap();
        assert_eq!(third.id, TaskId(3));
        assert_eq!(store_titles(&other.load()), vec!["mine", "theirs", "later"]);
    }

    #[test]
    fn reload_keeps_memory_when_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let store = TaskStore::open(&path);
        store.add(draft("keep me"), NOW).unwrap();

        std::fs::write(&path, "{ broken").unwrap();

        assert!(!store.reload_if_changed());
        assert_eq!(store.snapshot()[0].title, "keep me");
    }

    #[test]
    fn edit_checks_window_against_current_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"));
        let task = store.add(draft("dishes"), NOW).unwrap();

        store
            .edit(
                task.id,
                &TaskPatch {
                    start_time: Some(NOW + 3000),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        let err = store
            .edit(
                task.id,
                &TaskPatch {
                    end_time: Some(NOW + 2000),
                    ..TaskPatch::default()
                },
            )
            .unwrap_err();

        assert_eq!(err.code(), "invalid_input");
        let current = store.get(task.id).unwrap();
        assert_eq!(current.start_time, NOW + 3000);
        assert_eq!(current.end_time, task.end_time);
        assert_eq!(store.load()[0], current);
    }

    fn store_titles(tasks: &[Task]) -> Vec<String> {
        tasks.iter().map(|task| task.title.clone()).collect()
    }
}
