//! Background reconciliation loop.
//!
//! The poller wakes on a fixed interval, snapshots the store and pushes each
//! task through [`lifecycle::reconcile`] in list order. Mutations land via
//! [`TaskStore::apply`], so a task the editor touched since the snapshot is
//! reconciled against its current value.

use crate::error::AppError;
use crate::lifecycle::{self, Notice};
use crate::model::TaskId;
use crate::notify::NotificationDispatcher;
use crate::storage::TaskStore;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sent after a pass that changed at least one task. Receivers should
/// re-read [`TaskStore::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TasksChanged;

#[derive(Debug, Default)]
pub struct PassReport {
    pub activated: Vec<TaskId>,
    pub notices: Vec<Notice>,
    pub failed: Vec<(TaskId, AppError)>,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        !self.activated.is_empty() || !self.notices.is_empty()
    }
}

pub struct Poller {
    store: Arc<TaskStore>,
    dispatcher: NotificationDispatcher,
    interval: Duration,
    delivery_timeout: Duration,
    changed: Option<Sender<TasksChanged>>,
}

impl Poller {
    pub fn new(
        store: Arc<TaskStore>,
        dispatcher: NotificationDispatcher,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            interval,
            delivery_timeout: Duration::from_secs(crate::config::DEFAULT_DELIVERY_TIMEOUT_SECS),
            changed: None,
        }
    }

    pub fn with_change_signal(mut self, sender: Sender<TasksChanged>) -> Self {
        self.changed = Some(sender);
        self
    }

    /// How long shutdown waits for queued notifications to drain.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// One reconciliation pass over every task at `now`.
    ///
    /// A task whose reconciliation fails is logged and skipped; the next pass
    /// tries it again. Changes another process wrote to the task file are
    /// loaded first.
    pub fn run_pass(&self, now: i64) -> PassReport {
        if self.store.reload_if_changed() {
            debug!("task file changed on disk; reloaded before pass");
        }
        let snapshot = self.store.snapshot();
        let mut active = lifecycle::active_exists(&snapshot);
        let mut report = PassReport::default();

        for task in snapshot.iter().filter(|task| task.is_live()) {
            let lane_taken = active;
            let result = self.store.apply(task.id, |current| {
                let outcome = lifecycle::reconcile(current, now, lane_taken)?;
                Ok(outcome.changed().then_some(outcome))
            });

            match result {
                Ok(Some(outcome)) => {
                    if outcome.activated {
                        info!("task {} '{}' is now active", task.id, task.title);
                        active = true;
                        report.activated.push(task.id);
                    }
                    for notice in &outcome.notices {
                        self.dispatcher.send(&notice.title, &notice.message);
                    }
                    report.notices.extend(outcome.notices);
                }
                Ok(None) => {}
                Err(AppError::NotFound(_)) => {
                    debug!("task {} deleted during pass", task.id);
                }
                Err(err) => {
                    warn!("skipping task {} this pass: {err}", task.id);
                    report.failed.push((task.id, err));
                }
            }
        }

        if report.changed()
            && let Some(sender) = &self.changed
        {
            // A full channel already holds a pending refresh.
            sender.try_send(TasksChanged).ok();
        }

        debug!(
            "pass at {now}: {} activated, {} notifications, {} failed",
            report.activated.len(),
            report.notices.len(),
            report.failed.len()
        );
        report
    }

    /// Moves the poller onto its own thread.
    ///
    /// Each iteration sleeps for the interval, then runs a pass. The stop
    /// signal interrupts the sleep, so [`PollerHandle::stop`] returns once
    /// any pass in flight has finished.
    pub fn spawn(self) -> Result<PollerHandle, AppError> {
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("tasklane-poller".to_string())
            .spawn(move || {
                info!("poller started, interval {:?}", self.interval);
                loop {
                    match stop_rx.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    self.run_pass(lifecycle::now_epoch());
                }
                self.shutdown();
                info!("poller stopped");
            })
            .map_err(|err| AppError::io(format!("cannot start poller: {err}")))?;

        Ok(PollerHandle { stop, thread })
    }

    /// Flushes pending notifications. Used when passes were driven by hand.
    pub fn shutdown(self) {
        self.dispatcher.shutdown(self.delivery_timeout);
    }
}

pub struct PollerHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        self.stop.try_send(()).ok();
        if self.thread.join().is_err() {
            warn!("poller thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }
}
