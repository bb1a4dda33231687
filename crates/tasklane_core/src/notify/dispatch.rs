use crate::error::AppError;
use crate::notify::NotificationGateway;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

struct Delivery {
    title: String,
    message: String,
}

/// Hands notifications to a gateway on a dedicated worker thread.
///
/// `send` only enqueues, so a slow or hung gateway never stalls the caller.
/// Delivery failures are logged and dropped.
pub struct NotificationDispatcher {
    sender: Option<Sender<Delivery>>,
    finished: Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    pub fn spawn(gateway: Arc<dyn NotificationGateway>) -> Result<Self, AppError> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Delivery>();
        let (finished_tx, finished) = crossbeam_channel::bounded(1);

        let worker = std::thread::Builder::new()
            .name("tasklane-notify".to_string())
            .spawn(move || {
                for delivery in receiver {
                    if let Err(err) = gateway.notify(&delivery.title, &delivery.message) {
                        warn!("dropping notification '{}': {err}", delivery.title);
                    }
                }
                finished_tx.send(()).ok();
            })
            .map_err(|err| AppError::io(format!("cannot start notification worker: {err}")))?;

        Ok(Self {
            sender: Some(sender),
            finished,
            worker: Some(worker),
        })
    }

    pub fn send(&self, title: &str, message: &str) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };

        let delivery = Delivery {
            title: title.to_string(),
            message: message.to_string(),
        };
        if sender.send(delivery).is_err() {
            warn!("notification worker is gone; dropping '{title}'");
        }
    }

    /// Stops accepting notifications and waits up to `timeout` for queued
    /// ones to drain. A worker still stuck in the gateway after that is
    /// detached.
    pub fn shutdown(mut self, timeout: Duration) {
        self.sender.take();
        let Some(worker) = self.worker.take() else {
            return;
        };

        match self.finished.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join().is_err() {
                    warn!("notification worker panicked");
                }
                debug!("notification worker stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "notification worker still busy after {:?}; detaching",
                    timeout
                );
            }
        }
    }
}
