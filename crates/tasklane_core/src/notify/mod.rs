use crate::config::{Config, NotifierKind};
use crate::error::AppError;
use std::sync::Arc;
use tracing::{info, warn};

mod dispatch;
pub use dispatch::NotificationDispatcher;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::DesktopNotifier;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::DesktopNotifier;

const DISABLE_ENV_VAR: &str = "TASKLANE_DISABLE_NOTIFICATIONS";

/// Best-effort sink for user-facing notifications.
///
/// Implementations may fail; callers log the error and move on; nothing is
/// retried.
pub trait NotificationGateway: Send + Sync {
    fn notify(&self, title: &str, message: &str) -> Result<(), AppError>;
}

pub struct NoopNotifier;

impl NotificationGateway for NoopNotifier {
    fn notify(&self, _title: &str, _message: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Writes notifications to the log instead of the desktop.
pub struct LogNotifier;

impl NotificationGateway for LogNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<(), AppError> {
        info!(target: "tasklane::notification", "{title}: {message}");
        Ok(())
    }
}

/// Picks the gateway once, at startup.
pub fn gateway_from_config(config: &Config) -> Arc<dyn NotificationGateway> {
    if std::env::var(DISABLE_ENV_VAR).is_ok() || !config.notifications_enabled {
        return Arc::new(NoopNotifier);
    }

    match config.notifier {
        NotifierKind::None => Arc::new(NoopNotifier),
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Desktop => match platform_notifier() {
            Ok(gateway) => gateway,
            Err(err) => {
                warn!("desktop notifications unavailable ({err}); logging them instead");
                Arc::new(LogNotifier)
            }
        },
    }
}

#[cfg(any(target_os = "linux", windows))]
pub fn platform_notifier() -> Result<Arc<dyn NotificationGateway>, AppError> {
    Ok(Arc::new(DesktopNotifier))
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn platform_notifier() -> Result<Arc<dyn NotificationGateway>, AppError> {
    Err(AppError::invalid_data(
        "notifications are not supported on this platform",
    ))
}
