use crate::error::AppError;
use crate::notify::NotificationGateway;
use notify_rust::{Notification, Timeout};

const APP_NAME: &str = "tasklane";

pub struct DesktopNotifier;

impl NotificationGateway for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<(), AppError> {
        Notification::new()
            .appname(APP_NAME)
            .summary(title)
            .body(message)
            .timeout(Timeout::Default)
            .show()
            .map_err(|err| AppError::io(err.to_string()))?;
        Ok(())
    }
}
