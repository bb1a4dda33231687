use crate::error::AppError;
use crate::notify::NotificationGateway;
use tauri_winrt_notification::{Duration, Toast};

pub struct DesktopNotifier;

impl NotificationGateway for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<(), AppError> {
        Toast::new(Toast::POWERSHELL_APP_ID)
            .title(title)
            .text1(message)
            .duration(Duration::Short)
            .show()
            .map_err(|err| AppError::io(err.to_string()))?;
        Ok(())
    }
}
