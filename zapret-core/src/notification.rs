//! Toast notifications
//!
//! Windows 10/11 toasts through WinRT. Elsewhere the request is only
//! logged; shells on other platforms render `UiEvent::Notification`
//! themselves.

/// Show a system notification, best effort
#[cfg(windows)]
pub fn show_notification(title: &str, message: &str) {
    use winrt_notification::{Duration, Sound, Toast};

    // Proper toasts want a registered AUMID; PowerShell's works everywhere
    // for development builds
    let result = Toast::new(Toast::POWERSHELL_APP_ID)
        .title(title)
        .text1(message)
        .sound(Some(Sound::Default))
        .duration(Duration::Short)
        .show();

    match result {
        Ok(_) => log::debug!("Notification shown: {} - {}", title, message),
        Err(e) => log::warn!("Failed to show notification: {}", e),
    }
}

#[cfg(not(windows))]
pub fn show_notification(title: &str, message: &str) {
    log::debug!("Notification: {} - {}", title, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(windows, ignore)] // Requires a Windows session with notification support
    fn test_show_notification_does_not_panic() {
        show_notification("Test", "This is a test notification");
    }
}
