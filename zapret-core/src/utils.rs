//! Shared helpers for external command invocation and retries

use std::future::Future;
use std::process::Command;
use std::time::Duration;

/// Windows CREATE_NO_WINDOW flag to prevent console windows from appearing
/// when running commands
#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a `Command` that won't flash a console window on Windows
pub fn hidden_command(program: &str) -> Command {
    #[cfg_attr(not(windows), allow(unused_mut))]
    let mut cmd = Command::new(program);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd
}

/// Default retry delays in milliseconds (exponential backoff)
const DEFAULT_RETRY_DELAYS: [u64; 3] = [1000, 2000, 4000];

/// Retry an async operation with exponential backoff
pub async fn with_retry<T, E, F, Fut>(max_attempts: u32, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.clamp(1, 10);
    let mut last_error: Option<E> = None;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < max_attempts {
                    let delay_idx = (attempt as usize - 1).min(DEFAULT_RETRY_DELAYS.len() - 1);
                    let delay_ms = DEFAULT_RETRY_DELAYS[delay_idx];
                    log::warn!(
                        "Attempt {}/{} failed: {}, retrying in {}ms...",
                        attempt,
                        max_attempts,
                        e,
                        delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                } else {
                    log::error!("All {} attempts failed. Last error: {}", max_attempts, e);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.expect("at least one attempt should have been made"))
}
