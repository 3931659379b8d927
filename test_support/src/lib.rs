//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Common async test fixtures for all crates

use std::time::Duration;

/// Poll `predicate` every 10ms until it returns true or `timeout` elapses.
///
/// Returns whether the predicate became true in time. Works under both
/// real and paused tokio time.
pub async fn wait_until<F>(timeout: Duration, predicate: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Helper for creating temporary directories in tests
pub fn temp_dir_path() -> std::path::PathBuf {
    std::env::temp_dir().join("cronwork-test")
}
