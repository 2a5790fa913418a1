use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Wait until the provided `level` predicate matches `want`, or a timeout
/// expires. Sleeps in small intervals to avoid CPU spinning.
pub fn wait_for_level(
    mut level: impl FnMut() -> bool,
    want: bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while level() != want {
        if Instant::now() >= deadline {
            return Err(HwError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}
