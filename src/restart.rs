use crate::task::RestartPolicy;
use std::time::Duration;

/// Whether an exit should trigger an automatic relaunch.
///
/// Only fires when the exit was not operator-initiated and the task opted
/// in. `restarts` is the number of relaunches already performed for this
/// handle; once it would exceed the retry bound the handle stays failed.
pub fn should_restart(
    policy: Option<&RestartPolicy>,
    stop_requested: bool,
    restarts: u32,
) -> bool {
    if stop_requested {
        return false;
    }
    let Some(policy) = policy else {
        return false;
    };
    policy.enabled && restarts < policy.max_retries_or_default()
}

/// Fixed delay before the relaunch. Deliberately not exponential: the
/// source behavior never escalates between retries.
pub fn restart_delay(policy: Option<&RestartPolicy>) -> Duration {
    policy
        .map(|p| p.delay_or_default())
        .unwrap_or(Duration::ZERO)
}
