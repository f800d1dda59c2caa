use crate::error::ServiceError;
use std::str::FromStr;
use std::time::Duration;

pub use nix::sys::signal::Signal;

/// How often process liveness is probed while waiting out the grace period.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accepts `TERM` and `SIGTERM` spellings alike.
pub fn parse_signal(name: &str) -> Result<Signal, ServiceError> {
    let normalized = if name.starts_with("SIG") {
        name.to_string()
    } else {
        format!("SIG{name}")
    };
    Signal::from_str(&normalized).map_err(|_| ServiceError::InvalidSignal(name.to_string()))
}

/// Human-readable name for a raw signal number, for exit reporting.
pub fn signal_name(raw: i32) -> String {
    match Signal::try_from(raw) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {raw}"),
    }
}

/// Sends `signal` to the process group the service was spawned into.
pub fn signal_group(pid: u32, signal: Signal) -> std::io::Result<()> {
    nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid as i32), signal)
        .map_err(std::io::Error::other)
}

/// Forceful kill of the whole group, no grace.
pub fn kill_group(pid: u32) -> std::io::Result<()> {
    signal_group(pid, Signal::SIGKILL)
}

pub fn is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Waits up to `grace` for the process to die after a polite signal was
/// sent; escalates to SIGKILL on the group if it survives. Returns `true`
/// if escalation was needed.
pub async fn escalate_after(pid: u32, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    while is_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            let _ = kill_group(pid);
            return true;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_sigterm() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
    }

    #[test]
    fn test_parse_signal_without_sig_prefix() {
        assert_eq!(parse_signal("INT").unwrap(), Signal::SIGINT);
        assert_eq!(parse_signal("KILL").unwrap(), Signal::SIGKILL);
    }

    #[test]
    fn test_parse_signal_invalid() {
        assert!(matches!(
            parse_signal("BOGUS").unwrap_err(),
            ServiceError::InvalidSignal(_)
        ));
        assert!(parse_signal("").is_err());
    }

    #[test]
    fn test_signal_name_known_and_unknown() {
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(4242), "signal 4242");
    }

    #[tokio::test]
    async fn test_term_kills_polite_process() {
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("30").process_group(0);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();

        signal_group(pid, Signal::SIGTERM).unwrap();
        let escalated = escalate_after(pid, Duration::from_secs(2)).await;
        let status = child.wait().await.unwrap();
        assert!(!escalated);
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_escalates_when_term_is_ignored() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", r#"trap "" TERM; while true; do sleep 0.1; done"#])
            .process_group(0);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        signal_group(pid, Signal::SIGTERM).unwrap();
        let wait = tokio::spawn(async move { child.wait().await });
        let escalated = escalate_after(pid, Duration::from_millis(400)).await;
        assert!(escalated);
        let status = wait.await.unwrap().unwrap();
        assert!(!status.success());
    }
}
