use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_BOOT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_STOP_SIGNAL: &str = "SIGTERM";
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// ServiceTask — immutable launch spec
// ---------------------------------------------------------------------------

/// What to launch and how to supervise it. The wire shape uses camelCase
/// field names; snake_case aliases are accepted so the same struct reads
/// naturally from TOML config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTask {
    pub id: String,
    pub title: String,
    /// Free-text documentation; never interpreted.
    #[serde(default)]
    pub instructions: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(
        default,
        alias = "working_directory",
        skip_serializing_if = "Option::is_none"
    )]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<HashMap<String, String>>,
    #[serde(
        default,
        alias = "graceful_shutdown",
        skip_serializing_if = "Option::is_none"
    )]
    pub graceful_shutdown: Option<GracefulShutdown>,
    #[serde(
        default,
        alias = "restart_policy",
        skip_serializing_if = "Option::is_none"
    )]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessConfig>,
}

impl ServiceTask {
    /// Reject malformed tasks before any process is spawned.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.id.trim().is_empty() {
            return Err(ServiceError::Validation("task id must not be empty".into()));
        }
        if self.title.trim().is_empty() {
            return Err(ServiceError::Validation("title must not be empty".into()));
        }
        if self.command.trim().is_empty() {
            return Err(ServiceError::Validation(
                "command must not be empty".into(),
            ));
        }
        if let Some(ref policy) = self.restart_policy
            && let Some(retries) = policy.max_retries
            && retries < 0
        {
            return Err(ServiceError::Validation(format!(
                "restart maxRetries must be non-negative, got {retries}"
            )));
        }
        Ok(())
    }

    pub fn boot_timeout(&self) -> Duration {
        let ms = self
            .readiness
            .as_ref()
            .and_then(|r| r.timeout)
            .unwrap_or(DEFAULT_BOOT_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn stop_signal(&self) -> &str {
        self.graceful_shutdown
            .as_ref()
            .and_then(|g| g.signal.as_deref())
            .unwrap_or(DEFAULT_STOP_SIGNAL)
    }

    pub fn stop_timeout(&self) -> Duration {
        let ms = self
            .graceful_shutdown
            .as_ref()
            .and_then(|g| g.timeout)
            .unwrap_or(DEFAULT_STOP_TIMEOUT_MS);
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown override
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GracefulShutdown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Grace period in milliseconds before escalating to SIGKILL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

// ---------------------------------------------------------------------------
// Restart policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicy {
    pub enabled: bool,
    /// Signed on the wire so a negative value can be received and rejected
    /// by validation instead of failing deserialization.
    #[serde(default, alias = "max_retries", skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
    /// Fixed delay in milliseconds between exit and relaunch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl RestartPolicy {
    pub fn max_retries_or_default(&self) -> u32 {
        match self.max_retries {
            Some(n) if n >= 0 => n as u32,
            Some(_) => 0,
            None => DEFAULT_MAX_RETRIES,
        }
    }

    pub fn delay_or_default(&self) -> Duration {
        Duration::from_millis(self.delay.unwrap_or(DEFAULT_RESTART_DELAY_MS))
    }
}

// ---------------------------------------------------------------------------
// Readiness configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessConfig {
    pub patterns: Vec<ReadinessPattern>,
    /// Overall boot timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessPattern {
    pub regex: String,
    /// Regex flags as single characters: `i` `m` `s` `x` `U`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    #[serde(default)]
    pub stream: StreamSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<EndpointCapture>,
}

/// Turns a readiness-pattern match into a discoverable URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointCapture {
    #[serde(alias = "endpoint_name")]
    pub endpoint_name: String,
    #[serde(alias = "endpoint_default_host_url")]
    pub endpoint_default_host_url: String,
    /// 1-based capture group holding the port or path.
    #[serde(alias = "endpoint_capture_group")]
    pub endpoint_capture_group: usize,
    #[serde(default, alias = "monitor_port_release_upon_termination")]
    pub monitor_port_release_upon_termination: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSelector {
    Stdout,
    Stderr,
    #[default]
    #[serde(alias = "either")]
    Any,
}
