/// Errors surfaced by the executor API.
///
/// Anything the caller could not have prevented (unexpected exits, restart
/// exhaustion, slow port release) is reported through status and events
/// instead, since the originating call has already returned by then.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid task: {0}")]
    Validation(String),
    #[error("a service for task '{0}' is already running")]
    AlreadyRunning(String),
    #[error("service not found: {0}")]
    NotFound(String),
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("service did not become ready within {timeout_ms}ms (unmatched patterns: {unmatched:?})")]
    BootTimeout {
        timeout_ms: u64,
        unmatched: Vec<String>,
    },
    #[error("service failed during boot: {0}")]
    BootFailed(String),
    #[error("invalid readiness pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid signal: {0}")]
    InvalidSignal(String),
}
