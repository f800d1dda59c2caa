use crate::events::{EventKind, EventSender, ServiceEvent};
use crate::logring::LogRing;
use crate::ports;
use crate::readiness::ReadinessTracker;
use crate::task::ServiceTask;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Booting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServiceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Booting => write!(f, "booting"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopping => write!(f, "stopping"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// The mutable half of a handle. Always behind the entry's mutex; the
/// supervisor task and the executor both touch it, never for longer than a
/// field update.
#[derive(Debug)]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub booted_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    pub restarts: u32,
    /// True once an operator asked for this service to stop (or its boot
    /// timed out). Suppresses the restart policy.
    pub stop_requested: bool,
    pub captures: HashMap<String, Vec<String>>,
    pub endpoints: HashMap<String, String>,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            status: ServiceStatus::Booting,
            pid: None,
            booted_at: None,
            exit_code: None,
            exit_signal: None,
            restarts: 0,
            stop_requested: false,
            captures: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceEntry — one launched instance, owned by the registry
// ---------------------------------------------------------------------------

/// The registry's owned record for one launched instance. Callers never see
/// this directly; they get [`ServiceInfo`] snapshots.
pub struct ServiceEntry {
    pub id: String,
    pub task: ServiceTask,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<ServiceState>,
    pub logs: Mutex<LogRing>,
    pub tracker: Mutex<ReadinessTracker>,
    /// Serializes stop/restart operations on this handle. Reads and the
    /// supervisor task only need the state mutex.
    pub op_lock: Mutex<()>,
    events: EventSender,
}

impl ServiceEntry {
    pub fn new(
        id: String,
        task: ServiceTask,
        tracker: ReadinessTracker,
        log_capacity: usize,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            task,
            created_at: Utc::now(),
            state: Mutex::new(ServiceState::new()),
            logs: Mutex::new(LogRing::new(log_capacity)),
            tracker: Mutex::new(tracker),
            op_lock: Mutex::new(()),
            events,
        }
    }

    /// Best-effort event emission; nobody listening is fine.
    pub fn emit(&self, kind: EventKind) {
        let _ = self.events.send(ServiceEvent {
            handle_id: self.id.clone(),
            kind,
        });
    }

    /// Ports that must be confirmed released before this service counts as
    /// stopped, derived from the resolved endpoint URLs of endpoints
    /// flagged for monitoring.
    pub fn monitored_ports(&self, endpoints: &HashMap<String, String>) -> Vec<u16> {
        let Some(ref readiness) = self.task.readiness else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for pattern in &readiness.patterns {
            for endpoint in &pattern.endpoints {
                if !endpoint.monitor_port_release_upon_termination {
                    continue;
                }
                if let Some(url) = endpoints.get(&endpoint.endpoint_name)
                    && let Some(port) = ports::port_from_url(url)
                    && !out.contains(&port)
                {
                    out.push(port);
                }
            }
        }
        out
    }

    pub async fn snapshot(&self) -> ServiceInfo {
        let state = self.state.lock().await;
        ServiceInfo {
            id: self.id.clone(),
            task_id: self.task.id.clone(),
            title: self.task.title.clone(),
            status: state.status,
            pid: state.pid,
            created_at: self.created_at,
            booted_at: state.booted_at,
            restarts: state.restarts,
            exit_code: state.exit_code,
            captures: state.captures.clone(),
            endpoints: state.endpoints.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Read-only view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booted_at: Option<DateTime<Utc>>,
    pub restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub captures: HashMap<String, Vec<String>>,
    pub endpoints: HashMap<String, String>,
}
