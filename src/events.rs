use crate::logring::LogStream;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Capacity of the multiplexed lifecycle-event channel. Slow subscribers
/// lag rather than block the supervisor.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

pub type EventSender = broadcast::Sender<ServiceEvent>;

/// A lifecycle event tagged with the handle it belongs to. All services
/// share one broadcast channel; subscribers filter by `handle_id`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEvent {
    pub handle_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    ProcessSpawned {
        pid: u32,
        command: String,
        args: Vec<String>,
    },
    Output {
        stream: LogStream,
        line: String,
    },
    Ready {
        endpoints: HashMap<String, String>,
    },
    Exit {
        code: Option<i32>,
        signal: Option<String>,
    },
    Error {
        message: String,
    },
}

pub fn channel() -> (EventSender, broadcast::Receiver<ServiceEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = ServiceEvent {
            handle_id: "web-1".to_string(),
            kind: EventKind::ProcessSpawned {
                pid: 42,
                command: "node".to_string(),
                args: vec!["server.js".to_string()],
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "process-spawned");
        assert_eq!(json["handle_id"], "web-1");
        assert_eq!(json["pid"], 42);
    }

    #[test]
    fn test_ready_event_carries_endpoints() {
        let mut endpoints = HashMap::new();
        endpoints.insert("http".to_string(), "http://localhost:4001".to_string());
        let event = ServiceEvent {
            handle_id: "web-1".to_string(),
            kind: EventKind::Ready { endpoints },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ready");
        assert_eq!(json["endpoints"]["http"], "http://localhost:4001");
    }

    #[test]
    fn test_exit_event_shape() {
        let event = ServiceEvent {
            handle_id: "web-1".to_string(),
            kind: EventKind::Exit {
                code: None,
                signal: Some("SIGKILL".to_string()),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "exit");
        assert_eq!(json["signal"], "SIGKILL");
        assert!(json["code"].is_null());
    }
}
