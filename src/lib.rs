//! Supervisor for long-running external service processes.
//!
//! `warden` starts, observes and deterministically stops subprocesses that
//! have no fixed lifetime: dev servers, watch-mode build tools, local
//! daemons. A [`ServiceExecutor`] owns every launched service, detects
//! readiness by matching regex patterns against process output, discovers
//! endpoint URLs from capture groups, and on stop escalates from a polite
//! signal to SIGKILL and waits for monitored ports to actually be released.

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod launcher;
pub mod logring;
pub mod ports;
pub mod readiness;
pub mod restart;
pub mod service;
pub mod shutdown;
pub mod task;

pub use error::ServiceError;
pub use events::{EventKind, ServiceEvent};
pub use executor::{ServiceExecutor, StopOptions};
pub use logring::{LogEntry, LogRing, LogStream};
pub use service::{ServiceInfo, ServiceStatus};
pub use task::{
    EndpointCapture, GracefulShutdown, ReadinessConfig, ReadinessPattern, RestartPolicy,
    ServiceTask, StreamSelector,
};
