use crate::error::ServiceError;
use crate::events::{self, EventKind, EventSender, ServiceEvent};
use crate::launcher::{self, LaunchedProcess};
use crate::logring::{DEFAULT_LOG_CAPACITY, LogEntry};
use crate::ports;
use crate::readiness::ReadinessTracker;
use crate::restart;
use crate::service::{ServiceEntry, ServiceInfo, ServiceStatus};
use crate::shutdown;
use crate::task::ServiceTask;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    /// Skip the grace period and kill immediately.
    pub force: bool,
    /// Per-call signal override; falls back to the task, then SIGTERM.
    pub signal: Option<String>,
    /// Per-call grace period override in milliseconds.
    pub timeout: Option<u64>,
}

// ---------------------------------------------------------------------------
// Boot notification between the supervisor task and a waiting `start`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum BootPhase {
    Pending,
    Ready,
    Exited {
        code: Option<i32>,
        signal: Option<String>,
    },
}

enum ExitDecision {
    /// The stop controller owns the final transition.
    OperatorStop,
    /// Exited before readiness; the waiting `start` reports the failure.
    BootExit,
    Restart,
    Finished,
}

// ---------------------------------------------------------------------------
// ServiceExecutor — the registry façade
// ---------------------------------------------------------------------------

/// Owns every launched service. The id-keyed table is the single source of
/// truth; callers only ever receive [`ServiceInfo`] snapshots and handle
/// ids. Operations on different handles run concurrently; operations on
/// one handle are serialized through its own locks.
#[derive(Clone)]
pub struct ServiceExecutor {
    services: Arc<RwLock<HashMap<String, Arc<ServiceEntry>>>>,
    events: EventSender,
    next_handle: Arc<AtomicU64>,
    log_capacity: usize,
}

impl Default for ServiceExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceExecutor {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        let (events, _rx) = events::channel();
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
            events,
            next_handle: Arc::new(AtomicU64::new(0)),
            log_capacity,
        }
    }

    /// One multiplexed lifecycle-event stream for all services; events are
    /// tagged with their handle id.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Launches a service and waits until it is running (all readiness
    /// patterns matched, or immediately after spawn when none are
    /// configured). Fails without leaving a handle registered if the spawn
    /// fails, the process exits during boot, or the boot timeout elapses.
    pub async fn start(&self, task: ServiceTask) -> Result<ServiceInfo, ServiceError> {
        task.validate()?;
        // Surface a bad signal name or pattern before anything is spawned.
        shutdown::parse_signal(task.stop_signal())?;
        let tracker = ReadinessTracker::new(task.readiness.as_ref())?;

        let seq = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let handle_id = format!("{}-{seq}", task.id);
        let entry = Arc::new(ServiceEntry::new(
            handle_id.clone(),
            task.clone(),
            tracker,
            self.log_capacity,
            self.events.clone(),
        ));

        {
            let mut table = self.services.write().await;
            let mut reapable = Vec::new();
            for (id, existing) in table.iter() {
                if existing.task.id != task.id {
                    continue;
                }
                let state = existing.state.lock().await;
                if state.status.is_terminal() {
                    reapable.push(id.clone());
                } else {
                    return Err(ServiceError::AlreadyRunning(task.id.clone()));
                }
            }
            for id in reapable {
                table.remove(&id);
            }
            table.insert(handle_id.clone(), Arc::clone(&entry));
        }

        let launched = match launcher::launch(&task).await {
            Ok(launched) => launched,
            Err(e) => {
                self.services.write().await.remove(&handle_id);
                return Err(e);
            }
        };
        {
            let mut state = entry.state.lock().await;
            state.pid = Some(launched.pid);
        }
        entry.emit(EventKind::ProcessSpawned {
            pid: launched.pid,
            command: task.command.clone(),
            args: task.args.clone(),
        });

        let (boot_tx, mut boot_rx) = watch::channel(BootPhase::Pending);
        spawn_supervisor(Arc::clone(&entry), launched, Some(boot_tx));

        let boot_timeout = task.boot_timeout();
        let outcome = tokio::time::timeout(boot_timeout, async {
            loop {
                let phase = boot_rx.borrow().clone();
                if !matches!(phase, BootPhase::Pending) {
                    return phase;
                }
                if boot_rx.changed().await.is_err() {
                    return BootPhase::Exited {
                        code: None,
                        signal: None,
                    };
                }
            }
        })
        .await;

        match outcome {
            Ok(BootPhase::Ready) => Ok(entry.snapshot().await),
            Ok(BootPhase::Exited { code, signal }) => {
                self.services.write().await.remove(&handle_id);
                let reason = match (code, signal) {
                    (Some(code), _) => format!("process exited with code {code} during boot"),
                    (None, Some(signal)) => {
                        format!("process was terminated by {signal} during boot")
                    }
                    (None, None) => "process exited during boot".to_string(),
                };
                Err(ServiceError::BootFailed(reason))
            }
            Ok(BootPhase::Pending) => unreachable!("boot wait only resolves on a phase change"),
            Err(_) => {
                let pid = {
                    let mut state = entry.state.lock().await;
                    state.stop_requested = true;
                    state.status = ServiceStatus::Failed;
                    state.pid
                };
                if let Some(pid) = pid {
                    let _ = shutdown::kill_group(pid);
                }
                let unmatched = entry.tracker.lock().await.unmatched();
                self.services.write().await.remove(&handle_id);
                Err(ServiceError::BootTimeout {
                    timeout_ms: boot_timeout.as_millis() as u64,
                    unmatched,
                })
            }
        }
    }

    /// Gracefully stops a service: polite signal, bounded grace period,
    /// SIGKILL escalation, then confirmation that every monitored port is
    /// actually free. Idempotent for already stopping/stopped handles.
    pub async fn stop(&self, handle_id: &str, opts: StopOptions) -> Result<(), ServiceError> {
        let entry = self
            .entry(handle_id)
            .await
            .ok_or_else(|| ServiceError::NotFound(handle_id.to_string()))?;
        let signal = match opts.signal.as_deref() {
            Some(name) => shutdown::parse_signal(name)?,
            None => shutdown::parse_signal(entry.task.stop_signal())?,
        };

        let _guard = entry.op_lock.lock().await;
        let (pid, endpoints) = {
            let mut state = entry.state.lock().await;
            if state.status.is_terminal() || state.status == ServiceStatus::Stopping {
                return Ok(());
            }
            state.stop_requested = true;
            state.status = ServiceStatus::Stopping;
            (state.pid, state.endpoints.clone())
        };

        let grace = opts
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| entry.task.stop_timeout());

        if let Some(pid) = pid {
            if opts.force {
                let _ = shutdown::kill_group(pid);
            } else {
                let _ = shutdown::signal_group(pid, signal);
                shutdown::escalate_after(pid, grace).await;
            }
            self.wait_for_exit_record(&entry, grace).await;
        }

        let monitored = entry.monitored_ports(&endpoints);
        if !monitored.is_empty() {
            let release_timeout = Duration::from_millis(ports::DEFAULT_PORT_RELEASE_TIMEOUT_MS);
            if !ports::wait_for_release(&monitored, release_timeout).await {
                eprintln!(
                    "warning: service '{}' stopped but port(s) {monitored:?} were still bound after {}ms",
                    entry.id,
                    release_timeout.as_millis()
                );
                entry.emit(EventKind::Error {
                    message: format!("port(s) {monitored:?} still bound after stop"),
                });
            }
        }

        let mut state = entry.state.lock().await;
        state.status = ServiceStatus::Stopped;
        Ok(())
    }

    /// Stop followed by a fresh launch of the original task (new handle).
    pub async fn restart(&self, handle_id: &str) -> Result<(), ServiceError> {
        let entry = self
            .entry(handle_id)
            .await
            .ok_or_else(|| ServiceError::NotFound(handle_id.to_string()))?;
        let task = entry.task.clone();
        self.stop(handle_id, StopOptions::default()).await?;
        self.start(task).await?;
        Ok(())
    }

    pub async fn get_status(&self, handle_id: &str) -> Option<ServiceStatus> {
        let entry = self.entry(handle_id).await?;
        let state = entry.state.lock().await;
        Some(state.status)
    }

    /// Most recent `limit` lines in original order; all buffered lines when
    /// `limit` is `None`. Unknown ids degrade to an empty list.
    pub async fn get_logs(&self, handle_id: &str, limit: Option<usize>) -> Vec<String> {
        match self.entry(handle_id).await {
            Some(entry) => entry.logs.lock().await.tail(limit),
            None => Vec::new(),
        }
    }

    pub async fn get_all_services(&self) -> Vec<ServiceInfo> {
        let entries: Vec<Arc<ServiceEntry>> =
            self.services.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            infos.push(entry.snapshot().await);
        }
        infos
    }

    /// Stops every tracked service concurrently. Never fails, even with an
    /// empty or partially stopped registry.
    pub async fn stop_all(&self, force: bool) {
        let ids: Vec<String> = self.services.read().await.keys().cloned().collect();
        let mut set = JoinSet::new();
        for id in ids {
            let executor = self.clone();
            set.spawn(async move {
                let _ = executor
                    .stop(
                        &id,
                        StopOptions {
                            force,
                            ..StopOptions::default()
                        },
                    )
                    .await;
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Removes a terminal handle from the registry.
    pub async fn reap(&self, handle_id: &str) -> Result<(), ServiceError> {
        let mut table = self.services.write().await;
        let entry = table
            .get(handle_id)
            .ok_or_else(|| ServiceError::NotFound(handle_id.to_string()))?;
        let state = entry.state.lock().await;
        if !state.status.is_terminal() {
            return Err(ServiceError::Validation(format!(
                "service '{handle_id}' is {}; stop it before reaping",
                state.status
            )));
        }
        drop(state);
        table.remove(handle_id);
        Ok(())
    }

    async fn entry(&self, handle_id: &str) -> Option<Arc<ServiceEntry>> {
        self.services.read().await.get(handle_id).cloned()
    }

    /// The supervisor task records the exit (clears the pid) once it has
    /// reaped the child; wait for that so log draining and exit accounting
    /// finish before port monitoring starts.
    async fn wait_for_exit_record(&self, entry: &ServiceEntry, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace + Duration::from_secs(10);
        loop {
            {
                let state = entry.state.lock().await;
                if state.pid.is_none() {
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(shutdown::STOP_POLL_INTERVAL).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor task — one per launch, owns the Child
// ---------------------------------------------------------------------------

fn spawn_supervisor(
    entry: Arc<ServiceEntry>,
    launched: LaunchedProcess,
    boot_tx: Option<watch::Sender<BootPhase>>,
) {
    tokio::spawn(supervise(entry, launched, boot_tx));
}

async fn supervise(
    entry: Arc<ServiceEntry>,
    mut launched: LaunchedProcess,
    boot_tx: Option<watch::Sender<BootPhase>>,
) {
    // With no readiness patterns the service is up as soon as it spawned.
    if entry.tracker.lock().await.is_complete() {
        mark_running(&entry, &boot_tx).await;
    }

    while let Some((stream, line)) = launched.lines.recv().await {
        {
            let mut logs = entry.logs.lock().await;
            logs.push(LogEntry::now(stream, line.clone()));
        }
        entry.emit(EventKind::Output {
            stream,
            line: line.clone(),
        });

        let completed = {
            let mut tracker = entry.tracker.lock().await;
            if tracker.is_complete() {
                false
            } else {
                let done = tracker.observe(stream, &line);
                let mut state = entry.state.lock().await;
                state.captures = tracker.captures().clone();
                state.endpoints = tracker.endpoints().clone();
                done
            }
        };
        if completed {
            mark_running(&entry, &boot_tx).await;
        }
    }

    // Both streams are at EOF: all output is accounted for, now the exit
    // status can be interpreted.
    let (code, signal) = match launched.child.wait().await {
        Ok(status) => (status.code(), exit_signal_name(&status)),
        Err(_) => (None, None),
    };
    handle_exit(entry, code, signal, boot_tx).await;
}

async fn mark_running(entry: &Arc<ServiceEntry>, boot_tx: &Option<watch::Sender<BootPhase>>) {
    let endpoints = {
        let mut state = entry.state.lock().await;
        if state.status != ServiceStatus::Booting {
            return;
        }
        state.status = ServiceStatus::Running;
        state.booted_at = Some(Utc::now());
        state.endpoints.clone()
    };
    entry.emit(EventKind::Ready { endpoints });
    if let Some(tx) = boot_tx {
        let _ = tx.send(BootPhase::Ready);
    }
}

async fn handle_exit(
    entry: Arc<ServiceEntry>,
    code: Option<i32>,
    signal: Option<String>,
    boot_tx: Option<watch::Sender<BootPhase>>,
) {
    entry.emit(EventKind::Exit {
        code,
        signal: signal.clone(),
    });

    let mut retries_exhausted = false;
    let decision = {
        let mut state = entry.state.lock().await;
        state.pid = None;
        state.exit_code = code;
        state.exit_signal = signal.clone();

        if state.stop_requested {
            ExitDecision::OperatorStop
        } else if state.status == ServiceStatus::Booting && boot_tx.is_some() {
            // The waiting `start` call owns this failure. Boot exits on
            // automatic relaunches have no waiter and fall through to the
            // restart policy like any other crash.
            state.status = ServiceStatus::Failed;
            ExitDecision::BootExit
        } else if restart::should_restart(
            entry.task.restart_policy.as_ref(),
            false,
            state.restarts,
        ) {
            state.status = ServiceStatus::Booting;
            ExitDecision::Restart
        } else if code == Some(0) {
            state.status = ServiceStatus::Stopped;
            ExitDecision::Finished
        } else {
            state.status = ServiceStatus::Failed;
            retries_exhausted = entry
                .task
                .restart_policy
                .as_ref()
                .is_some_and(|p| p.enabled);
            ExitDecision::Finished
        }
    };

    match decision {
        ExitDecision::OperatorStop => {
            if let Some(tx) = boot_tx {
                let _ = tx.send(BootPhase::Exited { code, signal });
            }
        }
        ExitDecision::BootExit => {
            if let Some(tx) = boot_tx {
                let _ = tx.send(BootPhase::Exited { code, signal });
            }
        }
        ExitDecision::Finished => {
            if retries_exhausted {
                entry.emit(EventKind::Error {
                    message: format!(
                        "service exited unexpectedly and restart retries are exhausted ({} restart(s))",
                        entry.state.lock().await.restarts
                    ),
                });
            }
        }
        ExitDecision::Restart => {
            relaunch(entry).await;
        }
    }
}

/// Restart Policy Engine: fixed delay, bounded retries, same handle.
async fn relaunch(entry: Arc<ServiceEntry>) {
    let delay = restart::restart_delay(entry.task.restart_policy.as_ref());
    tokio::time::sleep(delay).await;

    {
        let mut state = entry.state.lock().await;
        // An operator stop during the delay wins.
        if state.stop_requested {
            return;
        }
        state.captures.clear();
        state.endpoints.clear();
    }
    entry.tracker.lock().await.reset();

    match launcher::launch(&entry.task).await {
        Ok(mut launched) => {
            let pid = launched.pid;
            let stop_won = {
                let mut state = entry.state.lock().await;
                if state.stop_requested {
                    true
                } else {
                    state.pid = Some(pid);
                    state.restarts += 1;
                    false
                }
            };
            // A stop that landed while the spawn was in flight has already
            // marked the handle stopped; the fresh process must not
            // outlive it.
            if stop_won {
                let _ = shutdown::kill_group(pid);
                let _ = launched.child.wait().await;
                return;
            }
            entry.emit(EventKind::ProcessSpawned {
                pid,
                command: entry.task.command.clone(),
                args: entry.task.args.clone(),
            });
            spawn_supervisor(Arc::clone(&entry), launched, None);
            if entry
                .task
                .readiness
                .as_ref()
                .is_some_and(|r| !r.patterns.is_empty())
            {
                spawn_boot_watchdog(Arc::clone(&entry), pid);
            }
        }
        Err(e) => {
            {
                let mut state = entry.state.lock().await;
                state.status = ServiceStatus::Failed;
            }
            entry.emit(EventKind::Error {
                message: format!("relaunch failed: {e}"),
            });
        }
    }
}

/// Relaunches have no waiting `start` call to enforce the boot timeout, so
/// a watchdog does: a relaunched service still `Booting` once the deadline
/// passes is failed and its process group killed.
fn spawn_boot_watchdog(entry: Arc<ServiceEntry>, pid: u32) {
    tokio::spawn(async move {
        let timeout = entry.task.boot_timeout();
        tokio::time::sleep(timeout).await;
        let expired = {
            let mut state = entry.state.lock().await;
            // The pid check pins the watchdog to its own launch; a later
            // relaunch gets its own watchdog.
            if state.status == ServiceStatus::Booting
                && state.pid == Some(pid)
                && !state.stop_requested
            {
                state.status = ServiceStatus::Failed;
                state.stop_requested = true;
                true
            } else {
                false
            }
        };
        if expired {
            let _ = shutdown::kill_group(pid);
            let unmatched = entry.tracker.lock().await.unmatched();
            entry.emit(EventKind::Error {
                message: format!(
                    "relaunch did not become ready within {}ms (unmatched patterns: {unmatched:?})",
                    timeout.as_millis()
                ),
            });
        }
    });
}

#[cfg(unix)]
fn exit_signal_name(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(shutdown::signal_name)
}

#[cfg(not(unix))]
fn exit_signal_name(_status: &std::process::ExitStatus) -> Option<String> {
    None
}
