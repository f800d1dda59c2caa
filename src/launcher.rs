use crate::error::ServiceError;
use crate::logring::LogStream;
use crate::task::ServiceTask;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Buffered lines in flight between the reader tasks and the supervisor.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// A freshly spawned service process. Output arrives tagged on `lines`;
/// the channel closes once both streams hit EOF, which is the signal that
/// all output has been delivered and the exit status can be interpreted.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,
    pub pid: u32,
    pub lines: mpsc::Receiver<(LogStream, String)>,
}

/// Spawns the task's command with its working directory and environment
/// overlay, in its own process group so the whole group can be signalled.
/// Does not interpret output.
pub async fn launch(task: &ServiceTask) -> Result<LaunchedProcess, ServiceError> {
    let mut cmd = Command::new(&task.command);
    cmd.args(&task.args);

    if let Some(ref dir) = task.working_directory {
        cmd.current_dir(dir);
    }
    if let Some(ref env) = task.environment {
        cmd.envs(env);
    }

    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(ServiceError::Spawn)?;
    let pid = child.id().ok_or_else(|| {
        ServiceError::Spawn(std::io::Error::other("spawned process has no pid"))
    })?;

    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(LogStream::Stdout, stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(LogStream::Stderr, stderr, tx);
    }

    Ok(LaunchedProcess { child, pid, lines: rx })
}

/// Reads one piped stream line by line until EOF. Lines from a single
/// stream are delivered in order; interleaving across streams is not.
fn spawn_line_reader(
    stream: LogStream,
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    tx: mpsc::Sender<(LogStream, String)>,
) {
    tokio::spawn(async move {
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.send((stream, text)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ServiceTask;
    use std::collections::HashMap;

    fn task(command: &str, args: &[&str]) -> ServiceTask {
        ServiceTask {
            id: "t".to_string(),
            title: "t".to_string(),
            instructions: String::new(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_directory: None,
            environment: None,
            graceful_shutdown: None,
            restart_policy: None,
            readiness: None,
        }
    }

    #[tokio::test]
    async fn test_launch_captures_stdout_lines_in_order() {
        let mut launched = launch(&task("sh", &["-c", "echo one; echo two"]))
            .await
            .unwrap();
        let mut lines = Vec::new();
        while let Some((stream, line)) = launched.lines.recv().await {
            assert_eq!(stream, LogStream::Stdout);
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two"]);
        let status = launched.child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_launch_tags_stderr() {
        let mut launched = launch(&task("sh", &["-c", "echo oops >&2"])).await.unwrap();
        let (stream, line) = launched.lines.recv().await.unwrap();
        assert_eq!(stream, LogStream::Stderr);
        assert_eq!(line, "oops");
        let _ = launched.child.wait().await;
    }

    #[tokio::test]
    async fn test_launch_applies_environment_overlay() {
        let mut t = task("sh", &["-c", "echo $WARDEN_TEST_VAR"]);
        let mut env = HashMap::new();
        env.insert("WARDEN_TEST_VAR".to_string(), "overlay".to_string());
        t.environment = Some(env);
        let mut launched = launch(&t).await.unwrap();
        let (_, line) = launched.lines.recv().await.unwrap();
        assert_eq!(line, "overlay");
        let _ = launched.child.wait().await;
    }

    #[tokio::test]
    async fn test_launch_missing_binary_is_spawn_error() {
        let result = launch(&task("warden-test-no-such-binary", &[])).await;
        assert!(matches!(result.unwrap_err(), ServiceError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_lines_channel_closes_on_exit() {
        let mut launched = launch(&task("sh", &["-c", "true"])).await.unwrap();
        while launched.lines.recv().await.is_some() {}
        let status = launched.child.wait().await.unwrap();
        assert_eq!(status.code(), Some(0));
    }
}
