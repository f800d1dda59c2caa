use crate::task::{GracefulShutdown, ReadinessConfig, RestartPolicy, ServiceTask};
use std::collections::HashMap;
use std::path::Path;

/// One `[name]` table per task. The table key doubles as the task id and,
/// unless overridden, the display title:
///
/// ```toml
/// [web]
/// command = "node server.js --port 4001"
/// [web.readiness]
/// patterns = [{ regex = "Listening on port (\\d+)" }]
/// ```
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
struct RawTask {
    title: Option<String>,
    #[serde(default)]
    instructions: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(alias = "cwd")]
    working_directory: Option<String>,
    #[serde(alias = "env")]
    environment: Option<HashMap<String, String>>,
    graceful_shutdown: Option<GracefulShutdown>,
    restart_policy: Option<RestartPolicy>,
    readiness: Option<ReadinessConfig>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("config file is empty")]
    Empty,
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("invalid command for task `{task}`: {reason}")]
    InvalidCommand { task: String, reason: String },
    #[error("{0}")]
    Io(String),
}

pub fn load_tasks(path: &Path) -> Result<Vec<ServiceTask>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    parse_tasks(&content)
}

pub fn parse_tasks(content: &str) -> Result<Vec<ServiceTask>, ConfigError> {
    let table: HashMap<String, toml::Value> =
        toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;

    if table.is_empty() {
        return Err(ConfigError::Empty);
    }

    let mut names: Vec<String> = table.keys().cloned().collect();
    names.sort();

    let mut tasks = Vec::with_capacity(names.len());
    for name in names {
        let raw: RawTask = table[&name]
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::TomlParse(e.to_string()))?;
        tasks.push(into_task(name, raw)?);
    }
    Ok(tasks)
}

/// A bare `command` string is split shell-style into program and arguments;
/// explicit `args` keep `command` verbatim as the program.
fn into_task(name: String, raw: RawTask) -> Result<ServiceTask, ConfigError> {
    let (command, args) = if raw.args.is_empty() {
        let mut words = shell_words::split(&raw.command).map_err(|e| {
            ConfigError::InvalidCommand {
                task: name.clone(),
                reason: e.to_string(),
            }
        })?;
        if words.is_empty() {
            return Err(ConfigError::InvalidCommand {
                task: name,
                reason: "command is empty".to_string(),
            });
        }
        let program = words.remove(0);
        (program, words)
    } else {
        (raw.command, raw.args)
    };

    Ok(ServiceTask {
        title: raw.title.unwrap_or_else(|| name.clone()),
        id: name,
        instructions: raw.instructions,
        command,
        args,
        working_directory: raw.working_directory,
        environment: raw.environment,
        graceful_shutdown: raw.graceful_shutdown,
        restart_policy: raw.restart_policy,
        readiness: raw.readiness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StreamSelector;
    use tempfile::tempdir;

    #[test]
    fn test_command_is_shell_split() {
        let input = r#"
[web]
command = "node server.js --port 4001"
"#;
        let tasks = parse_tasks(input).unwrap();
        assert_eq!(tasks.len(), 1);
        let web = &tasks[0];
        assert_eq!(web.id, "web");
        assert_eq!(web.title, "web");
        assert_eq!(web.command, "node");
        assert_eq!(web.args, vec!["server.js", "--port", "4001"]);
    }

    #[test]
    fn test_explicit_args_keep_command_verbatim() {
        let input = r#"
[api]
title = "API server"
command = "cargo run"
args = ["--release"]
"#;
        let tasks = parse_tasks(input).unwrap();
        let api = &tasks[0];
        assert_eq!(api.title, "API server");
        assert_eq!(api.command, "cargo run");
        assert_eq!(api.args, vec!["--release"]);
    }

    #[test]
    fn test_quoted_arguments_survive_splitting() {
        let input = r#"
[greet]
command = "echo 'hello world'"
"#;
        let tasks = parse_tasks(input).unwrap();
        assert_eq!(tasks[0].command, "echo");
        assert_eq!(tasks[0].args, vec!["hello world"]);
    }

    #[test]
    fn test_full_task_round_trip() {
        let input = r#"
[db]
command = "postgres -D /data"
cwd = "/srv"
env = { PGPORT = "5433" }

[db.graceful_shutdown]
signal = "SIGINT"
timeout = 2000

[db.restart_policy]
enabled = true
max_retries = 5
delay = 500

[db.readiness]
timeout = 10000
patterns = [
    { regex = "ready to accept connections", stream = "stderr" },
]
"#;
        let tasks = parse_tasks(input).unwrap();
        let db = &tasks[0];
        assert_eq!(db.working_directory.as_deref(), Some("/srv"));
        assert_eq!(
            db.environment.as_ref().unwrap().get("PGPORT").unwrap(),
            "5433"
        );
        let shutdown = db.graceful_shutdown.as_ref().unwrap();
        assert_eq!(shutdown.signal.as_deref(), Some("SIGINT"));
        assert_eq!(shutdown.timeout, Some(2000));
        let policy = db.restart_policy.as_ref().unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.max_retries, Some(5));
        let readiness = db.readiness.as_ref().unwrap();
        assert_eq!(readiness.timeout, Some(10_000));
        assert_eq!(readiness.patterns[0].stream, StreamSelector::Stderr);
    }

    #[test]
    fn test_readiness_endpoints_parse() {
        let input = r#"
[web]
command = "node server.js"

[[web.readiness.patterns]]
regex = "Listening on port (\\d+)"

[[web.readiness.patterns.endpoints]]
endpoint_name = "http"
endpoint_default_host_url = "http://localhost:"
endpoint_capture_group = 1
monitor_port_release_upon_termination = true
"#;
        let tasks = parse_tasks(input).unwrap();
        let pattern = &tasks[0].readiness.as_ref().unwrap().patterns[0];
        assert_eq!(pattern.endpoints.len(), 1);
        assert_eq!(pattern.endpoints[0].endpoint_name, "http");
        assert!(pattern.endpoints[0].monitor_port_release_upon_termination);
    }

    #[test]
    fn test_multiple_tasks_sorted_by_id() {
        let input = r#"
[worker]
command = "python worker.py"

[api]
command = "cargo run"
"#;
        let tasks = parse_tasks(input).unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["api", "worker"]);
    }

    #[test]
    fn test_empty_file_errors() {
        assert_eq!(parse_tasks("").unwrap_err(), ConfigError::Empty);
    }

    #[test]
    fn test_missing_command_errors() {
        let input = r#"
[web]
cwd = "/app"
"#;
        assert!(matches!(
            parse_tasks(input).unwrap_err(),
            ConfigError::TomlParse(_)
        ));
    }

    #[test]
    fn test_unknown_field_errors() {
        let input = r#"
[web]
command = "node server.js"
bogus = true
"#;
        assert!(matches!(
            parse_tasks(input).unwrap_err(),
            ConfigError::TomlParse(_)
        ));
    }

    #[test]
    fn test_empty_command_errors() {
        let input = r#"
[web]
command = ""
"#;
        assert!(matches!(
            parse_tasks(input).unwrap_err(),
            ConfigError::InvalidCommand { .. }
        ));
    }

    #[test]
    fn test_load_tasks_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[web]\ncommand = \"true\"\n").unwrap();
        let tasks = load_tasks(&path).unwrap();
        assert_eq!(tasks[0].id, "web");
    }

    #[test]
    fn test_load_tasks_missing_file_errors() {
        let err = load_tasks(Path::new("/nonexistent/warden.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
