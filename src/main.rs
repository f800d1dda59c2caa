use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use warden::cli::{Cli, Command};
use warden::events::{EventKind, ServiceEvent};
use warden::executor::ServiceExecutor;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Run { names }) => run(&cli.config, names).await,
        Some(Command::Check) => {
            let tasks = warden::config::load_tasks(&cli.config)
                .map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
            for task in &tasks {
                task.validate().map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
            }
            println!("{} {} task(s)", "ok:".green(), tasks.len());
            Ok(())
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

async fn run(config: &std::path::Path, names: Vec<String>) -> color_eyre::Result<()> {
    let mut tasks = warden::config::load_tasks(config).map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
    if !names.is_empty() {
        for name in &names {
            if !tasks.iter().any(|t| &t.id == name) {
                return Err(color_eyre::eyre::eyre!(
                    "no task named `{name}` in {}",
                    config.display()
                ));
            }
        }
        tasks.retain(|t| names.contains(&t.id));
    }

    let executor = ServiceExecutor::new();
    let events = executor.subscribe();
    tokio::spawn(print_events(events));

    for task in tasks {
        let title = task.title.clone();
        match executor.start(task).await {
            Ok(info) => {
                println!("{} {} ({})", "up:".green().bold(), title, info.id);
                for (name, url) in &info.endpoints {
                    println!("  {} {url}", format!("{name}:").dimmed());
                }
            }
            Err(e) => {
                eprintln!("{} {title}: {e}", "error:".red().bold());
                executor.stop_all(false).await;
                return Err(color_eyre::eyre::eyre!("startup aborted"));
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    println!("{}", "shutting down...".yellow());
    executor.stop_all(false).await;
    Ok(())
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ServiceEvent>) {
    while let Ok(event) = events.recv().await {
        let tag = format!("[{}]", event.handle_id);
        match event.kind {
            EventKind::ProcessSpawned { pid, .. } => {
                println!("{} spawned pid {pid}", tag.cyan().bold());
            }
            EventKind::Output { line, .. } => {
                println!("{} {line}", tag.cyan());
            }
            EventKind::Ready { .. } => {
                println!("{} {}", tag.cyan().bold(), "ready".green());
            }
            EventKind::Exit { code, signal } => {
                let reason = match (code, signal) {
                    (Some(code), _) => format!("exited with code {code}"),
                    (None, Some(signal)) => format!("terminated by {signal}"),
                    (None, None) => "exited".to_string(),
                };
                println!("{} {}", tag.cyan().bold(), reason.yellow());
            }
            EventKind::Error { message } => {
                eprintln!("{} {} {message}", tag.cyan().bold(), "error:".red().bold());
            }
        }
    }
}
