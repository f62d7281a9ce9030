use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use context_bundler::app::{StatusEvent, TaskCoordinator, TaskId, TaskResult};
use context_bundler::config::CoreConfig;
use context_bundler::core::Classification;

const USAGE: &str = "usage: context-bundler <project-root> [relative paths...]";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the bundle on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args_os().skip(1);
    let Some(root) = args.next().map(PathBuf::from) else {
        bail!(USAGE);
    };
    let explicit: Vec<PathBuf> = args.map(PathBuf::from).collect();

    let config = CoreConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Could not load config: {:#}. Using defaults.", e);
        CoreConfig::default()
    });
    let coordinator = TaskCoordinator::new(config)?;
    let mut events = coordinator.subscribe();

    let scan = coordinator.request_scan(&root)?;
    let scanned = wait_for(&coordinator, &mut events, scan.id).await?;
    let report = scanned
        .as_scan_report()
        .context("scan task returned no file list")?;
    let entries = &report.entries;

    let selection: Vec<PathBuf> = if explicit.is_empty() {
        entries
            .iter()
            .filter(|entry| entry.classification == Classification::Text)
            .map(|entry| entry.relative_path.clone())
            .collect()
    } else {
        explicit
    };
    tracing::info!(
        "Scan found {} files ({} paths ignored), bundling {}",
        entries.len(),
        report.ignored.len(),
        selection.len()
    );

    let generate = coordinator.request_generate(&scan.root, selection)?;
    let generated = wait_for(&coordinator, &mut events, generate.id).await?;
    let result = generated
        .as_generation()
        .context("generate task returned no bundle")?;

    print!("{}", result.bundle);

    eprintln!("Included {} files.", result.included().count());
    for (path, reason) in result.skipped() {
        eprintln!("Skipped {}: {}", path.display(), reason);
    }
    if let Some(tokens) = result.token_estimate {
        eprintln!("Estimated tokens: {tokens}");
    }
    Ok(())
}

/// Waits for the terminal event of `task_id`. Ctrl-C cancels the task.
async fn wait_for(
    coordinator: &TaskCoordinator,
    events: &mut broadcast::Receiver<StatusEvent>,
    task_id: TaskId,
) -> Result<Arc<TaskResult>> {
    let mut interrupted = false;
    loop {
        let received = tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                coordinator.cancel(task_id)?;
                continue;
            }
            received = events.recv() => received,
        };

        match received {
            Ok(event) if event.task_id() == task_id => match event {
                StatusEvent::Completed { result, .. } => return Ok(result),
                StatusEvent::Failed { error, .. } => bail!("task {} failed: {}", task_id, error),
                StatusEvent::Cancelled { .. } => bail!("task {} was cancelled", task_id),
                StatusEvent::Progress {
                    processed, total, ..
                } => match total {
                    Some(total) => tracing::debug!("{}/{} files", processed, total),
                    None => tracing::debug!("{} files", processed),
                },
                StatusEvent::Started { kind, .. } => tracing::debug!("{} task started", kind),
            },
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Skipped {} status events", skipped);
            }
            Err(RecvError::Closed) => bail!("status channel closed"),
        }
    }
}
