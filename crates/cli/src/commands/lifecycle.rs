//! Scale, restart and rollback commands

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use ops_lib::revision::resolve_with_policy;
use ops_lib::{
    LifecycleController, OperationKind, OperationState, Outcome, RollbackTarget, WorkloadRef,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Session;
use crate::output::{print_info, print_json, print_progress, print_warning, OutputFormat};

#[derive(Serialize)]
struct OutcomeView {
    target: String,
    operation: String,
    state: OperationState,
    summary: String,
    elapsed_ms: u64,
}

impl From<&Outcome> for OutcomeView {
    fn from(outcome: &Outcome) -> Self {
        Self {
            target: outcome.target.to_string(),
            operation: outcome.kind.to_string(),
            state: outcome.state,
            summary: outcome.summary.clone(),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
        }
    }
}

pub async fn scale(session: &Session, target: &str, replicas: i32) -> Result<()> {
    let target = session.target(target)?;
    let controller = session.controller().await?;
    run(&controller, target, OperationKind::Scale { replicas }, session.format).await
}

pub async fn restart(session: &Session, target: &str) -> Result<()> {
    let target = session.target(target)?;
    let controller = session.controller().await?;
    run(&controller, target, OperationKind::Restart, session.format).await
}

pub async fn rollback(
    session: &Session,
    target: &str,
    revision: Option<&str>,
    assume_yes: bool,
) -> Result<()> {
    let target = session.target(target)?;
    let requested: RollbackTarget = revision
        .unwrap_or("previous")
        .parse()
        .context("Invalid revision")?;
    let controller = session.controller().await?;

    if !assume_yes {
        let listing = controller.revisions(&target).await?;
        let chosen = resolve_with_policy(
            &listing.snapshots,
            listing.current,
            requested,
            controller.config().rollback_policy,
        )?;
        let from = listing
            .current
            .map(|r| format!("revision {r}"))
            .unwrap_or_else(|| "an unknown revision".to_string());
        let question = format!(
            "Roll back {target} from {from} to revision {} ({})?",
            chosen.revision, chosen.image
        );
        if !confirm(&question, io::stdin().lock())? {
            print_warning("Rollback aborted");
            return Ok(());
        }
    }

    run(
        &controller,
        target,
        OperationKind::Rollback { target: requested },
        session.format,
    )
    .await
}

/// Run one operation, printing progress as it arrives. Ctrl-C cancels the
/// operation; its final summary is still printed.
async fn run(
    controller: &LifecycleController,
    target: WorkloadRef,
    kind: OperationKind,
    format: OutputFormat,
) -> Result<()> {
    let op = controller.operation(target, kind);
    debug!(
        deployment = %op.target,
        kind = op.kind.name(),
        budget_secs = op.budget.as_secs(),
        "Starting operation"
    );

    let cancel = CancellationToken::new();
    let (handle, mut progress) = controller.spawn(op, cancel.clone());

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    while let Some(event) = progress.recv().await {
        if event.state.is_terminal() && format == OutputFormat::Json {
            continue;
        }
        print_progress(&event, format)?;
    }

    let outcome = handle.await.context("Operation task failed")?;
    interrupt.abort();

    if format == OutputFormat::Json {
        print_json(&OutcomeView::from(&outcome))?;
    }

    if cancel.is_cancelled() {
        print_info("Interrupted; the deployment may be partially updated");
    }
    if !outcome.is_success() {
        bail!("{} finished in state {}", outcome.kind.name(), outcome.state);
    }
    Ok(())
}

/// Ask a yes/no question; anything but `y`/`yes` is a no
fn confirm(question: &str, mut input: impl BufRead) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes"
    ))
}
