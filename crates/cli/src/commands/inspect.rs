//! Read-only deployment commands

use anyhow::Result;
use colored::Colorize;
use ops_lib::{LogOptions, PodSummary, RevisionListing, WorkloadStatus};
use tabled::Tabled;

use super::Session;
use crate::output::{color_status, format_timestamp, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct RevisionRow {
    #[tabled(rename = "Revision")]
    revision: String,
    #[tabled(rename = "ReplicaSet")]
    replica_set: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Ready")]
    ready: String,
}

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Pod")]
    name: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Restarts")]
    restarts: i32,
    #[tabled(rename = "Node")]
    node: String,
}

fn revision_rows(listing: &RevisionListing) -> Vec<RevisionRow> {
    listing
        .snapshots
        .iter()
        .rev()
        .map(|s| {
            let revision = if listing.current == Some(s.revision) {
                format!("{} (current)", s.revision).green().bold().to_string()
            } else {
                s.revision.to_string()
            };
            RevisionRow {
                revision,
                replica_set: s.replica_set.clone(),
                image: s.image.clone(),
                created: format_timestamp(s.created_at),
                ready: format!("{}/{}", s.ready_replicas, s.replicas),
            }
        })
        .collect()
}

fn pod_rows(pods: &[PodSummary]) -> Vec<PodRow> {
    pods.iter()
        .map(|p| PodRow {
            name: p.name.clone(),
            phase: color_status(&p.phase),
            ready: if p.ready { "✓".to_string() } else { "".to_string() },
            restarts: p.restarts,
            node: p.node.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

fn print_status(status: &WorkloadStatus) {
    let counts = &status.counts;
    let settled = if status.is_settled() {
        "settled".green()
    } else {
        "rolling out".yellow()
    };

    println!("{}", "Deployment Status".bold());
    println!("{}", "=".repeat(60));
    println!("Deployment: {}", status.target.to_string().cyan());
    println!(
        "Image:      {}",
        status.image.as_deref().unwrap_or("-")
    );
    println!(
        "Revision:   {}",
        status
            .revision
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("State:      {}", settled);
    println!();
    println!("Desired:     {}", status.desired_replicas);
    println!("Updated:     {}", counts.updated);
    println!("Ready:       {}", counts.ready);
    println!("Available:   {}", counts.available);
    if counts.unavailable > 0 {
        println!("Unavailable: {}", counts.unavailable.to_string().red());
    }
}

/// Show replica counts, image and revision of a deployment
pub async fn status(session: &Session, target: &str) -> Result<()> {
    let target = session.target(target)?;
    let status = session.controller().await?.status(&target).await?;

    match session.format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_status(&status),
    }
    Ok(())
}

/// List rollout history, newest first
pub async fn revisions(session: &Session, target: &str) -> Result<()> {
    let target = session.target(target)?;
    let listing = session.controller().await?.revisions(&target).await?;

    if session.format == OutputFormat::Table {
        println!("Revisions of {}", listing.target.to_string().cyan());
    }
    let json: Vec<serde_json::Value> = listing
        .snapshots
        .iter()
        .map(|s| {
            serde_json::json!({
                "revision": s.revision,
                "replica_set": s.replica_set,
                "image": s.image,
                "created_at": s.created_at,
                "current": listing.current == Some(s.revision),
            })
        })
        .collect();
    print_table(revision_rows(&listing), &json, session.format)
}

/// List pods selected by a deployment
pub async fn pods(session: &Session, target: &str) -> Result<()> {
    let target = session.target(target)?;
    let pods = session.controller().await?.pods(&target).await?;
    print_table(pod_rows(&pods), &pods, session.format)
}

/// Lifecycle phase of one pod in the session namespace
pub async fn pod_status(session: &Session, pod: &str) -> Result<()> {
    let namespace = session.default_namespace.as_str();
    let phase = session.controller().await?.pod_phase(namespace, pod).await?;

    match session.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "namespace": namespace,
            "pod": pod,
            "phase": phase,
        }))?,
        OutputFormat::Table => println!("{}/{}: {}", namespace, pod, color_status(&phase)),
    }
    Ok(())
}

/// Print container logs of one pod in the session namespace
pub async fn logs(session: &Session, pod: &str, options: LogOptions) -> Result<()> {
    let namespace = session.default_namespace.as_str();
    let logs = session
        .controller()
        .await?
        .pod_logs(namespace, pod, &options)
        .await?;

    match session.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "namespace": namespace,
            "pod": pod,
            "logs": logs,
        }))?,
        OutputFormat::Table => print!("{}", logs),
    }
    Ok(())
}
