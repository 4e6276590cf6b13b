//! Prometheus and Alertmanager commands

use anyhow::Result;
use colored::Colorize;
use ops_lib::duty::summarize_alerts;
use ops_lib::monitoring::{job_selector, Alert, PodUsage, QueryResult, ServiceDashboard};
use tabled::Tabled;

use super::Session;
use crate::output::{
    color_status, format_labels, format_timestamp, print_info, print_json, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Alert")]
    name: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Series")]
    series: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct PodUsageRow {
    #[tabled(rename = "Pod")]
    name: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Restarts")]
    restarts: i64,
    #[tabled(rename = "OOMKilled")]
    oom_killed: String,
}

fn color_severity(severity: &str) -> String {
    match severity {
        "critical" | "page" => severity.red().bold().to_string(),
        "warning" => severity.yellow().to_string(),
        _ => severity.to_string(),
    }
}

fn alert_rows(alerts: &[Alert]) -> Vec<AlertRow> {
    alerts
        .iter()
        .map(|a| AlertRow {
            name: a.name().to_string(),
            severity: color_severity(a.severity().unwrap_or("-")),
            state: color_status(&a.state),
            since: format_timestamp(a.active_at),
            description: a
                .annotation("description")
                .or_else(|| a.annotation("summary"))
                .unwrap_or("")
                .to_string(),
        })
        .collect()
}

fn sample_rows(result: &QueryResult) -> Vec<SampleRow> {
    result
        .series
        .iter()
        .map(|s| SampleRow {
            series: format_labels(&s.metric),
            value: s.value().unwrap_or("-").to_string(),
        })
        .collect()
}

fn format_usage(used: String, limit: Option<String>, ratio: Option<f64>) -> String {
    match (limit, ratio) {
        (Some(limit), Some(ratio)) => {
            let text = format!("{used} / {limit} ({:.0}%)", ratio * 100.0);
            if ratio >= 0.9 {
                text.red().to_string()
            } else {
                text
            }
        }
        _ => used,
    }
}

fn format_bytes(bytes: f64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes >= 1024.0 * MIB {
        format!("{:.1}Gi", bytes / (1024.0 * MIB))
    } else {
        format!("{:.0}Mi", bytes / MIB)
    }
}

fn pod_usage_rows(pods: &[PodUsage]) -> Vec<PodUsageRow> {
    pods.iter()
        .map(|p| PodUsageRow {
            name: p.name.clone(),
            phase: color_status(p.phase.as_deref().unwrap_or("-")),
            ready: if p.ready { "✓".to_string() } else { "".to_string() },
            cpu: format_usage(
                format!("{:.2}", p.cpu_usage_cores),
                (p.cpu_limit_cores > 0.0).then(|| format!("{:.2}", p.cpu_limit_cores)),
                p.cpu_ratio(),
            ),
            memory: format_usage(
                format_bytes(p.memory_usage_bytes),
                (p.memory_limit_bytes > 0.0).then(|| format_bytes(p.memory_limit_bytes)),
                p.memory_ratio(),
            ),
            restarts: p.restarts,
            oom_killed: if p.oom_killed {
                "yes".red().to_string()
            } else {
                "".to_string()
            },
        })
        .collect()
}

fn print_dashboard(dashboard: &ServiceDashboard) -> Result<()> {
    let scope = match &dashboard.namespace {
        Some(ns) => format!("{} in {}", dashboard.job, ns),
        None => dashboard.job.clone(),
    };
    println!("{} {}", "Service".bold(), scope.cyan());
    println!("{}", "=".repeat(60));

    if dashboard.pods.is_empty() {
        println!("{}", "No pods found for this job".yellow());
    } else {
        print_table(pod_usage_rows(&dashboard.pods), &dashboard.pods, OutputFormat::Table)?;
    }

    println!();
    if dashboard.alerts.is_empty() {
        println!("{}", "No active alerts".green());
        Ok(())
    } else {
        println!("{}", "Active alerts".bold());
        print_table(alert_rows(&dashboard.alerts), &dashboard.alerts, OutputFormat::Table)
    }
}

/// Metric names containing `pattern`, case-insensitively
fn filter_metrics(names: Vec<String>, pattern: Option<&str>) -> Vec<String> {
    match pattern.map(str::to_lowercase) {
        Some(p) => names
            .into_iter()
            .filter(|n| n.to_lowercase().contains(&p))
            .collect(),
        None => names,
    }
}

/// Show active alerts from Alertmanager
pub async fn alerts(session: &Session, brief: bool) -> Result<()> {
    let alerts = session.monitoring_client()?.active_alerts().await?;

    match session.format {
        OutputFormat::Json => print_json(&alerts),
        OutputFormat::Table if brief || alerts.is_empty() => {
            print!("{}", summarize_alerts(&alerts));
            if alerts.is_empty() {
                println!();
            }
            Ok(())
        }
        OutputFormat::Table => print_table(alert_rows(&alerts), &alerts, OutputFormat::Table),
    }
}

/// Run an instant query; with `job`, `expr` is a metric name scoped to that job
pub async fn query(session: &Session, expr: &str, job: Option<&str>) -> Result<()> {
    let promql = match job {
        Some(job) => job_selector(expr, job),
        None => expr.to_string(),
    };
    let result = session.monitoring_client()?.query(&promql).await?;

    if session.format == OutputFormat::Table {
        print_info(&format!("{} ({})", promql, result.result_type));
    }
    print_table(sample_rows(&result), &result, session.format)
}

/// Pods, resource usage and active alerts of one scrape job
pub async fn dashboard(session: &Session, job: &str, all_namespaces: bool) -> Result<()> {
    let namespace = (!all_namespaces).then_some(session.default_namespace.as_str());
    let dashboard = session.monitoring_client()?.dashboard(job, namespace).await?;

    match session.format {
        OutputFormat::Json => print_json(&dashboard),
        OutputFormat::Table => print_dashboard(&dashboard),
    }
}

/// List metric names exported by a scrape job
pub async fn metrics(session: &Session, job: &str, grep: Option<&str>) -> Result<()> {
    let names = session.monitoring_client()?.list_metrics(job).await?;
    let names = filter_metrics(names, grep);

    match session.format {
        OutputFormat::Json => print_json(&names)?,
        OutputFormat::Table => {
            if names.is_empty() {
                println!("{}", "No metrics found".yellow());
            }
            for name in &names {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
