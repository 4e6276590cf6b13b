//! opsctl
//!
//! A command-line front end for scaling, restarting and rolling back
//! Kubernetes deployments with live progress, and for checking Prometheus
//! and Alertmanager.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{inspect, lifecycle, monitoring, Session};
use ops_lib::monitoring::MonitoringConfig;
use ops_lib::{LifecycleConfig, LogOptions, RollbackPolicy};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Deployment operations and alert checks
#[derive(Parser)]
#[command(name = "opsctl")]
#[command(author, version, about = "Deployment lifecycle operations and alert checks", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<String>,

    /// Namespace for deployments given without one
    #[arg(long, short, env = "OPS_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Prometheus base URL
    #[arg(long, env = "OPS_PROMETHEUS_URL", global = true)]
    pub prometheus_url: Option<String>,

    /// Alertmanager base URL
    #[arg(long, env = "OPS_ALERTMANAGER_URL", global = true)]
    pub alertmanager_url: Option<String>,

    /// Skip TLS verification towards Prometheus/Alertmanager
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scale a deployment and wait for the replicas
    Scale {
        /// Deployment (namespace/name or name)
        deployment: String,

        /// Desired replica count
        replicas: i32,
    },

    /// Trigger a rolling restart and wait for it
    Restart {
        /// Deployment (namespace/name or name)
        deployment: String,
    },

    /// Roll back to a previous revision
    Rollback {
        /// Deployment (namespace/name or name)
        deployment: String,

        /// Revision number; the previous revision if omitted
        revision: Option<String>,

        /// Pick "previous" by replica set creation time instead of revision number
        #[arg(long)]
        by_creation_time: bool,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// List rollout history
    Revisions {
        /// Deployment (namespace/name or name)
        deployment: String,
    },

    /// Show deployment status
    Status {
        /// Deployment (namespace/name or name)
        deployment: String,
    },

    /// List pods of a deployment
    Pods {
        /// Deployment (namespace/name or name)
        deployment: String,
    },

    /// Show the phase of a pod
    PodStatus {
        /// Pod name
        pod: String,
    },

    /// Print container logs of a pod
    Logs {
        /// Pod name
        pod: String,

        /// Logs of the previous container instance
        #[arg(long, short)]
        previous: bool,

        /// Only the last N lines
        #[arg(long)]
        tail: Option<i64>,

        /// Only lines newer than this many seconds
        #[arg(long)]
        since: Option<i64>,

        /// Prefix lines with timestamps
        #[arg(long)]
        timestamps: bool,
    },

    /// Show active alerts
    Alerts {
        /// Plain text summary instead of a table
        #[arg(long)]
        brief: bool,
    },

    /// Run an instant Prometheus query
    Query {
        /// PromQL expression, or a metric name when --job is given
        expr: String,

        /// Scope a metric name to one scrape job
        #[arg(long)]
        job: Option<String>,
    },

    /// Pods, CPU/memory against limits and alerts of a scrape job
    Dashboard {
        /// Scrape job
        job: String,

        /// Do not restrict pods and alerts to the namespace
        #[arg(long, short = 'A')]
        all_namespaces: bool,
    },

    /// List metric names exported by a scrape job
    Metrics {
        /// Scrape job
        job: String,

        /// Only names containing this text
        #[arg(long)]
        grep: Option<String>,
    },
}

impl Cli {
    fn session(&self, config: config::Config) -> Session {
        let policy = match &self.command {
            Commands::Rollback {
                by_creation_time: true,
                ..
            } => RollbackPolicy::CreationTime,
            _ => config.rollback_policy.unwrap_or_default(),
        };

        Session {
            format: self.format,
            default_namespace: self
                .namespace
                .clone()
                .or_else(|| config.default_namespace.clone())
                .unwrap_or_else(|| "default".to_string()),
            kube_source: commands::kube_source(self.kubeconfig.as_deref()),
            lifecycle: LifecycleConfig::default()
                .with_budgets(config.budgets())
                .with_rollback_policy(policy),
            monitoring: MonitoringConfig {
                prometheus_url: self.prometheus_url.clone().or(config.prometheus_url),
                alertmanager_url: self.alertmanager_url.clone().or(config.alertmanager_url),
                accept_invalid_certs: self.insecure,
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();

    let session = cli.session(config::Config::load()?);

    match cli.command {
        Commands::Scale {
            deployment,
            replicas,
        } => {
            lifecycle::scale(&session, &deployment, replicas).await?;
        }
        Commands::Restart { deployment } => {
            lifecycle::restart(&session, &deployment).await?;
        }
        Commands::Rollback {
            deployment,
            revision,
            yes,
            ..
        } => {
            lifecycle::rollback(&session, &deployment, revision.as_deref(), yes).await?;
        }
        Commands::Revisions { deployment } => {
            inspect::revisions(&session, &deployment).await?;
        }
        Commands::Status { deployment } => {
            inspect::status(&session, &deployment).await?;
        }
        Commands::Pods { deployment } => {
            inspect::pods(&session, &deployment).await?;
        }
        Commands::PodStatus { pod } => {
            inspect::pod_status(&session, &pod).await?;
        }
        Commands::Logs {
            pod,
            previous,
            tail,
            since,
            timestamps,
        } => {
            let options = LogOptions {
                previous,
                tail_lines: tail,
                since_seconds: since,
                timestamps,
            };
            inspect::logs(&session, &pod, options).await?;
        }
        Commands::Alerts { brief } => {
            monitoring::alerts(&session, brief).await?;
        }
        Commands::Query { expr, job } => {
            monitoring::query(&session, &expr, job.as_deref()).await?;
        }
        Commands::Dashboard {
            job,
            all_namespaces,
        } => {
            monitoring::dashboard(&session, &job, all_namespaces).await?;
        }
        Commands::Metrics { job, grep } => {
            monitoring::metrics(&session, &job, grep.as_deref()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rollback_flags_select_policy() {
        let cli = Cli::try_parse_from(["opsctl", "rollback", "prod/web", "--by-creation-time", "-y"])
            .unwrap();
        let session = cli.session(config::Config::default());
        assert_eq!(session.lifecycle.rollback_policy, RollbackPolicy::CreationTime);

        let cli = Cli::try_parse_from(["opsctl", "rollback", "prod/web", "4"]).unwrap();
        match &cli.command {
            Commands::Rollback { revision, yes, .. } => {
                assert_eq!(revision.as_deref(), Some("4"));
                assert!(!yes);
            }
            _ => panic!("expected rollback"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let cli = Cli::try_parse_from([
            "opsctl",
            "--namespace",
            "prod",
            "--prometheus-url",
            "http://prom:9090",
            "status",
            "web",
        ])
        .unwrap();
        let file = config::Config {
            default_namespace: Some("staging".to_string()),
            prometheus_url: Some("http://other:9090".to_string()),
            alertmanager_url: Some("http://am:9093".to_string()),
            scale_timeout_secs: Some(45),
            ..Default::default()
        };

        let session = cli.session(file);
        assert_eq!(session.default_namespace, "prod");
        assert_eq!(
            session.monitoring.prometheus_url.as_deref(),
            Some("http://prom:9090")
        );
        assert_eq!(
            session.monitoring.alertmanager_url.as_deref(),
            Some("http://am:9093")
        );
        assert_eq!(session.lifecycle.budgets.scale, Duration::from_secs(45));
    }

    #[test]
    fn test_dashboard_and_pod_status_parse() {
        let cli = Cli::try_parse_from(["opsctl", "dashboard", "checkout", "-A"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Dashboard {
                all_namespaces: true,
                ..
            }
        ));

        let cli = Cli::try_parse_from(["opsctl", "-n", "prod", "pod-status", "web-7d9f-a"]).unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("prod"));
        assert!(matches!(cli.command, Commands::PodStatus { .. }));
    }

    #[test]
    fn test_replicas_must_be_numeric() {
        assert!(Cli::try_parse_from(["opsctl", "scale", "prod/web", "3"]).is_ok());
        assert!(Cli::try_parse_from(["opsctl", "scale", "prod/web", "three"]).is_err());
    }
}
