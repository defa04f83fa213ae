//! Command-line interface for clusterplug.

mod complete;
mod completion;
mod plugins;
mod reconcile;
mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use clusterplug::config::{Config, LogFormat};
use clusterplug::store::FileStore;

use completion::Shell;
use status::OutputFormat;

#[derive(Parser)]
#[command(name = "clusterplug")]
#[command(about = "Plugin status and reconcile hooks for managed clusters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Get the status of a cluster and its plugins
    Status {
        /// Cluster name
        cluster: String,
        /// Include plugin capabilities and the configured plugin references
        #[arg(short, long)]
        verbose: bool,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
        /// Namespace of the cluster (defaults to store.namespace)
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// List installed plugins
    Plugins,
    /// Run one reconcile cycle for a cluster
    Reconcile {
        /// Cluster name
        cluster: String,
        /// Namespace of the cluster (defaults to store.namespace)
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Print a shell completion script
    Completion {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Candidates for the completion scripts
    #[command(hide = true)]
    Complete {
        #[command(subcommand)]
        target: CompleteTarget,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CompleteTarget {
    /// Cluster names starting with a prefix
    Clusters {
        /// Already completed positional arguments followed by the word being completed
        words: Vec<String>,
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();
    let (config, rejected) = Config::load().with_context(|| "Failed to load configuration")?;
    init_logging(config.logging.format);
    for setting in &rejected {
        warn!(key = setting.key, value = %setting.value, "Ignoring invalid setting: {}", setting.reason);
    }

    match cli.command {
        Some(Commands::Version) | None => {
            println!("clusterplug {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Status {
            cluster,
            verbose,
            output,
            namespace,
        }) => {
            let namespace = namespace.unwrap_or_else(|| config.store.namespace.clone());
            status::cmd_status(&config, &namespace, &cluster, verbose, output).await
        }
        Some(Commands::Plugins) => plugins::cmd_plugins(&config),
        Some(Commands::Reconcile { cluster, namespace }) => {
            let namespace = namespace.unwrap_or_else(|| config.store.namespace.clone());
            reconcile::cmd_reconcile(&config, &namespace, &cluster).await
        }
        Some(Commands::Completion { shell }) => {
            completion::cmd_completion(shell);
            Ok(())
        }
        Some(Commands::Complete {
            target: CompleteTarget::Clusters { words, namespace },
        }) => {
            let namespace = namespace.unwrap_or_else(|| config.store.namespace.clone());
            complete::cmd_complete_clusters(&config, &namespace, &words).await
        }
    }
}

/// Logs go to stderr so `--output json` keeps stdout machine readable.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

pub(crate) fn open_store(config: &Config) -> FileStore {
    FileStore::new(config.store.dir_path())
}
