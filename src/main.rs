use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use version_checker::config::{Config, FETCH_TIMEOUT_MS, log_path};
use version_checker::logging::{self, LogFormat};
use version_checker::scan::scan_pods;
use version_checker::version::checker::Checker;
use version_checker::version::registries::{OciRegistry, Registries};
use version_checker::workload::parse_pods;

#[derive(Parser)]
#[command(name = "version-checker")]
#[command(
    version,
    about = "Reports whether running container images are the latest available"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the containers of a pod (`kubectl get pod -o json`) against their registries
    Check {
        /// Pod or Pod list JSON file
        #[arg(long)]
        pod: PathBuf,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,

        /// Log to a file instead of stderr; defaults to the data directory
        #[arg(long)]
        log_file: Option<Option<PathBuf>>,

        /// Check containers without an enable annotation
        #[arg(long)]
        test_all_containers: bool,
    },
}

async fn check(pod: &Path, config: &Config) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(pod)
        .await
        .with_context(|| format!("Failed to read {}", pod.display()))?;
    let pods =
        parse_pods(&content).with_context(|| format!("Failed to parse pods in {}", pod.display()))?;

    let oci = OciRegistry::new(
        &config.registry.user_agent,
        Duration::from_millis(FETCH_TIMEOUT_MS),
        config.registry.insecure_hosts.clone(),
    )?;
    let registry = Arc::new(Registries::new(Vec::new(), Arc::new(oci)));
    let checker = Checker::new(registry, config.cache.timeout());

    let token = CancellationToken::new();
    let gc = {
        let cache = checker.cache().clone();
        let interval = config.cache.gc_interval();
        let token = token.clone();
        tokio::spawn(async move { cache.start_garbage_collector(interval, token).await })
    };
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling checks");
                token.cancel();
            }
        })
    };

    let summary = scan_pods(&checker, &token, &pods, config.test_all_containers).await;

    for report in &summary.reports {
        println!("{}", serde_json::to_string(report)?);
    }

    token.cancel();
    interrupt.abort();
    gc.await?;
    checker.cache().shutdown()?;

    if summary.failures > 0 {
        bail!("{} container checks failed", summary.failures);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check {
            pod,
            config,
            log_format,
            log_file,
            test_all_containers,
        } => {
            let log_file = log_file.map(|path| path.unwrap_or_else(log_path));
            let _guard = logging::init(log_format, log_file.as_deref())?;

            let mut config = Config::load(config.as_deref())?;
            config.test_all_containers |= test_all_containers;

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(check(&pod, &config))
        }
    }
}
