mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use farm_client::{RegistryError, ServerRegistry};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "dashboard";

#[derive(Parser)]
#[command(name = "dashboard", about = "Build-farm dashboard gateway")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the gateway and its admin listener
    Serve(ConfigArgs),
    /// Load and validate a configuration file, then exit
    ValidateConfig(ConfigArgs),
    /// Print the compiled-in server registry
    Servers,
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Gateway(#[from] gateway::GatewayError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Serve(args) => serve(args),
        CliCommand::ValidateConfig(args) => validate_config(args),
        CliCommand::Servers => list_servers(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "dashboard exited with error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<Config, CliError> {
    let config = Config::from_file(&args.config)?;
    config.validate()?;
    Ok(config)
}

fn serve(args: ConfigArgs) -> Result<(), CliError> {
    let config = load_config(&args)?;

    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(gateway::run(config.gateway))?;
    Ok(())
}

fn validate_config(args: ConfigArgs) -> Result<(), CliError> {
    let config = load_config(&args)?;
    let registry = config.gateway.registry()?;
    println!(
        "{}: ok ({} servers, default {})",
        args.config.display(),
        registry.len(),
        registry.default_server().name
    );
    Ok(())
}

fn list_servers() -> Result<(), CliError> {
    let registry = ServerRegistry::builtin()?;
    for server in registry.list() {
        let marker = if server.is_default { " (default)" } else { "" };
        println!("{}{}\t{}\t{}", server.name, marker, server.url, server.description);
    }
    Ok(())
}

/// Installs the fmt subscriber and, when a DSN is configured, Sentry with its
/// tracing layer. The returned guard flushes Sentry on drop.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.and_then(|logging| {
        let dsn = logging.sentry_dsn.parse().ok()?;
        Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn),
            release: sentry::release_name!(),
            ..Default::default()
        }))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    describe_all(farm_client::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
