mod check_commands;
mod config_commands;
mod operator;
mod session_commands;

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    anyhow::{Context, bail},
    clap::{Parser, Subcommand},
    tether_config::{LoggingConfig, TetherConfig},
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
    tracing_subscriber::{
        EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    },
};

use crate::config_commands::{ConfigAction, Overrides};

#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Tether: bridge a WebSocket endpoint to a local Ollama model"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output console logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching ./ and ~/.config/tether/.
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket URI (overrides config and WEBSOCKET_URI).
    #[arg(long, global = true)]
    uri: Option<String>,

    /// Review every reply before it is sent.
    #[arg(long, global = true, default_value_t = false)]
    manual: bool,

    /// Do not probe Ollama before connecting.
    #[arg(long, global = true, default_value_t = false)]
    skip_check: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            uri: self.uri.clone(),
            manual: self.manual,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and answer messages (default when no subcommand is provided).
    Run,
    /// Validate the configuration and check that Ollama serves the model.
    Check,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Initialise tracing: an optional console layer (stderr) and an optional
/// audit file layer. `RUST_LOG` wins over the configured level.
///
/// Returns the log file path when file logging is active.
fn init_telemetry(
    cli: &Cli,
    logging: &LoggingConfig,
    with_file: bool,
) -> anyhow::Result<Option<PathBuf>> {
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if logging.console {
        if cli.json_logs || logging.json {
            layers.push(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .boxed(),
            );
        } else {
            layers.push(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .boxed(),
            );
        }
    }

    let log_file = match logging.file.as_ref().filter(|_| with_file) {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            layers.push(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            );
            Some(path.clone())
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();

    Ok(log_file)
}

fn print_banner() {
    println!();
    println!("  ╭──────────────────────────────────────────╮");
    println!("  │  tether {:<33}│", env!("CARGO_PKG_VERSION"));
    println!("  │  WebSocket ⇄ Ollama                      │");
    println!("  ╰──────────────────────────────────────────╯");
    println!();
}

fn print_config_summary(config: &TetherConfig, config_path: Option<&Path>) {
    let mode = if config.agent.auto_mode {
        "auto"
    } else {
        "manual"
    };
    let prompt = match (config.prompt.inline(), &config.prompt.system_prompt_file) {
        (Some(_), _) => "inline".to_string(),
        (None, Some(path)) => path.display().to_string(),
        (None, None) => "(none)".to_string(),
    };
    let log_file = config
        .logging
        .file
        .as_ref()
        .map_or_else(|| "(disabled)".to_string(), |p| p.display().to_string());

    if let Some(path) = config_path {
        println!("  config         {}", path.display());
    }
    println!("  websocket      {}", config.transport.uri);
    println!("  reconnect      {}", config.transport.reconnect);
    println!("  ollama         {}", config.inference.api_url);
    println!("  model          {}", config.inference.model);
    println!("  temperature    {}", config.inference.temperature);
    println!("  timeout        {}s", config.inference.timeout_secs);
    println!("  mode           {mode}");
    println!(
        "  fragments      {} (stale after {}s)",
        if config.agent.fragment_reconstruction {
            "reassemble"
        } else {
            "pass through"
        },
        config.agent.staleness_window_secs
    );
    println!("  system prompt  {prompt}");
    println!("  log file       {log_file}");
    println!();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let overrides = cli.overrides();
    let config = config_commands::effective_config(&overrides)?;

    let report = config_commands::full_report(overrides.config.as_deref(), &config);
    if report.has_errors() {
        config_commands::print_diagnostics(&report, false);
        eprintln!("\nCheck your config file or .env and make sure the required values are set.");
        bail!("invalid configuration");
    }

    print_banner();
    print_config_summary(&config, report.config_path.as_deref());

    let log_file = init_telemetry(cli, &config.logging, true)?;
    info!(version = env!("CARGO_PKG_VERSION"), "tether starting");

    let system_prompt = tether_config::resolve_system_prompt(&config.prompt)?;

    if !cli.skip_check {
        check_commands::probe_ollama(&config).await?;
        println!();
    }

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal.cancel();
        }
    });

    println!(
        "{} mode enabled. Connecting to {}...\n",
        if config.agent.auto_mode {
            "Auto"
        } else {
            "Manual"
        },
        config.transport.uri
    );

    let result = session_commands::run_agent(&config, system_prompt, cancel).await;
    match &result {
        Ok(summaries) => session_commands::print_summaries(summaries),
        Err(e) => {
            let reason = format!("{e:#}");
            error!(error = %reason, "agent stopped");
        },
    }

    info!("shutdown complete");
    eprintln!("\nShutdown complete.");
    if let Some(path) = log_file {
        eprintln!("Session log saved to: {}\n", path.display());
    }

    result.map(|_| ())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => run(&cli).await,
        Some(Commands::Check) => {
            init_telemetry(&cli, &LoggingConfig::default(), false)?;
            check_commands::handle_check(&cli.overrides()).await
        },
        Some(Commands::Config { ref action }) => {
            init_telemetry(&cli, &LoggingConfig::default(), false)?;
            config_commands::handle_config(action, &cli.overrides()).await
        },
    }
}
