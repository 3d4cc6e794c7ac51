use std::path::{Path, PathBuf};

use {anyhow::Result, clap::Subcommand};

use tether_config::{
    TetherConfig,
    validate::{self, Severity, ValidationResult},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment + flags).
    Show,
    /// Validate the configuration file and the effective settings.
    Validate {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

/// Command-line values that win over file and environment settings.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub uri: Option<String>,
    pub manual: bool,
}

/// Load the config file (explicit or discovered), then apply environment
/// variables and command-line flags on top.
pub fn effective_config(overrides: &Overrides) -> Result<TetherConfig> {
    let mut config = match &overrides.config {
        Some(path) => tether_config::load_config(path)?,
        None => tether_config::discover_and_load(),
    };
    tether_config::apply_env_overrides(&mut config);
    apply_flags(&mut config, overrides);
    Ok(config)
}

fn apply_flags(config: &mut TetherConfig, overrides: &Overrides) {
    if let Some(uri) = &overrides.uri {
        config.transport.uri = uri.trim().to_string();
    }
    if overrides.manual {
        config.agent.auto_mode = false;
    }
}

/// File-level checks (unknown keys, syntax) plus checks on the effective
/// values.
#[must_use]
pub fn full_report(file: Option<&Path>, config: &TetherConfig) -> ValidationResult {
    let mut result = validate::validate(file);
    result.merge(tether_config::validate_config(config));
    result
}

pub async fn handle_config(action: &ConfigAction, overrides: &Overrides) -> Result<()> {
    match action {
        ConfigAction::Show => show(overrides),
        ConfigAction::Validate { verbose } => check(overrides, *verbose),
    }
}

fn show(overrides: &Overrides) -> Result<()> {
    let config = effective_config(overrides)?;
    match overrides
        .config
        .clone()
        .or_else(tether_config::find_config_file)
    {
        Some(path) => eprintln!("# loaded from {}\n", path.display()),
        None => eprintln!("# no config file found; defaults + environment\n"),
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(overrides: &Overrides, verbose: bool) -> Result<()> {
    let config = effective_config(overrides)?;
    let result = full_report(overrides.config.as_deref(), &config);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults and environment.\n");
    }

    let errors = print_diagnostics(&result, verbose);
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Print diagnostics and a one-line tally to stderr. Returns the number of
/// errors.
pub fn print_diagnostics(result: &ValidationResult, verbose: bool) -> usize {
    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    errors
}
