#![deny(unsafe_code)]

//! condwatch CLI — evaluate, inspect and simulate condition expressions.

mod host;
mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use condwatch_config::AppConfig;
use condwatch_core::{Conditions, LogCollector, LogReader, token};
use tracing::{Level, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use host::{Host, Session};

/// condwatch — condition expressions with change notification.
#[derive(Parser)]
#[command(name = "condwatch", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "condwatch.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression against a demo session.
    Eval {
        /// The expression.
        expr: String,

        /// Set a session flag (repeatable).
        #[arg(long = "flag", value_name = "NAME")]
        flags: Vec<String>,

        /// Set a session counter (repeatable).
        #[arg(long = "counter", value_name = "NAME=N", value_parser = parse_counter)]
        counters: Vec<(String, i64)>,

        /// Print the value as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the function names an expression is watched under.
    Deps {
        /// The expression.
        expr: String,
    },

    /// Check an expression against the demo session's functions.
    Check {
        /// The expression.
        expr: String,
    },

    /// Run a scenario file.
    Simulate {
        /// Path to the scenario TOML.
        scenario: PathBuf,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

fn parse_counter(s: &str) -> Result<(String, i64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=N, got {s:?}"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid counter value {value:?}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let found = cli.config.exists();
    let config = if found {
        AppConfig::load(&cli.config)
            .await
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        AppConfig::default()
    };

    let diagnostics = init_tracing(&config, cli.verbose);
    if !found {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match cli.command {
        Commands::Eval {
            expr,
            flags,
            counters,
            json,
        } => cmd_eval(&config, &expr, &flags, &counters, json)?,
        Commands::Deps { expr } => cmd_deps(&expr)?,
        Commands::Check { expr } => cmd_check(&config, &expr)?,
        Commands::Simulate { scenario } => cmd_simulate(&config, &scenario, &diagnostics).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// Install the global subscriber: `fmt` output filtered by `RUST_LOG`, else
/// the configured level raised by `-v`, plus a collector of WARN+ events.
fn init_tracing(config: &AppConfig, verbose: u8) -> LogReader {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let collector = LogCollector::new(1024).with_min_level(Level::WARN);
    let reader = collector.reader();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(collector)
        .init();
    reader
}

/// A context with the demo session's sensors registered.
fn demo_host(config: &AppConfig, session: Session) -> Result<Host> {
    let conditions = Arc::new(Conditions::from_config(config)?);
    Host::new(conditions, session)
}

fn cmd_eval(
    config: &AppConfig,
    expr: &str,
    flags: &[String],
    counters: &[(String, i64)],
    json: bool,
) -> Result<()> {
    let host = demo_host(config, Session::new())?;
    for flag in flags {
        host.set_flag(flag);
    }
    for (name, value) in counters {
        host.add_counter(name, *value);
    }

    let value = host.conditions().evaluate(expr)?;
    if json {
        println!("{}", serde_json::to_string(&value)?);
    } else {
        println!("{value}");
    }
    Ok(())
}

fn cmd_deps(expr: &str) -> Result<()> {
    for name in token::function_names(expr)? {
        println!("{name}");
    }
    Ok(())
}

fn cmd_check(config: &AppConfig, expr: &str) -> Result<()> {
    let host = demo_host(config, Session::new())?;
    let compiled = host.conditions().compile(expr)?;
    println!("ok: watches [{}]", compiled.function_names().join(", "));
    Ok(())
}

async fn cmd_simulate(config: &AppConfig, path: &Path, diagnostics: &LogReader) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let scenario = scenario::Scenario::parse(&text)?;
    diagnostics.drain();

    let report = scenario::run(&scenario, config)?;
    println!("initial: [{}]", report.initial_flags.join(", "));
    for (i, step) in report.steps.iter().enumerate() {
        println!("{:>3}. {:<32} [{}]", i + 1, step.description, step.flags.join(", "));
    }
    if report.disabled_controllers > 0 {
        println!("{} controller(s) disabled", report.disabled_controllers);
    }

    let entries = diagnostics.drain();
    if !entries.is_empty() {
        println!("diagnostics:");
        for entry in entries {
            println!("  {entry}");
        }
    }
    Ok(())
}

fn cmd_config(path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("berries=3"), Ok(("berries".to_string(), 3)));
        assert_eq!(parse_counter("deaths = -2"), Ok(("deaths".to_string(), -2)));
        assert!(parse_counter("berries").is_err());
        assert!(parse_counter("berries=many").is_err());
    }

    #[test]
    fn test_eval_args() {
        let cli = Cli::try_parse_from([
            "condwatch",
            "eval",
            "flag(\"a\")",
            "--flag",
            "a",
            "--counter",
            "berries=2",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Eval {
                expr,
                flags,
                counters,
                json,
            } => {
                assert_eq!(expr, "flag(\"a\")");
                assert_eq!(flags, vec!["a".to_string()]);
                assert_eq!(counters, vec![("berries".to_string(), 2)]);
                assert!(json);
            }
            _ => panic!("expected eval"),
        }
    }

    #[test]
    fn test_demo_host_has_session_functions() {
        let host = demo_host(&AppConfig::default(), Session::new()).unwrap();
        for name in ["flag", "counter", "flagCount", "counterTotal", "strTrim"] {
            assert!(
                host.conditions().function_names().iter().any(|n| n == name),
                "{name} missing"
            );
        }
    }
}
