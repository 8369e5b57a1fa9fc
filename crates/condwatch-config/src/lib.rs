#![deny(unsafe_code)]

//! Configuration loading and validation for condwatch.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`AppConfig`] type as the central configuration structure, and the
//! [`bindings`] module for the runtime event-binding and strategy tables.

/// Change-event bindings and per-sensor change strategies.
pub mod bindings;

use std::path::Path;

use serde::{Deserialize, Serialize};

use bindings::{ChangeStrategy, EventBinding, EventBindings, StrategyTable};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Expression evaluator settings.
    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    /// Change-event bindings.
    #[serde(default)]
    pub events: Vec<EventBindingConfig>,

    /// Per-sensor change strategies.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Expression evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Number of parsed expressions kept by source text. 0 disables the cache.
    #[serde(default = "default_parse_cache_capacity")]
    pub parse_cache_capacity: usize,

    /// Register the built-in string utilities.
    #[serde(default = "default_builtins")]
    pub builtins: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            parse_cache_capacity: default_parse_cache_capacity(),
            builtins: default_builtins(),
        }
    }
}

fn default_parse_cache_capacity() -> usize {
    256
}

fn default_builtins() -> bool {
    true
}

/// A change-event binding as expressed in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBindingConfig {
    /// Event name fired by the host.
    pub name: String,

    /// Function names touched when the event fires.
    pub touches: Vec<String>,
}

/// A sensor's change strategy as expressed in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor function name.
    pub name: String,

    /// "push" or "poll".
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "push".to_string()
}

/// Words expressions reserve for literals and operators.
const RESERVED: [&str; 5] = ["true", "false", "and", "or", "not"];

/// Whether `name` could be written as a function name in an expression.
fn is_function_name(name: &str) -> bool {
    if RESERVED.iter().any(|word| name.eq_ignore_ascii_case(word)) {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        }
        _ => false,
    }
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        // Validate event bindings
        for (i, event) in self.events.iter().enumerate() {
            if event.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "events[{i}].name must not be empty"
                )));
            }
            if self.events[..i].iter().any(|e| e.name == event.name) {
                return Err(ConfigError::Validation(format!(
                    "events[{i}].name {:?} is bound more than once",
                    event.name
                )));
            }
            if event.touches.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "events[{i}].touches must not be empty"
                )));
            }
            if let Some(bad) = event.touches.iter().find(|t| !is_function_name(t)) {
                return Err(ConfigError::Validation(format!(
                    "events[{i}].touches contains invalid function name {bad:?}"
                )));
            }
        }

        // Validate sensor strategies
        for (i, sensor) in self.sensors.iter().enumerate() {
            if !is_function_name(&sensor.name) {
                return Err(ConfigError::Validation(format!(
                    "sensors[{i}].name is not a valid function name: {:?}",
                    sensor.name
                )));
            }
            if self.sensors[..i].iter().any(|s| s.name == sensor.name) {
                return Err(ConfigError::Validation(format!(
                    "sensors[{i}].name {:?} is configured more than once",
                    sensor.name
                )));
            }
            if let Err(e) = sensor.strategy.parse::<ChangeStrategy>() {
                return Err(ConfigError::Validation(format!(
                    "sensors[{i}].strategy: {e} (expected \"push\" or \"poll\")"
                )));
            }
        }

        Ok(())
    }

    /// Build the [`EventBindings`] table from the `[[events]]` entries.
    pub fn build_event_bindings(&self) -> EventBindings {
        let bindings = self
            .events
            .iter()
            .map(|e| EventBinding {
                event: e.name.clone(),
                touches: e.touches.clone(),
            })
            .collect();
        bindings::build_event_bindings(bindings)
    }

    /// Build the [`StrategyTable`] from the `[[sensors]]` entries.
    pub fn build_strategy_table(&self) -> StrategyTable {
        let mut table = StrategyTable::new();
        for sensor in &self.sensors {
            // Validated on load; anything else falls back to push.
            let strategy = sensor.strategy.parse().unwrap_or_default();
            table.set(&sensor.name, strategy);
        }
        table
    }
}
