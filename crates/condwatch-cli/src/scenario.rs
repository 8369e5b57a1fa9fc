//! Scenario runner for `condwatch simulate`.
//!
//! A scenario seeds a session, activates flag controllers and applies an
//! ordered list of steps, recording the flag state after each one.
//!
//! ```toml
//! flags = ["intro_done"]
//!
//! [counters]
//! berries = 3
//!
//! [[controllers]]
//! condition = 'flag("intro_done") AND counter("berries") >= 5'
//! flag = "door_open"
//!
//! [[events]]
//! name = "session.reset"
//! touches = ["flag"]
//!
//! [[steps]]
//! action = "add_counter"
//! counter = "berries"
//! amount = 2
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use condwatch_config::bindings::EventBinding;
use condwatch_config::{AppConfig, EventBindingConfig};
use condwatch_core::{CallbackError, ConditionError, Conditions, Expression, SubscriptionId};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::host::{Host, Session};

/// A scenario file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Flags set before anything else.
    #[serde(default)]
    pub flags: Vec<String>,

    /// Initial counter values.
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,

    /// Extra event bindings on top of the configuration's.
    #[serde(default)]
    pub events: Vec<EventBindingConfig>,

    #[serde(default)]
    pub controllers: Vec<ControllerSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// What a controller does to its flag when the condition holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    #[default]
    Set,
    Clear,
}

/// Sets or clears `flag` whenever `condition` evaluates to `true`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSpec {
    pub condition: String,
    pub flag: String,
    #[serde(default)]
    pub mode: ControllerMode,
}

/// One scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    SetFlag { flag: String },
    ClearFlag { flag: String },
    AddCounter { counter: String, amount: i64 },
    Event { name: String },
    Tick,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::SetFlag { flag } => write!(f, "set_flag {flag}"),
            Step::ClearFlag { flag } => write!(f, "clear_flag {flag}"),
            Step::AddCounter { counter, amount } => write!(f, "add_counter {counter} {amount:+}"),
            Step::Event { name } => write!(f, "event {name}"),
            Step::Tick => f.write_str("tick"),
        }
    }
}

/// Flag state after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub description: String,
    pub flags: Vec<String>,
}

/// Result of a scenario run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    /// Flags after seeding and controller activation.
    pub initial_flags: Vec<String>,
    pub steps: Vec<StepOutcome>,
    /// Controllers whose condition failed to compile.
    pub disabled_controllers: usize,
}

/// Evaluate the controller's condition once and apply its effect.
fn apply_controller(
    host: &Host,
    spec: &ControllerSpec,
    condition: &Expression,
) -> Result<(), CallbackError> {
    if host.conditions().evaluate_expression(condition)?.is_true() {
        match spec.mode {
            ControllerMode::Set => host.set_flag(&spec.flag),
            ControllerMode::Clear => host.clear_flag(&spec.flag),
        };
    }
    Ok(())
}

/// Compile `spec`, subscribe it, and run it once against the current state.
fn activate_controller(
    host: &Host,
    spec: &ControllerSpec,
) -> Result<SubscriptionId, ConditionError> {
    let condition = host.conditions().compile(&spec.condition)?;

    let callback_host = host.clone();
    let callback_spec = spec.clone();
    let callback_condition = condition.clone();
    let id = host.conditions().subscribe(&spec.condition, move || {
        apply_controller(&callback_host, &callback_spec, &callback_condition)
    })?;

    if let Err(err) = apply_controller(host, spec, &condition) {
        warn!(subscription = %id, error = %err, "initial controller check failed");
    }
    debug!(subscription = %id, flag = %spec.flag, "controller active");
    Ok(id)
}

/// Run `scenario` against a fresh context built from `config`.
pub fn run(scenario: &Scenario, config: &AppConfig) -> Result<SimulationReport> {
    let conditions = Arc::new(Conditions::from_config(config)?);
    for event in &scenario.events {
        conditions.bind_event(EventBinding {
            event: event.name.clone(),
            touches: event.touches.clone(),
        });
    }

    let session = Session::new();
    let host = Host::new(Arc::clone(&conditions), session)?;
    for flag in &scenario.flags {
        host.set_flag(flag);
    }
    for (counter, value) in &scenario.counters {
        host.add_counter(counter, *value);
    }

    let mut report = SimulationReport::default();
    for spec in &scenario.controllers {
        if let Err(err) = activate_controller(&host, spec) {
            warn!(condition = %spec.condition, error = %err, "controller disabled");
            report.disabled_controllers += 1;
        }
    }
    report.initial_flags = host.session().flags();

    for step in &scenario.steps {
        match step {
            Step::SetFlag { flag } => {
                host.set_flag(flag);
            }
            Step::ClearFlag { flag } => {
                host.clear_flag(flag);
            }
            Step::AddCounter { counter, amount } => {
                host.add_counter(counter, *amount);
            }
            Step::Event { name } => {
                conditions.fire_event(name);
            }
            Step::Tick => {
                conditions.tick();
            }
        }
        report.steps.push(StepOutcome {
            description: step.to_string(),
            flags: host.session().flags(),
        });
    }

    conditions.unload();
    info!(steps = report.steps.len(), "simulation finished");
    Ok(report)
}
