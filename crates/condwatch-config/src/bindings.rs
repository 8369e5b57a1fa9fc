//! Runtime tables built from configuration: change-event bindings and the
//! per-sensor change strategy.
//!
//! An event binding maps a host event name (e.g. `"session.set_flag"`) to the
//! function names it may have changed. The strategy table records whether a
//! sensor is pushed (the host touches it at the mutation site) or polled
//! (diffed on every tick).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How changes to a sensor are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChangeStrategy {
    /// The host calls `touch` / `fire_event` where the state mutates.
    #[default]
    Push,
    /// The value is sampled every tick and touched when it differs.
    Poll,
}

impl ChangeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStrategy::Push => "push",
            ChangeStrategy::Poll => "poll",
        }
    }
}

impl fmt::Display for ChangeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(ChangeStrategy::Push),
            "poll" => Ok(ChangeStrategy::Poll),
            other => Err(format!("unknown change strategy {other:?}")),
        }
    }
}

/// A single event binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBinding {
    /// Event name fired by the host.
    pub event: String,
    /// Function names touched, in order.
    pub touches: Vec<String>,
}

impl EventBinding {
    pub fn new(event: &str, touches: &[&str]) -> Self {
        Self {
            event: event.to_string(),
            touches: touches.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Event name → function names to touch.
#[derive(Debug, Clone, Default)]
pub struct EventBindings {
    bindings: HashMap<String, Vec<String>>,
}

impl EventBindings {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an event. Binding an event again appends names it does not
    /// already touch.
    pub fn bind(&mut self, binding: EventBinding) {
        let names = self.bindings.entry(binding.event).or_default();
        for name in binding.touches {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    /// Function names touched by `event`, or `None` for an unbound event.
    pub fn touches(&self, event: &str) -> Option<&[String]> {
        self.bindings.get(event).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

/// Build an [`EventBindings`] table from a list of bindings.
pub fn build_event_bindings(bindings: Vec<EventBinding>) -> EventBindings {
    let mut table = EventBindings::new();
    for binding in bindings {
        table.bind(binding);
    }
    table
}

/// Sensor name → change strategy. Sensors not listed are [`ChangeStrategy::Push`].
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    strategies: HashMap<String, ChangeStrategy>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, sensor: &str, strategy: ChangeStrategy) {
        self.strategies.insert(sensor.to_string(), strategy);
    }

    /// Explicitly configured strategy for `sensor`, if any.
    pub fn get(&self, sensor: &str) -> Option<ChangeStrategy> {
        self.strategies.get(sensor).copied()
    }

    /// Strategy for `sensor`.
    pub fn strategy_of(&self, sensor: &str) -> ChangeStrategy {
        self.strategies.get(sensor).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("push".parse::<ChangeStrategy>(), Ok(ChangeStrategy::Push));
        assert_eq!("poll".parse::<ChangeStrategy>(), Ok(ChangeStrategy::Poll));
        assert!("Poll".parse::<ChangeStrategy>().is_err());
        assert_eq!(ChangeStrategy::default(), ChangeStrategy::Push);
    }

    #[test]
    fn test_bindings_lookup() {
        let table = build_event_bindings(vec![
            EventBinding::new("session.set_flag", &["flag", "flagCount"]),
            EventBinding::new("player.death", &["deaths"]),
        ]);

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.touches("session.set_flag").unwrap(),
            &["flag".to_string(), "flagCount".to_string()]
        );
        assert!(table.touches("player.dash").is_none());
        assert_eq!(table.touches("player.death").unwrap(), &["deaths".to_string()]);
    }

    #[test]
    fn test_rebinding_merges_without_duplicates() {
        let mut table = EventBindings::new();
        table.bind(EventBinding::new("level.enter", &["room", "SID"]));
        table.bind(EventBinding::new("level.enter", &["SID", "chapter"]));

        assert_eq!(
            table.touches("level.enter").unwrap(),
            &["room".to_string(), "SID".to_string(), "chapter".to_string()]
        );
    }

    #[test]
    fn test_clear() {
        let mut table = build_event_bindings(vec![EventBinding::new("tick", &["time"])]);
        assert!(!table.is_empty());
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_strategy_table_defaults_to_push() {
        let mut table = StrategyTable::new();
        table.set("playerX", ChangeStrategy::Poll);
        table.set("flag", ChangeStrategy::Push);

        assert_eq!(table.strategy_of("playerX"), ChangeStrategy::Poll);
        assert_eq!(table.strategy_of("flag"), ChangeStrategy::Push);
        assert_eq!(table.strategy_of("unknown"), ChangeStrategy::Push);
        assert_eq!(table.get("unknown"), None);
        assert_eq!(table.get("flag"), Some(ChangeStrategy::Push));
    }
}
