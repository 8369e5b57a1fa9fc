//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use condwatch_config::{AppConfig, EventBindingConfig, SensorConfig};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .event("session.set_flag", &["flag"])
///     .poll("playerX")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn parse_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.evaluator.parse_cache_capacity = capacity;
        self
    }

    pub fn builtins(mut self, enabled: bool) -> Self {
        self.config.evaluator.builtins = enabled;
        self
    }

    pub fn event(mut self, name: &str, touches: &[&str]) -> Self {
        self.config.events.push(EventBindingConfig {
            name: name.to_string(),
            touches: touches.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    fn sensor(mut self, name: &str, strategy: &str) -> Self {
        self.config.sensors.push(SensorConfig {
            name: name.to_string(),
            strategy: strategy.to_string(),
        });
        self
    }

    pub fn poll(self, sensor: &str) -> Self {
        self.sensor(sensor, "poll")
    }

    pub fn push(self, sensor: &str) -> Self {
        self.sensor(sensor, "push")
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
