//! Diff-on-tick change detection for sensors the host cannot instrument.
//!
//! A probe samples one sensor's current value. [`Poller::tick`] samples every
//! probe and reports the names whose value differs from the previous tick;
//! the caller touches them. The first sample of a probe always counts as a
//! change.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use condwatch_config::bindings::{ChangeStrategy, StrategyTable};
use tracing::{debug, trace};

use crate::value::Value;

/// Errors from probe registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("sensor {0} is configured for push and cannot be polled")]
    StrategyConflict(String),

    #[error("probe already registered for {0}")]
    Duplicate(String),
}

/// Samples a sensor's current value.
pub type ProbeFn = dyn Fn() -> Value + Send + Sync;

struct Probe {
    name: String,
    sample: Arc<ProbeFn>,
    last: Option<Value>,
}

/// The set of registered probes and their last observed values.
#[derive(Default)]
pub struct Poller {
    strategies: StrategyTable,
    probes: Mutex<Vec<Probe>>,
}

impl Poller {
    pub fn new(strategies: StrategyTable) -> Self {
        Self {
            strategies,
            probes: Mutex::new(Vec::new()),
        }
    }

    fn probes(&self) -> MutexGuard<'_, Vec<Probe>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a probe for `name`.
    ///
    /// Fails when `name` is explicitly configured as a push sensor, or
    /// already has a probe.
    pub fn add<F>(&self, name: &str, sample: F) -> Result<(), ProbeError>
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        if self.strategies.get(name) == Some(ChangeStrategy::Push) {
            return Err(ProbeError::StrategyConflict(name.to_string()));
        }
        let mut probes = self.probes();
        if probes.iter().any(|p| p.name == name) {
            return Err(ProbeError::Duplicate(name.to_string()));
        }
        probes.push(Probe {
            name: name.to_string(),
            sample: Arc::new(sample),
            last: None,
        });
        debug!(sensor = name, "probe registered");
        Ok(())
    }

    /// Sample every probe; return the names whose value changed, in
    /// registration order.
    pub fn tick(&self) -> Vec<String> {
        let samplers: Vec<(String, Arc<ProbeFn>)> = self
            .probes()
            .iter()
            .map(|p| (p.name.clone(), Arc::clone(&p.sample)))
            .collect();

        // Sensors run without the lock held.
        let samples: Vec<(String, Value)> = samplers
            .into_iter()
            .map(|(name, sample)| {
                let value = sample();
                (name, value)
            })
            .collect();

        let mut probes = self.probes();
        let mut changed = Vec::new();
        for (name, value) in samples {
            let Some(probe) = probes.iter_mut().find(|p| p.name == name) else {
                continue;
            };
            if !probe.last.as_ref().is_some_and(|last| last.same_as(&value)) {
                trace!(sensor = %name, value = %value, "polled value changed");
                probe.last = Some(value);
                changed.push(name);
            }
        }
        changed
    }

    /// Names with a registered probe, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.probes().iter().map(|p| p.name.clone()).collect()
    }

    /// Drop every probe.
    pub fn clear(&self) {
        self.probes().clear();
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("probes", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use pretty_assertions::assert_eq;

    fn position() -> (Arc<AtomicI64>, impl Fn() -> Value + Send + Sync + 'static) {
        let x = Arc::new(AtomicI64::new(0));
        let handle = Arc::clone(&x);
        (x, move || Value::from(handle.load(Ordering::SeqCst)))
    }

    #[test]
    fn test_first_tick_counts_as_change() {
        let poller = Poller::default();
        let (_, sample) = position();
        poller.add("playerX", sample).unwrap();

        assert_eq!(poller.tick(), vec!["playerX".to_string()]);
        assert!(poller.tick().is_empty());
    }

    #[test]
    fn test_nan_is_not_a_change() {
        let poller = Poller::default();
        poller.add("speed", || Value::Number(f64::NAN)).unwrap();

        assert_eq!(poller.tick(), vec!["speed".to_string()]);
        assert!(poller.tick().is_empty());
        assert!(poller.tick().is_empty());
    }

    #[test]
    fn test_change_detected_once() {
        let poller = Poller::default();
        let (x, sample) = position();
        poller.add("playerX", sample).unwrap();
        poller.tick();

        x.store(42, Ordering::SeqCst);
        assert_eq!(poller.tick(), vec!["playerX".to_string()]);
        assert!(poller.tick().is_empty());
    }

    #[test]
    fn test_only_changed_probes_reported() {
        let poller = Poller::default();
        let (x, sample_x) = position();
        let (_, sample_y) = position();
        poller.add("playerX", sample_x).unwrap();
        poller.add("playerY", sample_y).unwrap();
        assert_eq!(poller.tick().len(), 2);

        x.store(-3, Ordering::SeqCst);
        assert_eq!(poller.tick(), vec!["playerX".to_string()]);
    }

    #[test]
    fn test_absent_transitions_are_changes() {
        let poller = Poller::default();
        let present = Arc::new(Mutex::new(false));
        let handle = Arc::clone(&present);
        poller
            .add("room", move || {
                if *handle.lock().unwrap() {
                    Value::str("a-01")
                } else {
                    Value::Absent
                }
            })
            .unwrap();

        assert_eq!(poller.tick().len(), 1);
        *present.lock().unwrap() = true;
        assert_eq!(poller.tick(), vec!["room".to_string()]);
    }

    #[test]
    fn test_push_sensor_conflict() {
        let mut strategies = StrategyTable::new();
        strategies.set("flag", ChangeStrategy::Push);
        strategies.set("time", ChangeStrategy::Poll);
        let poller = Poller::new(strategies);

        let err = poller.add("flag", || Value::TRUE).unwrap_err();
        assert_eq!(err, ProbeError::StrategyConflict("flag".to_string()));
        assert!(poller.add("time", || Value::Number(1.0)).is_ok());
        assert!(poller.add("unlisted", || Value::Number(1.0)).is_ok());
    }

    #[test]
    fn test_duplicate_probe() {
        let poller = Poller::default();
        poller.add("time", || Value::Number(0.0)).unwrap();
        let err = poller.add("time", || Value::Number(1.0)).unwrap_err();
        assert_eq!(err, ProbeError::Duplicate("time".to_string()));
    }

    #[test]
    fn test_clear() {
        let poller = Poller::default();
        poller.add("time", || Value::Number(0.0)).unwrap();
        poller.clear();
        assert!(poller.names().is_empty());
        assert!(poller.tick().is_empty());
    }
}
