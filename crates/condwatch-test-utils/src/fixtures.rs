//! Sensor and callback fixtures.
//!
//! - [`CallCounter`] counts how often a sensor ran.
//! - [`FlagSet`] is a minimal session: named flags plus the `flag(name)` and
//!   `flagCount()` sensors over them.
//! - [`Recorder`] records which callbacks fired, in order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use condwatch_core::{CallbackError, Conditions, RegistryError, SensorError, Value};

/// Counts sensor invocations.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sensor that always returns `value` and counts each call.
    pub fn sensor(
        &self,
        value: Value,
    ) -> impl Fn(&[Value]) -> Result<Value, SensorError> + Send + Sync + 'static {
        let calls = Arc::clone(&self.calls);
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value.clone())
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Shared set of session flags.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    flags: Arc<Mutex<BTreeSet<String>>>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag. Returns whether it changed.
    pub fn set(&self, name: &str) -> bool {
        self.flags.lock().unwrap().insert(name.to_string())
    }

    /// Clear a flag. Returns whether it changed.
    pub fn clear(&self, name: &str) -> bool {
        self.flags.lock().unwrap().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flags.lock().unwrap().contains(name)
    }

    pub fn len(&self) -> usize {
        self.flags.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `flag(name)` and `flagCount()` on `conditions`.
    pub fn register(&self, conditions: &Conditions) -> Result<(), RegistryError> {
        let flags = self.clone();
        conditions.register_function("flag", 1, move |args: &[Value]| {
            Ok(Value::Bool(flags.contains(&args[0].to_text())))
        })?;
        let flags = self.clone();
        conditions.register_function("flagCount", 0, move |_: &[Value]| {
            Ok(Value::from(flags.len() as i64))
        })
    }
}

/// Records callback invocations by tag.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that records `tag` each time it fires.
    pub fn callback(
        &self,
        tag: &str,
    ) -> impl Fn() -> Result<(), CallbackError> + Send + Sync + 'static {
        let calls = Arc::clone(&self.calls);
        let tag = tag.to_string();
        move || {
            calls.lock().unwrap().push(tag.clone());
            Ok(())
        }
    }

    /// Tags in firing order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// How often `tag` fired.
    pub fn count(&self, tag: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| *t == tag).count()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }
}
