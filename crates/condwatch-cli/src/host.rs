//! Demo session host: flags and counters, the sensors that read them, and
//! the mutation methods that report changes.
//!
//! Sensors:
//! - `flag(name)`: whether a flag is set.
//! - `counter(name)`: a counter's value, absent when it was never set.
//! - `flagCount()`: number of set flags.
//! - `counterTotal()`: sum of all counters; pushed or polled per config.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use condwatch_config::bindings::ChangeStrategy;
use condwatch_core::{Conditions, RegistryError, Value};
use tracing::{debug, warn};

/// Nested notifications deeper than this are dropped.
const MAX_CASCADE_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct SessionState {
    flags: BTreeSet<String>,
    counters: BTreeMap<String, i64>,
}

/// Shared session state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.state().flags.contains(name)
    }

    /// Set flags, sorted.
    pub fn flags(&self) -> Vec<String> {
        self.state().flags.iter().cloned().collect()
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.state().counters.get(name).copied()
    }

    pub fn counter_total(&self) -> i64 {
        self.state().counters.values().sum()
    }

    fn insert_flag(&self, name: &str) -> bool {
        self.state().flags.insert(name.to_string())
    }

    fn remove_flag(&self, name: &str) -> bool {
        self.state().flags.remove(name)
    }

    fn add(&self, name: &str, amount: i64) -> i64 {
        let mut state = self.state();
        let value = state.counters.entry(name.to_string()).or_insert(0);
        *value += amount;
        *value
    }

    /// Register the session sensors on `conditions`.
    pub fn register(&self, conditions: &Conditions) -> Result<(), RegistryError> {
        let session = self.clone();
        conditions.register_function("flag", 1, move |args: &[Value]| {
            Ok(Value::Bool(session.flag(&args[0].to_text())))
        })?;

        let session = self.clone();
        conditions.register_function("counter", 1, move |args: &[Value]| {
            Ok(session.counter(&args[0].to_text()).into())
        })?;

        let session = self.clone();
        conditions.register_function("flagCount", 0, move |_: &[Value]| {
            Ok(Value::from(session.state().flags.len() as i64))
        })?;

        let session = self.clone();
        conditions.register_function("counterTotal", 0, move |_: &[Value]| {
            Ok(Value::from(session.counter_total()))
        })
    }
}

/// Session plus the conditions it feeds. Mutations go through here so the
/// right names are touched.
#[derive(Debug, Clone)]
pub struct Host {
    conditions: Arc<Conditions>,
    session: Session,
    depth: Arc<AtomicUsize>,
}

impl Host {
    /// Wire `session` into `conditions`: register its sensors and, when
    /// `counterTotal` is configured for polling, its probe.
    pub fn new(conditions: Arc<Conditions>, session: Session) -> anyhow::Result<Self> {
        session.register(&conditions)?;
        if conditions.strategy_of("counterTotal") == ChangeStrategy::Poll {
            let probe = session.clone();
            conditions.add_probe("counterTotal", move || Value::from(probe.counter_total()))?;
        }
        Ok(Self {
            conditions,
            session,
            depth: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn conditions(&self) -> &Arc<Conditions> {
        &self.conditions
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn set_flag(&self, name: &str) -> bool {
        let changed = self.session.insert_flag(name);
        if changed {
            self.notify(&["flag", "flagCount"]);
        }
        changed
    }

    pub fn clear_flag(&self, name: &str) -> bool {
        let changed = self.session.remove_flag(name);
        if changed {
            self.notify(&["flag", "flagCount"]);
        }
        changed
    }

    pub fn add_counter(&self, name: &str, amount: i64) -> i64 {
        let value = self.session.add(name, amount);
        if amount != 0 {
            if self.conditions.strategy_of("counterTotal") == ChangeStrategy::Push {
                self.notify(&["counter", "counterTotal"]);
            } else {
                self.notify(&["counter"]);
            }
        }
        value
    }

    /// Touch `names`, unless the cascade of nested notifications is
    /// already too deep.
    fn notify(&self, names: &[&str]) {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst);
        if depth >= MAX_CASCADE_DEPTH {
            warn!(depth, names = ?names, "notification cascade too deep, dropping");
        } else {
            for name in names {
                let report = self.conditions.touch(name);
                debug!(function = name, invoked = report.invoked, "touched");
            }
        }
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
