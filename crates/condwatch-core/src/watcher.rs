//! Condition watcher — invalidation fan-out keyed by function name.
//!
//! [`Watcher::subscribe`] records a callback under every distinct function
//! name an expression mentions. [`Watcher::touch`] fires every callback
//! recorded under one name. The watcher never evaluates anything: a
//! callback only learns that something it depends on *may* have changed.
//!
//! Two indices are kept in step under one lock: name → subscriptions for
//! dispatch, and id → names for removal. Dispatch works on a snapshot taken
//! under the lock and runs callbacks with the lock released, so callbacks
//! may subscribe, unsubscribe, or touch.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::AddAssign;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, trace, warn};

use crate::token::{self, SyntaxError};

/// Unique, never reused subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Error type returned by consumer callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// A consumer callback.
pub type Callback = Arc<dyn Fn() -> Result<(), CallbackError> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    callback: Callback,
}

#[derive(Default)]
struct WatchState {
    by_name: HashMap<String, Vec<Entry>>,
    by_id: HashMap<SubscriptionId, Vec<String>>,
    unloaded: bool,
}

impl WatchState {
    fn is_live(&self, id: SubscriptionId) -> bool {
        !self.unloaded && self.by_id.contains_key(&id)
    }
}

/// Outcome of one [`Watcher::touch`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TouchReport {
    /// Callbacks that ran.
    pub invoked: usize,
    /// Callbacks that returned an error or panicked.
    pub failed: usize,
    /// Callbacks in the snapshot that were removed before their turn.
    pub skipped: usize,
}

impl AddAssign for TouchReport {
    fn add_assign(&mut self, other: Self) {
        self.invoked += other.invoked;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// The invalidation registry.
#[derive(Default)]
pub struct Watcher {
    state: Mutex<WatchState>,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch every function `expression` mentions.
    ///
    /// Only tokenizes; unknown functions and arity are not checked here.
    /// After [`unload`](Self::unload) this still returns a fresh id, which
    /// simply never fires.
    pub fn subscribe<F>(&self, expression: &str, callback: F) -> Result<SubscriptionId, SyntaxError>
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let names = token::function_names(expression)?;
        Ok(self.insert(names, Arc::new(callback)))
    }

    fn insert(&self, names: Vec<String>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId::next();
        let mut state = self.state();
        if state.unloaded {
            debug!(subscription = %id, "watcher unloaded, subscription will never fire");
            return id;
        }

        for name in &names {
            state.by_name.entry(name.clone()).or_default().push(Entry {
                id,
                callback: Arc::clone(&callback),
            });
        }
        debug!(subscription = %id, names = ?names, "subscribed");
        state.by_id.insert(id, names);
        id
    }

    /// Remove a subscription. Unknown or already removed ids are a no-op.
    ///
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let Some(names) = state.by_id.remove(&id) else {
            return false;
        };
        for name in &names {
            if let Some(entries) = state.by_name.get_mut(name) {
                entries.retain(|entry| entry.id != id);
                if entries.is_empty() {
                    state.by_name.remove(name);
                }
            }
        }
        debug!(subscription = %id, "unsubscribed");
        true
    }

    /// Fire every callback currently watching `name`, in registration order.
    ///
    /// Subscriptions added during the pass are not notified by it; ones
    /// removed during the pass are skipped. A failing or panicking callback
    /// is logged and does not stop the rest.
    pub fn touch(&self, name: &str) -> TouchReport {
        let snapshot = {
            let state = self.state();
            if state.unloaded {
                return TouchReport::default();
            }
            match state.by_name.get(name) {
                Some(entries) => entries.clone(),
                None => return TouchReport::default(),
            }
        };
        trace!(function = name, subscribers = snapshot.len(), "touch");

        let mut report = TouchReport::default();
        for entry in snapshot {
            if !self.state().is_live(entry.id) {
                report.skipped += 1;
                continue;
            }
            report.invoked += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| (entry.callback)())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(
                        subscription = %entry.id,
                        function = name,
                        error = %err,
                        "condition callback failed"
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    error!(
                        subscription = %entry.id,
                        function = name,
                        panic = panic_message(payload.as_ref()),
                        "condition callback panicked"
                    );
                }
            }
        }
        report
    }

    /// Drop every subscription and stop dispatching for good.
    pub fn unload(&self) {
        let mut state = self.state();
        let dropped = state.by_id.len();
        state.by_name.clear();
        state.by_id.clear();
        state.unloaded = true;
        info!(subscriptions = dropped, "condition watcher unloaded");
    }

    pub fn is_unloaded(&self) -> bool {
        self.state().unloaded
    }

    /// Names a live subscription watches.
    pub fn watched_names(&self, id: SubscriptionId) -> Option<Vec<String>> {
        self.state().by_id.get(&id).cloned()
    }

    /// Number of live subscriptions watching `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.state().by_name.get(name).map_or(0, Vec::len)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state().by_id.len()
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Watcher")
            .field("subscriptions", &state.by_id.len())
            .field("names", &state.by_name.len())
            .field("unloaded", &state.unloaded)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
