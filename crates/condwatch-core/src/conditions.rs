//! The [`Conditions`] context — one explicit value owning everything a host
//! needs: the function registry, a parse cache, the watcher, event bindings
//! and polled probes.
//!
//! Construct it once at startup and share it by reference or `Arc`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use condwatch_config::AppConfig;
use condwatch_config::bindings::{ChangeStrategy, EventBinding, EventBindings, StrategyTable};
use tracing::debug;

use crate::builtins;
use crate::eval::{self, EvalError, Resolver};
use crate::parser::Expression;
use crate::poll::{Poller, ProbeError};
use crate::registry::{FunctionDef, FunctionRegistry, RegistryError, SensorError};
use crate::token::SyntaxError;
use crate::value::Value;
use crate::watcher::{CallbackError, SubscriptionId, TouchReport, Watcher};

/// Errors from the text-level entry points (parse then evaluate).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

const DEFAULT_PARSE_CACHE_CAPACITY: usize = 256;

/// Bounded FIFO cache of parsed expressions keyed by source text.
struct ParseCache {
    capacity: usize,
    entries: HashMap<String, Expression>,
    order: VecDeque<String>,
}

impl ParseCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, source: &str) -> Option<Expression> {
        self.entries.get(source).cloned()
    }

    fn insert(&mut self, expr: Expression) {
        if self.capacity == 0 || self.entries.contains_key(expr.source()) {
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.order.push_back(expr.source().to_string());
        self.entries.insert(expr.source().to_string(), expr);
    }
}

/// Resolves through the shared registry, holding the read lock only for
/// the lookup itself.
struct SharedRegistry<'a>(&'a RwLock<FunctionRegistry>);

impl Resolver for SharedRegistry<'_> {
    fn resolve(&self, name: &str) -> Option<Arc<FunctionDef>> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(name)
    }
}

/// Expression evaluation plus change notification.
pub struct Conditions {
    registry: RwLock<FunctionRegistry>,
    cache: Mutex<ParseCache>,
    watcher: Watcher,
    events: RwLock<EventBindings>,
    poller: Poller,
}

impl Conditions {
    /// An empty context: no functions, no bindings, default cache size.
    pub fn new() -> Self {
        Self::with_tables(
            DEFAULT_PARSE_CACHE_CAPACITY,
            EventBindings::new(),
            StrategyTable::new(),
        )
    }

    /// Build a context from configuration: cache size, built-ins, event
    /// bindings and sensor strategies.
    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        let conditions = Self::with_tables(
            config.evaluator.parse_cache_capacity,
            config.build_event_bindings(),
            config.build_strategy_table(),
        );
        if config.evaluator.builtins {
            conditions.register_builtins()?;
        }
        debug!(
            events = config.events.len(),
            sensors = config.sensors.len(),
            builtins = config.evaluator.builtins,
            "conditions context configured"
        );
        Ok(conditions)
    }

    fn with_tables(
        cache_capacity: usize,
        events: EventBindings,
        strategies: StrategyTable,
    ) -> Self {
        Self {
            registry: RwLock::new(FunctionRegistry::new()),
            cache: Mutex::new(ParseCache::new(cache_capacity)),
            watcher: Watcher::new(),
            events: RwLock::new(events),
            poller: Poller::new(strategies),
        }
    }

    fn registry(&self) -> RwLockReadGuard<'_, FunctionRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> MutexGuard<'_, ParseCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, FunctionRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Functions ──────────────────────────────────────────────────────

    /// Register a sensor function.
    pub fn register_function<F>(
        &self,
        name: impl Into<String>,
        arity: usize,
        implementation: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[Value]) -> Result<Value, SensorError> + Send + Sync + 'static,
    {
        let name = name.into();
        self.registry_mut().register(name.clone(), arity, implementation)?;
        debug!(function = %name, arity, "function registered");
        Ok(())
    }

    /// Register the built-in string utilities.
    pub fn register_builtins(&self) -> Result<(), RegistryError> {
        builtins::register_builtins(&mut self.registry_mut())
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<String> {
        self.registry()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    // ── Evaluation ─────────────────────────────────────────────────────

    /// Parse `text`, reusing a cached tree when one exists.
    pub fn parse(&self, text: &str) -> Result<Expression, SyntaxError> {
        if let Some(expr) = self.cache().get(text) {
            return Ok(expr);
        }
        let expr = Expression::parse(text)?;
        self.cache().insert(expr.clone());
        Ok(expr)
    }

    /// Parse and evaluate `text`.
    pub fn evaluate(&self, text: &str) -> Result<Value, ConditionError> {
        let expr = self.parse(text)?;
        Ok(self.evaluate_expression(&expr)?)
    }

    /// Evaluate an already parsed expression.
    pub fn evaluate_expression(&self, expr: &Expression) -> Result<Value, EvalError> {
        eval::evaluate(expr.root(), &SharedRegistry(&self.registry))
    }

    /// Whether `text` evaluates to the canonical `true`.
    pub fn is_true(&self, text: &str) -> Result<bool, ConditionError> {
        Ok(self.evaluate(text)?.is_true())
    }

    /// Parse `text` and check every call against the registry, without
    /// running any sensor.
    pub fn compile(&self, text: &str) -> Result<Expression, ConditionError> {
        let expr = self.parse(text)?;
        eval::check(expr.root(), &SharedRegistry(&self.registry))?;
        Ok(expr)
    }

    // ── Watching ───────────────────────────────────────────────────────

    /// Call `callback` whenever a function mentioned by `expression` is touched.
    pub fn subscribe<F>(&self, expression: &str, callback: F) -> Result<SubscriptionId, SyntaxError>
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.watcher.subscribe(expression, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.watcher.unsubscribe(id)
    }

    /// Notify everyone watching `name`.
    pub fn touch(&self, name: &str) -> TouchReport {
        self.watcher.touch(name)
    }

    /// Function names a subscription watches.
    pub fn watched_names(&self, id: SubscriptionId) -> Option<Vec<String>> {
        self.watcher.watched_names(id)
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    // ── Change sources ─────────────────────────────────────────────────

    /// Add (or extend) an event binding.
    pub fn bind_event(&self, binding: EventBinding) {
        if self.watcher.is_unloaded() {
            return;
        }
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .bind(binding);
    }

    /// Touch every function bound to `event`, in binding order.
    pub fn fire_event(&self, event: &str) -> TouchReport {
        let names = self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .touches(event)
            .map(<[String]>::to_vec);
        let Some(names) = names else {
            debug!(event, "event has no bindings");
            return TouchReport::default();
        };

        debug!(event, touches = ?names, "firing event");
        let mut report = TouchReport::default();
        for name in &names {
            report += self.watcher.touch(name);
        }
        report
    }

    /// How changes to `sensor` are detected.
    pub fn strategy_of(&self, sensor: &str) -> ChangeStrategy {
        self.poller.strategies().strategy_of(sensor)
    }

    /// Register a poll probe for `name`.
    pub fn add_probe<F>(&self, name: &str, sample: F) -> Result<(), ProbeError>
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        if self.watcher.is_unloaded() {
            return Ok(());
        }
        self.poller.add(name, sample)
    }

    /// Sample every probe and touch the ones whose value changed.
    ///
    /// Returns the touched names.
    pub fn tick(&self) -> Vec<String> {
        let changed = self.poller.tick();
        for name in &changed {
            self.watcher.touch(name);
        }
        changed
    }

    /// Drop all subscriptions, bindings and probes. Afterwards `touch`,
    /// `fire_event` and `tick` do nothing.
    pub fn unload(&self) {
        self.watcher.unload();
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.poller.clear();
    }
}

impl Default for Conditions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("functions", &self.function_names())
            .field("watcher", &self.watcher)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use pretty_assertions::assert_eq;

    fn conditions() -> Conditions {
        let conditions = Conditions::new();
        conditions
            .register_function("double", 1, |args: &[Value]| {
                let n = args[0].as_number().ok_or_else(|| SensorError::new("not a number"))?;
                Ok(Value::Number(n * 2.0))
            })
            .unwrap();
        conditions
    }

    #[test]
    fn test_constant_round_trip() {
        let conditions = Conditions::new();
        assert_eq!(conditions.evaluate("true").unwrap(), Value::TRUE);
        assert_eq!(conditions.evaluate("false").unwrap(), Value::FALSE);
        assert!(conditions.is_true("1 = 1").unwrap());
        assert!(!conditions.is_true("1 = 2").unwrap());
    }

    #[test]
    fn test_is_true_only_for_canonical_true() {
        let conditions = Conditions::new();
        assert!(!conditions.is_true("\"true\"").unwrap());
        assert!(!conditions.is_true("1").unwrap());
    }

    #[test]
    fn test_error_kinds() {
        let conditions = conditions();
        assert!(matches!(
            conditions.evaluate("double(1"),
            Err(ConditionError::Syntax(_))
        ));
        assert!(matches!(
            conditions.evaluate("missing()"),
            Err(ConditionError::Eval(EvalError::UnknownFunction(_)))
        ));
    }

    #[test]
    fn test_deep_nesting_is_syntax_error() {
        let conditions = Conditions::new();
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(conditions.evaluate(&nested(90)).unwrap(), Value::Number(1.0));

        let err = conditions.evaluate(&nested(5_000)).unwrap_err();
        assert!(matches!(err, ConditionError::Syntax(_)));
        assert!(conditions.compile(&nested(250)).is_err());
    }

    #[test]
    fn test_compile_checks_without_calling() {
        let conditions = Conditions::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        conditions
            .register_function("f", 1, move |_: &[Value]| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Value::TRUE)
            })
            .unwrap();

        assert!(conditions.compile("f(1) AND f(2)").is_ok());
        assert_eq!(
            conditions.compile("f(1, 2)").unwrap_err(),
            ConditionError::Eval(EvalError::ArityMismatch {
                name: "f".to_string(),
                expected: 1,
                actual: 2,
            })
        );
        assert!(conditions.compile("g()").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_cache_reuses_and_evicts() {
        let mut cache = ParseCache::new(2);
        cache.insert(Expression::parse("1").unwrap());
        cache.insert(Expression::parse("2").unwrap());
        cache.insert(Expression::parse("3").unwrap());

        assert!(cache.get("1").is_none());
        assert!(cache.get("2").is_some());
        assert!(cache.get("3").is_some());
        assert_eq!(cache.order.len(), 2);
    }

    #[test]
    fn test_parse_cache_disabled() {
        let mut cache = ParseCache::new(0);
        cache.insert(Expression::parse("1").unwrap());
        assert!(cache.get("1").is_none());
    }

    #[test]
    fn test_cached_parse_is_same_tree() {
        let conditions = Conditions::new();
        let a = conditions.parse("1 + 2").unwrap();
        let b = conditions.parse("1 + 2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sensor_may_reenter_registry() {
        let conditions = Arc::new(conditions());
        let inner = Arc::clone(&conditions);
        conditions
            .register_function("nested", 0, move |_: &[Value]| {
                inner
                    .evaluate("double(21)")
                    .map_err(|e| SensorError::new(e.to_string()))
            })
            .unwrap();

        assert_eq!(conditions.evaluate("nested()").unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_from_config_registers_builtins() {
        let config = AppConfig::default();
        let conditions = Conditions::from_config(&config).unwrap();
        assert!(conditions.is_true("strContains(\"berry\", \"err\")").unwrap());
    }

    #[test]
    fn test_from_config_without_builtins() {
        let mut config = AppConfig::default();
        config.evaluator.builtins = false;
        let conditions = Conditions::from_config(&config).unwrap();
        assert!(conditions.function_names().is_empty());
    }

    #[test]
    fn test_fire_unbound_event_is_noop() {
        let conditions = Conditions::new();
        assert_eq!(conditions.fire_event("nothing"), TouchReport::default());
    }

    #[test]
    fn test_unload_clears_bindings_and_probes() {
        let conditions = Conditions::new();
        conditions.bind_event(EventBinding::new("dash", &["dashes"]));
        conditions.add_probe("time", || Value::Number(0.0)).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        conditions
            .subscribe("dashes() > 0 OR time() > 0", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        conditions.unload();
        conditions.fire_event("dash");
        assert!(conditions.tick().is_empty());
        conditions.bind_event(EventBinding::new("dash", &["dashes"]));
        conditions.fire_event("dash");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
