//! Function registry — the sensors an expression can call.
//!
//! The host registers every sensor once at startup. The registry is
//! append-only: a name can never be re-registered or removed, so lookups
//! can hand out shared [`FunctionDef`]s without further coordination.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::token;
use crate::value::Value;

/// A failure reported by a sensor implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SensorError(pub String);

impl SensorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The callable behind a registered function.
pub type SensorFn = dyn Fn(&[Value]) -> Result<Value, SensorError> + Send + Sync;

/// A registered function.
#[derive(Clone)]
pub struct FunctionDef {
    /// Function name as written in expressions (e.g. "flag").
    pub name: String,
    /// Exact number of arguments.
    pub arity: usize,
    implementation: Arc<SensorFn>,
}

impl FunctionDef {
    /// Invoke the implementation. Arity is the caller's responsibility.
    pub fn call(&self, args: &[Value]) -> Result<Value, SensorError> {
        (self.implementation)(args)
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Errors from function registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("function already registered: {0}")]
    Duplicate(String),

    #[error("invalid function name: {0:?}")]
    InvalidName(String),
}

/// Registry of callable functions, keyed by exact name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionDef>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        implementation: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[Value]) -> Result<Value, SensorError> + Send + Sync + 'static,
    {
        let name = name.into();
        if !token::is_identifier(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.functions.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let def = FunctionDef {
            name: name.clone(),
            arity,
            implementation: Arc::new(implementation),
        };
        self.functions.insert(name, Arc::new(def));
        Ok(())
    }

    /// Look up a function by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<FunctionDef>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
