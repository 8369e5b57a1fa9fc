#![deny(unsafe_code)]

//! condwatch core: condition expressions and change notification.
//!
//! Hosts register named sensor functions, consumers register expressions
//! over them, and the host reports which sensors may have changed. The
//! [`Conditions`] context wires the pieces together:
//!
//! - [`token`] / [`parser`] turn text into an immutable [`Expression`].
//! - [`registry`] holds the callable functions; [`builtins`] adds string
//!   utilities.
//! - [`eval`] evaluates an expression to a [`Value`].
//! - [`watcher`] fans a `touch(name)` out to every subscribed callback.
//! - [`poll`] detects changes for sensors the host samples instead of
//!   instrumenting.

/// Pure string utilities available to every expression when enabled.
pub mod builtins;
/// The top-level context owning registry, watcher, bindings and probes.
pub mod conditions;
/// Tree-walking evaluator and its error type.
pub mod eval;
/// In-memory log collector.
pub mod logging;
/// Expression trees and the recursive-descent parser.
pub mod parser;
/// Diff-on-tick probes.
pub mod poll;
/// Function registry.
pub mod registry;
/// Tokenizer and syntax errors.
pub mod token;
/// Runtime values and coercion rules.
pub mod value;
/// Subscription registry and invalidation dispatch.
pub mod watcher;

pub use conditions::{ConditionError, Conditions};
pub use eval::EvalError;
pub use logging::{LogCollector, LogEntry, LogReader};
pub use parser::Expression;
pub use poll::ProbeError;
pub use registry::{FunctionRegistry, RegistryError, SensorError};
pub use token::SyntaxError;
pub use value::Value;
pub use watcher::{CallbackError, SubscriptionId, TouchReport, Watcher};
