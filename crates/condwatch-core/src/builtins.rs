//! Pure string utilities available to every expression when enabled.

use crate::registry::{FunctionRegistry, RegistryError, SensorError};
use crate::value::Value;

/// Names of the built-in functions, in registration order.
pub const BUILTIN_NAMES: [&str; 8] = [
    "strContains",
    "strStartsWith",
    "strEndsWith",
    "strLen",
    "strToLower",
    "strToUpper",
    "strTrim",
    "isAbsent",
];

/// Register the string utilities and `isAbsent`.
pub fn register_builtins(registry: &mut FunctionRegistry) -> Result<(), RegistryError> {
    registry.register("strContains", 2, |args: &[Value]| {
        Ok(text(args, 0)?.contains(text(args, 1)?.as_str()).into())
    })?;
    registry.register("strStartsWith", 2, |args: &[Value]| {
        Ok(text(args, 0)?.starts_with(text(args, 1)?.as_str()).into())
    })?;
    registry.register("strEndsWith", 2, |args: &[Value]| {
        Ok(text(args, 0)?.ends_with(text(args, 1)?.as_str()).into())
    })?;
    registry.register("strLen", 1, |args: &[Value]| {
        Ok(Value::Number(text(args, 0)?.chars().count() as f64))
    })?;
    registry.register("strToLower", 1, |args: &[Value]| {
        Ok(Value::Str(text(args, 0)?.to_lowercase()))
    })?;
    registry.register("strToUpper", 1, |args: &[Value]| {
        Ok(Value::Str(text(args, 0)?.to_uppercase()))
    })?;
    registry.register("strTrim", 1, |args: &[Value]| {
        Ok(Value::Str(text(args, 0)?.trim().to_string()))
    })?;
    registry.register("isAbsent", 1, |args: &[Value]| {
        Ok(args.first().is_some_and(Value::is_absent).into())
    })?;
    Ok(())
}

fn text(args: &[Value], index: usize) -> Result<String, SensorError> {
    args.get(index)
        .map(Value::to_text)
        .ok_or_else(|| SensorError::new(format!("missing argument {}", index + 1)))
}
