//! Fuzz target for the evaluator.
//!
//! Run with: cargo +nightly fuzz run fuzz_evaluate
//!
//! Evaluates arbitrary expressions against a few fixed sensors, one of them
//! returning absent. Errors are fine; panics are not.

#![no_main]

use std::sync::OnceLock;

use condwatch_core::{Conditions, Value};
use libfuzzer_sys::fuzz_target;

fn conditions() -> &'static Conditions {
    static CONDITIONS: OnceLock<Conditions> = OnceLock::new();
    CONDITIONS.get_or_init(|| {
        let conditions = Conditions::new();
        let _ = conditions.register_builtins();
        let _ = conditions.register_function("flag", 1, |args: &[Value]| {
            Ok(Value::Bool(args[0].to_text().len() % 2 == 0))
        });
        let _ = conditions.register_function("deaths", 0, |_: &[Value]| Ok(Value::Number(3.0)));
        let _ = conditions.register_function("room", 0, |_: &[Value]| Ok(Value::Absent));
        conditions
    })
}

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        let conditions = conditions();
        let _ = conditions.evaluate(source);
        let _ = conditions.compile(source);
    }
});
