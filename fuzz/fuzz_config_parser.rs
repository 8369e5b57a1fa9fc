//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()` and, when it validates,
//! builds the runtime tables from it.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = condwatch_config::AppConfig::parse(s) {
            let _ = config.build_event_bindings();
            let _ = config.build_strategy_table();
        }
    }
});
