//! Tracing initialisation helpers for tests.
//!
//! Call [`init_test_tracing`] at the top of any test that emits tracing events
//! and wants them captured by the test harness. Use [`capture_logs`] when a
//! test needs to assert on what was logged.

use condwatch_core::{LogCollector, LogReader};
use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialise a tracing subscriber that writes to the test-harness writer
/// and respects the `RUST_LOG` environment variable.
///
/// Safe to call multiple times; subsequent calls are silently ignored.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Capture events at `min_level` and above on the current thread until the
/// returned guard is dropped.
///
/// ```ignore
/// let (logs, _guard) = capture_logs(Level::WARN);
/// conditions.touch("flag");
/// assert_eq!(logs.len(), 1);
/// ```
pub fn capture_logs(min_level: Level) -> (LogReader, DefaultGuard) {
    let collector = LogCollector::new(256).with_min_level(min_level);
    let reader = collector.reader();
    let guard = tracing_subscriber::registry().with(collector).set_default();
    (reader, guard)
}
