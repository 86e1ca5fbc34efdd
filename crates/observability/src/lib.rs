//! Tracing and logging setup shared by processes and test harnesses.

/// Initialize process-wide tracing (JSON lines, filtered by `RUST_LOG`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing for tests: human-readable output captured by the test
/// harness. Safe to call from every test.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
