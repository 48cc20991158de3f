//! Shared test helpers.

/// Install a tracing subscriber that routes through the test harness's
/// captured output. Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
