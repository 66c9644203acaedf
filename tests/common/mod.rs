//! Shared helpers for the integration suite

use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the test logger once per test binary.
#[allow(dead_code)]
pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Wrap head and body fragments into a full document.
#[allow(dead_code)]
pub fn page(head: &str, body: &str) -> String {
    format!("<!DOCTYPE html><html><head>{head}</head><body>{body}</body></html>")
}
