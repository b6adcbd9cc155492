//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use recipe_sync::config::SyncConfig;
use recipe_sync::TagPath;
use std::time::Duration;

/// Step array root used by the default configuration
pub const STEPS: &str = r#""StepData"."RunningSteps"."Steps""#;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Parse a namespace-relative path
pub fn path(s: &str) -> TagPath {
    TagPath::parse(s).unwrap()
}

/// Path of a field of step element `index`
pub fn step_field(index: u32, field: &str) -> TagPath {
    path(STEPS).element(index).child(field)
}

/// Default configuration without upload delays and with short timeouts
pub fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default().without_delays();
    config.controller.connect_timeout_ms = 500;
    config.upload.clear_timeout_ms = 200;
    config
}

/// Namespace URI the simulated controllers register
pub fn namespace_uri() -> String {
    SyncConfig::default().controller.namespace_uri
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
