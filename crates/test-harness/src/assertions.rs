//! Numeric assertion helpers shared by the scenario suites.

/// Assert two values agree within an absolute tolerance.
#[track_caller]
pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} ± {tolerance}, got {actual}"
    );
}

/// Pull a required f64 out of a JSON value.
#[track_caller]
pub fn f64_of(value: &serde_json::Value, field: &str) -> f64 {
    value[field]
        .as_f64()
        .unwrap_or_else(|| panic!("field `{field}` missing from {value}"))
}
