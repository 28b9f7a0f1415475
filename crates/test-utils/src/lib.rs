//! Shared test utilities for the grid-store workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Skip macros for tests that need an external database
//! - Grid data generators
//! - Common test fixtures
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{require_env, fixtures};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Environment variable holding a PostgreSQL URL for backend tests.
pub const TEST_DATABASE_URL_VAR: &str = "GRID_STORE_TEST_DATABASE_URL";

/// Macro to skip a test if an environment variable is not set.
///
/// Tests against a live PostgreSQL instance use this so that the suite
/// still passes on machines without a database.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_env;
///
/// #[tokio::test]
/// async fn test_against_postgres() {
///     let url = require_env!("GRID_STORE_TEST_DATABASE_URL");
///     // Test code using url...
/// }
/// ```
///
/// If the variable is unset or empty, the test prints a skip message and
/// returns early.
#[macro_export]
macro_rules! require_env {
    ($name:expr) => {{
        match ::std::env::var($name) {
            Ok(value) if !value.is_empty() => value,
            _ => {
                eprintln!("SKIPPED: environment variable '{}' is not set.", $name);
                return;
            }
        }
    }};
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
