//! Utilities module for logging, error handling, and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - Error handling types
//! - Small formatting helpers used by the CLI

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{Result, RoadAnomalyError};
pub use logging::init_logging;

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Round a probability to 3 decimal digits for external reporting.
///
/// Ties go to the even digit. An `f32` has at most 24 significant bits, so the
/// product with 1000 is exact in `f64` and ties are detected on the exact value.
pub fn round3(value: f32) -> f64 {
    (value as f64 * 1000.0).round_ties_even() / 1000.0
}
