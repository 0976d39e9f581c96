//! Time utilities for Tenantry
//!
//! Timestamps are stored in tenant records only; rendered artifacts never
//! carry one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in seconds.
///
/// A clock set before the Unix epoch reads as 0.
///
/// # Examples
/// ```
/// use tn_core::time::current_time_secs;
///
/// let now = current_time_secs();
/// assert!(now > 0);
/// ```
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Time elapsed since a Unix-seconds timestamp.
///
/// Returns Duration::ZERO if the given time is in the future.
pub fn elapsed_since(since_secs: u64) -> Duration {
    Duration::from_secs(current_time_secs().saturating_sub(since_secs))
}

/// Render an age as a short human string (`42s`, `7m`, `3h`, `2d`)
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_secs_is_positive() {
        assert!(current_time_secs() > 0);
    }

    #[test]
    fn test_elapsed_since_future_time() {
        let future = current_time_secs() + 1_000_000;
        assert_eq!(elapsed_since(future), Duration::ZERO);
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_secs(5)), "5s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m");
        assert_eq!(format_age(Duration::from_secs(7200)), "2h");
        assert_eq!(format_age(Duration::from_secs(3 * 86_400)), "3d");
    }
}
