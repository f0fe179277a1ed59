//! Conversion of `(duration, unit)` pairs used by every blocking operation.
use std::time::Duration;

use onion_vm::lambda::runnable::RuntimeError;

pub const DEFAULT_TIME_METRIC: &str = "s";

/// Converts `duration` expressed in `metric` (`"ms"`, `"s"` or `"m"`,
/// seconds when omitted) into a `Duration`.
pub fn from_onion_time(duration: i64, metric: Option<&str>) -> Result<Duration, RuntimeError> {
    if duration < 0 {
        return Err(RuntimeError::InvalidOperation(
            format!("invalid duration interval: {}", duration).into(),
        ));
    }
    let duration = duration as u64;
    match metric.unwrap_or(DEFAULT_TIME_METRIC) {
        "ms" => Ok(Duration::from_millis(duration)),
        "s" => Ok(Duration::from_millis(duration.saturating_mul(1_000))),
        "m" => Ok(Duration::from_millis(duration.saturating_mul(60_000))),
        other => Err(RuntimeError::InvalidOperation(
            format!("invalid time metric: {}", other).into(),
        )),
    }
}

/// Absent duration means "no timeout".
pub fn to_optional_timeout(
    duration: Option<i64>,
    metric: Option<&str>,
) -> Result<Option<Duration>, RuntimeError> {
    duration
        .map(|duration| from_onion_time(duration, metric))
        .transpose()
}
