pub mod breakdowns;
pub mod filter;
pub mod funnel;
pub mod metrics;
pub mod sessions;
pub mod timeseries;
pub mod trend;

use crate::ingest::event::{Event, EventType};

/// `part / whole × 100`, or 0.0 when `whole` is zero.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Arithmetic mean, 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Number of events of the given type.
pub fn count_of<'a>(events: impl IntoIterator<Item = &'a Event>, event_type: EventType) -> usize {
    events.into_iter().filter(|e| e.is(event_type)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_guards_zero() {
        assert!((percentage(1, 4) - 25.0).abs() < f64::EPSILON);
        assert!(percentage(3, 0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mean_and_round() {
        assert!((mean(&[1.0, 2.0, 6.0]) - 3.0).abs() < f64::EPSILON);
        assert!(mean(&[]).abs() < f64::EPSILON);
        assert!((round_to(1.23456, 2) - 1.23).abs() < f64::EPSILON);
        assert!((round_to(2.0 / 3.0, 3) - 0.667).abs() < 1e-12);
    }
}
