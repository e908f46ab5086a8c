use crate::query::{mean, round_to};
use serde::Serialize;

/// Relative change (in percent) a series must exceed to count as moving at all.
const TREND_CHANGE_PERCENT: f64 = 10.0;
/// Relative change (in percent) above which a movement is highly significant.
const HIGH_SIGNIFICANCE_PERCENT: f64 = 20.0;
/// Regression slope a moving series must exceed to have a direction.
const TREND_SLOPE: f64 = 0.1;
/// Benchmark differences within this many percent count as "at" the benchmark.
const BENCHMARK_TOLERANCE_PERCENT: f64 = 5.0;
/// p-values are floored here; the normal approximation is meaningless below it.
const MIN_P_VALUE: f64 = 0.001;
const SIGNIFICANCE_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub metric: String,
    pub trend: Trend,
    pub change_percent: f64,
    pub significance: Significance,
    pub timeframe: String,
}

/// Classify the direction of a series from its first-to-last change and its
/// least-squares slope.
pub fn analyze_trend(metric: &str, values: &[f64]) -> TrendAnalysis {
    if values.len() < 2 {
        return TrendAnalysis {
            metric: metric.to_string(),
            trend: Trend::Stable,
            change_percent: 0.0,
            significance: Significance::Low,
            timeframe: "insufficient-data".to_string(),
        };
    }

    let first = values[0];
    let last = values[values.len() - 1];
    let change_percent = if first == 0.0 {
        0.0
    } else {
        (last - first) / first * 100.0
    };
    let slope = linear_slope(values);
    let magnitude = change_percent.abs();

    let trend = if magnitude <= TREND_CHANGE_PERCENT {
        Trend::Stable
    } else if slope > TREND_SLOPE {
        Trend::Increasing
    } else if slope < -TREND_SLOPE {
        Trend::Decreasing
    } else {
        Trend::Volatile
    };

    let significance = if magnitude > HIGH_SIGNIFICANCE_PERCENT {
        Significance::High
    } else if magnitude > TREND_CHANGE_PERCENT {
        Significance::Medium
    } else {
        Significance::Low
    };

    TrendAnalysis {
        metric: metric.to_string(),
        trend,
        change_percent: round_to(change_percent, 2),
        significance,
        timeframe: format!("{} periods", values.len()),
    }
}

/// Least-squares slope of `values` against their index. 0 for fewer than two points.
pub fn linear_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x = n * (n - 1.0) / 2.0;
    let sum_xx = n * (n - 1.0) * (2.0 * n - 1.0) / 6.0;
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = (0u32..)
        .zip(values)
        .map(|(i, y)| f64::from(i) * y)
        .sum();

    (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Performance {
    Above,
    At,
    Below,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkComparison {
    pub metric: String,
    pub current_value: f64,
    pub benchmark_value: f64,
    pub performance: Performance,
    pub percentage_difference: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

/// Relative position of `current` against `benchmark`.
///
/// Note that "above" is numeric: for metrics where lower is better (bounce rate)
/// an "above" result is the bad outcome.
pub fn compare_to_benchmark(metric: &str, current: f64, benchmark: f64) -> BenchmarkComparison {
    let difference = if benchmark == 0.0 {
        0.0
    } else {
        (current - benchmark) / benchmark * 100.0
    };
    let performance = if difference.abs() <= BENCHMARK_TOLERANCE_PERCENT {
        Performance::At
    } else if difference > 0.0 {
        Performance::Above
    } else {
        Performance::Below
    };

    BenchmarkComparison {
        metric: metric.to_string(),
        current_value: current,
        benchmark_value: benchmark,
        performance,
        percentage_difference: round_to(difference, 2),
        industry: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignificanceResult {
    pub significant: bool,
    pub p_value: f64,
    pub confidence_level: f64,
}

impl SignificanceResult {
    const fn inconclusive() -> Self {
        Self {
            significant: false,
            p_value: 1.0,
            confidence_level: 0.0,
        }
    }
}

/// Two-sample pooled-variance t-test with a normal approximation of the p-value.
///
/// Each sample needs at least two points; otherwise the result is inconclusive.
pub fn significance_test(sample_a: &[f64], sample_b: &[f64]) -> SignificanceResult {
    if sample_a.len() < 2 || sample_b.len() < 2 {
        return SignificanceResult::inconclusive();
    }

    let (n_a, n_b) = (sample_a.len() as f64, sample_b.len() as f64);
    let (mean_a, mean_b) = (mean(sample_a), mean(sample_b));
    let var_a = sample_variance(sample_a, mean_a);
    let var_b = sample_variance(sample_b, mean_b);

    let pooled = ((n_a - 1.0) * var_a + (n_b - 1.0) * var_b) / (n_a + n_b - 2.0);
    let standard_error = (pooled * (1.0 / n_a + 1.0 / n_b)).sqrt();
    let difference = (mean_a - mean_b).abs();

    let t_stat = if standard_error > 0.0 {
        difference / standard_error
    } else if difference > 0.0 {
        // Two constant samples with different values.
        f64::INFINITY
    } else {
        0.0
    };

    let p_value = (2.0 * (1.0 - normal_cdf(t_stat))).max(MIN_P_VALUE);
    if !p_value.is_finite() {
        return SignificanceResult::inconclusive();
    }

    SignificanceResult {
        significant: p_value < SIGNIFICANCE_ALPHA,
        p_value: round_to(p_value, 3),
        confidence_level: round_to((1.0 - p_value) * 100.0, 2),
    }
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

/// Standard normal CDF via the Abramowitz-Stegun 7.1.26 rational approximation.
pub fn normal_cdf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    0.5 * (1.0 + sign * y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increasing_trend() {
        let analysis = analyze_trend("views", &[10.0, 20.0, 30.0]);
        assert_eq!(analysis.trend, Trend::Increasing);
        assert!((analysis.change_percent - 200.0).abs() < f64::EPSILON);
        assert_eq!(analysis.significance, Significance::High);
        assert_eq!(analysis.timeframe, "3 periods");
        assert_eq!(analysis.metric, "views");
    }

    #[test]
    fn test_decreasing_and_stable() {
        let falling = analyze_trend("views", &[100.0, 90.0, 85.0]);
        assert_eq!(falling.trend, Trend::Decreasing);
        assert_eq!(falling.significance, Significance::Medium);

        let flat = analyze_trend("views", &[100.0, 104.0, 105.0]);
        assert_eq!(flat.trend, Trend::Stable);
        assert_eq!(flat.significance, Significance::Low);
    }

    #[test]
    fn test_volatile_trend() {
        // Big first-to-last change but a near-zero regression slope.
        let analysis = analyze_trend("views", &[1.0, 1.2, 1.0, 1.0, 0.9, 1.2]);
        assert!((analysis.change_percent - 20.0).abs() < 1e-9);
        assert!(linear_slope(&[1.0, 1.2, 1.0, 1.0, 0.9, 1.2]).abs() <= 0.1);
        assert_eq!(analysis.trend, Trend::Volatile);
    }

    #[test]
    fn test_insufficient_data() {
        for series in [&[][..], &[42.0][..]] {
            let analysis = analyze_trend("views", series);
            assert_eq!(analysis.trend, Trend::Stable);
            assert!(analysis.change_percent.abs() < f64::EPSILON);
            assert_eq!(analysis.significance, Significance::Low);
            assert_eq!(analysis.timeframe, "insufficient-data");
        }
    }

    #[test]
    fn test_zero_start_has_no_change() {
        let analysis = analyze_trend("views", &[0.0, 50.0, 100.0]);
        assert!(analysis.change_percent.abs() < f64::EPSILON);
        assert_eq!(analysis.trend, Trend::Stable);
    }

    #[test]
    fn test_linear_slope() {
        assert!((linear_slope(&[10.0, 20.0, 30.0]) - 10.0).abs() < 1e-9);
        assert!((linear_slope(&[5.0, 3.0, 1.0]) + 2.0).abs() < 1e-9);
        assert!(linear_slope(&[7.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compare_to_benchmark() {
        let above = compare_to_benchmark("conversionRate", 5.0, 2.5);
        assert_eq!(above.performance, Performance::Above);
        assert!((above.percentage_difference - 100.0).abs() < f64::EPSILON);

        let at = compare_to_benchmark("scrollDepth", 67.0, 65.0);
        assert_eq!(at.performance, Performance::At);
        assert!((at.percentage_difference - 3.08).abs() < 1e-9);

        let below = compare_to_benchmark("avgTimeOnPage", 90.0, 180.0);
        assert_eq!(below.performance, Performance::Below);

        let zero = compare_to_benchmark("x", 10.0, 0.0);
        assert_eq!(zero.performance, Performance::At);
    }

    #[test]
    fn test_significant_difference() {
        let a = [10.0, 11.0, 10.0, 11.0, 10.0];
        let b = [20.0, 21.0, 20.0, 21.0, 20.0];
        let result = significance_test(&a, &b);
        assert!(result.significant);
        assert!(result.p_value < 0.05);
        assert!((result.p_value - 0.001).abs() < f64::EPSILON);
        assert!((result.confidence_level - 99.9).abs() < 1e-9);
    }

    #[test]
    fn test_no_difference() {
        let a = [10.0, 12.0, 11.0, 13.0];
        let result = significance_test(&a, &a);
        assert!(!result.significant);
        assert!(result.p_value > 0.9);
    }

    #[test]
    fn test_constant_samples() {
        let same = significance_test(&[5.0, 5.0], &[5.0, 5.0]);
        assert!(!same.significant);
        let apart = significance_test(&[5.0, 5.0], &[9.0, 9.0]);
        assert!(apart.significant);
    }

    #[test]
    fn test_small_samples_are_inconclusive() {
        assert_eq!(
            significance_test(&[1.0], &[2.0, 3.0]),
            SignificanceResult::inconclusive()
        );
        assert_eq!(
            significance_test(&[], &[]),
            SignificanceResult::inconclusive()
        );
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
        assert!((normal_cdf(f64::INFINITY) - 1.0).abs() < f64::EPSILON);
    }
}
