//! Utilization summaries and pattern fingerprints
//!
//! A fingerprint is a short vector describing the shape of a resource's
//! utilization: mean, spread, peak and trend. Values are normalized so that
//! Euclidean distance between two fingerprints is meaningful.

use crate::models::{DataPoint, UtilizationSummary};

/// Number of components in a fingerprint
pub const FINGERPRINT_LEN: usize = 4;

/// Scale used to bring percentage-like metrics into [0, 1]
const VALUE_SCALE: f64 = 100.0;

/// Trend (per hour) that maps to roughly 0.76 after `tanh`
const TREND_SCALE: f64 = 10.0;

/// Summary statistics of a point series
pub fn summarize(points: &[DataPoint]) -> UtilizationSummary {
    if points.is_empty() {
        return UtilizationSummary::default();
    }

    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let peak = values.iter().cloned().fold(f64::MIN, f64::max);

    let first = points[0].timestamp;
    let hours: Vec<f64> = points
        .iter()
        .map(|p| (p.timestamp - first) as f64 / 3600.0)
        .collect();

    UtilizationSummary {
        mean,
        peak,
        std_dev: variance(&values).sqrt(),
        slope_per_hour: linear_regression_slope(&hours, &values),
        samples: points.len(),
        span_secs: points[points.len() - 1].timestamp - first,
    }
}

/// Normalized fingerprint of a summary
pub fn fingerprint(summary: &UtilizationSummary) -> Vec<f64> {
    vec![
        (summary.mean / VALUE_SCALE).clamp(0.0, 1.0),
        (summary.std_dev / VALUE_SCALE).clamp(0.0, 1.0),
        (summary.peak / VALUE_SCALE).clamp(0.0, 1.0),
        (summary.slope_per_hour / TREND_SCALE).tanh(),
    ]
}

/// Euclidean distance; vectors of different length never match
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(points: &[DataPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / (values.len() - 1) as f64
}

/// Least-squares slope of `ys` against `xs`
pub fn linear_regression_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let len = xs.len().min(ys.len());
    if len < 2 {
        return 0.0;
    }
    let n = len as f64;
    let sum_x: f64 = xs[..len].iter().sum();
    let sum_y: f64 = ys[..len].iter().sum();
    let sum_xy: f64 = xs[..len].iter().zip(&ys[..len]).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs[..len].iter().map(|x| x.powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly(values: &[f64]) -> Vec<DataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DataPoint::new(1_700_000_000 + i as i64 * 3600, *v))
            .collect()
    }

    #[test]
    fn test_summary_of_flat_series() {
        let s = summarize(&hourly(&[10.0; 25]));
        assert!((s.mean - 10.0).abs() < 1e-9);
        assert!((s.peak - 10.0).abs() < 1e-9);
        assert!(s.std_dev.abs() < 1e-9);
        assert!(s.slope_per_hour.abs() < 1e-9);
        assert_eq!(s.samples, 25);
        assert_eq!(s.span_secs, 24 * 3600);
    }

    #[test]
    fn test_slope_is_per_hour() {
        let s = summarize(&hourly(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert!((s.slope_per_hour - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_variance_calculation() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((variance(&values) - 4.57).abs() < 0.1);
    }

    #[test]
    fn test_fingerprint_is_normalized() {
        let s = summarize(&hourly(&[5.0, 95.0, 250.0, 0.0]));
        let fp = fingerprint(&s);
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp[..3].iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((-1.0..=1.0).contains(&fp[3]));
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(distance(&[0.1, 0.2], &[0.1, 0.2]), 0.0);
        assert!(distance(&[0.0], &[0.0, 1.0]).is_infinite());
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(summarize(&[]), UtilizationSummary::default());
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(linear_regression_slope(&[], &[]), 0.0);
    }
}
