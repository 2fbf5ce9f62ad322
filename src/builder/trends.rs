//! Linear trend fitting over numeric time series.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::storage::IntelligenceRecord;

/// |slope| below this (units per day) is flat.
const STABLE_SLOPE: f64 = 0.1;
/// R² below this means the line explains too little to call a direction.
const MIN_FIT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Fluctuating,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub entity: String,
    pub direction: TrendDirection,
    /// Change per day.
    pub slope: f64,
    pub r_squared: f64,
    pub confidence: f64,
    pub points: usize,
    /// Next value, one average step past the last point. Only set when
    /// confidence reaches the trend threshold.
    pub prediction: Option<f64>,
}

/// Least-squares fit `y = intercept + slope * x`, with R².
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

pub fn linear_regression(points: &[(f64, f64)]) -> Option<LinearFit> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = points.iter().map(|p| (p.1 - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|p| (p.1 - (intercept + slope * p.0)).powi(2))
        .sum();
    // A constant series is fitted exactly by a flat line.
    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

pub fn classify(fit: &LinearFit) -> TrendDirection {
    if fit.r_squared < MIN_FIT {
        TrendDirection::Fluctuating
    } else if fit.slope.abs() < STABLE_SLOPE {
        TrendDirection::Stable
    } else if fit.slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    }
}

/// Fit a trend to `(time, value)` observations. Needs three or more points
/// spanning more than one instant.
pub fn analyze_trend(
    entity: &str,
    series: &[(DateTime<Utc>, f64)],
    trend_threshold: f64,
) -> Option<Trend> {
    if series.len() < 3 {
        return None;
    }
    let mut sorted = series.to_vec();
    sorted.sort_by_key(|(t, _)| *t);
    let origin = sorted[0].0;
    let points: Vec<(f64, f64)> = sorted
        .iter()
        .map(|(t, v)| ((*t - origin).num_seconds() as f64 / 86_400.0, *v))
        .collect();

    let fit = linear_regression(&points)?;
    let confidence = fit.r_squared;
    let prediction = (confidence >= trend_threshold).then(|| {
        let last_x = points[points.len() - 1].0;
        let step = last_x / (points.len() - 1) as f64;
        fit.intercept + fit.slope * (last_x + step)
    });

    Some(Trend {
        entity: entity.to_owned(),
        direction: classify(&fit),
        slope: fit.slope,
        r_squared: fit.r_squared,
        confidence,
        points: points.len(),
        prediction,
    })
}

/// Numeric observations in `records`: object content with a numeric `value`
/// field, timestamped by the record (or its own `timestamp` field).
pub fn numeric_series(records: &[IntelligenceRecord]) -> Vec<(DateTime<Utc>, f64)> {
    records
        .iter()
        .filter_map(|r| {
            let value = r.content.get("value").and_then(Value::as_f64)?;
            let at = r
                .content
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(r.created_at);
            Some((at, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    #[test]
    fn perfect_line() {
        let fit = linear_regression(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]).expect("fit");
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs() {
        assert!(linear_regression(&[(0.0, 1.0)]).is_none());
        assert!(linear_regression(&[(1.0, 1.0), (1.0, 2.0)]).is_none());
    }

    #[test]
    fn increasing_series_predicts_next_step() {
        let series: Vec<_> = (0..5).map(|i| (day(i), 10.0 + 2.0 * i as f64)).collect();
        let trend = analyze_trend("budget", &series, 0.7).expect("trend");
        assert_eq!(trend.direction, TrendDirection::Increasing);
        let prediction = trend.prediction.expect("confident");
        assert!((prediction - 20.0).abs() < 1e-6);
    }

    #[test]
    fn flat_series_is_stable() {
        let series: Vec<_> = (0..4).map(|i| (day(i), 7.0)).collect();
        let trend = analyze_trend("x", &series, 0.7).expect("trend");
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn noisy_series_fluctuates_without_prediction() {
        let values = [5.0, 20.0, 4.0, 21.0, 5.0, 19.0];
        let series: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (day(i as i64), *v))
            .collect();
        let trend = analyze_trend("x", &series, 0.7).expect("trend");
        assert_eq!(trend.direction, TrendDirection::Fluctuating);
        assert!(trend.prediction.is_none());
    }

    #[test]
    fn decreasing_and_short_series() {
        let series: Vec<_> = (0..3).map(|i| (day(i), 9.0 - i as f64)).collect();
        assert_eq!(
            analyze_trend("x", &series, 0.7).expect("trend").direction,
            TrendDirection::Decreasing
        );
        assert!(analyze_trend("x", &series[..2], 0.7).is_none());
    }
}
