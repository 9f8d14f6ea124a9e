//! Relative Strength Index with Wilder smoothing.
//!
//! - First average: simple mean of gains/losses over the first n changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss), and 100 when avg_loss == 0.
//! Warmup: first n bars are invalid.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_rsi(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let mut raw = vec![None; bars.len()];
    if period == 0 || bars.len() <= period {
        return IndicatorSeries::from_options(IndicatorType::Rsi(period), bars, raw);
    }

    let changes: Vec<f64> = bars.windows(2).map(|w| w[1].close - w[0].close).collect();
    let gain = |c: f64| c.max(0.0);
    let loss = |c: f64| (-c).max(0.0);

    let mut avg_gain = changes[..period].iter().map(|&c| gain(c)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|&c| loss(c)).sum::<f64>() / period as f64;
    raw[period] = Some(rsi_value(avg_gain, avg_loss));

    for (i, &change) in changes.iter().enumerate().skip(period) {
        avg_gain = (avg_gain * (period - 1) as f64 + gain(change)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss(change)) / period as f64;
        raw[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }

    IndicatorSeries::from_options(IndicatorType::Rsi(period), bars, raw)
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_bar(date: &str, close: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: "TEST".into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000,
        }
    }

    fn make_series(closes: impl Iterator<Item = f64>) -> Vec<OhlcvBar> {
        closes
            .enumerate()
            .map(|(i, c)| make_bar(&format!("2024-01-{:02}", i + 1), c))
            .collect()
    }

    #[test]
    fn rsi_empty_bars() {
        let series = calculate_rsi(&[], 14);
        assert_eq!(series.values.len(), 0);
    }

    #[test]
    fn rsi_warmup_period() {
        let bars = make_series((1..=15).map(|i| 100.0 + (i as f64 % 5.0) * 2.0));
        let series = calculate_rsi(&bars, 14);
        assert_eq!(series.values.len(), 15);
        for i in 0..14 {
            assert!(!series.values[i].valid, "bar {} should be invalid", i);
        }
        assert!(series.values[14].valid);
    }

    #[test]
    fn rsi_all_gains() {
        let bars = make_series((0..15).map(|i| 100.0 + i as f64));
        let values = calculate_rsi(&bars, 14).primary_values();
        assert!((values[14] - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rsi_all_losses() {
        let bars = make_series((0..15).map(|i| 100.0 - i as f64));
        let values = calculate_rsi(&bars, 14).primary_values();
        assert!(values[14].abs() < f64::EPSILON);
    }

    #[test]
    fn rsi_stays_in_range() {
        let bars = make_series((1..=28).map(|i| 100.0 + (i as f64 % 7.0 - 3.0) * 2.0));
        for v in calculate_rsi(&bars, 14).primary_values() {
            if v.is_finite() {
                assert!((0.0..=100.0).contains(&v), "RSI {} out of range", v);
            }
        }
    }

    #[test]
    fn rsi_zero_period() {
        let bars = make_series([100.0, 101.0].into_iter());
        let series = calculate_rsi(&bars, 0);
        assert_eq!(series.values.len(), 2);
        assert_eq!(series.valid_count(), 0);
    }
}
