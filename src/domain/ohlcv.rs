//! OHLCV bar representation.

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl OhlcvBar {
    /// Simple return from `prev_close` to this bar's close. Zero when the
    /// previous close is not a usable divisor.
    pub fn return_from(&self, prev_close: f64) -> f64 {
        if prev_close.abs() < f64::EPSILON || !prev_close.is_finite() {
            return 0.0;
        }
        (self.close - prev_close) / prev_close
    }
}

/// Closing prices of `bars`, in order.
pub fn closes(bars: &[OhlcvBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}
