//! Simple moving average of closing prices.
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_sma(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let mut raw = Vec::with_capacity(bars.len());
    let mut sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        sum += bar.close;
        if period > 0 && i >= period {
            sum -= bars[i - period].close;
        }
        if period > 0 && i + 1 >= period {
            raw.push(Some(sum / period as f64));
        } else {
            raw.push(None);
        }
    }

    IndicatorSeries::from_options(IndicatorType::Sma(period), bars, raw)
}
