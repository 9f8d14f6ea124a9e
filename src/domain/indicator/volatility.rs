//! Rolling volatility of close-to-close returns, annualized with sqrt(252).
//!
//! Sample standard deviation of the last n returns. Warmup: first n bars are
//! invalid (n returns need n+1 closes).

use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::series::{pct_change, rolling_std};

const ANNUALIZATION: f64 = 252.0;

pub fn calculate_volatility(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let returns = pct_change(&closes);
    let raw = rolling_std(&returns, period, period)
        .into_iter()
        .map(|v| v.is_finite().then(|| v * ANNUALIZATION.sqrt()))
        .collect();
    IndicatorSeries::from_options(IndicatorType::Volatility(period), bars, raw)
}
