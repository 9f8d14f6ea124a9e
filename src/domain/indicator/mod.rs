//! Technical indicators over OHLCV bars.
//!
//! - `IndicatorPoint`: one dated point, with a `valid` flag for warm-up bars
//! - `IndicatorValue`: single-valued or MACD output
//! - `IndicatorType`: indicator identity and parameters (used as a map key)
//! - `IndicatorSeries`: one point per input bar

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod volatility;

pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;
pub use volatility::calculate_volatility;

use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub date: NaiveDate,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd { line: f64, signal: f64, histogram: f64 },
}

impl IndicatorValue {
    /// The headline number: the value itself, or the MACD histogram.
    pub fn primary(&self) -> f64 {
        match self {
            IndicatorValue::Simple(v) => *v,
            IndicatorValue::Macd { histogram, .. } => *histogram,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Volatility(usize),
    Macd { fast: usize, slow: usize, signal: usize },
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Build a single-valued series; `None` entries are warm-up points.
    pub(crate) fn from_options(
        indicator_type: IndicatorType,
        bars: &[OhlcvBar],
        raw: Vec<Option<f64>>,
    ) -> Self {
        let values = bars
            .iter()
            .zip(raw)
            .map(|(bar, v)| IndicatorPoint {
                date: bar.date,
                valid: v.is_some(),
                value: IndicatorValue::Simple(v.unwrap_or(0.0)),
            })
            .collect();
        Self {
            indicator_type,
            values,
        }
    }

    /// Primary values with `NaN` in place of warm-up points.
    pub fn primary_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|p| if p.valid { p.value.primary() } else { f64::NAN })
            .collect()
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|p| p.valid).count()
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Volatility(period) => write!(f, "VOLATILITY({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
        }
    }
}
