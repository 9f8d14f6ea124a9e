//! Default indicator calculator over the domain indicator functions.

use crate::domain::error::CollaboratorError;
use crate::domain::frame::IndicatorFrame;
use crate::domain::indicator::{
    calculate_ema, calculate_rsi, calculate_sma, calculate_volatility, IndicatorType,
};
use crate::domain::indicator::macd::{
    calculate_macd_default, DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW,
};
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::indicator_port::IndicatorCalculator;
use tracing::debug;

pub const SMA_FAST: usize = 20;
pub const SMA_SLOW: usize = 50;
pub const EMA_PERIOD: usize = 12;
pub const RSI_PERIOD: usize = 14;
pub const VOLATILITY_PERIOD: usize = 21;

pub fn sma_fast() -> IndicatorType {
    IndicatorType::Sma(SMA_FAST)
}

pub fn sma_slow() -> IndicatorType {
    IndicatorType::Sma(SMA_SLOW)
}

pub fn rsi() -> IndicatorType {
    IndicatorType::Rsi(RSI_PERIOD)
}

pub fn volatility() -> IndicatorType {
    IndicatorType::Volatility(VOLATILITY_PERIOD)
}

pub fn macd() -> IndicatorType {
    IndicatorType::Macd {
        fast: DEFAULT_FAST,
        slow: DEFAULT_SLOW,
        signal: DEFAULT_SIGNAL,
    }
}

/// SMA20, SMA50, EMA12, RSI14, MACD(12,26,9) and 21-bar volatility.
#[derive(Debug, Clone, Copy, Default)]
pub struct TechnicalIndicatorAdapter;

impl TechnicalIndicatorAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl IndicatorCalculator for TechnicalIndicatorAdapter {
    fn calculate_technical_indicators(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
    ) -> Result<IndicatorFrame, CollaboratorError> {
        if let Some(bad) = bars.iter().find(|b| !b.close.is_finite() || b.close <= 0.0) {
            return Err(CollaboratorError::Indicators {
                reason: format!("{} has invalid close {} on {}", symbol, bad.close, bad.date),
            });
        }
        if bars.windows(2).any(|w| w[0].date >= w[1].date) {
            return Err(CollaboratorError::Indicators {
                reason: format!("{} bars are not in strictly increasing date order", symbol),
            });
        }

        let frame = IndicatorFrame::new(symbol.to_string(), bars.to_vec())
            .with_indicator(calculate_sma(bars, SMA_FAST))
            .with_indicator(calculate_sma(bars, SMA_SLOW))
            .with_indicator(calculate_ema(bars, EMA_PERIOD))
            .with_indicator(calculate_rsi(bars, RSI_PERIOD))
            .with_indicator(calculate_macd_default(bars))
            .with_indicator(calculate_volatility(bars, VOLATILITY_PERIOD));

        debug!(
            symbol,
            bars = bars.len(),
            indicators = frame.indicators.len(),
            "computed technical indicators"
        );
        Ok(frame)
    }
}
