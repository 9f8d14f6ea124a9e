//! Default feature preparer: fixed per-bar features, windowed.
//!
//! Per-bar layout (`BAR_FEATURES` wide, warm-up values are 0.0):
//!
//! | index | feature                    |
//! |-------|----------------------------|
//! | 0     | close-to-close return      |
//! | 1     | close / SMA20 - 1          |
//! | 2     | SMA20 / SMA50 - 1          |
//! | 3     | RSI / 100 - 0.5            |
//! | 4     | MACD histogram / close     |
//! | 5     | annualized volatility      |
//!
//! A flat sample concatenates `lookback` consecutive bar rows and, when a
//! regime is given, a one-hot regime context. A sequential sample is
//! `lookback` bar rows kept as separate time steps; the first
//! `history_bars - 1` bars are reserved as history before the first sequence.
//!
//! Sample `i` positions the bar right after its window, so only windows whose
//! following bar lies before the final `prediction_window` bars are emitted.

use crate::adapters::technical_indicators::{macd, rsi, sma_fast, sma_slow, volatility};
use crate::domain::error::CollaboratorError;
use crate::domain::features::{FeatureMatrix, PreparedFeatures};
use crate::domain::frame::IndicatorFrame;
use crate::domain::indicator::IndicatorType;
use crate::domain::regime::MarketRegime;
use crate::domain::series::{pct_change, sanitize};
use crate::ports::feature_port::FeaturePreparer;
use tracing::debug;

pub const BAR_FEATURES: usize = 6;
pub const RETURN_FEATURE: usize = 0;

#[derive(Debug, Clone, Copy)]
pub struct WindowFeaturePreparer {
    prediction_window: usize,
    history_bars: usize,
}

impl WindowFeaturePreparer {
    /// `history_bars` is the flat lookback reserved ahead of sequential windows.
    pub fn new(prediction_window: usize, history_bars: usize) -> Self {
        Self {
            prediction_window,
            history_bars: history_bars.max(1),
        }
    }

    fn bar_rows(&self, frame: &IndicatorFrame) -> Result<Vec<[f64; BAR_FEATURES]>, CollaboratorError> {
        let closes = frame.closes();
        let column = |t: IndicatorType| {
            frame
                .column(&t)
                .ok_or_else(|| CollaboratorError::Features {
                    reason: format!("indicator {} missing from frame", t),
                })
        };
        let sma20 = column(sma_fast())?;
        let sma50 = column(sma_slow())?;
        let rsi = column(rsi())?;
        let hist = column(macd())?;
        let vol = column(volatility())?;

        let mut returns = pct_change(&closes);
        if let Some(first) = returns.first_mut() {
            *first = 0.0;
        }

        let ratio = |a: f64, b: f64| if b != 0.0 { a / b - 1.0 } else { f64::NAN };
        let rows = (0..closes.len())
            .map(|t| {
                let raw = [
                    returns[t],
                    ratio(closes[t], sma20[t]),
                    ratio(sma20[t], sma50[t]),
                    rsi[t] / 100.0 - 0.5,
                    hist[t] / closes[t],
                    vol[t],
                ];
                let clean = sanitize(&raw, 0.0);
                let mut row = [0.0; BAR_FEATURES];
                row.copy_from_slice(&clean);
                row
            })
            .collect();
        Ok(rows)
    }

    fn target(&self, closes: &[f64], last: usize) -> f64 {
        if closes[last + self.prediction_window] > closes[last] {
            1.0
        } else {
            0.0
        }
    }
}

fn regime_one_hot(regime: MarketRegime) -> [f64; 3] {
    match regime {
        MarketRegime::Bullish => [1.0, 0.0, 0.0],
        MarketRegime::Bearish => [0.0, 1.0, 0.0],
        MarketRegime::Sideways => [0.0, 0.0, 1.0],
    }
}

impl FeaturePreparer for WindowFeaturePreparer {
    fn prepare_features(
        &self,
        frame: &IndicatorFrame,
        lookback: usize,
        regime: Option<MarketRegime>,
        reshape_sequences: bool,
    ) -> Result<PreparedFeatures, CollaboratorError> {
        if lookback == 0 {
            return Err(CollaboratorError::Features {
                reason: "lookback must be at least 1".into(),
            });
        }

        let n = frame.bar_count();
        let start = if reshape_sequences {
            self.history_bars - 1
        } else {
            0
        };
        // first bar after each window must precede the trailing prediction window
        let Some(count) = n
            .checked_sub(self.prediction_window)
            .and_then(|usable| usable.checked_sub(start + lookback))
            .filter(|&c| c > 0)
        else {
            debug!(symbol = %frame.symbol, bars = n, lookback, "not enough bars for any window");
            return Ok(PreparedFeatures::empty(reshape_sequences));
        };

        let rows = self.bar_rows(frame)?;
        let closes = frame.closes();
        let targets: Vec<f64> = (0..count)
            .map(|i| self.target(&closes, start + i + lookback - 1))
            .collect();

        let matrix = if reshape_sequences {
            FeatureMatrix::Sequences(
                (0..count)
                    .map(|i| {
                        rows[start + i..start + i + lookback]
                            .iter()
                            .map(|r| r.to_vec())
                            .collect()
                    })
                    .collect(),
            )
        } else {
            let context = regime.map(regime_one_hot);
            FeatureMatrix::Flat(
                (0..count)
                    .map(|i| {
                        let mut row: Vec<f64> =
                            rows[i..i + lookback].iter().flatten().copied().collect();
                        if let Some(one_hot) = context {
                            row.extend_from_slice(&one_hot);
                        }
                        row
                    })
                    .collect(),
            )
        };

        debug!(
            symbol = %frame.symbol,
            samples = count,
            lookback,
            sequential = reshape_sequences,
            "prepared feature windows"
        );
        Ok(PreparedFeatures { matrix, targets })
    }
}
