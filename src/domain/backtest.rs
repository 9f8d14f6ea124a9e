//! Per-symbol backtest pipeline and the multi-symbol portfolio run.
//!
//! Stages: indicators, regime, features, predictions, signals, alignment,
//! simulation. Every stage failure is recovered into an empty
//! [`BacktestResult`] carrying the [`BacktestFailure`]; only configuration
//! misuse is reported as an error, and only from [`BacktestOrchestrator::new`].

use crate::domain::error::{BacktestFailure, CollaboratorError, RegimeTraderError};
use crate::domain::features::PreparedFeatures;
use crate::domain::frame::IndicatorFrame;
use crate::domain::metrics::{portfolio_metrics, PortfolioMetrics};
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::portfolio::{in_unit_interval, PortfolioOptimizer, RebalanceResult};
use crate::domain::regime::{MarketRegime, RegimeClassifier};
use crate::domain::returns::{ResultTable, ReturnRow};
use crate::domain::series::{reconcile, Alignment, Fill};
use crate::domain::signal::{SignalGenerator, SignalRecord};
use crate::ports::feature_port::FeaturePreparer;
use crate::ports::indicator_port::IndicatorCalculator;
use crate::ports::model_port::PredictionModel;
use crate::ports::simulator_port::TradeSimulator;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const MIN_FEATURE_WINDOWS: usize = 30;
const MIN_RETRY_LOOKBACK: usize = 5;
const RETRY_LOOKBACK_STEP: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub transaction_cost: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub max_position_size: f64,
    pub min_position_size: f64,
    pub max_trades_per_day: usize,
    pub volatility_scaling: bool,
    pub volatility_target: f64,
    pub risk_free_rate: f64,
    /// Feature window for flat models.
    pub lookback: usize,
    /// Feature window for sequential models.
    pub sequence_length: usize,
    /// Trailing bars without a realized outcome, excluded from alignment.
    pub prediction_window: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            transaction_cost: 0.0005,
            stop_loss: 0.01,
            take_profit: 0.02,
            max_position_size: 0.2,
            min_position_size: 0.05,
            max_trades_per_day: 1,
            volatility_scaling: false,
            volatility_target: 0.15,
            risk_free_rate: 0.02,
            lookback: 10,
            sequence_length: 10,
            prediction_window: 5,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), RegimeTraderError> {
        let invalid = |key: &str, reason: &str| RegimeTraderError::ConfigInvalid {
            section: "backtest".into(),
            key: key.into(),
            reason: reason.into(),
        };
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(invalid("initial_capital", "initial_capital must be positive"));
        }
        for (key, value) in [
            ("transaction_cost", self.transaction_cost),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
            ("volatility_target", self.volatility_target),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, "must be non-negative"));
            }
        }
        if !in_unit_interval(self.max_position_size) {
            return Err(invalid("max_position_size", "max_position_size must be in (0, 1]"));
        }
        if !(0.0..=self.max_position_size).contains(&self.min_position_size) {
            return Err(invalid(
                "min_position_size",
                "min_position_size must be between 0 and max_position_size",
            ));
        }
        if !(0.0..1.0).contains(&self.risk_free_rate) {
            return Err(invalid("risk_free_rate", "risk_free_rate must be between 0 and 1"));
        }
        if self.max_trades_per_day == 0 {
            return Err(invalid("max_trades_per_day", "max_trades_per_day must be at least 1"));
        }
        if self.lookback == 0 {
            return Err(invalid("lookback", "lookback must be at least 1"));
        }
        if self.prediction_window == 0 {
            return Err(invalid("prediction_window", "prediction_window must be at least 1"));
        }
        Ok(())
    }
}

/// A signal placed on the price-history date index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedSignal {
    pub date: NaiveDate,
    pub value: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BacktestStatus {
    Completed,
    Failed(BacktestFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub symbol: String,
    pub status: BacktestStatus,
    pub results: ResultTable,
    pub metrics: BTreeMap<String, f64>,
    pub predictions: Vec<f64>,
    pub signals: Vec<SignalRecord>,
    pub aligned_signals: Vec<AlignedSignal>,
    pub regime: Option<MarketRegime>,
}

impl BacktestResult {
    /// The explicit empty result of a failed run.
    pub fn failed(symbol: &str, regime: Option<MarketRegime>, failure: BacktestFailure) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: BacktestStatus::Failed(failure),
            results: Vec::new(),
            metrics: BTreeMap::new(),
            predictions: Vec::new(),
            signals: Vec::new(),
            aligned_signals: Vec::new(),
            regime,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failure(&self) -> Option<&BacktestFailure> {
        match &self.status {
            BacktestStatus::Failed(f) => Some(f),
            BacktestStatus::Completed => None,
        }
    }

    pub fn metric(&self, key: &str) -> f64 {
        self.metrics.get(key).copied().unwrap_or(0.0)
    }
}

/// Feature matrix accepted for prediction, with the window that produced it.
struct AcceptedFeatures {
    features: PreparedFeatures,
    window: usize,
}

pub struct BacktestOrchestrator<'a> {
    indicators: &'a dyn IndicatorCalculator,
    features: &'a dyn FeaturePreparer,
    model: &'a dyn PredictionModel,
    simulator: &'a dyn TradeSimulator,
    classifier: RegimeClassifier,
    signals: SignalGenerator,
    config: BacktestConfig,
}

impl<'a> BacktestOrchestrator<'a> {
    pub fn new(
        indicators: &'a dyn IndicatorCalculator,
        features: &'a dyn FeaturePreparer,
        model: &'a dyn PredictionModel,
        simulator: &'a dyn TradeSimulator,
        config: BacktestConfig,
    ) -> Result<Self, RegimeTraderError> {
        config.validate()?;
        let capabilities = model.capabilities();
        if capabilities.sequential && config.sequence_length == 0 {
            return Err(RegimeTraderError::UnsupportedModel {
                reason: format!(
                    "model '{}' is sequential but sequence_length is 0",
                    model.name()
                ),
            });
        }
        if capabilities.sequential && capabilities.regime_conditioned {
            debug!(
                model = model.name(),
                "sequential models receive no regime hint"
            );
        }

        Ok(Self {
            indicators,
            features,
            model,
            simulator,
            classifier: RegimeClassifier::new(),
            signals: SignalGenerator::new(config.max_position_size),
            config,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn backtest(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
        regime_override: Option<MarketRegime>,
    ) -> BacktestResult {
        let mut regime = None;
        match self.run(symbol, bars, regime_override, &mut regime) {
            Ok(result) => {
                info!(
                    symbol,
                    regime = ?result.regime,
                    rows = result.results.len(),
                    active = result.aligned_signals.iter().filter(|s| s.value != 0.0).count(),
                    "backtest complete"
                );
                result
            }
            Err(failure) => {
                warn!(symbol, category = %failure.category(), %failure, "backtest failed");
                BacktestResult::failed(symbol, regime, failure)
            }
        }
    }

    fn run(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
        regime_override: Option<MarketRegime>,
        regime_slot: &mut Option<MarketRegime>,
    ) -> Result<BacktestResult, BacktestFailure> {
        if bars.is_empty() {
            return Err(BacktestFailure::InsufficientData {
                stage: "price history",
                needed: 1,
                available: 0,
            });
        }

        let frame = self.indicators.calculate_technical_indicators(symbol, bars)?;

        let regime = regime_override.unwrap_or_else(|| self.classifier.classify(bars));
        *regime_slot = Some(regime);

        let capabilities = self.model.capabilities();
        let accepted = self.prepare_features(&frame, regime, capabilities.sequential)?;

        let hint = (capabilities.regime_conditioned && !capabilities.sequential).then_some(regime);
        let predictions = self.model.predict(&accepted.features.matrix, hint)?;
        if predictions.is_empty() {
            return Err(CollaboratorError::Prediction {
                reason: format!("model '{}' returned no predictions", self.model.name()),
            }
            .into());
        }
        if predictions.len() != accepted.features.len() {
            warn!(
                symbol,
                predictions = predictions.len(),
                samples = accepted.features.len(),
                "prediction count differs from sample count"
            );
        }

        let signals = self.signals.generate(&predictions, regime);

        let offset = if capabilities.sequential {
            self.config.lookback + accepted.window - 1
        } else {
            accepted.window
        };
        let (start, end, aligned) = self.align(bars, &signals, offset)?;
        let values: Vec<f64> = aligned.iter().map(|s| s.value).collect();

        let table = self.simulator.calculate_returns(&bars[start..end], &values)?;
        if table.len() != end - start {
            return Err(CollaboratorError::Simulation {
                reason: format!("result table has {} rows for {} bars", table.len(), end - start),
            }
            .into());
        }
        let metrics = self.simulator.calculate_metrics(&table)?;

        Ok(BacktestResult {
            symbol: symbol.to_string(),
            status: BacktestStatus::Completed,
            results: table,
            metrics,
            predictions,
            signals,
            aligned_signals: aligned,
            regime: Some(regime),
        })
    }

    /// Request features, retrying with a shorter window and then accepting a
    /// regime-specific relaxed minimum before giving up.
    fn prepare_features(
        &self,
        frame: &IndicatorFrame,
        regime: MarketRegime,
        sequential: bool,
    ) -> Result<AcceptedFeatures, BacktestFailure> {
        let rows = frame.bar_count();
        let window = if sequential {
            self.config.sequence_length
        } else {
            self.config.lookback
        };

        let first = self.features.prepare_features(frame, window, Some(regime), sequential)?;
        if first.is_empty() {
            return Err(BacktestFailure::InsufficientData {
                stage: "features",
                needed: 1,
                available: 0,
            });
        }

        let required = MIN_FEATURE_WINDOWS.max(rows / 5);
        debug!(
            symbol = %frame.symbol,
            windows = first.len(),
            required,
            window,
            "prepared features"
        );
        if first.len() >= required {
            return Ok(AcceptedFeatures {
                features: first,
                window,
            });
        }

        let shorter = MIN_RETRY_LOOKBACK.max(window.saturating_sub(RETRY_LOOKBACK_STEP));
        if shorter < window {
            let retry = self.features.prepare_features(frame, shorter, Some(regime), sequential)?;
            if retry.len() >= required {
                debug!(symbol = %frame.symbol, window = shorter, "accepted shorter feature window");
                return Ok(AcceptedFeatures {
                    features: retry,
                    window: shorter,
                });
            }
        }

        let relaxed = relaxed_minimum(regime, rows);
        if first.len() >= relaxed {
            debug!(symbol = %frame.symbol, relaxed, "accepted relaxed feature minimum");
            return Ok(AcceptedFeatures {
                features: first,
                window,
            });
        }

        Err(BacktestFailure::InsufficientData {
            stage: "features",
            needed: relaxed,
            available: first.len(),
        })
    }

    /// Place signals on `bars[offset..len - prediction_window]`, truncating or
    /// zero-padding to fit. The first aligned signal is always flat.
    fn align(
        &self,
        bars: &[OhlcvBar],
        signals: &[SignalRecord],
        offset: usize,
    ) -> Result<(usize, usize, Vec<AlignedSignal>), BacktestFailure> {
        let end = bars.len().saturating_sub(self.config.prediction_window);
        if offset >= end {
            return Err(BacktestFailure::AlignmentMismatch {
                signals: signals.len(),
                index: end.saturating_sub(offset),
            });
        }
        let index_len = end - offset;

        let values: Vec<f64> = signals.iter().map(|s| s.value).collect();
        let quality: Vec<f64> = signals.iter().map(|s| s.quality).collect();
        let mut values = reconcile(&values, index_len, Alignment::Leading, Fill::Value(0.0));
        let quality = reconcile(&quality, index_len, Alignment::Leading, Fill::Value(0.0));
        values[0] = 0.0;

        debug!(offset, end, signals = signals.len(), "aligned signals");

        let aligned = bars[offset..end]
            .iter()
            .zip(values.into_iter().zip(quality))
            .map(|(bar, (value, quality))| AlignedSignal {
                date: bar.date,
                value,
                quality,
            })
            .collect();
        Ok((offset, end, aligned))
    }
}

fn relaxed_minimum(regime: MarketRegime, rows: usize) -> usize {
    match regime {
        MarketRegime::Bullish => 20.max(rows / 6),
        MarketRegime::Bearish => 25.max(rows / 5),
        MarketRegime::Sideways => 15.max(rows / 8),
    }
}

/// Per-symbol results, portfolio metrics and the rebalanced equity curve.
#[derive(Debug, Clone)]
pub struct PortfolioBacktest {
    pub results: BTreeMap<String, BacktestResult>,
    pub metrics: PortfolioMetrics,
    pub rebalance: RebalanceResult,
}

impl PortfolioBacktest {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &BacktestFailure)> {
        self.results
            .iter()
            .filter_map(|(s, r)| r.failure().map(|f| (s.as_str(), f)))
    }

    pub fn completed(&self) -> impl Iterator<Item = &BacktestResult> {
        self.results.values().filter(|r| !r.is_empty())
    }

    pub fn final_equity(&self, initial_capital: f64) -> f64 {
        self.rebalance.final_equity().unwrap_or(initial_capital)
    }

    pub fn total_return(&self, initial_capital: f64) -> f64 {
        if initial_capital > 0.0 {
            self.final_equity(initial_capital) / initial_capital - 1.0
        } else {
            0.0
        }
    }
}

/// Backtest every symbol independently, then combine the completed ones.
pub fn run_portfolio_backtest(
    orchestrator: &BacktestOrchestrator<'_>,
    optimizer: &PortfolioOptimizer,
    price_data: &BTreeMap<String, Vec<OhlcvBar>>,
    regime_override: Option<MarketRegime>,
) -> PortfolioBacktest {
    let results: BTreeMap<String, BacktestResult> = price_data
        .iter()
        .map(|(symbol, bars)| {
            (
                symbol.clone(),
                orchestrator.backtest(symbol, bars, regime_override),
            )
        })
        .collect();

    let tables: BTreeMap<String, Vec<ReturnRow>> = results
        .iter()
        .filter(|(_, r)| !r.is_empty())
        .map(|(s, r)| (s.clone(), r.results.clone()))
        .collect();

    let metrics = portfolio_metrics(&tables, optimizer, orchestrator.config().risk_free_rate);
    let symbols: Vec<String> = tables.keys().cloned().collect();
    let rebalance = optimizer.rebalance(
        &symbols,
        &results,
        optimizer.config().rebalance_frequency,
    );

    info!(
        symbols = results.len(),
        completed = tables.len(),
        cagr = metrics.cagr,
        sharpe = metrics.sharpe_ratio,
        "portfolio backtest complete"
    );

    PortfolioBacktest {
        results,
        metrics,
        rebalance,
    }
}
