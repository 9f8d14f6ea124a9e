#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Weekday};
use regimetrader::domain::error::{CollaboratorError, RegimeTraderError};
use regimetrader::domain::features::{FeatureMatrix, PreparedFeatures};
use regimetrader::domain::frame::IndicatorFrame;
pub use regimetrader::domain::ohlcv::OhlcvBar;
use regimetrader::domain::regime::MarketRegime;
use regimetrader::domain::returns::{ResultTable, ReturnRow};
use regimetrader::ports::data_port::DataPort;
use regimetrader::ports::feature_port::FeaturePreparer;
use regimetrader::ports::model_port::{ModelCapabilities, PredictionModel};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `count` consecutive weekdays starting at (or after) `start`.
pub fn weekdays(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(count);
    let mut d = start;
    while out.len() < count {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(d);
        }
        d = d.succ_opt().unwrap();
    }
    out
}

pub fn make_bars(symbol: &str, closes: &[f64]) -> Vec<OhlcvBar> {
    weekdays(date(2022, 1, 3), closes.len())
        .into_iter()
        .zip(closes)
        .map(|(date, &close)| OhlcvBar {
            symbol: symbol.to_string(),
            date,
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 50_000,
        })
        .collect()
}

/// Oscillating prices around a gentle drift.
pub fn wave_closes(n: usize, drift: f64, amplitude: f64, period: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 * (1.0 + drift).powf(t) + amplitude * (t * std::f64::consts::TAU / period).sin()
        })
        .collect()
}

pub fn wave_bars(symbol: &str, n: usize) -> Vec<OhlcvBar> {
    make_bars(symbol, &wave_closes(n, 0.0005, 4.0, 40.0))
}

pub fn return_row(date: NaiveDate, strategy_return: f64) -> ReturnRow {
    ReturnRow {
        date,
        close: 100.0,
        signal: 0.0,
        position: 0.0,
        market_return: 0.0,
        strategy_return,
        cost: 0.0,
        equity: 0.0,
        trade: false,
    }
}

pub fn return_table(dates: &[NaiveDate], returns: &[f64]) -> ResultTable {
    dates
        .iter()
        .zip(returns)
        .map(|(d, r)| return_row(*d, *r))
        .collect()
}

/// Feature preparer returning `count` flat rows regardless of the frame,
/// recording every requested window.
pub struct FixedFeatures {
    pub count: usize,
    pub sequential_count: Option<usize>,
    pub calls: RefCell<Vec<(usize, Option<MarketRegime>, bool)>>,
}

impl FixedFeatures {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            sequential_count: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn windows(&self) -> Vec<usize> {
        self.calls.borrow().iter().map(|(w, _, _)| *w).collect()
    }
}

impl FeaturePreparer for FixedFeatures {
    fn prepare_features(
        &self,
        _frame: &IndicatorFrame,
        lookback: usize,
        regime: Option<MarketRegime>,
        reshape_sequences: bool,
    ) -> Result<PreparedFeatures, CollaboratorError> {
        self.calls
            .borrow_mut()
            .push((lookback, regime, reshape_sequences));
        let count = if reshape_sequences {
            self.sequential_count.unwrap_or(self.count)
        } else {
            self.count
        };
        let matrix = if reshape_sequences {
            FeatureMatrix::Sequences(vec![vec![vec![0.0; 2]; lookback]; count])
        } else {
            FeatureMatrix::Flat(vec![vec![0.0; lookback]; count])
        };
        Ok(PreparedFeatures {
            matrix,
            targets: vec![0.0; count],
        })
    }
}

/// Feature preparer whose output shrinks with the window: `bars - window`
/// rows, or a fixed count for each requested window.
pub struct WindowedFeatures {
    pub by_window: HashMap<usize, usize>,
    pub calls: RefCell<Vec<usize>>,
}

impl WindowedFeatures {
    pub fn new(by_window: &[(usize, usize)]) -> Self {
        Self {
            by_window: by_window.iter().copied().collect(),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl FeaturePreparer for WindowedFeatures {
    fn prepare_features(
        &self,
        _frame: &IndicatorFrame,
        lookback: usize,
        _regime: Option<MarketRegime>,
        _reshape_sequences: bool,
    ) -> Result<PreparedFeatures, CollaboratorError> {
        self.calls.borrow_mut().push(lookback);
        let count = self.by_window.get(&lookback).copied().unwrap_or(0);
        Ok(PreparedFeatures {
            matrix: FeatureMatrix::Flat(vec![vec![0.0; lookback]; count]),
            targets: vec![0.0; count],
        })
    }
}

pub struct FailingFeatures;

impl FeaturePreparer for FailingFeatures {
    fn prepare_features(
        &self,
        _frame: &IndicatorFrame,
        _lookback: usize,
        _regime: Option<MarketRegime>,
        _reshape_sequences: bool,
    ) -> Result<PreparedFeatures, CollaboratorError> {
        Err(CollaboratorError::Features {
            reason: "scaler not fitted".into(),
        })
    }
}

/// Model returning a constant probability per sample, or failing outright.
pub struct MockModel {
    pub capabilities: ModelCapabilities,
    pub probability: f64,
    pub fail: bool,
    pub hints: RefCell<Vec<Option<MarketRegime>>>,
}

impl MockModel {
    pub fn constant(probability: f64) -> Self {
        Self {
            capabilities: ModelCapabilities::default(),
            probability,
            fail: false,
            hints: RefCell::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::constant(0.5)
        }
    }

    pub fn with_capabilities(mut self, sequential: bool, regime_conditioned: bool) -> Self {
        self.capabilities = ModelCapabilities {
            sequential,
            regime_conditioned,
        };
        self
    }
}

impl PredictionModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn predict(
        &self,
        features: &FeatureMatrix,
        regime: Option<MarketRegime>,
    ) -> Result<Vec<f64>, CollaboratorError> {
        self.hints.borrow_mut().push(regime);
        if self.fail {
            return Err(CollaboratorError::Prediction {
                reason: "model not loaded".into(),
            });
        }
        Ok(vec![self.probability; features.len()])
    }
}

pub struct MockDataPort {
    pub data: BTreeMap<String, Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, RegimeTraderError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(RegimeTraderError::Data {
                reason: reason.clone(),
            });
        }
        let bars = self.data.get(symbol).ok_or_else(|| RegimeTraderError::NoData {
            symbol: symbol.to_string(),
        })?;
        Ok(bars
            .iter()
            .filter(|b| start_date.is_none_or(|s| b.date >= s))
            .filter(|b| end_date.is_none_or(|e| b.date <= e))
            .cloned()
            .collect())
    }

    fn list_symbols(&self) -> Result<Vec<String>, RegimeTraderError> {
        Ok(self.data.keys().cloned().collect())
    }
}
