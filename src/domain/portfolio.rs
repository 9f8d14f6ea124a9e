//! Correlation-aware portfolio weighting and the rebalancing loop.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::RegimeTraderError;
use crate::domain::frame::build_unified_timeline;
use crate::domain::metrics::TRADING_DAYS_PER_YEAR;
use crate::domain::series::{clip, pearson, sample_std};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

const MIN_VOLATILITY: f64 = 1e-8;

/// Asset -> fraction of equity.
pub type PortfolioWeights = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebalanceFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for RebalanceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RebalanceFrequency::Daily => "daily",
            RebalanceFrequency::Weekly => "weekly",
            RebalanceFrequency::Monthly => "monthly",
        })
    }
}

impl FromStr for RebalanceFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "d" | "b" => Ok(RebalanceFrequency::Daily),
            "weekly" | "w" => Ok(RebalanceFrequency::Weekly),
            "monthly" | "m" => Ok(RebalanceFrequency::Monthly),
            other => Err(format!(
                "unknown rebalance frequency '{other}' (expected daily, weekly or monthly)"
            )),
        }
    }
}

impl RebalanceFrequency {
    /// Rebalance dates drawn from a sorted trading timeline: every date, or
    /// the last trading date of each ISO week / calendar month.
    pub fn schedule(&self, timeline: &[NaiveDate]) -> Vec<NaiveDate> {
        let period_key = |d: &NaiveDate| -> (i32, u32) {
            match self {
                RebalanceFrequency::Daily => (d.year(), d.ordinal()),
                RebalanceFrequency::Weekly => {
                    let week = d.iso_week();
                    (week.year(), week.week())
                }
                RebalanceFrequency::Monthly => (d.year(), d.month()),
            }
        };
        timeline
            .iter()
            .enumerate()
            .filter(|(i, d)| {
                timeline
                    .get(i + 1)
                    .is_none_or(|next| period_key(next) != period_key(d))
            })
            .map(|(_, d)| *d)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioConfig {
    pub initial_capital: f64,
    pub max_position_size: f64,
    pub max_portfolio_size: f64,
    pub correlation_threshold: f64,
    pub rebalance_frequency: RebalanceFrequency,
    /// Trailing periods of returns used to weight at each rebalance.
    pub weight_lookback: usize,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            max_position_size: 0.2,
            max_portfolio_size: 0.8,
            correlation_threshold: 0.7,
            rebalance_frequency: RebalanceFrequency::Daily,
            weight_lookback: 21,
        }
    }
}

impl PortfolioConfig {
    pub fn validate(&self) -> Result<(), RegimeTraderError> {
        let invalid = |key: &str, reason: &str| RegimeTraderError::ConfigInvalid {
            section: "portfolio".into(),
            key: key.into(),
            reason: reason.into(),
        };
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(invalid("initial_capital", "initial_capital must be positive"));
        }
        if !in_unit_interval(self.max_position_size) {
            return Err(invalid("max_position_size", "max_position_size must be in (0, 1]"));
        }
        if !in_unit_interval(self.max_portfolio_size) {
            return Err(invalid("max_portfolio_size", "max_portfolio_size must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err(invalid(
                "correlation_threshold",
                "correlation_threshold must be between 0 and 1",
            ));
        }
        if self.weight_lookback < 2 {
            return Err(invalid("weight_lookback", "weight_lookback must be at least 2"));
        }
        Ok(())
    }
}

/// True for values in (0, 1].
pub(crate) fn in_unit_interval(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub date: NaiveDate,
    /// Asset -> dollar position held over the period ending at `date`.
    pub positions: BTreeMap<String, f64>,
    pub portfolio_value: f64,
}

/// Output of one rebalancing run, owned by the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RebalanceResult {
    pub equity_curve: Vec<EquityPoint>,
    pub position_history: Vec<PositionSnapshot>,
    pub period_returns: Vec<f64>,
}

impl RebalanceResult {
    pub fn final_equity(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.equity)
    }
}

/// Inverse-volatility weights normalized to sum 1. Assets whose volatility
/// cannot be estimated get no weight, unless none can, in which case the
/// weights are equal.
pub fn inverse_volatility_weights(returns: &BTreeMap<String, Vec<f64>>) -> PortfolioWeights {
    let raw: BTreeMap<String, Option<f64>> = returns
        .iter()
        .map(|(symbol, r)| {
            let vol = sample_std(r) * TRADING_DAYS_PER_YEAR.sqrt();
            let inv = vol.is_finite().then(|| 1.0 / vol.max(MIN_VOLATILITY));
            (symbol.clone(), inv)
        })
        .collect();

    let mut weights: PortfolioWeights = if raw.values().all(Option::is_none) {
        raw.keys().map(|s| (s.clone(), 1.0)).collect()
    } else {
        raw.into_iter().map(|(s, inv)| (s, inv.unwrap_or(0.0))).collect()
    };
    normalize(&mut weights);
    weights
}

fn normalize(weights: &mut PortfolioWeights) {
    let total: f64 = weights.values().sum();
    if total > 0.0 && total.is_finite() {
        for w in weights.values_mut() {
            *w /= total;
        }
    }
}

/// Correlation over the most recent common stretch of two return series.
/// Series on a shared timeline mark missing observations with `NaN`, which
/// `pearson` skips pairwise.
fn trailing_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let len = a.len().min(b.len());
    pearson(&a[a.len() - len..], &b[b.len() - len..])
}

#[derive(Debug, Clone)]
pub struct PortfolioOptimizer {
    config: PortfolioConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: PortfolioConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PortfolioConfig {
        &self.config
    }

    /// Volatility- and correlation-adjusted weights. The result sums to at
    /// most `max_portfolio_size` and no entry exceeds `max_position_size`.
    pub fn optimal_weights(&self, returns: &BTreeMap<String, Vec<f64>>) -> PortfolioWeights {
        let mut weights = inverse_volatility_weights(returns);
        let threshold = self.config.correlation_threshold;

        let symbols: Vec<&String> = returns.keys().collect();
        for i in 0..symbols.len() {
            for j in (i + 1)..symbols.len() {
                let Some(corr) = trailing_correlation(&returns[symbols[i]], &returns[symbols[j]])
                else {
                    continue;
                };
                if corr > threshold {
                    let scale = clip(1.0 - (corr - threshold), 0.0, 1.0);
                    for s in [symbols[i], symbols[j]] {
                        if let Some(w) = weights.get_mut(s) {
                            *w *= scale;
                        }
                    }
                }
            }
        }

        let cap = self.config.max_position_size;
        normalize(&mut weights);
        for w in weights.values_mut() {
            *w = clip(*w, 0.0, cap);
        }
        normalize(&mut weights);

        let total: f64 = weights.values().sum();
        if total > 0.0 {
            let scale = self.config.max_portfolio_size / total;
            for w in weights.values_mut() {
                *w = clip(*w * scale, 0.0, cap);
            }
        }
        weights
    }

    /// Walk the rebalance dates, compounding equity from the capital-weighted
    /// period returns of each asset. Failed or empty backtests contribute
    /// nothing; an asset without data in a period is left out of that period.
    pub fn rebalance(
        &self,
        symbols: &[String],
        results: &BTreeMap<String, BacktestResult>,
        frequency: RebalanceFrequency,
    ) -> RebalanceResult {
        let returns_by_symbol: BTreeMap<&String, HashMap<NaiveDate, f64>> = symbols
            .iter()
            .filter_map(|s| results.get(s).map(|r| (s, r)))
            .filter(|(_, r)| !r.is_empty())
            .map(|(s, r)| {
                let by_date = r
                    .results
                    .iter()
                    .filter(|row| row.strategy_return.is_finite())
                    .map(|row| (row.date, row.strategy_return))
                    .collect();
                (s, by_date)
            })
            .collect();

        let timeline = build_unified_timeline(
            returns_by_symbol
                .values()
                .map(|m| m.keys().collect::<Vec<_>>()),
        );
        let schedule = frequency.schedule(&timeline);

        let mut out = RebalanceResult::default();
        let mut equity = self.config.initial_capital;
        let mut cursor = 0usize;

        for date in &schedule {
            let period_start = cursor;
            while cursor < timeline.len() && timeline[cursor] <= *date {
                cursor += 1;
            }
            let period = &timeline[period_start..cursor];
            let history_start = period_start.saturating_sub(self.config.weight_lookback);
            let history = &timeline[history_start..period_start];

            let mut realized: BTreeMap<String, f64> = BTreeMap::new();
            let mut trailing: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for (symbol, by_date) in &returns_by_symbol {
                let observed: Vec<f64> = period.iter().filter_map(|d| by_date.get(d)).copied().collect();
                if observed.is_empty() {
                    continue;
                }
                let compounded = observed.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
                realized.insert((*symbol).clone(), compounded);
                trailing.insert(
                    (*symbol).clone(),
                    history
                        .iter()
                        .map(|d| by_date.get(d).copied().unwrap_or(f64::NAN))
                        .collect(),
                );
            }

            let weights = self.optimal_weights(&trailing);
            let positions: BTreeMap<String, f64> = weights
                .iter()
                .map(|(s, w)| (s.clone(), w * equity))
                .collect();

            let pnl: f64 = positions
                .iter()
                .map(|(s, dollars)| dollars * realized.get(s).copied().unwrap_or(0.0))
                .sum();
            let period_return = if equity > 0.0 { pnl / equity } else { 0.0 };
            equity *= 1.0 + period_return;

            debug!(%date, assets = realized.len(), period_return, equity, "rebalanced");

            out.period_returns.push(period_return);
            out.equity_curve.push(EquityPoint {
                date: *date,
                equity,
            });
            out.position_history.push(PositionSnapshot {
                date: *date,
                positions,
                portfolio_value: equity,
            });
        }

        info!(
            %frequency,
            rebalances = schedule.len(),
            final_equity = equity,
            "rebalancing complete"
        );
        out
    }
}
