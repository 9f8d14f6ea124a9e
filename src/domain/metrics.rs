//! Performance metrics over return series.
//!
//! Annualization base is 252 trading periods. Every ratio guards its
//! denominator and falls back to 0.0 instead of producing NaN/Inf.

use crate::domain::frame::build_unified_timeline;
use crate::domain::portfolio::{PortfolioOptimizer, PortfolioWeights};
use crate::domain::returns::ReturnRow;
use crate::domain::series::{mean, pearson, sample_std};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

const MIN_DENOMINATOR: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortfolioMetrics {
    pub cagr: f64,
    pub max_drawdown: f64,
    pub avg_drawdown: f64,
    pub cagr_to_drawdown: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub avg_correlation: f64,
    pub weights: PortfolioWeights,
}

impl PortfolioMetrics {
    /// Metrics of a single return series. Non-finite returns are ignored.
    pub fn from_returns(returns: &[f64], risk_free_rate: f64) -> Self {
        let returns: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        let cumulative = cumulative_returns(&returns);
        let drawdown = drawdowns(&cumulative);

        let cagr = cagr(&cumulative);
        let max_drawdown = drawdown.iter().copied().fold(0.0, f64::min);
        let negatives: Vec<f64> = drawdown.iter().copied().filter(|d| *d < 0.0).collect();
        let avg_drawdown = if negatives.is_empty() {
            0.0
        } else {
            mean(&negatives)
        };
        let cagr_to_drawdown = if max_drawdown.abs() > MIN_DENOMINATOR {
            (cagr / max_drawdown).abs()
        } else {
            0.0
        };

        Self {
            cagr,
            max_drawdown,
            avg_drawdown,
            cagr_to_drawdown,
            volatility: annualized_volatility(&returns),
            sharpe_ratio: sharpe_ratio(&returns, risk_free_rate),
            avg_correlation: 0.0,
            weights: PortfolioWeights::new(),
        }
    }
}

/// Running product of (1 + r).
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |acc, r| {
            *acc *= 1.0 + r;
            Some(*acc)
        })
        .collect()
}

/// (cumulative - running max) / running max, 0 where the peak is not positive.
pub fn drawdowns(cumulative: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    cumulative
        .iter()
        .map(|&c| {
            peak = peak.max(c);
            if peak > 0.0 { (c - peak) / peak } else { 0.0 }
        })
        .collect()
}

/// Compound annual growth rate from a cumulative-return curve.
pub fn cagr(cumulative: &[f64]) -> f64 {
    let n = cumulative.len();
    let years = n as f64 / TRADING_DAYS_PER_YEAR;
    let Some(&last) = cumulative.last() else {
        return 0.0;
    };
    if years <= 0.0 {
        return 0.0;
    }
    let value = last.powf(1.0 / years) - 1.0;
    if value.is_finite() { value } else { 0.0 }
}

pub fn annualized_volatility(returns: &[f64]) -> f64 {
    let sd = sample_std(returns);
    if sd.is_finite() {
        sd * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let sd = sample_std(&excess);
    if !sd.is_finite() || sd <= MIN_DENOMINATOR {
        return 0.0;
    }
    TRADING_DAYS_PER_YEAR.sqrt() * mean(&excess) / sd
}

/// Pairwise correlation matrix over date-aligned series (`NaN` marks a
/// missing observation). Undefined pairs are 0.0; the diagonal is 1.0.
pub fn correlation_matrix(aligned: &BTreeMap<String, Vec<f64>>) -> Vec<Vec<f64>> {
    let columns: Vec<&Vec<f64>> = aligned.values().collect();
    let k = columns.len();
    let mut matrix = vec![vec![0.0; k]; k];
    for i in 0..k {
        matrix[i][i] = 1.0;
        for j in (i + 1)..k {
            let c = pearson(columns[i], columns[j]).unwrap_or(0.0);
            matrix[i][j] = c;
            matrix[j][i] = c;
        }
    }
    matrix
}

/// Mean of the strictly-upper-triangular correlations over the pairs where a
/// correlation is defined; 0 with fewer than two assets.
pub fn average_correlation(aligned: &BTreeMap<String, Vec<f64>>) -> f64 {
    let columns: Vec<&Vec<f64>> = aligned.values().collect();
    let pairs: Vec<f64> = (0..columns.len())
        .flat_map(|i| ((i + 1)..columns.len()).map(move |j| (i, j)))
        .filter_map(|(i, j)| pearson(columns[i], columns[j]))
        .collect();
    if pairs.is_empty() { 0.0 } else { mean(&pairs) }
}

/// Align every table's strategy returns on the union of their dates.
pub fn align_returns(results: &BTreeMap<String, Vec<ReturnRow>>) -> (Vec<NaiveDate>, BTreeMap<String, Vec<f64>>) {
    let timeline = build_unified_timeline(
        results
            .values()
            .map(|table| table.iter().map(|r| &r.date).collect::<Vec<_>>()),
    );
    let aligned = results
        .iter()
        .map(|(symbol, table)| {
            let by_date: HashMap<NaiveDate, f64> =
                table.iter().map(|r| (r.date, r.strategy_return)).collect();
            let column = timeline
                .iter()
                .map(|d| by_date.get(d).copied().unwrap_or(f64::NAN))
                .collect();
            (symbol.clone(), column)
        })
        .collect();
    (timeline, aligned)
}

/// Portfolio-level metrics: optimizer weights applied to the date-aligned
/// per-asset returns. A missing observation contributes nothing that day.
pub fn portfolio_metrics(
    results: &BTreeMap<String, Vec<ReturnRow>>,
    optimizer: &PortfolioOptimizer,
    risk_free_rate: f64,
) -> PortfolioMetrics {
    if results.is_empty() {
        return PortfolioMetrics::default();
    }

    let (timeline, aligned) = align_returns(results);
    let weights = optimizer.optimal_weights(&aligned);

    let combined: Vec<f64> = (0..timeline.len())
        .map(|t| {
            aligned
                .iter()
                .map(|(s, col)| {
                    let r = col[t];
                    if r.is_finite() {
                        weights.get(s).copied().unwrap_or(0.0) * r
                    } else {
                        0.0
                    }
                })
                .sum()
        })
        .collect();

    PortfolioMetrics {
        avg_correlation: average_correlation(&aligned),
        weights,
        ..PortfolioMetrics::from_returns(&combined, risk_free_rate)
    }
}
