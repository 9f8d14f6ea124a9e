//! Trade simulation port.

use crate::domain::error::CollaboratorError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::returns::ResultTable;
use std::collections::BTreeMap;

/// Deterministic function of (prices, signals). Owns transaction costs,
/// stop-loss/take-profit handling and position limits.
pub trait TradeSimulator {
    fn calculate_returns(
        &self,
        bars: &[OhlcvBar],
        signals: &[f64],
    ) -> Result<ResultTable, CollaboratorError>;

    fn calculate_metrics(
        &self,
        table: &ResultTable,
    ) -> Result<BTreeMap<String, f64>, CollaboratorError>;
}
