//! Per-period simulation output rows.

use chrono::NaiveDate;

/// One row of a simulated result table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnRow {
    pub date: NaiveDate,
    pub close: f64,
    pub signal: f64,
    /// Position held over the period ending at `date`, as a fraction of equity.
    pub position: f64,
    pub market_return: f64,
    /// Net of transaction costs.
    pub strategy_return: f64,
    pub cost: f64,
    pub equity: f64,
    /// Whether the position changed at the close of `date`.
    pub trade: bool,
}

pub type ResultTable = Vec<ReturnRow>;

/// Net strategy returns of a table, in date order.
pub fn strategy_returns(table: &[ReturnRow]) -> Vec<f64> {
    table.iter().map(|r| r.strategy_return).collect()
}

/// Dates of a table, in order.
pub fn dates(table: &[ReturnRow]) -> Vec<NaiveDate> {
    table.iter().map(|r| r.date).collect()
}
