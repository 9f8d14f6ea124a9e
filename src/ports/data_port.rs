//! Historical price data access port.

use crate::domain::error::RegimeTraderError;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;

pub trait DataPort {
    /// Bars for `symbol` in date order, optionally bounded (inclusive).
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, RegimeTraderError>;

    fn list_symbols(&self) -> Result<Vec<String>, RegimeTraderError>;
}
