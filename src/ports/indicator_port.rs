//! Technical indicator calculation port.

use crate::domain::error::CollaboratorError;
use crate::domain::frame::IndicatorFrame;
use crate::domain::ohlcv::OhlcvBar;

/// Pure function of the historical bars.
pub trait IndicatorCalculator {
    fn calculate_technical_indicators(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
    ) -> Result<IndicatorFrame, CollaboratorError>;
}
