//! Feature preparation port.

use crate::domain::error::CollaboratorError;
use crate::domain::features::PreparedFeatures;
use crate::domain::frame::IndicatorFrame;
use crate::domain::regime::MarketRegime;

pub trait FeaturePreparer {
    /// Window the indicator frame into model input. An empty matrix means
    /// "not enough data" and is a valid result, not an error.
    fn prepare_features(
        &self,
        frame: &IndicatorFrame,
        lookback: usize,
        regime: Option<MarketRegime>,
        reshape_sequences: bool,
    ) -> Result<PreparedFeatures, CollaboratorError>;
}
