//! Prediction model port.

use crate::domain::error::CollaboratorError;
use crate::domain::features::FeatureMatrix;
use crate::domain::regime::MarketRegime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelCapabilities {
    /// Consumes 3-D sequence windows instead of flat rows.
    pub sequential: bool,
    /// Accepts a regime hint alongside flat features.
    pub regime_conditioned: bool,
}

pub trait PredictionModel {
    fn name(&self) -> &str;

    fn capabilities(&self) -> ModelCapabilities;

    /// One probability in [0, 1] per sample. No side effects.
    fn predict(
        &self,
        features: &FeatureMatrix,
        regime: Option<MarketRegime>,
    ) -> Result<Vec<f64>, CollaboratorError>;
}
