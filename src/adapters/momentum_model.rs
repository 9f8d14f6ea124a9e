//! Deterministic momentum scorer standing in for a trained model.

use crate::adapters::window_features::{BAR_FEATURES, RETURN_FEATURE};
use crate::domain::error::CollaboratorError;
use crate::domain::features::FeatureMatrix;
use crate::domain::regime::MarketRegime;
use crate::domain::series::{clip, mean, sample_std};
use crate::ports::model_port::{ModelCapabilities, PredictionModel};

const REGIME_BIAS: f64 = 0.05;
const MIN_DISPERSION: f64 = 1e-4;

/// Scores each window by the logistic of its return t-statistic
/// (`mean / std`), scaled by `sensitivity`.
#[derive(Debug, Clone)]
pub struct MomentumModel {
    name: String,
    sequential: bool,
    regime_conditioned: bool,
    sensitivity: f64,
}

impl MomentumModel {
    pub fn new(sequential: bool, regime_conditioned: bool, sensitivity: f64) -> Self {
        let name = if sequential {
            "momentum-sequence"
        } else {
            "momentum"
        };
        Self {
            name: name.to_string(),
            sequential,
            regime_conditioned,
            sensitivity,
        }
    }

    fn score(&self, returns: &[f64], regime: Option<MarketRegime>) -> f64 {
        let m = mean(returns);
        if !m.is_finite() {
            return 0.5;
        }
        let sd = sample_std(returns);
        let dispersion = if sd.is_finite() { sd.max(MIN_DISPERSION) } else { MIN_DISPERSION };
        let z = self.sensitivity * m / dispersion;
        let p = 1.0 / (1.0 + (-z).exp());

        let bias = match regime {
            Some(MarketRegime::Bullish) if self.regime_conditioned => REGIME_BIAS,
            Some(MarketRegime::Bearish) if self.regime_conditioned => -REGIME_BIAS,
            _ => 0.0,
        };
        clip(p + bias, 0.0, 1.0)
    }
}

impl PredictionModel for MomentumModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            sequential: self.sequential,
            regime_conditioned: self.regime_conditioned,
        }
    }

    fn predict(
        &self,
        features: &FeatureMatrix,
        regime: Option<MarketRegime>,
    ) -> Result<Vec<f64>, CollaboratorError> {
        if features.is_sequential() != self.sequential {
            return Err(CollaboratorError::Prediction {
                reason: format!(
                    "model '{}' expects {} input",
                    self.name,
                    if self.sequential { "3-D sequence" } else { "2-D" }
                ),
            });
        }

        let predictions = match features {
            FeatureMatrix::Flat(rows) => rows
                .iter()
                .map(|row| {
                    let returns: Vec<f64> = row
                        .chunks_exact(BAR_FEATURES)
                        .map(|bar| bar[RETURN_FEATURE])
                        .collect();
                    self.score(&returns, regime)
                })
                .collect(),
            FeatureMatrix::Sequences(samples) => samples
                .iter()
                .map(|steps| {
                    let returns: Vec<f64> = steps
                        .iter()
                        .filter_map(|step| step.get(RETURN_FEATURE).copied())
                        .collect();
                    self.score(&returns, None)
                })
                .collect(),
        };
        Ok(predictions)
    }
}
