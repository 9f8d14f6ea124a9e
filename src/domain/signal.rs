//! Prediction-to-position signal generation.
//!
//! Turns a series of model probabilities into position signals bounded by
//! `±max_position_size`. The pipeline is deliberately conservative: regime
//! entry thresholds, multi-window trend confirmation on the probability
//! series itself, a composite quality gate, a second volatility/quality
//! scaling stage, and finally a momentum veto. Most inputs end up flat.

use crate::domain::error::BacktestFailure;
use crate::domain::regime::{MarketRegime, RegimeParameters};
use crate::domain::series::{
    clip, diff, mean, population_std, reconcile, reconcile_all, rolling_mean, rolling_std,
    sanitize, sign, Alignment, Fill, ReconcileMode,
};
use tracing::{debug, warn};

/// One generated signal, indexed by its position in the prediction series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalRecord {
    pub step: usize,
    pub value: f64,
    pub quality: f64,
}

/// Per-regime thresholds for the volatility-quality, persistence and
/// consistency factors of the validity gate. Trend and momentum quality are
/// gated by the regime's own `quality_threshold`/`momentum_threshold`.
struct GateThresholds {
    volatility_quality: f64,
    persistence: f64,
    consistency: f64,
}

/// Momentum veto thresholds. `quality` is the veto's own floor and sits below
/// the regime's gate `quality_threshold`.
struct VetoThresholds {
    momentum: f64,
    quality: f64,
    persistence: f64,
    volatility: f64,
}

fn gate_thresholds(regime: MarketRegime) -> GateThresholds {
    match regime {
        MarketRegime::Bullish => GateThresholds {
            volatility_quality: 0.5,
            persistence: 0.65,
            consistency: 0.6,
        },
        MarketRegime::Bearish => GateThresholds {
            volatility_quality: 0.55,
            persistence: 0.75,
            consistency: 0.7,
        },
        MarketRegime::Sideways => GateThresholds {
            volatility_quality: 0.6,
            persistence: 0.85,
            consistency: 0.7,
        },
    }
}

fn veto_thresholds(regime: MarketRegime) -> VetoThresholds {
    match regime {
        MarketRegime::Bullish => VetoThresholds {
            momentum: 0.65,
            quality: 0.60,
            persistence: 0.55,
            volatility: 1.2,
        },
        MarketRegime::Bearish => VetoThresholds {
            momentum: 0.75,
            quality: 0.70,
            persistence: 0.65,
            volatility: 1.0,
        },
        MarketRegime::Sideways => VetoThresholds {
            momentum: 0.70,
            quality: 0.65,
            persistence: 0.60,
            volatility: 1.1,
        },
    }
}

const NEUTRAL_PREDICTION: f64 = 0.5;
const MOMENTUM_HORIZON: usize = 5;

/// Smoothed views of the prediction series at the 3/5/8/13 windows.
struct TrendWindows {
    short: Vec<f64>,
    medium: Vec<f64>,
    long: Vec<f64>,
    super_long: Vec<f64>,
}

impl TrendWindows {
    fn compute(predictions: &[f64]) -> Self {
        let mut windows: Vec<Vec<f64>> = [3usize, 5, 8, 13]
            .iter()
            .map(|&w| {
                let trend = rolling_mean(predictions, w, (w / 2).max(2));
                let fill = mean(&trend);
                sanitize(&trend, if fill.is_finite() { fill } else { NEUTRAL_PREDICTION })
            })
            .collect();
        reconcile_all(&mut windows, Alignment::Trailing, ReconcileMode::TruncateToShortest);

        let super_long = windows.pop().unwrap_or_default();
        let long = windows.pop().unwrap_or_default();
        let medium = windows.pop().unwrap_or_default();
        let short = windows.pop().unwrap_or_default();
        Self {
            short,
            medium,
            long,
            super_long,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalGenerator {
    max_position_size: f64,
}

impl SignalGenerator {
    pub fn new(max_position_size: f64) -> Self {
        let max_position_size = if max_position_size.is_finite() {
            clip(max_position_size, 0.0, 1.0)
        } else {
            0.0
        };
        Self { max_position_size }
    }

    pub fn max_position_size(&self) -> f64 {
        self.max_position_size
    }

    /// Generate one signal per prediction. Never fails: a numerical
    /// breakdown yields an all-zero series of the input length.
    pub fn generate(&self, predictions: &[f64], regime: MarketRegime) -> Vec<SignalRecord> {
        let n = predictions.len();
        let (values, quality) = match self.try_generate(predictions, regime) {
            Ok(out) => out,
            Err(failure) => {
                warn!(%failure, %regime, len = n, "signal generation degraded to flat");
                (vec![0.0; n], vec![0.0; n])
            }
        };

        let active = values.iter().filter(|v| **v != 0.0).count();
        debug!(%regime, len = n, active, "generated signals");

        values
            .into_iter()
            .zip(quality)
            .enumerate()
            .map(|(step, (value, quality))| SignalRecord {
                step,
                value,
                quality,
            })
            .collect()
    }

    fn try_generate(
        &self,
        predictions: &[f64],
        regime: MarketRegime,
    ) -> Result<(Vec<f64>, Vec<f64>), BacktestFailure> {
        let n = predictions.len();
        if n == 0 {
            return Ok((Vec::new(), Vec::new()));
        }

        let params = regime.parameters();
        let p: Vec<f64> = sanitize(predictions, NEUTRAL_PREDICTION)
            .into_iter()
            .map(|v| clip(v, 0.0, 1.0))
            .collect();

        let vol_ratio = volatility_ratio(&p);
        let position_scale = position_scale(&p, &vol_ratio, regime, &params);
        let trends = TrendWindows::compute(&p);
        if trends.short.len() != n {
            return Err(BacktestFailure::NumericDegenerate {
                reason: format!("trend windows cover {} of {} points", trends.short.len(), n),
            });
        }

        let (mut signal, quality) =
            directional_signals(&p, &vol_ratio, &position_scale, &trends, regime, &params);

        let last_ratio = vol_ratio.last().copied().unwrap_or(1.0);
        let active: Vec<f64> = quality.iter().copied().filter(|q| *q > 0.0).collect();
        let mean_quality = if active.is_empty() { 0.0 } else { mean(&active) };
        let scale = market_scale(regime, last_ratio, mean_quality);
        for s in signal.iter_mut() {
            *s = clip(*s * scale, -self.max_position_size, self.max_position_size);
        }

        apply_momentum_veto(&mut signal, &quality, &p, last_ratio, regime);

        if signal.iter().chain(&quality).any(|v| !v.is_finite()) {
            return Err(BacktestFailure::NumericDegenerate {
                reason: "non-finite signal value".into(),
            });
        }
        let signal = reconcile(&signal, n, Alignment::Leading, Fill::Value(0.0));
        let quality = reconcile(&quality, n, Alignment::Leading, Fill::Value(0.0));
        Ok((signal, quality))
    }
}

/// 20-period rolling std over the 50-period rolling mean of that std.
/// Undefined points are neutral (1.0).
fn volatility_ratio(p: &[f64]) -> Vec<f64> {
    let std20 = rolling_std(p, 20, 1);
    let baseline = rolling_mean(&std20, 50, 1);
    std20
        .iter()
        .zip(&baseline)
        .map(|(s, b)| {
            let r = if b.is_finite() && *b > 0.0 { s / b } else { f64::NAN };
            if r.is_finite() { r } else { 1.0 }
        })
        .collect()
}

/// First-stage position scale: volatility scaling times a regime factor that
/// rewards a confirmed 5/10/20 trend with persistent direction.
fn position_scale(
    p: &[f64],
    vol_ratio: &[f64],
    regime: MarketRegime,
    params: &RegimeParameters,
) -> Vec<f64> {
    let t5 = rolling_mean(p, 5, 1);
    let t10 = rolling_mean(p, 10, 1);
    let t20 = rolling_mean(p, 20, 1);

    let steps = diff(&t5);
    let agreement: Vec<f64> = (0..steps.len())
        .map(|i| {
            if i > 0 && sign(steps[i]) == sign(steps[i - 1]) {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    let persistence = rolling_mean(&agreement, 5, 1);

    (0..p.len())
        .map(|i| {
            let vr = vol_ratio[i];
            let vol_scale = clip(1.2 - (vr - 1.0), 0.3, 1.0);
            let base = if vr < params.vol_threshold {
                vol_scale
            } else {
                vol_scale * 0.3
            };

            let strong = t5[i] > t10[i]
                && t10[i] > t20[i]
                && (t10[i] - 0.5).abs() > params.trend_threshold;
            let trend_quality = if persistence[i] > 0.6 {
                clip(
                    0.4 * (t5[i] - 0.5).abs() + 0.3 * (t10[i] - 0.5).abs() + 0.3 * persistence[i],
                    0.0,
                    1.0,
                )
            } else {
                0.0
            };

            let factor = match regime {
                MarketRegime::Bullish if strong && trend_quality > 0.6 => 0.8,
                MarketRegime::Bullish => 0.5,
                MarketRegime::Bearish if strong && trend_quality > 0.7 => 0.7,
                MarketRegime::Bearish => 0.4,
                MarketRegime::Sideways if strong && trend_quality > 0.8 => 0.6,
                MarketRegime::Sideways => 0.3,
            };
            factor * base
        })
        .collect()
}

fn flag(cond: bool) -> f64 {
    if cond { 1.0 } else { 0.0 }
}

/// Distance of a smoothed prediction from neutral, as a fraction of four
/// trend thresholds.
fn conviction(x: f64, trend_threshold: f64) -> f64 {
    clip((x - NEUTRAL_PREDICTION).abs() / (4.0 * trend_threshold), 0.0, 1.0)
}

/// Change of the prediction over the last `MOMENTUM_HORIZON` steps; 0.0
/// until that much history exists.
fn short_horizon_momentum(p: &[f64]) -> Vec<f64> {
    let raw: Vec<f64> = p
        .windows(MOMENTUM_HORIZON + 1)
        .map(|w| w[MOMENTUM_HORIZON] - w[0])
        .collect();
    reconcile(&raw, p.len(), Alignment::Trailing, Fill::Value(0.0))
}

/// Entry conditions, quality scoring and the validity gate. Returns the
/// first-stage signed signal and the quality of each point.
fn directional_signals(
    p: &[f64],
    vol_ratio: &[f64],
    position_scale: &[f64],
    trends: &TrendWindows,
    regime: MarketRegime,
    params: &RegimeParameters,
) -> (Vec<f64>, Vec<f64>) {
    let n = p.len();
    let tt = params.trend_threshold;
    let gate = gate_thresholds(regime);
    let short_entry = 1.0 - params.short_threshold;

    let (s, m, l, sl) = (&trends.short, &trends.medium, &trends.long, &trends.super_long);
    let ds = diff(s);
    let dm = diff(m);

    let mut signal = vec![0.0; n];
    let mut quality = vec![0.0; n];

    for i in 0..n {
        let vr = vol_ratio[i];
        let strength = (m[i] - 0.5).abs();
        let aligned = sign(s[i] - 0.5) == sign(m[i] - 0.5)
            && sign(m[i] - 0.5) == sign(l[i] - 0.5)
            && strength > tt;
        let same_direction = sign(ds[i]) == sign(dm[i]);
        let persistent = same_direction && dm[i].abs() > tt;
        let confirmed = (s[i] - m[i]).abs() > tt
            && (m[i] - l[i]).abs() > 0.8 * tt
            && (l[i] - sl[i]).abs() > 0.6 * tt;

        let rising = s[i] > m[i] && m[i] > l[i] && l[i] > sl[i];
        let falling = s[i] < m[i] && m[i] < l[i] && l[i] < sl[i];

        let long = p[i] > params.long_threshold
            && vr < params.vol_threshold
            && aligned
            && persistent
            && confirmed
            && strength > 1.2 * tt
            && rising;
        let short = p[i] < short_entry
            && vr < 0.9 * params.vol_threshold
            && aligned
            && persistent
            && confirmed
            && strength > 1.5 * tt
            && falling;
        if !(long || short) {
            continue;
        }

        let trend_quality = clip(
            0.3 * conviction(s[i], tt)
                + 0.3 * conviction(m[i], tt)
                + 0.2 * conviction(l[i], tt)
                + 0.1 * conviction(sl[i], tt)
                + 0.1 * flag(same_direction),
            0.0,
            1.0,
        );
        let momentum_quality = clip(
            0.4 * clip(ds[i].abs() / tt, 0.0, 1.0)
                + 0.3 * clip(dm[i].abs() / tt, 0.0, 1.0)
                + 0.2 * flag(persistent)
                + 0.1 * flag((m[i] - l[i]).abs() > tt),
            0.0,
            1.0,
        );
        let volatility_quality = clip(0.6 * (1.5 - vr) + 0.4 * (1.0 - ds[i].abs()), 0.0, 1.0);
        // each term is implied by the entry conditions, so this is 1.0 here
        let persistence_score = 0.5 * flag(strength > 1.2 * tt)
            + 0.3 * flag(dm[i].abs() > tt)
            + 0.2 * flag(vr < params.vol_threshold);
        let consistency = 0.4 * flag((s[i] - m[i]).abs() < 0.1)
            + 0.3 * flag((m[i] - l[i]).abs() < 0.15)
            + 0.3 * flag((l[i] - sl[i]).abs() < 0.2);

        let valid = trend_quality > params.quality_threshold
            && momentum_quality > params.momentum_threshold
            && volatility_quality > gate.volatility_quality
            && persistence_score > gate.persistence
            && consistency > gate.consistency;
        if !valid {
            continue;
        }

        let q = clip(
            0.4 * trend_quality + 0.4 * momentum_quality + 0.2 * clip(2.0 - vr, 0.0, 1.0),
            0.0,
            1.0,
        );
        quality[i] = q;

        let (distance, direction) = if long {
            (
                (p[i] - params.long_threshold) / (1.0 - params.long_threshold),
                1.0,
            )
        } else {
            ((short_entry - p[i]) / short_entry, -1.0)
        };
        let confidence = clip(
            0.4 * distance + 0.4 * q + 0.2 * (1.0 - vr),
            params.min_position,
            1.0,
        );
        signal[i] =
            direction * confidence * position_scale[i] * params.max_position * (1.0 - 0.2 * vr);
    }

    (signal, quality)
}

/// Second-stage multiplier from the latest volatility ratio and the mean
/// quality of the scored points, followed by the market-condition adjustment.
fn market_scale(regime: MarketRegime, vol_ratio: f64, quality: f64) -> f64 {
    match regime {
        MarketRegime::Bullish => {
            let vol = if vol_ratio > 1.3 {
                0.3
            } else if vol_ratio > 1.1 {
                0.5
            } else if vol_ratio > 0.9 {
                0.8
            } else {
                1.0
            };
            let q = if quality < 0.4 {
                0.3
            } else if quality < 0.6 {
                0.6
            } else if quality < 0.8 {
                0.9
            } else if quality > 0.9 {
                1.2
            } else {
                1.0
            };
            let market = if quality > 0.8 { 1.2 } else { 1.0 };
            vol * q * market
        }
        MarketRegime::Bearish => {
            let vol = if vol_ratio > 1.2 {
                0.2
            } else if vol_ratio > 1.0 {
                0.4
            } else if vol_ratio > 0.8 {
                0.6
            } else {
                0.8
            };
            let q = if quality < 0.5 {
                0.2
            } else if quality < 0.7 {
                0.4
            } else if quality < 0.85 {
                0.6
            } else if quality > 0.95 {
                0.8
            } else {
                1.0
            };
            let market = if quality > 0.8 { 0.8 } else { 0.6 };
            vol * q * market
        }
        MarketRegime::Sideways => {
            let vol = if vol_ratio > 1.1 {
                0.1
            } else if vol_ratio > 0.9 {
                0.3
            } else if vol_ratio > 0.8 {
                0.5
            } else {
                0.6
            };
            let q = if quality < 0.6 {
                0.1
            } else if quality < 0.8 {
                0.3
            } else if quality < 0.9 {
                0.5
            } else if quality > 0.95 {
                0.7
            } else {
                1.0
            };
            let market = if quality > 0.8 { 0.9 } else { 0.7 };
            vol * q * market
        }
    }
}

/// Zero out signals lacking short-horizon momentum support. Runs last.
fn apply_momentum_veto(
    signal: &mut [f64],
    quality: &[f64],
    p: &[f64],
    vol_ratio: f64,
    regime: MarketRegime,
) {
    let n = p.len();
    let veto = veto_thresholds(regime);

    let momentum = short_horizon_momentum(p);

    let spread = population_std(&momentum);
    let strength: Vec<f64> = momentum
        .iter()
        .map(|m| if spread > 1e-12 { m.abs() / spread } else { 0.0 })
        .collect();

    let agreement: Vec<f64> = momentum
        .windows(2)
        .map(|w| flag(sign(w[0]) == sign(w[1])))
        .collect();
    let agreement = reconcile(&agreement, n, Alignment::Trailing, Fill::Value(0.0));
    let persistence = sanitize(&rolling_mean(&agreement, 3, 3), 0.0);

    for i in 0..n {
        let s = signal[i];
        let weak = momentum[i].abs() < 0.001;
        let opposes_long = s > 0.0 && momentum[i] < -0.002 && strength[i] > veto.momentum;
        let opposes_short = s < 0.0 && momentum[i] > 0.002 && strength[i] > veto.momentum;
        let low_quality = quality[i] < veto.quality;
        let low_persistence = persistence[i] < veto.persistence;
        let turbulent = vol_ratio > veto.volatility && quality[i] < 0.8;

        if weak || opposes_long || opposes_short || low_quality || low_persistence || turbulent {
            signal[i] = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn wave(len: usize, amplitude: f64, period: f64) -> Vec<f64> {
        (0..len)
            .map(|i| 0.5 + amplitude * (2.0 * PI * i as f64 / period).sin())
            .collect()
    }

    fn values(records: &[SignalRecord]) -> Vec<f64> {
        records.iter().map(|r| r.value).collect()
    }

    #[test]
    fn empty_predictions_give_empty_signals() {
        let generator = SignalGenerator::new(0.2);
        assert!(generator.generate(&[], MarketRegime::Bullish).is_empty());
    }

    #[test]
    fn flat_predictions_stay_flat() {
        let generator = SignalGenerator::new(0.2);
        for regime in MarketRegime::ALL {
            let records = generator.generate(&[0.5; 60], regime);
            assert_eq!(records.len(), 60);
            assert!(records.iter().all(|r| r.value == 0.0), "{regime}");
        }
    }

    #[test]
    fn short_input_keeps_length() {
        let generator = SignalGenerator::new(0.2);
        let records = generator.generate(&[0.9, 0.1, 0.95], MarketRegime::Bearish);
        assert_eq!(records.len(), 3);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.step, i);
        }
    }

    #[test]
    fn non_finite_predictions_are_neutralised() {
        let generator = SignalGenerator::new(0.2);
        let mut preds = wave(80, 0.45, 24.0);
        preds[10] = f64::NAN;
        preds[20] = f64::INFINITY;
        let records = generator.generate(&preds, MarketRegime::Bullish);
        assert_eq!(records.len(), 80);
        assert!(records.iter().all(|r| r.value.is_finite() && r.quality.is_finite()));
    }

    #[test]
    fn rising_leg_produces_long_signals() {
        let generator = SignalGenerator::new(0.2);
        let records = generator.generate(&wave(128, 0.48, 30.0), MarketRegime::Bullish);
        let threshold = MarketRegime::Bullish.parameters().quality_threshold;

        // every rising leg after warm-up holds a four-step long run
        for start in [64, 94, 124] {
            for r in &records[start..start + 4] {
                assert!(r.value > 0.0, "step {} value {}", r.step, r.value);
                assert!(r.quality > threshold);
            }
        }
        for r in &records[60..] {
            if r.value > 0.0 {
                assert!((4..8).contains(&(r.step % 30)), "long at step {}", r.step);
            }
        }
    }

    #[test]
    fn falling_leg_produces_short_signals() {
        let generator = SignalGenerator::new(0.2);
        let records = generator.generate(&wave(97, 0.48, 30.0), MarketRegime::Bullish);
        assert!(records[79..82].iter().all(|r| r.value < 0.0));
    }

    #[test]
    fn active_signals_meet_quality_threshold() {
        let generator = SignalGenerator::new(0.2);
        for regime in MarketRegime::ALL {
            let threshold = veto_thresholds(regime).quality;
            for r in generator.generate(&wave(160, 0.45, 24.0), regime) {
                if r.value != 0.0 {
                    assert!(r.quality >= threshold);
                }
            }
        }
    }

    #[test]
    fn signals_respect_position_cap() {
        let generator = SignalGenerator::new(0.01);
        let records = generator.generate(&wave(97, 0.48, 30.0), MarketRegime::Bullish);
        assert!(values(&records).iter().all(|v| v.abs() <= 0.01));
        assert!(values(&records).iter().any(|v| *v != 0.0));
    }

    #[test]
    fn generate_is_deterministic() {
        let generator = SignalGenerator::new(0.2);
        let preds = wave(120, 0.47, 20.0);
        let a = generator.generate(&preds, MarketRegime::Sideways);
        let b = generator.generate(&preds, MarketRegime::Sideways);
        assert_eq!(a, b);
    }

    #[test]
    fn veto_uses_its_own_quality_floor() {
        let p: Vec<f64> = (0..20).map(|i| 0.3 + 0.02 * i as f64).collect();
        let mut quality = vec![0.0; 20];

        quality[15] = 0.68;
        let mut signal = vec![0.0; 20];
        signal[15] = 0.05;
        apply_momentum_veto(&mut signal, &quality, &p, 1.0, MarketRegime::Sideways);
        assert_eq!(signal[15], 0.05);

        quality[15] = 0.6;
        apply_momentum_veto(&mut signal, &quality, &p, 1.0, MarketRegime::Sideways);
        assert_eq!(signal[15], 0.0);
    }

    #[test]
    fn conviction_saturates_at_four_thresholds() {
        assert_eq!(conviction(0.5, 0.05), 0.0);
        assert!((conviction(0.6, 0.05) - 0.5).abs() < 1e-12);
        assert!((conviction(0.3, 0.05) - 1.0).abs() < 1e-12);
        assert_eq!(conviction(1.0, 0.05), 1.0);
    }

    #[test]
    fn short_horizon_momentum_is_five_step_change() {
        let p = [0.5, 0.52, 0.51, 0.55, 0.6, 0.62, 0.7, 0.65];
        let m = short_horizon_momentum(&p);
        assert_eq!(m.len(), 8);
        assert!(m[..5].iter().all(|v| *v == 0.0));
        assert!((m[5] - 0.12).abs() < 1e-12);
        assert!((m[6] - 0.18).abs() < 1e-12);
        assert!((m[7] - 0.14).abs() < 1e-12);
    }

    #[test]
    fn volatility_ratio_is_neutral_without_history() {
        let ratio = volatility_ratio(&[0.5, 0.5, 0.5]);
        assert_eq!(ratio, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn bearish_market_scale_is_more_conservative() {
        for vr in [0.7, 0.95, 1.05, 1.25, 1.5] {
            for q in [0.3, 0.65, 0.85, 0.97] {
                let bull = market_scale(MarketRegime::Bullish, vr, q);
                assert!(market_scale(MarketRegime::Bearish, vr, q) <= bull);
                assert!(market_scale(MarketRegime::Sideways, vr, q) <= bull);
            }
        }
    }
}
