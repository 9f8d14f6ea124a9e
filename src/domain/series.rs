//! Series reconciliation and rolling statistics.
//!
//! Every place that has to make two series agree in length, or scrub NaN/Inf
//! out of an intermediate result, goes through [`reconcile`], [`reconcile_all`]
//! or [`sanitize`]. The rolling helpers follow pandas semantics: non-finite
//! values are skipped, and a window yields `NaN` until it holds at least
//! `min_periods` finite observations.

use tracing::warn;

/// Which end of a series is kept when truncating, and which end is padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Keep the head; truncate or pad at the end.
    Leading,
    /// Keep the most recent values; truncate or pad at the front.
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    /// Repeat the nearest existing value. An empty series pads with 0.0.
    Edge,
    Value(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    TruncateToShortest,
    PadToLongest,
}

/// Truncate or pad `series` to exactly `target_len`.
pub fn reconcile(series: &[f64], target_len: usize, alignment: Alignment, fill: Fill) -> Vec<f64> {
    let len = series.len();
    if len == target_len {
        return series.to_vec();
    }
    warn!(from = len, to = target_len, ?alignment, "reconciling series length");

    if len > target_len {
        return match alignment {
            Alignment::Leading => series[..target_len].to_vec(),
            Alignment::Trailing => series[len - target_len..].to_vec(),
        };
    }

    let missing = target_len - len;
    match alignment {
        Alignment::Leading => {
            let pad = match fill {
                Fill::Edge => series.last().copied().unwrap_or(0.0),
                Fill::Value(v) => v,
            };
            let mut out = series.to_vec();
            out.resize(target_len, pad);
            out
        }
        Alignment::Trailing => {
            let pad = match fill {
                Fill::Edge => series.first().copied().unwrap_or(0.0),
                Fill::Value(v) => v,
            };
            let mut out = vec![pad; missing];
            out.extend_from_slice(series);
            out
        }
    }
}

/// Bring every series to a common length, edge-filling when padding.
/// Returns the common length.
pub fn reconcile_all(series: &mut [Vec<f64>], alignment: Alignment, mode: ReconcileMode) -> usize {
    let lengths = series.iter().map(Vec::len);
    let target = match mode {
        ReconcileMode::TruncateToShortest => lengths.min().unwrap_or(0),
        ReconcileMode::PadToLongest => lengths.max().unwrap_or(0),
    };
    for s in series.iter_mut() {
        if s.len() != target {
            *s = reconcile(s, target, alignment, Fill::Edge);
        }
    }
    target
}

/// Replace every non-finite value with `fallback`.
pub fn sanitize(series: &[f64], fallback: f64) -> Vec<f64> {
    series
        .iter()
        .map(|&v| if v.is_finite() { v } else { fallback })
        .collect()
}

pub fn clip(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

/// Sign as -1, 0 or 1. `NaN` maps to 0.
pub fn sign(value: f64) -> i8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

fn window_values(values: &[f64], end: usize, window: usize) -> impl Iterator<Item = f64> + '_ {
    let start = (end + 1).saturating_sub(window);
    values[start..=end].iter().copied().filter(|v| v.is_finite())
}

pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let min_periods = min_periods.max(1);
    (0..values.len())
        .map(|i| {
            let (sum, count) = window_values(values, i, window.max(1))
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count >= min_periods {
                sum / count as f64
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Rolling sample standard deviation (ddof = 1). A window with fewer than two
/// finite observations is `NaN`.
pub fn rolling_std(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let min_periods = min_periods.max(2);
    (0..values.len())
        .map(|i| {
            let obs: Vec<f64> = window_values(values, i, window.max(1)).collect();
            if obs.len() >= min_periods {
                sample_std(&obs)
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// First difference; the first element is 0.0.
pub fn diff(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(0.0);
    for w in values.windows(2) {
        out.push(w[1] - w[0]);
    }
    out
}

/// Percentage change; the first element is `NaN`, as is any change from a zero base.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(f64::NAN);
    for w in values.windows(2) {
        if w[0] == 0.0 {
            out.push(f64::NAN);
        } else {
            out.push(w[1] / w[0] - 1.0);
        }
    }
    out
}

/// Mean of the finite values, `NaN` when there are none.
pub fn mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

fn std_with_ddof(values: &[f64], ddof: usize) -> f64 {
    let obs: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if obs.len() <= ddof {
        return f64::NAN;
    }
    let m = obs.iter().sum::<f64>() / obs.len() as f64;
    let ss: f64 = obs.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (obs.len() - ddof) as f64).sqrt()
}

pub fn sample_std(values: &[f64]) -> f64 {
    std_with_ddof(values, 1)
}

pub fn population_std(values: &[f64]) -> f64 {
    std_with_ddof(values, 0)
}

/// Pearson correlation over positions where both series are finite.
/// `None` when fewer than two such pairs exist or either side is constant.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in &pairs {
        cov += (x - mx) * (y - my);
        vx += (x - mx) * (x - mx);
        vy += (y - my) * (y - my);
    }
    let denom = (vx * vy).sqrt();
    if denom < 1e-15 {
        return None;
    }
    let r = cov / denom;
    r.is_finite().then(|| clip(r, -1.0, 1.0))
}
