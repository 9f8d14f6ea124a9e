//! Market regime classification and per-regime signal parameters.

use crate::domain::indicator::calculate_rsi;
use crate::domain::ohlcv::{closes, OhlcvBar};
use crate::domain::series::{clip, mean, pct_change, rolling_mean, rolling_std};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

const NEUTRAL_TREND: f64 = 0.0;
const NEUTRAL_VOLATILITY: f64 = 0.2;
const NEUTRAL_MOMENTUM: f64 = 0.0;
const NEUTRAL_RSI: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketRegime {
    Bullish,
    Bearish,
    Sideways,
}

/// Signal thresholds and position limits for one regime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeParameters {
    pub long_threshold: f64,
    pub short_threshold: f64,
    pub min_position: f64,
    pub max_position: f64,
    pub trend_threshold: f64,
    pub vol_threshold: f64,
    pub quality_threshold: f64,
    pub momentum_threshold: f64,
}

const BULLISH: RegimeParameters = RegimeParameters {
    long_threshold: 0.70,
    short_threshold: 0.85,
    min_position: 0.05,
    max_position: 0.15,
    trend_threshold: 0.05,
    vol_threshold: 1.2,
    quality_threshold: 0.7,
    momentum_threshold: 0.6,
};

const BEARISH: RegimeParameters = RegimeParameters {
    long_threshold: 0.85,
    short_threshold: 0.70,
    min_position: 0.04,
    max_position: 0.12,
    trend_threshold: 0.06,
    vol_threshold: 1.15,
    quality_threshold: 0.75,
    momentum_threshold: 0.65,
};

const SIDEWAYS: RegimeParameters = RegimeParameters {
    long_threshold: 0.80,
    short_threshold: 0.80,
    min_position: 0.03,
    max_position: 0.08,
    trend_threshold: 0.07,
    vol_threshold: 1.1,
    quality_threshold: 0.8,
    momentum_threshold: 0.7,
};

impl MarketRegime {
    pub const ALL: [MarketRegime; 3] = [
        MarketRegime::Bullish,
        MarketRegime::Bearish,
        MarketRegime::Sideways,
    ];

    pub fn parameters(&self) -> RegimeParameters {
        match self {
            MarketRegime::Bullish => BULLISH,
            MarketRegime::Bearish => BEARISH,
            MarketRegime::Sideways => SIDEWAYS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Bullish => "bullish",
            MarketRegime::Bearish => "bearish",
            MarketRegime::Sideways => "sideways",
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRegime(pub String);

impl fmt::Display for UnknownRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown regime '{}' (expected bullish, bearish or sideways)",
            self.0
        )
    }
}

impl std::error::Error for UnknownRegime {}

impl FromStr for MarketRegime {
    type Err = UnknownRegime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" | "bull" => Ok(MarketRegime::Bullish),
            "bearish" | "bear" => Ok(MarketRegime::Bearish),
            "sideways" | "neutral" => Ok(MarketRegime::Sideways),
            _ => Err(UnknownRegime(s.to_string())),
        }
    }
}

/// Statistics behind a classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeAssessment {
    pub regime: MarketRegime,
    pub trend: f64,
    pub volatility: f64,
    pub momentum: f64,
    pub rsi_avg: f64,
    pub trend_quality: f64,
    pub momentum_quality: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegimeClassifier;

impl RegimeClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, bars: &[OhlcvBar]) -> MarketRegime {
        self.assess(bars).regime
    }

    pub fn assess(&self, bars: &[OhlcvBar]) -> RegimeAssessment {
        let prices = closes(bars);
        let returns = pct_change(&prices);

        let sma20 = rolling_mean(&prices, 20, 20);
        let sma50 = rolling_mean(&prices, 50, 50);
        let ratio: Vec<f64> = sma20
            .iter()
            .zip(&sma50)
            .map(|(s, l)| s / l - 1.0)
            .collect();

        let volatility: Vec<f64> = rolling_std(&returns, 21, 21)
            .into_iter()
            .map(|v| v * TRADING_DAYS_PER_YEAR.sqrt())
            .collect();
        let momentum = rolling_mean(&returns, 10, 10);

        let rsi: Vec<f64> = calculate_rsi(bars, 14)
            .primary_values()
            .into_iter()
            .filter(|v| v.is_finite())
            .collect();
        let recent_rsi = &rsi[rsi.len().saturating_sub(20)..];

        let trend = neutral_or(mean(&ratio), NEUTRAL_TREND, -0.1, 0.1);
        let volatility = neutral_or(mean(&volatility), NEUTRAL_VOLATILITY, 0.05, 0.5);
        let momentum = neutral_or(mean(&momentum), NEUTRAL_MOMENTUM, -0.05, 0.05);
        let rsi_avg = neutral_or(mean(recent_rsi), NEUTRAL_RSI, 0.0, 100.0);

        let trend_quality = 0.4 * (1.0 - trend.abs() / 0.1)
            + 0.3 * (1.0 - volatility / 0.5)
            + 0.3 * (1.0 - momentum.abs() / 0.05);
        let momentum_quality = 1.0 - (rsi_avg - 50.0).abs() / 50.0;

        let regime = decide(trend, volatility, momentum, rsi_avg, trend_quality, momentum_quality);

        debug!(
            bars = bars.len(),
            trend,
            volatility,
            momentum,
            rsi_avg,
            trend_quality,
            momentum_quality,
            %regime,
            "classified market regime"
        );

        RegimeAssessment {
            regime,
            trend,
            volatility,
            momentum,
            rsi_avg,
            trend_quality,
            momentum_quality,
        }
    }
}

fn neutral_or(value: f64, neutral: f64, lo: f64, hi: f64) -> f64 {
    if value.is_finite() {
        clip(value, lo, hi)
    } else {
        neutral
    }
}

fn decide(
    trend: f64,
    volatility: f64,
    momentum: f64,
    rsi_avg: f64,
    trend_quality: f64,
    momentum_quality: f64,
) -> MarketRegime {
    if trend > 0.002
        && volatility < 0.25
        && momentum > 0.0003
        && rsi_avg > 45.0
        && rsi_avg < 65.0
        && trend_quality > 0.5
        && momentum_quality > 0.4
    {
        return MarketRegime::Bullish;
    }

    if trend < -0.002
        && volatility > 0.15
        && (momentum < -0.0003 || rsi_avg < 40.0 || trend_quality < 0.6)
    {
        return MarketRegime::Bearish;
    }

    if trend.abs() < 0.002 && volatility < 0.20 {
        return MarketRegime::Sideways;
    }

    let bearish_votes = [
        trend < 0.0,
        volatility > 0.18,
        momentum < 0.0,
        rsi_avg < 45.0,
    ]
    .iter()
    .filter(|&&v| v)
    .count();

    if bearish_votes >= 3 {
        MarketRegime::Bearish
    } else {
        MarketRegime::Sideways
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn make_bars(prices: &[f64]) -> Vec<OhlcvBar> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| OhlcvBar {
                symbol: "TEST".into(),
                date: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000,
            })
            .collect()
    }

    #[test]
    fn parameters_are_ordered() {
        for regime in MarketRegime::ALL {
            let p = regime.parameters();
            assert!(p.min_position < p.max_position, "{regime}");
            assert!(p.trend_threshold > 0.0 && p.trend_threshold < 0.1);
            for v in [p.long_threshold, p.short_threshold, p.quality_threshold, p.momentum_threshold] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn parse_and_display_round_trip() {
        for regime in MarketRegime::ALL {
            assert_eq!(regime.to_string().parse::<MarketRegime>(), Ok(regime));
        }
        assert_eq!("BULL".parse::<MarketRegime>(), Ok(MarketRegime::Bullish));
        assert!("crab".parse::<MarketRegime>().is_err());
    }

    #[test]
    fn empty_history_is_sideways_with_neutral_stats() {
        let assessment = RegimeClassifier::new().assess(&[]);
        assert_eq!(assessment.regime, MarketRegime::Sideways);
        assert_eq!(assessment.trend, NEUTRAL_TREND);
        assert_eq!(assessment.volatility, NEUTRAL_VOLATILITY);
        assert_eq!(assessment.momentum, NEUTRAL_MOMENTUM);
        assert_eq!(assessment.rsi_avg, NEUTRAL_RSI);
    }

    #[test]
    fn short_history_does_not_fail() {
        let bars = make_bars(&[100.0, 101.0, 99.0, 102.0]);
        let regime = RegimeClassifier::new().classify(&bars);
        assert!(MarketRegime::ALL.contains(&regime));
    }

    #[test]
    fn steady_uptrend_with_balanced_rsi_is_bullish() {
        // +1.0% / -0.8% alternating keeps RSI in the mid-50s
        let mut prices = vec![100.0];
        for i in 1..200 {
            let r = if i % 2 == 0 { -0.008 } else { 0.01 };
            prices.push(prices[i - 1] * (1.0 + r));
        }
        let assessment = RegimeClassifier::new().assess(&make_bars(&prices));
        assert!(assessment.trend > 0.002);
        assert_eq!(assessment.regime, MarketRegime::Bullish);
    }

    #[test]
    fn volatile_decline_is_bearish() {
        let mut prices = vec![100.0];
        for i in 1..200 {
            let r = if i % 2 == 0 { 0.02 } else { -0.03 };
            prices.push(prices[i - 1] * (1.0 + r));
        }
        let assessment = RegimeClassifier::new().assess(&make_bars(&prices));
        assert!(assessment.trend < -0.002);
        assert!(assessment.volatility > 0.15);
        assert_eq!(assessment.regime, MarketRegime::Bearish);
    }

    #[test]
    fn flat_prices_are_sideways() {
        let prices: Vec<f64> = (0..120)
            .map(|i| 100.0 + if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();
        assert_eq!(
            RegimeClassifier::new().classify(&make_bars(&prices)),
            MarketRegime::Sideways
        );
    }

    #[test]
    fn fallback_votes_decide_between_bearish_and_sideways() {
        assert_eq!(decide(-0.001, 0.3, -0.001, 40.0, 0.2, 0.8), MarketRegime::Bearish);
        assert_eq!(decide(0.01, 0.3, 0.001, 70.0, 0.2, 0.6), MarketRegime::Sideways);
    }
}
