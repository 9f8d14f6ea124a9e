//! Configuration validation.
//!
//! Validates every config section before a run, so a bad key fails fast with
//! the section and key named instead of surfacing mid-backtest.

use crate::domain::error::RegimeTraderError;
use crate::domain::portfolio::RebalanceFrequency;
use crate::domain::regime::MarketRegime;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub const MODEL_KINDS: &[&str] = &["momentum"];

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    match config.get_string("data", "directory") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(RegimeTraderError::ConfigMissing {
            section: "data".to_string(),
            key: "directory".to_string(),
        }),
    }
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    validate_initial_capital(config)?;
    for key in ["transaction_cost", "stop_loss", "take_profit", "volatility_target"] {
        validate_non_negative(config, "backtest", key)?;
    }
    validate_position_limits(config)?;
    validate_risk_free_rate(config)?;
    for (key, default) in [
        ("max_trades_per_day", 1),
        ("lookback", 10),
        ("sequence_length", 10),
        ("prediction_window", 5),
    ] {
        validate_at_least(config, "backtest", key, default, 1)?;
    }
    validate_regime(config)?;
    validate_dates(config)?;
    Ok(())
}

pub fn validate_portfolio_config(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    validate_fraction(config, "portfolio", "max_portfolio_size", 0.8)?;
    validate_fraction(config, "portfolio", "max_position_size", 0.2)?;

    let threshold = config.get_double("portfolio", "correlation_threshold", 0.7);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(RegimeTraderError::ConfigInvalid {
            section: "portfolio".to_string(),
            key: "correlation_threshold".to_string(),
            reason: "correlation_threshold must be between 0 and 1".to_string(),
        });
    }

    if let Some(freq) = config.get_string("portfolio", "rebalance_frequency") {
        freq.parse::<RebalanceFrequency>()
            .map_err(|reason| RegimeTraderError::ConfigInvalid {
                section: "portfolio".to_string(),
                key: "rebalance_frequency".to_string(),
                reason,
            })?;
    }

    validate_at_least(config, "portfolio", "weight_lookback", 21, 2)
}

pub fn validate_model_config(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    let kind = config
        .get_string("model", "kind")
        .unwrap_or_else(|| "momentum".to_string());
    if !MODEL_KINDS.contains(&kind.trim().to_ascii_lowercase().as_str()) {
        return Err(RegimeTraderError::UnsupportedModel {
            reason: format!("unknown model kind '{}'", kind.trim()),
        });
    }

    let sensitivity = config.get_double("model", "sensitivity", 8.0);
    if !sensitivity.is_finite() || sensitivity <= 0.0 {
        return Err(RegimeTraderError::ConfigInvalid {
            section: "model".to_string(),
            key: "sensitivity".to_string(),
            reason: "sensitivity must be positive".to_string(),
        });
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    let value = config.get_double("backtest", "initial_capital", 100_000.0);
    if value <= 0.0 {
        return Err(RegimeTraderError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "initial_capital".to_string(),
            reason: "initial_capital must be positive".to_string(),
        });
    }
    Ok(())
}

fn validate_non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<(), RegimeTraderError> {
    let value = config.get_double(section, key, 0.0);
    if value < 0.0 {
        return Err(RegimeTraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{key} must be non-negative"),
        });
    }
    Ok(())
}

fn validate_fraction(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<(), RegimeTraderError> {
    let value = config.get_double(section, key, default);
    if value <= 0.0 || value > 1.0 {
        return Err(RegimeTraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{key} must be in (0, 1]"),
        });
    }
    Ok(())
}

fn validate_at_least(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    minimum: i64,
) -> Result<(), RegimeTraderError> {
    if config.get_int(section, key, default) < minimum {
        return Err(RegimeTraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{key} must be at least {minimum}"),
        });
    }
    Ok(())
}

fn validate_position_limits(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    validate_fraction(config, "backtest", "max_position_size", 0.2)?;
    let max = config.get_double("backtest", "max_position_size", 0.2);
    let min = config.get_double("backtest", "min_position_size", 0.05);
    if min < 0.0 || min > max {
        return Err(RegimeTraderError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "min_position_size".to_string(),
            reason: "min_position_size must be between 0 and max_position_size".to_string(),
        });
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    let value = config.get_double("backtest", "risk_free_rate", 0.02);
    if !(0.0..1.0).contains(&value) {
        return Err(RegimeTraderError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "risk_free_rate".to_string(),
            reason: "risk_free_rate must be between 0 and 1".to_string(),
        });
    }
    Ok(())
}

fn validate_regime(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    match config.get_string("backtest", "regime") {
        Some(s) if !s.trim().is_empty() => s
            .parse::<MarketRegime>()
            .map(|_| ())
            .map_err(|e| RegimeTraderError::ConfigInvalid {
                section: "backtest".to_string(),
                key: "regime".to_string(),
                reason: e.to_string(),
            }),
        _ => Ok(()),
    }
}

/// Dates are optional; when both are present they must be ordered.
fn validate_dates(config: &dyn ConfigPort) -> Result<(), RegimeTraderError> {
    let start = parse_optional_date(config, "start_date")?;
    let end = parse_optional_date(config, "end_date")?;

    if matches!((start, end), (Some(start), Some(end)) if start >= end) {
        return Err(RegimeTraderError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "start_date".to_string(),
            reason: "start_date must be before end_date".to_string(),
        });
    }
    Ok(())
}

pub fn parse_optional_date(
    config: &dyn ConfigPort,
    field: &str,
) -> Result<Option<NaiveDate>, RegimeTraderError> {
    match config.get_string("backtest", field) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| RegimeTraderError::ConfigInvalid {
                section: "backtest".to_string(),
                key: field.to_string(),
                reason: format!("invalid {} format, expected YYYY-MM-DD", field),
            }),
    }
}
