//! Core domain types and logic.

pub mod ohlcv;
pub mod series;
pub mod indicator;
pub mod frame;
pub mod features;
pub mod returns;
pub mod regime;
pub mod signal;
pub mod backtest;
pub mod portfolio;
pub mod metrics;
pub mod config_validation;
pub mod error;
