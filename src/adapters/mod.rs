//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod momentum_model;
pub mod technical_indicators;
pub mod trade_simulator;
pub mod window_features;
