//! Port traits for configuration, data and the backtest collaborators.

pub mod config_port;
pub mod data_port;
pub mod feature_port;
pub mod indicator_port;
pub mod model_port;
pub mod simulator_port;
