//! regimetrader: regime-aware signal generation and portfolio backtesting.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], and the command line in [`cli`].
//!
//! A backtest runs one symbol through [`domain::backtest::BacktestOrchestrator`]:
//! indicators, regime classification, features, model predictions, signal
//! generation, alignment and trade simulation. Failures inside that pipeline
//! come back as data in a [`domain::backtest::BacktestResult`]; configuration
//! mistakes are [`domain::error::RegimeTraderError`]s.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
