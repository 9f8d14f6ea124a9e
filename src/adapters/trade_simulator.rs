//! Default trade simulator: signals become target positions, held
//! close-to-close, with flat transaction costs and stop/take-profit exits.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::CollaboratorError;
use crate::domain::metrics::{
    annualized_volatility, cumulative_returns, drawdowns, sharpe_ratio, TRADING_DAYS_PER_YEAR,
};
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::returns::{strategy_returns, ResultTable, ReturnRow};
use crate::domain::series::{clip, mean, sample_std};
use crate::ports::simulator_port::TradeSimulator;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

const VOLATILITY_WINDOW: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub initial_capital: f64,
    pub transaction_cost: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub max_position_size: f64,
    pub min_position_size: f64,
    pub max_trades_per_day: usize,
    pub volatility_scaling: bool,
    pub volatility_target: f64,
    pub risk_free_rate: f64,
}

impl From<&BacktestConfig> for SimulatorConfig {
    fn from(config: &BacktestConfig) -> Self {
        Self {
            initial_capital: config.initial_capital,
            transaction_cost: config.transaction_cost,
            stop_loss: config.stop_loss,
            take_profit: config.take_profit,
            max_position_size: config.max_position_size,
            min_position_size: config.min_position_size,
            max_trades_per_day: config.max_trades_per_day,
            volatility_scaling: config.volatility_scaling,
            volatility_target: config.volatility_target,
            risk_free_rate: config.risk_free_rate,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::from(&BacktestConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalTradeSimulator {
    config: SimulatorConfig,
}

/// Open exposure tracked for stop-loss and take-profit checks.
#[derive(Debug, Clone, Copy)]
struct Entry {
    price: f64,
    direction: f64,
}

impl SignalTradeSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Signal clipped to the position limit, scaled toward the volatility
    /// target, and zeroed below the minimum size.
    fn target_position(&self, signal: f64, market_returns: &[f64]) -> f64 {
        let cfg = &self.config;
        let signal = if signal.is_finite() { signal } else { 0.0 };
        let mut target = clip(signal, -cfg.max_position_size, cfg.max_position_size);

        if cfg.volatility_scaling {
            let start = market_returns.len().saturating_sub(VOLATILITY_WINDOW);
            let realized = sample_std(&market_returns[start..]) * TRADING_DAYS_PER_YEAR.sqrt();
            if realized.is_finite() && realized > 0.0 {
                target = clip(
                    target * cfg.volatility_target / realized,
                    -cfg.max_position_size,
                    cfg.max_position_size,
                );
            }
        }

        if target.abs() < cfg.min_position_size {
            0.0
        } else {
            target
        }
    }

    fn exit_triggered(&self, entry: Entry, close: f64) -> bool {
        let mv = (close / entry.price - 1.0) * entry.direction;
        (self.config.stop_loss > 0.0 && mv <= -self.config.stop_loss)
            || (self.config.take_profit > 0.0 && mv >= self.config.take_profit)
    }
}

impl TradeSimulator for SignalTradeSimulator {
    fn calculate_returns(
        &self,
        bars: &[OhlcvBar],
        signals: &[f64],
    ) -> Result<ResultTable, CollaboratorError> {
        if bars.len() != signals.len() {
            return Err(CollaboratorError::Simulation {
                reason: format!("{} signals for {} bars", signals.len(), bars.len()),
            });
        }

        let mut table = Vec::with_capacity(bars.len());
        let mut market_returns = Vec::with_capacity(bars.len());
        let mut equity = self.config.initial_capital;
        let mut position = 0.0_f64;
        let mut entry: Option<Entry> = None;
        // direction stopped out of; re-entry waits for the signal to change
        let mut blocked: Option<f64> = None;
        let mut trade_day: Option<(NaiveDate, usize)> = None;

        for (i, (bar, &signal)) in bars.iter().zip(signals).enumerate() {
            let market_return = match i {
                0 => 0.0,
                _ => bar.return_from(bars[i - 1].close),
            };
            let market_return = if market_return.is_finite() {
                market_return
            } else {
                0.0
            };
            market_returns.push(market_return);
            let held = position;
            let gross = held * market_return;

            if let Some(open) = entry.filter(|open| self.exit_triggered(*open, bar.close)) {
                blocked = Some(open.direction);
            }

            let mut target = self.target_position(signal, &market_returns);
            if let Some(direction) = blocked {
                if target != 0.0 && target.signum() == direction {
                    target = 0.0;
                } else {
                    blocked = None;
                }
            }

            let trades_today = match trade_day {
                Some((date, count)) if date == bar.date => count,
                _ => 0,
            };
            let mut cost = 0.0;
            let trade = target != held && trades_today < self.config.max_trades_per_day;
            if trade {
                cost = (target - held).abs() * self.config.transaction_cost;
                trade_day = Some((bar.date, trades_today + 1));
                entry = if target == 0.0 {
                    None
                } else if held == 0.0 || held.signum() != target.signum() {
                    Some(Entry {
                        price: bar.close,
                        direction: target.signum(),
                    })
                } else {
                    entry
                };
                position = target;
            }

            let strategy_return = gross - cost;
            equity *= 1.0 + strategy_return;
            table.push(ReturnRow {
                date: bar.date,
                close: bar.close,
                signal,
                position: held,
                market_return,
                strategy_return,
                cost,
                equity,
                trade,
            });
        }

        debug!(
            rows = table.len(),
            trades = table.iter().filter(|r| r.trade).count(),
            final_equity = equity,
            "simulated returns"
        );
        Ok(table)
    }

    fn calculate_metrics(
        &self,
        table: &ResultTable,
    ) -> Result<BTreeMap<String, f64>, CollaboratorError> {
        let mut metrics = BTreeMap::new();
        if table.is_empty() {
            return Ok(metrics);
        }

        let returns = strategy_returns(table);
        let initial_capital = self.config.initial_capital;
        let final_equity = table.last().map_or(initial_capital, |r| r.equity);
        let total_return = if initial_capital > 0.0 {
            final_equity / initial_capital - 1.0
        } else {
            0.0
        };
        let years = table.len() as f64 / TRADING_DAYS_PER_YEAR;
        let annualized_return = if total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            -1.0
        };
        let max_drawdown = drawdowns(&cumulative_returns(&returns))
            .into_iter()
            .fold(0.0_f64, f64::min);

        let trades = round_trips(table);
        let mut trades_won = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut trades_lost = 0usize;
        for pnl in &trades {
            if *pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
            } else if *pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
            }
        }
        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };
        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };
        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };
        let exposure =
            table.iter().filter(|r| r.position != 0.0).count() as f64 / table.len() as f64;

        let rf = self.config.risk_free_rate;
        metrics.insert("total_return".to_string(), total_return);
        metrics.insert("annualized_return".to_string(), annualized_return);
        metrics.insert("sharpe_ratio".to_string(), sharpe_ratio(&returns, rf));
        metrics.insert("sortino_ratio".to_string(), sortino_ratio(&returns, rf));
        metrics.insert("max_drawdown".to_string(), max_drawdown);
        metrics.insert("volatility".to_string(), annualized_volatility(&returns));
        metrics.insert("total_trades".to_string(), total_trades as f64);
        metrics.insert("win_rate".to_string(), win_rate);
        metrics.insert("profit_factor".to_string(), profit_factor);
        metrics.insert("avg_win".to_string(), avg_win);
        metrics.insert("avg_loss".to_string(), avg_loss);
        metrics.insert("exposure".to_string(), exposure);
        Ok(metrics)
    }
}

/// Compounded return of each stretch of same-direction exposure.
fn round_trips(table: &[ReturnRow]) -> Vec<f64> {
    let mut trips = Vec::new();
    let mut current: Option<(f64, f64)> = None;
    for row in table {
        let direction = if row.position == 0.0 {
            0.0
        } else {
            row.position.signum()
        };
        current = match current {
            Some((dir, growth)) if dir == direction => {
                Some((dir, growth * (1.0 + row.strategy_return)))
            }
            Some((_, growth)) => {
                trips.push(growth - 1.0);
                (direction != 0.0).then_some((direction, 1.0 + row.strategy_return))
            }
            None if direction != 0.0 => Some((direction, 1.0 + row.strategy_return)),
            None => None,
        };
    }
    if let Some((_, growth)) = current {
        trips.push(growth - 1.0);
    }
    trips
}

fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let downside: Vec<f64> = excess.iter().map(|e| e.min(0.0).powi(2)).collect();
    let downside_dev = mean(&downside).sqrt();
    if !downside_dev.is_finite() || downside_dev <= 1e-10 {
        return 0.0;
    }
    TRADING_DAYS_PER_YEAR.sqrt() * mean(&excess) / downside_dev
}
