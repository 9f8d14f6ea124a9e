//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::momentum_model::MomentumModel;
use crate::adapters::technical_indicators::{TechnicalIndicatorAdapter, SMA_SLOW};
use crate::adapters::trade_simulator::{SignalTradeSimulator, SimulatorConfig};
use crate::adapters::window_features::WindowFeaturePreparer;
use crate::domain::backtest::{
    run_portfolio_backtest, BacktestConfig, BacktestOrchestrator, BacktestResult,
};
use crate::domain::config_validation::{
    parse_optional_date, validate_backtest_config, validate_data_config, validate_model_config,
    validate_portfolio_config,
};
use crate::domain::error::RegimeTraderError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::portfolio::{PortfolioConfig, PortfolioOptimizer, RebalanceFrequency};
use crate::domain::regime::{MarketRegime, RegimeClassifier};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::model_port::PredictionModel;

#[derive(Parser, Debug)]
#[command(
    name = "regimetrader",
    about = "Regime-aware signal generation and portfolio backtester"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest one symbol, or every configured symbol
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        /// Override the detected regime (bullish, bearish, sideways)
        #[arg(long)]
        regime: Option<MarketRegime>,
    },
    /// Backtest the configured symbols as a rebalanced portfolio
    Portfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        regime: Option<MarketRegime>,
    },
    /// Show the regime assessment for a symbol
    Regime {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List symbols available in the data directory
    ListSymbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Command {
    pub fn config_path(&self) -> &Path {
        match self {
            Command::Backtest { config, .. }
            | Command::Portfolio { config, .. }
            | Command::Regime { config, .. }
            | Command::Validate { config }
            | Command::ListSymbols { config } => config.as_path(),
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            symbol,
            regime,
        } => run_backtest(&config, symbol.as_deref(), regime),
        Command::Portfolio { config, regime } => run_portfolio(&config, regime),
        Command::Regime { config, symbol } => run_regime(&config, &symbol),
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols { config } => run_list_symbols(&config),
    }
}

/// `[logging] level` from the config file, if it can be read.
pub fn configured_log_level(path: &Path) -> Option<String> {
    FileConfigAdapter::from_file(path)
        .ok()?
        .get_string("logging", "level")
        .filter(|s| !s.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: RegimeTraderError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(&err)
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, RegimeTraderError> {
    validate_backtest_config(config)?;
    let defaults = BacktestConfig::default();
    let get_usize = |key: &str, default: usize| {
        usize::try_from(config.get_int("backtest", key, default as i64)).unwrap_or(default)
    };

    let bt = BacktestConfig {
        initial_capital: config.get_double("backtest", "initial_capital", defaults.initial_capital),
        transaction_cost: config.get_double(
            "backtest",
            "transaction_cost",
            defaults.transaction_cost,
        ),
        stop_loss: config.get_double("backtest", "stop_loss", defaults.stop_loss),
        take_profit: config.get_double("backtest", "take_profit", defaults.take_profit),
        max_position_size: config.get_double(
            "backtest",
            "max_position_size",
            defaults.max_position_size,
        ),
        min_position_size: config.get_double(
            "backtest",
            "min_position_size",
            defaults.min_position_size,
        ),
        max_trades_per_day: get_usize("max_trades_per_day", defaults.max_trades_per_day),
        volatility_scaling: config.get_bool(
            "backtest",
            "volatility_scaling",
            defaults.volatility_scaling,
        ),
        volatility_target: config.get_double(
            "backtest",
            "volatility_target",
            defaults.volatility_target,
        ),
        risk_free_rate: config.get_double("backtest", "risk_free_rate", defaults.risk_free_rate),
        lookback: get_usize("lookback", defaults.lookback),
        sequence_length: get_usize("sequence_length", defaults.sequence_length),
        prediction_window: get_usize("prediction_window", defaults.prediction_window),
    };
    bt.validate()?;
    Ok(bt)
}

pub fn build_portfolio_config(
    config: &dyn ConfigPort,
    initial_capital: f64,
) -> Result<PortfolioConfig, RegimeTraderError> {
    validate_portfolio_config(config)?;
    let defaults = PortfolioConfig::default();
    let rebalance_frequency = match config.get_string("portfolio", "rebalance_frequency") {
        Some(s) => s
            .parse::<RebalanceFrequency>()
            .map_err(|reason| RegimeTraderError::ConfigInvalid {
                section: "portfolio".into(),
                key: "rebalance_frequency".into(),
                reason,
            })?,
        None => defaults.rebalance_frequency,
    };

    let pc = PortfolioConfig {
        initial_capital,
        max_position_size: config.get_double(
            "portfolio",
            "max_position_size",
            defaults.max_position_size,
        ),
        max_portfolio_size: config.get_double(
            "portfolio",
            "max_portfolio_size",
            defaults.max_portfolio_size,
        ),
        correlation_threshold: config.get_double(
            "portfolio",
            "correlation_threshold",
            defaults.correlation_threshold,
        ),
        rebalance_frequency,
        weight_lookback: usize::try_from(config.get_int(
            "portfolio",
            "weight_lookback",
            defaults.weight_lookback as i64,
        ))
        .unwrap_or(defaults.weight_lookback),
    };
    pc.validate()?;
    Ok(pc)
}

pub fn build_model(config: &dyn ConfigPort) -> Result<MomentumModel, RegimeTraderError> {
    validate_model_config(config)?;
    Ok(MomentumModel::new(
        config.get_bool("model", "sequential", false),
        config.get_bool("model", "regime_conditioned", true),
        config.get_double("model", "sensitivity", 8.0),
    ))
}

pub fn config_regime(config: &dyn ConfigPort) -> Result<Option<MarketRegime>, RegimeTraderError> {
    match config
        .get_string("backtest", "regime")
        .filter(|s| !s.trim().is_empty())
    {
        Some(s) => s
            .parse::<MarketRegime>()
            .map(Some)
            .map_err(|e| RegimeTraderError::ConfigInvalid {
                section: "backtest".into(),
                key: "regime".into(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn data_adapter(config: &dyn ConfigPort) -> Result<CsvAdapter, RegimeTraderError> {
    validate_data_config(config)?;
    let directory = config
        .get_string("data", "directory")
        .ok_or_else(|| RegimeTraderError::ConfigMissing {
            section: "data".into(),
            key: "directory".into(),
        })?;
    Ok(CsvAdapter::new(PathBuf::from(directory.trim())))
}

/// The `--symbol` override, else `[backtest] symbols`, else every symbol in
/// the data directory.
pub fn resolve_symbols(
    symbol_override: Option<&str>,
    config: &dyn ConfigPort,
    data_port: &dyn DataPort,
) -> Result<Vec<String>, RegimeTraderError> {
    if let Some(s) = symbol_override {
        return Ok(vec![s.trim().to_uppercase()]);
    }
    let configured: Vec<String> = config
        .get_list("backtest", "symbols")
        .into_iter()
        .map(|s| s.to_uppercase())
        .collect();
    if !configured.is_empty() {
        return Ok(configured);
    }
    data_port.list_symbols()
}

fn fetch_price_data(
    data_port: &dyn DataPort,
    config: &dyn ConfigPort,
    symbols: &[String],
) -> Result<BTreeMap<String, Vec<OhlcvBar>>, RegimeTraderError> {
    let start = parse_optional_date(config, "start_date")?;
    let end = parse_optional_date(config, "end_date")?;

    let mut price_data = BTreeMap::new();
    for symbol in symbols {
        match data_port.fetch_ohlcv(symbol, start, end) {
            Ok(bars) if bars.is_empty() => {
                eprintln!("warning: skipping {} (no bars in range)", symbol);
            }
            Ok(bars) => {
                price_data.insert(symbol.clone(), bars);
            }
            Err(e) => eprintln!("warning: skipping {} ({})", symbol, e),
        }
    }

    if price_data.is_empty() {
        return Err(RegimeTraderError::NoData {
            symbol: symbols.join(","),
        });
    }
    Ok(price_data)
}

/// Everything a backtest run needs, loaded and validated from one config.
struct Setup {
    adapter: FileConfigAdapter,
    bt_config: BacktestConfig,
    model: MomentumModel,
    data: CsvAdapter,
}

fn load_setup(config_path: &Path) -> Result<Setup, ExitCode> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    let bt_config = build_backtest_config(&adapter).map_err(fail)?;
    let model = build_model(&adapter).map_err(fail)?;
    let data = data_adapter(&adapter).map_err(fail)?;
    Ok(Setup {
        adapter,
        bt_config,
        model,
        data,
    })
}

fn run_backtest(
    config_path: &Path,
    symbol: Option<&str>,
    regime_override: Option<MarketRegime>,
) -> ExitCode {
    // Stage 1: config, model and data source
    let setup = match load_setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let regime = match regime_override.map_or_else(|| config_regime(&setup.adapter), |r| Ok(Some(r)))
    {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    // Stage 2: price data
    let symbols = match resolve_symbols(symbol, &setup.adapter, &setup.data) {
        Ok(s) if !s.is_empty() => s,
        Ok(_) => {
            eprintln!("error: no symbols configured or found in the data directory");
            return ExitCode::from(5);
        }
        Err(e) => return fail(e),
    };
    let price_data = match fetch_price_data(&setup.data, &setup.adapter, &symbols) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };

    // Stage 3: collaborators and orchestrator
    let indicators = TechnicalIndicatorAdapter::new();
    let features =
        WindowFeaturePreparer::new(setup.bt_config.prediction_window, setup.bt_config.lookback);
    let simulator = SignalTradeSimulator::new(SimulatorConfig::from(&setup.bt_config));
    let orchestrator = match BacktestOrchestrator::new(
        &indicators,
        &features,
        &setup.model,
        &simulator,
        setup.bt_config.clone(),
    ) {
        Ok(o) => o,
        Err(e) => return fail(e),
    };

    // Stage 4: run and summarize
    eprintln!(
        "Running backtest: {} symbols, model {}",
        price_data.len(),
        setup.model.name()
    );
    let results: Vec<BacktestResult> = price_data
        .iter()
        .map(|(symbol, bars)| orchestrator.backtest(symbol, bars, regime))
        .collect();

    eprintln!("\n=== Per-Symbol Results ===");
    for result in &results {
        print_result(result);
    }

    let completed = results.iter().filter(|r| !r.is_empty()).count();
    eprintln!("\n{} of {} backtests completed", completed, results.len());
    if completed == 0 {
        ExitCode::from(5)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_result(result: &BacktestResult) {
    let regime = result
        .regime
        .map_or_else(|| "-".to_string(), |r| r.to_string());
    match result.failure() {
        Some(failure) => eprintln!(
            "  {}:  [{}] failed ({}): {}",
            result.symbol,
            regime,
            failure.category(),
            failure
        ),
        None => {
            let active = result
                .aligned_signals
                .iter()
                .filter(|s| s.value != 0.0)
                .count();
            eprintln!(
                "  {}:  [{}] {} rows, {} active signals, return {:.2}%, sharpe {:.2}, max dd {:.1}%, {} trades",
                result.symbol,
                regime,
                result.results.len(),
                active,
                result.metric("total_return") * 100.0,
                result.metric("sharpe_ratio"),
                result.metric("max_drawdown") * 100.0,
                result.metric("total_trades"),
            );
        }
    }
}

fn run_portfolio(config_path: &Path, regime_override: Option<MarketRegime>) -> ExitCode {
    let setup = match load_setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let pf_config = match build_portfolio_config(&setup.adapter, setup.bt_config.initial_capital) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let regime = match regime_override.map_or_else(|| config_regime(&setup.adapter), |r| Ok(Some(r)))
    {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    let symbols = match resolve_symbols(None, &setup.adapter, &setup.data) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let price_data = match fetch_price_data(&setup.data, &setup.adapter, &symbols) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };

    let indicators = TechnicalIndicatorAdapter::new();
    let features =
        WindowFeaturePreparer::new(setup.bt_config.prediction_window, setup.bt_config.lookback);
    let simulator = SignalTradeSimulator::new(SimulatorConfig::from(&setup.bt_config));
    let orchestrator = match BacktestOrchestrator::new(
        &indicators,
        &features,
        &setup.model,
        &simulator,
        setup.bt_config.clone(),
    ) {
        Ok(o) => o,
        Err(e) => return fail(e),
    };
    let optimizer = PortfolioOptimizer::new(pf_config);

    eprintln!(
        "Running portfolio backtest: {} symbols, {} rebalancing",
        price_data.len(),
        optimizer.config().rebalance_frequency
    );
    let portfolio = run_portfolio_backtest(&orchestrator, &optimizer, &price_data, regime);

    eprintln!("\n=== Per-Symbol Results ===");
    for result in portfolio.results.values() {
        print_result(result);
    }

    let m = &portfolio.metrics;
    eprintln!("\n=== Portfolio Metrics ===");
    eprintln!("CAGR:             {:.2}%", m.cagr * 100.0);
    eprintln!("Max Drawdown:     {:.1}%", m.max_drawdown * 100.0);
    eprintln!("Avg Drawdown:     {:.1}%", m.avg_drawdown * 100.0);
    eprintln!("CAGR/Drawdown:    {:.2}", m.cagr_to_drawdown);
    eprintln!("Volatility:       {:.2}%", m.volatility * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Avg Correlation:  {:.2}", m.avg_correlation);

    if !m.weights.is_empty() {
        eprintln!("\n=== Weights ===");
        for (symbol, weight) in &m.weights {
            eprintln!("  {}:  {:.1}%", symbol, weight * 100.0);
        }
    }

    let initial = optimizer.config().initial_capital;
    eprintln!("\n=== Rebalancing ===");
    eprintln!("Rebalances:       {}", portfolio.rebalance.equity_curve.len());
    eprintln!("Final Equity:     ${:.0}", portfolio.final_equity(initial));
    eprintln!("Total Return:     {:.2}%", portfolio.total_return(initial) * 100.0);

    let failures = portfolio.failures().count();
    if failures == portfolio.results.len() {
        eprintln!("error: every symbol failed to backtest");
        return ExitCode::from(5);
    }
    ExitCode::SUCCESS
}

fn run_regime(config_path: &Path, symbol: &str) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let data = match data_adapter(&adapter) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };
    let symbol = symbol.trim().to_uppercase();
    let bars = match fetch_price_data(&data, &adapter, std::slice::from_ref(&symbol)) {
        Ok(mut d) => d.remove(&symbol).unwrap_or_default(),
        Err(e) => return fail(e),
    };
    if bars.len() < SMA_SLOW {
        return fail(RegimeTraderError::InsufficientData {
            symbol,
            bars: bars.len(),
            minimum: SMA_SLOW,
        });
    }

    let a = RegimeClassifier::new().assess(&bars);
    eprintln!("\n=== Regime: {} ===", symbol);
    eprintln!("Regime:           {}", a.regime);
    eprintln!("Trend:            {:.4}", a.trend);
    eprintln!("Volatility:       {:.4}", a.volatility);
    eprintln!("Momentum:         {:.5}", a.momentum);
    eprintln!("RSI (avg):        {:.1}", a.rsi_avg);
    eprintln!("Trend Quality:    {:.2}", a.trend_quality);
    eprintln!("Momentum Quality: {:.2}", a.momentum_quality);
    println!("{}", a.regime);
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let checks: [(&str, fn(&dyn ConfigPort) -> Result<(), RegimeTraderError>); 4] = [
        ("data", validate_data_config),
        ("backtest", validate_backtest_config),
        ("portfolio", validate_portfolio_config),
        ("model", validate_model_config),
    ];
    for (section, check) in checks {
        if let Err(e) = check(&adapter) {
            return fail(e);
        }
        eprintln!("  [{}] ok", section);
    }

    eprintln!("\nConfiguration is valid");
    ExitCode::SUCCESS
}

fn run_list_symbols(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let data = match data_adapter(&adapter) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };

    let symbols = match data.list_symbols() {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    if symbols.is_empty() {
        eprintln!("No symbols found");
    } else {
        for symbol in &symbols {
            println!("{}", symbol);
        }
        eprintln!("{} symbols found", symbols.len());
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn backtest_config_reads_overrides_and_defaults() {
        let c = config("[backtest]\nlookback = 15\nvolatility_scaling = true\nstop_loss = 0.03\n");
        let bt = build_backtest_config(&c).unwrap();
        assert_eq!(bt.lookback, 15);
        assert!(bt.volatility_scaling);
        assert_eq!(bt.stop_loss, 0.03);
        assert_eq!(bt.prediction_window, 5);
        assert_eq!(bt.initial_capital, 100_000.0);
    }

    #[test]
    fn portfolio_config_parses_frequency() {
        let c = config("[portfolio]\nrebalance_frequency = monthly\nmax_portfolio_size = 0.6\n");
        let pc = build_portfolio_config(&c, 50_000.0).unwrap();
        assert_eq!(pc.rebalance_frequency, RebalanceFrequency::Monthly);
        assert_eq!(pc.max_portfolio_size, 0.6);
        assert_eq!(pc.initial_capital, 50_000.0);
    }

    #[test]
    fn model_defaults_to_flat_regime_conditioned() {
        let model = build_model(&config("[model]\n")).unwrap();
        let caps = model.capabilities();
        assert!(!caps.sequential);
        assert!(caps.regime_conditioned);
    }

    #[test]
    fn unknown_model_kind_maps_to_exit_code_four() {
        let err = build_model(&config("[model]\nkind = transformer\n")).unwrap_err();
        assert_eq!(
            format!("{:?}", ExitCode::from(&err)),
            format!("{:?}", ExitCode::from(4))
        );
    }

    #[test]
    fn config_regime_parses_or_rejects() {
        assert_eq!(
            config_regime(&config("[backtest]\nregime = Bear\n")).unwrap(),
            Some(MarketRegime::Bearish)
        );
        assert_eq!(config_regime(&config("[backtest]\n")).unwrap(), None);
        assert!(config_regime(&config("[backtest]\nregime = crab\n")).is_err());
    }

    #[test]
    fn cli_parses_backtest_arguments() {
        let cli = Cli::try_parse_from([
            "regimetrader",
            "backtest",
            "--config",
            "run.ini",
            "--symbol",
            "spy",
            "--regime",
            "sideways",
        ])
        .unwrap();
        match &cli.command {
            Command::Backtest { symbol, regime, .. } => {
                assert_eq!(symbol.as_deref(), Some("spy"));
                assert_eq!(*regime, Some(MarketRegime::Sideways));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.command.config_path(), Path::new("run.ini"));
    }

    #[test]
    fn cli_rejects_unknown_regime() {
        let parsed = Cli::try_parse_from([
            "regimetrader",
            "portfolio",
            "--config",
            "run.ini",
            "--regime",
            "crab",
        ]);
        assert!(parsed.is_err());
    }
}
