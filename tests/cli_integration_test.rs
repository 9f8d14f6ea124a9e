//! CLI integration tests for command orchestration.
//!
//! Tests cover:
//! - Config parsing (build_backtest_config, build_portfolio_config, build_model)
//! - Symbol resolution (resolve_symbols)
//! - Every subcommand against real INI and CSV files on disk
//! - Exit codes for config, model and data failures

mod common;

use clap::Parser;
use common::*;
use regimetrader::adapters::file_config_adapter::FileConfigAdapter;
use regimetrader::cli::{self, Cli};
use regimetrader::domain::error::RegimeTraderError;
use regimetrader::domain::portfolio::RebalanceFrequency;
use regimetrader::domain::regime::MarketRegime;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tempfile::TempDir;

fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn write_csv(dir: &Path, symbol: &str, bars: &[OhlcvBar]) {
    let mut out = String::from("date,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.date.format("%Y-%m-%d"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    std::fs::write(dir.join(format!("{symbol}.csv")), out).unwrap();
}

/// Data directory with two 300-bar symbols and one 20-bar symbol.
fn data_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "WAVE", &wave_bars("WAVE", 300));
    write_csv(
        dir.path(),
        "DRIFT",
        &make_bars("DRIFT", &wave_closes(300, 0.0008, 2.5, 30.0)),
    );
    write_csv(dir.path(), "TINY", &wave_bars("TINY", 20));
    dir
}

fn ini_for(dir: &Path) -> String {
    format!(
        "[data]\ndirectory = {}\n\n[backtest]\ninitial_capital = 100000\nlookback = 10\nprediction_window = 5\n\n[portfolio]\nrebalance_frequency = weekly\n\n[model]\nkind = momentum\n",
        dir.display()
    )
}

fn exit(args: &[&str]) -> String {
    let cli = Cli::try_parse_from(args).unwrap();
    format!("{:?}", cli::run(cli))
}

fn code(value: u8) -> String {
    format!("{:?}", ExitCode::from(value))
}

fn success() -> String {
    format!("{:?}", ExitCode::SUCCESS)
}

const VALID_INI: &str = r#"
[data]
directory = /var/lib/regimetrader/prices

[backtest]
initial_capital = 250000.0
transaction_cost = 0.001
stop_loss = 0.02
take_profit = 0.04
max_position_size = 0.25
min_position_size = 0.02
max_trades_per_day = 2
volatility_scaling = yes
volatility_target = 0.12
risk_free_rate = 0.03
lookback = 12
sequence_length = 20
prediction_window = 3
symbols = spy, qqq ,IWM
regime = bullish
start_date = 2020-01-01
end_date = 2023-12-31

[portfolio]
max_position_size = 0.3
max_portfolio_size = 0.9
correlation_threshold = 0.6
rebalance_frequency = monthly
weight_lookback = 42

[model]
kind = momentum
sequential = true
regime_conditioned = false
sensitivity = 4.0

[logging]
level = debug
"#;

mod config_loading {
    use super::*;

    #[test]
    fn backtest_config_from_file() {
        let file = write_temp_ini(VALID_INI);
        let config = FileConfigAdapter::from_file(file.path()).unwrap();
        let bt = cli::build_backtest_config(&config).unwrap();

        assert_eq!(bt.initial_capital, 250_000.0);
        assert_eq!(bt.transaction_cost, 0.001);
        assert_eq!(bt.max_position_size, 0.25);
        assert_eq!(bt.min_position_size, 0.02);
        assert_eq!(bt.max_trades_per_day, 2);
        assert!(bt.volatility_scaling);
        assert_eq!(bt.lookback, 12);
        assert_eq!(bt.sequence_length, 20);
        assert_eq!(bt.prediction_window, 3);
    }

    #[test]
    fn portfolio_config_from_file() {
        let file = write_temp_ini(VALID_INI);
        let config = FileConfigAdapter::from_file(file.path()).unwrap();
        let pc = cli::build_portfolio_config(&config, 250_000.0).unwrap();

        assert_eq!(pc.initial_capital, 250_000.0);
        assert_eq!(pc.max_position_size, 0.3);
        assert_eq!(pc.correlation_threshold, 0.6);
        assert_eq!(pc.rebalance_frequency, RebalanceFrequency::Monthly);
        assert_eq!(pc.weight_lookback, 42);
    }

    #[test]
    fn model_and_regime_from_file() {
        use regimetrader::ports::model_port::PredictionModel;

        let file = write_temp_ini(VALID_INI);
        let config = FileConfigAdapter::from_file(file.path()).unwrap();
        let model = cli::build_model(&config).unwrap();
        let caps = model.capabilities();

        assert!(caps.sequential);
        assert!(!caps.regime_conditioned);
        assert_eq!(cli::config_regime(&config).unwrap(), Some(MarketRegime::Bullish));
        assert_eq!(
            cli::configured_log_level(file.path()).as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn invalid_backtest_value_is_config_error() {
        let file = write_temp_ini("[backtest]\nmax_position_size = 1.5\n");
        let config = FileConfigAdapter::from_file(file.path()).unwrap();
        let err = cli::build_backtest_config(&config).unwrap_err();
        assert!(matches!(err, RegimeTraderError::ConfigInvalid { .. }));
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let file = write_temp_ini("[backtest]\nstart_date = 2024-01-01\nend_date = 2023-01-01\n");
        let config = FileConfigAdapter::from_file(file.path()).unwrap();
        assert!(cli::build_backtest_config(&config).is_err());
    }

    #[test]
    fn missing_config_file_is_parse_error() {
        let err = FileConfigAdapter::from_file(Path::new("/nonexistent/regimetrader.ini"))
            .err()
            .unwrap();
        assert!(matches!(err, RegimeTraderError::ConfigParse { .. }));
    }
}

mod symbol_resolution {
    use super::*;

    #[test]
    fn override_wins() {
        let config = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let port = MockDataPort::new();
        let symbols = cli::resolve_symbols(Some("dia"), &config, &port).unwrap();
        assert_eq!(symbols, vec!["DIA"]);
    }

    #[test]
    fn configured_list_is_trimmed_and_uppercased() {
        let config = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let port = MockDataPort::new();
        let symbols = cli::resolve_symbols(None, &config, &port).unwrap();
        assert_eq!(symbols, vec!["SPY", "QQQ", "IWM"]);
    }

    #[test]
    fn falls_back_to_data_source() {
        let config = FileConfigAdapter::from_string("[backtest]\nlookback = 10\n").unwrap();
        let port = MockDataPort::new()
            .with_bars("BBB", wave_bars("BBB", 10))
            .with_bars("AAA", wave_bars("AAA", 10));
        let symbols = cli::resolve_symbols(None, &config, &port).unwrap();
        assert_eq!(symbols, vec!["AAA", "BBB"]);
    }
}

mod commands {
    use super::*;

    #[test]
    fn validate_accepts_complete_config() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(exit(&["regimetrader", "validate", "--config", path]), success());
    }

    #[test]
    fn validate_rejects_bad_portfolio_section() {
        let dir = data_dir();
        let ini = write_temp_ini(&format!(
            "[data]\ndirectory = {}\n\n[portfolio]\ncorrelation_threshold = 1.5\n",
            dir.path().display()
        ));
        let path = ini.path().to_str().unwrap();
        assert_eq!(exit(&["regimetrader", "validate", "--config", path]), code(2));
    }

    #[test]
    fn validate_rejects_missing_data_directory() {
        let ini = write_temp_ini("[backtest]\nlookback = 10\n");
        let path = ini.path().to_str().unwrap();
        assert_eq!(exit(&["regimetrader", "validate", "--config", path]), code(2));
    }

    #[test]
    fn unknown_model_kind_exits_with_model_code() {
        let dir = data_dir();
        let ini = write_temp_ini(&format!(
            "[data]\ndirectory = {}\n\n[model]\nkind = transformer\n",
            dir.path().display()
        ));
        let path = ini.path().to_str().unwrap();
        assert_eq!(exit(&["regimetrader", "validate", "--config", path]), code(4));
        assert_eq!(
            exit(&["regimetrader", "backtest", "--config", path, "--symbol", "WAVE"]),
            code(4)
        );
    }

    #[test]
    fn list_symbols_succeeds() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(exit(&["regimetrader", "list-symbols", "--config", path]), success());
    }

    #[test]
    fn backtest_single_symbol_succeeds() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(
            exit(&["regimetrader", "backtest", "--config", path, "--symbol", "wave"]),
            success()
        );
    }

    #[test]
    fn backtest_all_symbols_tolerates_short_history() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(
            exit(&["regimetrader", "backtest", "--config", path, "--regime", "bullish"]),
            success()
        );
    }

    #[test]
    fn backtest_with_only_short_history_exits_with_data_code() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(
            exit(&["regimetrader", "backtest", "--config", path, "--symbol", "TINY"]),
            code(5)
        );
    }

    #[test]
    fn backtest_unknown_symbol_is_no_data() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(
            exit(&["regimetrader", "backtest", "--config", path, "--symbol", "NOPE"]),
            code(5)
        );
    }

    #[test]
    fn portfolio_run_succeeds() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(exit(&["regimetrader", "portfolio", "--config", path]), success());
    }

    #[test]
    fn regime_requires_enough_history() {
        let dir = data_dir();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let path = ini.path().to_str().unwrap();
        assert_eq!(
            exit(&["regimetrader", "regime", "--config", path, "--symbol", "DRIFT"]),
            success()
        );
        assert_eq!(
            exit(&["regimetrader", "regime", "--config", path, "--symbol", "TINY"]),
            code(5)
        );
    }

    #[test]
    fn missing_config_file_exits_with_config_code() {
        assert_eq!(
            exit(&["regimetrader", "validate", "--config", "/nonexistent/regimetrader.ini"]),
            code(2)
        );
    }
}
