use clap::Parser;
use regimetrader::cli::{configured_log_level, run, Cli};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over the config file's [logging] level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = configured_log_level(cli.command.config_path());
        EnvFilter::try_new(level.as_deref().unwrap_or("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(cli)
}
