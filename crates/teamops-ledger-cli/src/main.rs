use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = teamops_ledger_cli::Cli::parse();
    match teamops_ledger_cli::run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            teamops_ledger_cli::exit_code_for(&err)
        }
    }
}
