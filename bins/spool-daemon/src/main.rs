mod cmd;
mod config;
mod error;

use clap::Parser;
use config::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level().into()),
        )
        .init();

    if let Err(e) = cmd::run::run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
