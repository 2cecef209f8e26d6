mod cli;
mod config;
mod engine;
mod error;
mod logging;
mod model;
mod platform;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::setup_logging(args.log_level);

    let code = cli::run(args).await?;
    // 1 for an empty queue or a failed --strict run.
    std::process::exit(code);
}
