//! jobharvest CLI: incremental job-listing harvester.
//!
//! Walks search-result pages, enriches listings it hasn't seen before with
//! employer postings and related listings, and stores them in a local
//! database.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
