//! MarketCrawl CLI — marketplace catalog crawler.
//!
//! Crawls category listings through rotating proxies, parses product cards
//! and exports them to a spreadsheet, recording every run locally.

mod commands;
mod progress;

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
