//! weft: serve the demo application over WebSocket.

use anyhow::Result;
use clap::Parser;

use weft_session::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    weft_session::run_with_cli(Cli::parse()).await
}
