//! paperdisc CLI: scheduled paper-discussion page runner.
//!
//! Invoked by a scheduler with no arguments; renders the discussion page for
//! rows newer than the stored checkpoint and exits 0, 1, or 2.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors exit 1; code 2 is reserved for state store failures.
            let _ = e.print();
            return Ok(ExitCode::from(if e.use_stderr() { 1 } else { 0 }));
        }
    };
    commands::init_tracing(&cli);
    commands::dispatch(cli).await
}
