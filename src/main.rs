//! turbocopy command-line entry point.

use anyhow::Result;

mod app;
mod cli;
mod logging;

fn main() -> Result<()> {
    let args = cli::parse();
    app::run(args)
}
