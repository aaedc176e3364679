use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod bitbake;
mod classify;
mod cli;
mod config;
mod env;
mod error;
mod git;
mod history;
mod paths;
mod process;
mod prompt;
mod recipe;
mod remedy;
mod retry;
mod stats;
#[cfg(test)]
mod testing;
mod upstream;
mod workflow;

fn main() -> Result<()> {
    let args = cli::RootArgs::parse();
    init_tracing(args.debug_level);
    workflow::run(&args)
}

/// `RUST_LOG` wins over `--debug-level`.
fn init_tracing(debug_level: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(debug_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn level_directive(debug_level: u8) -> &'static str {
    match debug_level {
        0 | 1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}
