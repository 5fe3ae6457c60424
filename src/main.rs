//! modhook - mod manager installer
//!
//! Installs the mod manager into managed games, either by patching a
//! bootstrap call into a game assembly or by placing a proxy loader next to
//! the game executable, with every action rolled back on failure.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod entry_point;
mod error;
mod installer;
mod module;
mod patcher;
mod state;
mod transaction;

#[cfg(test)]
mod test_fixtures;

use cli::{Cli, Commands};

/// Log to stderr; `RUST_LOG` wins over `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "modhook=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Status(args) => commands::status::run(&cli.target, args),
        Commands::Install(args) => commands::install::run(&cli.target, args),
        Commands::Uninstall => commands::uninstall::run(&cli.target),
        Commands::Restore(args) => commands::restore::run(&cli.target, args),
        Commands::List => commands::list::run(&cli.target),
        Commands::Version => commands::version::run(&cli.target),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
