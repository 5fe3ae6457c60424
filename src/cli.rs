//! CLI definitions using clap derive API

use clap::builder::{Styles, styling::AnsiColor};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::state::InstallType;

/// modhook - mod manager installer
///
/// Patches the mod manager bootstrap into a game's managed assemblies, or
/// installs a proxy loader next to the game executable instead.
#[derive(Parser, Debug)]
#[command(
    name = "modhook",
    author,
    version,
    color = clap::ColorChoice::Auto,
    styles = Styles::styled()
        .header(AnsiColor::Green.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default().bold())
        .placeholder(AnsiColor::Cyan.on_default()),
    about = "Installs the mod manager bootstrap into managed games",
    long_about = "modhook installs the mod manager into a game either by patching a bootstrap \
                  call into one of its managed assemblies or by placing a proxy loader next to \
                  the game executable. Every action is transactional: on failure all touched \
                  files are restored.",
    after_help = "\x1b[1m\x1b[32mExamples:\x1b[0m\n    \
                  modhook --game-dir ~/Games/Example status\n    \
                  modhook --game-dir ~/Games/Example install\n    \
                  modhook --game-dir ~/Games/Example install --type proxy\n    \
                  modhook --game-dir ~/Games/Example uninstall\n    \
                  modhook list"
)]
pub struct Cli {
    #[command(flatten)]
    pub target: Target,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which game installation to operate on
#[derive(Args, Debug, Clone, Default)]
pub struct Target {
    /// Game directory (defaults to current directory)
    #[arg(long, short = 'g', global = true, env = "MODHOOK_GAME_DIR")]
    pub game_dir: Option<PathBuf>,

    /// Game name from the games file (defaults to the one whose folder
    /// matches the game directory)
    #[arg(long, global = true)]
    pub game: Option<String>,

    /// Directory holding the manager libraries and shims (defaults to the
    /// directory of the modhook binary)
    #[arg(long, global = true, env = "MODHOOK_BUNDLE_DIR")]
    pub bundle_dir: Option<PathBuf>,

    /// Games file (defaults to games.yaml in the bundle directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the installation state of a game
    Status(StatusArgs),

    /// Install or update the mod manager
    Install(InstallArgs),

    /// Remove the mod manager from a game
    Uninstall,

    /// Recover from an interrupted action or restore the pristine assembly
    Restore(RestoreArgs),

    /// List supported games
    List,

    /// Show version information
    Version,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:\n  \
                  Show status:\n    modhook status\n\n\
                  Machine-readable status:\n    modhook status --json\n\n\
                  Status as seen by a proxy install:\n    modhook status --type proxy")]
pub struct StatusArgs {
    /// Print the detected state as JSON
    #[arg(long)]
    pub json: bool,

    /// Preferred install type where both are available
    #[arg(long = "type", value_enum)]
    pub install_type: Option<InstallType>,
}

/// Arguments for the install command
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:\n  \
                  Install by patching the game assembly:\n    modhook install\n\n\
                  Install the proxy loader (Windows games only):\n    modhook install --type proxy")]
pub struct InstallArgs {
    /// Install type; defaults to the active one, or assembly
    #[arg(long = "type", value_enum)]
    pub install_type: Option<InstallType>,
}

/// Arguments for the restore command
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:\n  \
                  Put back files from an interrupted action:\n    modhook restore\n\n\
                  Put back the assembly as it was before the first patch:\n    modhook restore --original")]
pub struct RestoreArgs {
    /// Restore the pristine copy of the patched assembly instead of backups
    #[arg(long)]
    pub original: bool,
}
