//! Install command implementation

use console::Style;
use tracing::warn;

use crate::cli::{InstallArgs, Target};
use crate::error::Result;
use crate::state::{actions, detect};

use super::open_context;

/// Run install command
pub fn run(target: &Target, args: InstallArgs) -> Result<()> {
    let ctx = open_context(target)?;
    let record = detect(&ctx, args.install_type)?;

    if !record.pending_backups.is_empty() {
        warn!(
            backups = record.pending_backups.len(),
            "backups from an interrupted action exist and will be adopted"
        );
    }

    let install_type = args.install_type.unwrap_or(record.install_type);
    let summary = actions::install(&ctx, &record, install_type)?;

    println!(
        "{} mod manager {} into {} ({})",
        Style::new().bold().green().apply_to("Installed"),
        summary.version,
        Style::new().bold().apply_to(&ctx.game.name),
        summary.install_type
    );
    if summary.replaced_patch {
        println!("  Replaced the patch at {}", record.injected_entry_point);
    }
    if let Some(bitness) = summary.bitness {
        println!("  Proxy loader: {bitness}");
    }
    println!(
        "  Libraries: {} copied, {} unchanged",
        summary.libraries.copied.len(),
        summary.libraries.skipped.len()
    );
    Ok(())
}
