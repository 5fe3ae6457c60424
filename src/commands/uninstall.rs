//! Uninstall command implementation

use console::Style;

use crate::cli::Target;
use crate::error::Result;
use crate::state::{actions, detect};

use super::open_context;

/// Run uninstall command
pub fn run(target: &Target) -> Result<()> {
    let ctx = open_context(target)?;
    let record = detect(&ctx, None)?;
    let summary = actions::remove(&ctx, &record)?;

    println!(
        "{} mod manager from {} ({})",
        Style::new().bold().green().apply_to("Removed"),
        Style::new().bold().apply_to(&ctx.game.name),
        summary.install_type
    );
    if summary.patch_removed {
        println!("  Removed the patch at {}", record.injected_entry_point);
    }
    println!("  Libraries removed: {}", summary.libraries_removed);
    Ok(())
}
