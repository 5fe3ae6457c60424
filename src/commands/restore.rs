//! Restore command implementation
//!
//! Without flags, puts back the files an interrupted action left backups
//! of. With `--original`, replaces the patched assembly by the pristine copy
//! kept on first install.

use console::Style;

use crate::cli::{RestoreArgs, Target};
use crate::error::Result;
use crate::state::{actions, detect};

use super::open_context;

/// Run restore command
pub fn run(target: &Target, args: RestoreArgs) -> Result<()> {
    let ctx = open_context(target)?;

    if args.original {
        let record = detect(&ctx, None)?;
        let restored = actions::restore_original(&ctx, &record)?;
        println!(
            "{} {}",
            Style::new().bold().green().apply_to("Restored"),
            restored.display()
        );
        return Ok(());
    }

    match actions::recover_backups(&ctx)? {
        0 => println!("Nothing to restore."),
        count => println!(
            "{} {count} file(s) from an interrupted action",
            Style::new().bold().green().apply_to("Restored")
        ),
    }
    Ok(())
}
