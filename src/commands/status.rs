//! Status command implementation
//!
//! Prints what detection found: the active install type, which types may be
//! chosen, the installed and bundled versions and anything blocking an
//! action.

use console::Style;
use serde::Serialize;

use crate::cli::{StatusArgs, Target};
use crate::error::Result;
use crate::state::{Availability, InstallationContext, InstallationRecord, detect};

use super::open_context;

#[derive(Serialize)]
struct StatusReport<'a> {
    game: &'a str,
    game_dir: String,
    managed_dir: String,
    #[serde(flatten)]
    record: &'a InstallationRecord,
}

/// Run status command
pub fn run(target: &Target, args: StatusArgs) -> Result<()> {
    let ctx = open_context(target)?;
    let record = detect(&ctx, args.install_type)?;

    if args.json {
        let report = StatusReport {
            game: &ctx.game.name,
            game_dir: ctx.game_root.display().to_string(),
            managed_dir: ctx.managed_dir.display().to_string(),
            record: &record,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_status(&ctx, &record);
    Ok(())
}

fn print_status(ctx: &InstallationContext, record: &InstallationRecord) {
    let label = Style::new().bold();

    println!("{}", Style::new().bold().yellow().apply_to(&ctx.game.name));
    println!("  {} {}", label.apply_to("Game directory:"), ctx.game_root.display());
    println!("  {} {}", label.apply_to("Managed:"), ctx.managed_dir.display());
    println!("  {} {}", label.apply_to("Install type:"), record.install_type);
    println!(
        "  {} assembly {}, proxy {}",
        label.apply_to("Options:"),
        availability(record.assembly),
        availability(record.proxy)
    );

    match record.installed {
        Some(installed) => {
            let version = installed
                .version
                .map_or_else(|| "unknown".to_string(), |v| v.to_string());
            let legacy = if installed.legacy { " (legacy)" } else { "" };
            println!(
                "  {} {}{legacy}",
                label.apply_to("Installed:"),
                Style::new().green().apply_to(version)
            );
        }
        None => println!(
            "  {} {}",
            label.apply_to("Installed:"),
            Style::new().dim().apply_to("no")
        ),
    }
    println!("  {} {}", label.apply_to("Bundled:"), record.tool_version);

    if record.has_injected_assembly {
        println!(
            "  {} {}",
            label.apply_to("Patched at:"),
            record.injected_entry_point
        );
        if !record.entry_point_matches {
            println!(
                "  {}",
                Style::new()
                    .yellow()
                    .apply_to("The patch is not at the configured entry point; install again to move it")
            );
        }
    }

    let action = |allowed: bool| {
        if allowed {
            Style::new().green().apply_to("yes")
        } else {
            Style::new().dim().apply_to("no")
        }
    };
    println!(
        "  {} install {}, remove {}, restore original {}",
        label.apply_to("Actions:"),
        action(record.can_install),
        action(record.can_remove),
        action(record.can_restore_original)
    );

    for path in &record.denied {
        println!(
            "  {} {}",
            Style::new().red().apply_to("Not writable:"),
            path.display()
        );
    }
    if !record.pending_backups.is_empty() {
        println!(
            "  {}",
            Style::new()
                .red()
                .apply_to("An interrupted action left backups behind; run 'modhook restore'")
        );
        for backup in &record.pending_backups {
            println!("    {}", Style::new().dim().apply_to(backup.display()));
        }
    }
}

fn availability(value: Availability) -> console::StyledObject<&'static str> {
    match value {
        Availability::Available => Style::new().green().apply_to("available"),
        Availability::Disabled => Style::new().yellow().apply_to("disabled"),
        Availability::Hidden => Style::new().dim().apply_to("unsupported"),
    }
}
