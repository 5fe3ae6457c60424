//! List command implementation
//!
//! Lists every game from the games file with its entry point.

use console::Style;

use crate::cli::Target;
use crate::config::GameDefinition;
use crate::error::Result;

use super::load_catalog;

/// Run list command
pub fn run(target: &Target) -> Result<()> {
    let catalog = load_catalog(target)?;

    if catalog.games().is_empty() {
        println!("No games configured.");
        return Ok(());
    }

    println!("Supported games ({}):", catalog.games().len());
    println!();
    for game in catalog.games() {
        display_game(game);
    }
    Ok(())
}

fn display_game(game: &GameDefinition) {
    println!("  {}", Style::new().bold().yellow().apply_to(&game.name));
    println!(
        "    {} {}",
        Style::new().bold().apply_to("Folder:"),
        game.folder
    );
    println!(
        "    {} {}",
        Style::new().bold().apply_to("Entry point:"),
        Style::new().cyan().apply_to(&game.entry_point)
    );
    if let Some(old) = &game.old_patch_target {
        println!(
            "    {} {}",
            Style::new().bold().apply_to("Old patch target:"),
            Style::new().dim().apply_to(old)
        );
    }
    if let Some(comment) = &game.comment {
        println!("    {}", Style::new().dim().apply_to(comment));
    }
}
