//! Version command implementation

use crate::cli::Target;
use crate::error::Result;
use crate::installer::libraries::MANAGER_ASSEMBLY;
use crate::module::Module;
use crate::state::Version;

use super::bundle_dir;

/// Run version command
pub fn run(target: &Target) -> Result<()> {
    println!("modhook {}", env!("CARGO_PKG_VERSION"));
    match bundled_manager_version(target) {
        Some(version) => println!("Bundled mod manager: {version}"),
        None => println!("Bundled mod manager: not found"),
    }
    println!();
    println!("Build info:");
    println!("  Rust version: {}", rustc_version());
    println!("  Profile: {}", build_profile());

    Ok(())
}

fn bundled_manager_version(target: &Target) -> Option<Version> {
    let path = bundle_dir(target).ok()?.join(MANAGER_ASSEMBLY);
    Module::load_file(&path)
        .ok()
        .map(|module| Version::from(module.version))
}

fn rustc_version() -> &'static str {
    // Minimum supported version from the manifest
    env!("CARGO_PKG_RUST_VERSION")
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}
