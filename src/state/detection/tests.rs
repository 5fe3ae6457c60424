//! Tests for installation detection

use std::fs;

use super::*;
use crate::config::GameState;
use crate::installer::proxy::SHIM_FILE;
use crate::module::{AssemblyVersion, TypeDef};
use crate::state::HostPlatform;
use crate::test_fixtures::{
    ENTRY_POINT, GameFixture, TOOL_VERSION, firstpass_module, game_module, legacy_patched_module,
};
use crate::transaction::backup_path;

const FIRSTPASS_ENTRY: &str = "[Assembly-CSharp-firstpass.dll]Plugins.Boot.Start";

fn patched_entry(fixture: &GameFixture) {
    let mut module = game_module();
    patcher::inject(&mut module, &EntryPointSpec::parse(ENTRY_POINT).unwrap()).unwrap();
    fixture.write_assembly("Assembly-CSharp.dll", &module);
}

#[test]
fn test_fresh_game_on_linux() {
    let fixture = GameFixture::new();
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();

    assert_eq!(record.install_type, InstallType::Assembly);
    assert_eq!(record.assembly, Availability::Available);
    assert_eq!(record.proxy, Availability::Hidden);
    assert!(!record.has_injected_assembly);
    assert!(!record.proxy_present);
    assert!(record.entry_point_matches);
    assert!(!record.migrated);
    assert_eq!(record.installed, None);
    assert_eq!(record.tool_version, Version::new(0, 23));
    assert!(record.can_install);
    assert!(!record.can_remove);
    assert!(!record.can_restore_original);
    assert!(record.pending_backups.is_empty());
    assert_eq!(record.injected_assembly, ctx.entry_assembly);
}

#[test]
fn test_proxy_hidden_on_linux_even_when_requested() {
    let fixture = GameFixture::new();
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, Some(InstallType::DoorstopProxy)).unwrap();
    assert_eq!(record.install_type, InstallType::Assembly);
    assert_eq!(record.availability(InstallType::DoorstopProxy), Availability::Hidden);
}

#[test]
fn test_fresh_game_on_windows_offers_both() {
    let fixture = GameFixture::new();
    let ctx = fixture.context(HostPlatform::Windows);

    let record = detect(&ctx, None).unwrap();
    assert_eq!(record.assembly, Availability::Available);
    assert_eq!(record.proxy, Availability::Available);
    assert_eq!(record.install_type, InstallType::Assembly);

    let record = detect(&ctx, Some(InstallType::DoorstopProxy)).unwrap();
    assert_eq!(record.install_type, InstallType::DoorstopProxy);
}

#[test]
fn test_proxy_hidden_without_executable() {
    let mut fixture = GameFixture::new();
    fixture.game.game_exe = Some("Missing.exe".to_string());
    let ctx = fixture.context(HostPlatform::Windows);

    let record = detect(&ctx, Some(InstallType::DoorstopProxy)).unwrap();
    assert_eq!(record.proxy, Availability::Hidden);
    assert_eq!(record.install_type, InstallType::Assembly);
}

#[test]
fn test_injected_assembly_forces_assembly() {
    let fixture = GameFixture::new();
    patched_entry(&fixture);
    fixture.install_manager(TOOL_VERSION);
    let ctx = fixture.context(HostPlatform::Windows);

    let record = detect(&ctx, Some(InstallType::DoorstopProxy)).unwrap();

    assert!(record.has_injected_assembly);
    assert_eq!(record.install_type, InstallType::Assembly);
    assert_eq!(record.proxy, Availability::Disabled);
    assert_eq!(
        record.installed,
        Some(InstalledManager {
            version: Some(Version::new(0, 23)),
            legacy: false,
        })
    );
    assert!(!record.can_install);
    assert!(record.can_remove);
}

#[test]
fn test_older_manager_offers_update() {
    let fixture = GameFixture::new();
    patched_entry(&fixture);
    fixture.install_manager(AssemblyVersion::new(0, 21, 3, 0));
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();
    assert_eq!(
        record.installed.and_then(|m| m.version),
        Some(Version::new(0, 21))
    );
    assert!(record.can_install);
    assert!(record.can_remove);
}

#[test]
fn test_newer_manager_blocks_install() {
    let fixture = GameFixture::new();
    patched_entry(&fixture);
    fixture.install_manager(AssemblyVersion::new(1, 0, 0, 0));
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();
    assert!(!record.can_install);
}

#[test]
fn test_proxy_present_disables_assembly() {
    let fixture = GameFixture::new();
    fs::write(fixture.game_root.join(SHIM_FILE), b"shim").unwrap();
    fixture.install_manager(TOOL_VERSION);
    let ctx = fixture.context(HostPlatform::Windows);

    let record = detect(&ctx, Some(InstallType::Assembly)).unwrap();

    assert!(record.proxy_present);
    assert_eq!(record.assembly, Availability::Disabled);
    assert_eq!(record.install_type, InstallType::DoorstopProxy);
    assert!(record.installed.is_some());
    assert!(record.can_remove);
    assert!(!record.can_install);
}

#[test]
fn test_stray_shim_without_manager_can_be_removed() {
    let fixture = GameFixture::new();
    fs::write(fixture.game_root.join(SHIM_FILE), b"shim").unwrap();
    let ctx = fixture.context(HostPlatform::Windows);

    let record = detect(&ctx, None).unwrap();
    assert_eq!(record.installed, None);
    assert!(record.can_install);
    assert!(record.can_remove);
}

#[test]
fn test_manager_without_patch_is_not_installed() {
    let fixture = GameFixture::new();
    fixture.install_manager(TOOL_VERSION);
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();
    assert_eq!(record.installed, None);
    assert!(record.can_install);
    assert!(!record.can_remove);
}

#[test]
fn test_legacy_install_reads_version_constant() {
    let fixture = GameFixture::new();
    fixture.write_assembly("Assembly-CSharp.dll", &legacy_patched_module());
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();

    assert!(record.has_injected_assembly);
    assert_eq!(
        record.installed,
        Some(InstalledManager {
            version: Some(Version::new(0, 12)),
            legacy: true,
        })
    );
    assert!(!record.can_install);
    assert!(record.can_remove);
}

#[test]
fn test_patch_found_at_old_patch_target() {
    let mut fixture = GameFixture::new();
    fixture.game.old_patch_target = Some(FIRSTPASS_ENTRY.to_string());
    let mut firstpass = firstpass_module();
    patcher::inject(
        &mut firstpass,
        &EntryPointSpec::parse(FIRSTPASS_ENTRY).unwrap(),
    )
    .unwrap();
    fixture.write_assembly("Assembly-CSharp-firstpass.dll", &firstpass);
    fixture.install_manager(TOOL_VERSION);
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();

    assert!(record.migrated);
    assert!(!record.entry_point_matches);
    assert!(record.has_injected_assembly);
    assert_eq!(
        record.injected_assembly,
        ctx.managed_dir.join("Assembly-CSharp-firstpass.dll")
    );
    assert_eq!(
        record.injected_entry_point,
        "[Assembly-CSharp-firstpass.dll]Plugins.Boot.Start:After"
    );
}

#[test]
fn test_old_patch_target_ignored_when_configured_is_patched() {
    let mut fixture = GameFixture::new();
    fixture.game.old_patch_target = Some(FIRSTPASS_ENTRY.to_string());
    fixture.write_assembly("Assembly-CSharp-firstpass.dll", &firstpass_module());
    patched_entry(&fixture);
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();
    assert!(!record.migrated);
    assert!(record.entry_point_matches);
    assert_eq!(record.injected_assembly, ctx.entry_assembly);
}

#[test]
fn test_unpatched_everywhere_reports_configured_entry_point() {
    let mut fixture = GameFixture::new();
    fixture.game.old_patch_target = Some(FIRSTPASS_ENTRY.to_string());
    let ctx = fixture.context(HostPlatform::Linux);

    // the old target's assembly does not even exist
    let record = detect(&ctx, None).unwrap();
    assert!(!record.migrated);
    assert!(!record.has_injected_assembly);
    assert_eq!(record.injected_assembly, ctx.entry_assembly);
}

#[test]
fn test_recorded_entry_point_takes_precedence() {
    let fixture = GameFixture::new();
    let spec = FIRSTPASS_ENTRY;
    let mut firstpass = firstpass_module();
    patcher::inject(&mut firstpass, &EntryPointSpec::parse(spec).unwrap()).unwrap();
    fixture.write_assembly("Assembly-CSharp-firstpass.dll", &firstpass);
    fixture.install_manager(TOOL_VERSION);
    GameState {
        game: "Example".to_string(),
        entry_point: spec.to_string(),
        install_type: InstallType::Assembly,
        manager_version: Version::new(0, 23),
    }
    .save(&fixture.manager_dir().join("install.yaml"))
    .unwrap();
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();

    assert!(!record.migrated);
    assert!(!record.entry_point_matches);
    assert!(record.has_injected_assembly);
    assert_eq!(
        record.injected_assembly,
        ctx.managed_dir.join("Assembly-CSharp-firstpass.dll")
    );
}

#[test]
fn test_recorded_entry_point_with_missing_assembly_falls_back() {
    let fixture = GameFixture::new();
    patched_entry(&fixture);
    fixture.install_manager(TOOL_VERSION);
    GameState {
        game: "Example".to_string(),
        entry_point: "[Assembly-CSharp-missing.dll]Plugins.Boot.Start".to_string(),
        install_type: InstallType::Assembly,
        manager_version: Version::new(0, 23),
    }
    .save(&fixture.manager_dir().join("install.yaml"))
    .unwrap();
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();

    assert!(record.has_injected_assembly);
    assert!(record.entry_point_matches);
    assert!(record.can_remove);
    assert_eq!(record.injected_assembly, ctx.entry_assembly);
    assert_eq!(record.injected_entry_point, ENTRY_POINT);
}

#[test]
fn test_patch_found_at_old_target_in_same_assembly() {
    let mut fixture = GameFixture::new();
    let old_target = "[Assembly-CSharp.dll]MainMenu.Update:Before";
    fixture.game.old_patch_target = Some(old_target.to_string());
    let mut module = game_module();
    patcher::inject(&mut module, &EntryPointSpec::parse(old_target).unwrap()).unwrap();
    fixture.write_assembly("Assembly-CSharp.dll", &module);
    fixture.install_manager(AssemblyVersion::new(0, 20, 0, 0));
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();

    // the marker is in the configured assembly, but the call is not in Awake
    assert!(record.migrated);
    assert!(!record.entry_point_matches);
    assert_eq!(record.injected_entry_point, old_target);
    assert_eq!(record.injected_assembly, ctx.entry_assembly);
    assert!(record.can_install);
}

#[test]
fn test_manager_type_outside_manager_namespace_is_ignored() {
    let fixture = GameFixture::new();
    let mut module = game_module();
    module.add_type(TypeDef::new("Game", "ModManager"));
    fixture.write_assembly("Assembly-CSharp.dll", &module);
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();
    assert!(!record.has_injected_assembly);
    assert_eq!(record.installed, None);
    assert!(!record.can_remove);
}

#[test]
fn test_restore_original_offered_with_cache() {
    let fixture = GameFixture::new();
    let pristine = fixture.read(&fixture.entry_assembly());
    patched_entry(&fixture);
    let ctx = fixture.context(HostPlatform::Linux);
    assert!(!detect(&ctx, None).unwrap().can_restore_original);

    fs::write(original_cache_path(&fixture.entry_assembly()), pristine).unwrap();
    assert!(detect(&ctx, None).unwrap().can_restore_original);
}

#[test]
fn test_pending_backups_reported() {
    let fixture = GameFixture::new();
    fs::copy(fixture.entry_assembly(), backup_path(&fixture.entry_assembly())).unwrap();
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();
    assert_eq!(record.pending_backups, vec![backup_path(&ctx.entry_assembly)]);
}

#[test]
fn test_read_only_assembly_is_denied() {
    let fixture = GameFixture::new();
    let entry = fixture.entry_assembly();
    let mut permissions = fs::metadata(&entry).unwrap().permissions();
    permissions.set_readonly(true);
    fs::set_permissions(&entry, permissions).unwrap();
    let ctx = fixture.context(HostPlatform::Linux);

    let record = detect(&ctx, None).unwrap();
    assert!(!record.is_writable());
    assert!(record.denied.contains(&ctx.entry_assembly));
}

#[test]
fn test_unreadable_entry_assembly_fails() {
    let fixture = GameFixture::new();
    fs::write(fixture.entry_assembly(), b"not a module").unwrap();
    let ctx = fixture.context(HostPlatform::Linux);

    assert!(matches!(
        detect(&ctx, None),
        Err(crate::error::ModhookError::AssemblyLoad { .. })
    ));
}

#[test]
fn test_touched_paths_cover_everything() {
    let fixture = GameFixture::new();
    let ctx = fixture.context(HostPlatform::Windows);
    let paths = touched_paths(&ctx, &ctx.entry_assembly);

    assert!(paths.contains(&ctx.entry_assembly));
    assert!(paths.contains(&original_cache_path(&ctx.entry_assembly)));
    assert!(paths.contains(&ctx.game_state_path));
    assert!(paths.contains(&ctx.manager_assembly));
    assert!(paths.contains(&ctx.proxy.shim_path()));
    assert!(paths.contains(&ctx.proxy.config_path()));
    assert_eq!(
        paths.iter().filter(|p| **p == ctx.entry_assembly).count(),
        1
    );
}
