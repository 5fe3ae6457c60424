//! Tests for the module model and image codec

use super::*;

const GAME: &[u8] = include_bytes!("../../tests/fixtures/Assembly-CSharp.dll");
const MANAGER: &[u8] = include_bytes!("../../tests/fixtures/ModManager-0.23.dll");

fn game() -> Module {
    Module::load(GAME).unwrap()
}

fn method<'m>(module: &'m Module, ty: &str, name: &str) -> &'m MethodDef {
    module
        .find_type(ty)
        .and_then(|t| t.find_method(name))
        .unwrap()
}

fn method_mut<'m>(module: &'m mut Module, ty: &str, name: &str) -> &'m mut MethodDef {
    let index = module.type_index(ty).unwrap();
    let ty = module.type_at_mut(index).unwrap();
    let method = ty.method_index(name).unwrap();
    &mut ty.methods[method]
}

fn reload(module: &Module) -> Module {
    Module::load(&module.write().unwrap()).unwrap()
}

fn quit() -> Instruction {
    Instruction::call(MemberRef::new("UnityEngine.Application", "Quit"))
}

fn loader_run() -> Instruction {
    Instruction::call(MemberRef::new("ModManager.Injection.Loader", "Run"))
}

#[test]
fn test_load_reads_types_and_bodies() {
    let module = game();

    assert_eq!(module.name, "Assembly-CSharp");
    assert_eq!(module.version, AssemblyVersion::new(1, 0, 0, 0));
    let names: Vec<String> = module.types().iter().map(TypeDef::full_name).collect();
    assert_eq!(names, vec!["MainMenu", "Game.Bootstrap", "Game.Settings"]);

    assert_eq!(
        method(&module, "MainMenu", "Awake").body,
        vec![
            Instruction::ldstr("menu"),
            Instruction::call(MemberRef::new("UnityEngine.Debug", "Log")),
            Instruction::ret(),
        ]
    );
    assert!(method(&module, "Game.Settings", "Load").body.is_empty());
}

#[test]
fn test_load_reads_branches_as_offsets() {
    let module = game();

    assert_eq!(
        method(&module, "MainMenu", "OnGUI").body,
        vec![
            Instruction::new(OpCode::LDARG_0, Operand::None),
            Instruction::new(OpCode::BRFALSE_S, Operand::Branch(8)),
            quit(),
            Instruction::ret(),
        ]
    );
}

#[test]
fn test_constant_string_reads_field() {
    let module = game();
    let settings = module.find_type("Game.Settings").unwrap();

    assert_eq!(settings.constant_string("Profile").as_deref(), Some("default"));
    assert_eq!(settings.constant_string("missing"), None);
}

#[test]
fn test_load_rejects_non_cli_image() {
    assert!(Module::load(b"MZ\x90\x00\x03\x00").is_err());
    assert!(Module::load(&GAME[..GAME.len() / 2]).is_err());
}

#[test]
fn test_unchanged_module_writes_source_bytes() {
    assert_eq!(game().write().unwrap(), GAME);
    assert_eq!(Module::load(MANAGER).unwrap().write().unwrap(), MANAGER);
}

#[test]
fn test_version_change_round_trips() {
    let mut module = Module::load(MANAGER).unwrap();
    module.version = AssemblyVersion::new(0, 20, 0, 0);

    let reloaded = reload(&module);
    assert_eq!(reloaded.version, AssemblyVersion::new(0, 20, 0, 0));
    assert_eq!(reloaded.types(), module.types());
}

#[test]
fn test_inserted_call_references_other_assembly() {
    let mut module = game();
    method_mut(&mut module, "MainMenu", "Awake")
        .body
        .insert(0, loader_run());

    let reloaded = reload(&module);
    let awake = method(&reloaded, "MainMenu", "Awake");
    assert_eq!(awake.body.len(), 4);
    assert_eq!(awake.body[0], loader_run());

    let Operand::Method(target) = &awake.body[0].operand else {
        panic!("expected a method operand");
    };
    assert_eq!(target.import.get().map(|i| i.scope.as_str()), Some("ModManager"));
    // untouched methods are unchanged
    assert_eq!(
        method(&reloaded, "MainMenu", "OnDestroy"),
        method(&module, "MainMenu", "OnDestroy")
    );
}

#[test]
fn test_insert_before_branch_target_is_skipped_by_branch() {
    let mut module = game();
    // before the final ret, which the brfalse.s jumps to
    method_mut(&mut module, "MainMenu", "OnGUI")
        .body
        .insert(3, loader_run());

    let reloaded = reload(&module);
    assert_eq!(
        method(&reloaded, "MainMenu", "OnGUI").body,
        vec![
            Instruction::new(OpCode::LDARG_0, Operand::None),
            Instruction::new(OpCode::BRFALSE_S, Operand::Branch(13)),
            quit(),
            loader_run(),
            Instruction::ret(),
        ]
    );
}

#[test]
fn test_insert_after_finally_keeps_clause() {
    let mut module = game();
    let on_destroy = method_mut(&mut module, "MainMenu", "OnDestroy");
    let ret = on_destroy.body.len() - 1;
    on_destroy.body.insert(ret, loader_run());

    let reloaded = reload(&module);
    let on_destroy = method(&reloaded, "MainMenu", "OnDestroy");
    assert_eq!(
        on_destroy.body[2],
        Instruction::new(OpCode::LEAVE_S, Operand::Branch(19))
    );
    let clause = on_destroy.info.get().unwrap().clauses[0];
    assert_eq!(
        (
            clause.try_offset,
            clause.try_length,
            clause.handler_offset,
            clause.handler_length
        ),
        (1, 7, 8, 6)
    );
}

#[test]
fn test_insert_at_start_shifts_clause() {
    let mut module = game();
    method_mut(&mut module, "MainMenu", "OnDestroy")
        .body
        .insert(0, loader_run());

    let reloaded = reload(&module);
    let on_destroy = method(&reloaded, "MainMenu", "OnDestroy");
    assert_eq!(on_destroy.body[0], loader_run());
    assert_eq!(
        on_destroy.body[3],
        Instruction::new(OpCode::LEAVE_S, Operand::Branch(19))
    );
    let clause = on_destroy.info.get().unwrap().clauses[0];
    assert_eq!(
        (
            clause.try_offset,
            clause.try_length,
            clause.handler_offset,
            clause.handler_length
        ),
        (6, 7, 13, 6)
    );
}

#[test]
fn test_body_added_to_method_without_one() {
    let mut module = game();
    method_mut(&mut module, "Game.Settings", "Load").body = vec![loader_run(), Instruction::ret()];

    let reloaded = reload(&module);
    assert_eq!(
        method(&reloaded, "Game.Settings", "Load").body,
        vec![loader_run(), Instruction::ret()]
    );
}

#[test]
fn test_added_type_round_trips() {
    let mut module = game();
    let mut extra = TypeDef::new("Game", "Extra");
    extra.fields.push(FieldDef::constant(
        "Tag",
        Constant::String("release".to_string()),
    ));
    extra
        .fields
        .push(FieldDef::constant("Count", Constant::Int32(42)));
    extra.methods.push(MethodDef::new(
        "Run",
        vec![
            Instruction::call(MemberRef::new("Game.Bootstrap", "Main")),
            Instruction::call(MemberRef::new("Game.Extra", "Helper")),
            Instruction::ret(),
        ],
    ));
    extra
        .methods
        .push(MethodDef::new("Helper", vec![Instruction::ret()]));
    assert!(module.add_type(extra.clone()));

    let reloaded = reload(&module);
    assert_eq!(reloaded.types().len(), 4);
    assert_eq!(reloaded.find_type("Game.Extra"), Some(&extra));
    assert_eq!(
        reloaded
            .find_type("Game.Extra")
            .and_then(|t| t.constant_string("Count"))
            .as_deref(),
        Some("42")
    );
}

#[test]
fn test_type_copied_from_another_module() {
    let manager = Module::load(MANAGER).unwrap();
    let loader = manager
        .find_type("ModManager.Injection.Loader")
        .unwrap()
        .clone();

    let mut module = game();
    module.add_type(loader.clone());

    let reloaded = reload(&module);
    assert_eq!(
        reloaded.find_type("ModManager.Injection.Loader"),
        Some(&loader)
    );
}

#[test]
fn test_removing_added_type_restores_model() {
    let mut module = game();
    let mut marker = TypeDef::new("Game", "Marker");
    marker
        .fields
        .push(FieldDef::constant("Version", Constant::String("1".to_string())));
    marker
        .methods
        .push(MethodDef::new("Start", vec![Instruction::ret()]));
    module.add_type(marker);
    let mut patched = reload(&module);

    assert!(patched.remove_type("Game.Marker").is_some());
    let restored = reload(&patched);
    assert_eq!(restored, game());
}

#[test]
fn test_replace_added_type_in_one_write() {
    let mut module = game();
    module.add_type(TypeDef::new("Game", "Marker"));
    let mut patched = reload(&module);

    patched.remove_type("Game.Marker");
    let mut replacement = TypeDef::new("Game", "Marker");
    replacement
        .methods
        .push(MethodDef::new("Start", vec![Instruction::ret()]));
    patched.add_type(replacement.clone());

    let reloaded = reload(&patched);
    assert_eq!(reloaded.find_type("Game.Marker"), Some(&replacement));
    assert_eq!(reloaded.types().len(), 4);
}

#[test]
fn test_removing_original_type_is_unsupported() {
    let mut module = game();
    module.remove_type("MainMenu");

    assert!(matches!(module.write(), Err(ImageError::Unsupported(_))));
}

#[test]
fn test_renaming_existing_type_is_unsupported() {
    let mut module = game();
    module.type_at_mut(0).unwrap().name = "TitleMenu".to_string();

    assert!(matches!(module.write(), Err(ImageError::Unsupported(_))));
}

#[test]
fn test_add_type_rejects_duplicate_name() {
    let mut module = game();
    let before = module.types().len();

    assert!(!module.add_type(TypeDef::new("Game", "Bootstrap")));
    assert_eq!(module.types().len(), before);
}

#[test]
fn test_lookup_by_full_name() {
    let module = game();

    assert!(module.find_type("Game.Bootstrap").is_some());
    assert!(module.find_type("Bootstrap").is_none());
    assert_eq!(module.type_index("Game.Settings"), Some(2));
}

#[test]
fn test_position_of_matches_opcode_and_operand() {
    let module = game();
    let awake = method(&module, "MainMenu", "Awake");

    let log = Instruction::call(MemberRef::new("UnityEngine.Debug", "Log"));
    assert_eq!(awake.position_of(&log), Some(1));
    assert_eq!(awake.position_of(&quit()), None);
}

#[test]
fn test_file_round_trip() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("Assembly-CSharp.dll");

    let mut module = game();
    method_mut(&mut module, "MainMenu", "Update")
        .body
        .insert(0, loader_run());
    module.write_file(&path).unwrap();
    assert_eq!(Module::load_file(&path).unwrap(), module);
}

#[test]
fn test_load_file_missing() {
    let temp = tempfile::TempDir::new().unwrap();
    let err = Module::load_file(&temp.path().join("missing.dll")).unwrap_err();
    assert!(matches!(err, crate::error::ModhookError::AssemblyLoad { .. }));
}
