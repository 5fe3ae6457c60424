//! Test fixtures for scratch game installations.
//!
//! [`GameFixture`] lays out a small game next to a bundle directory:
//!
//! ```text
//! <temp>/Example/Example.exe
//! <temp>/Example/Example_Data/Managed/Assembly-CSharp.dll
//! <temp>/bundle/ModManager.dll, 0Harmony.dll, dnlib.dll, System.Xml.dll
//! <temp>/bundle/version_x86.dll, version_x64.dll
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_fixtures::GameFixture;
//!
//! let fixture = GameFixture::new();
//! let ctx = fixture.context(HostPlatform::Linux);
//! let record = detect(&ctx, None).unwrap();
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::GameDefinition;
use crate::installer::libraries::MANAGER_ASSEMBLY;
use crate::installer::proxy::{SHIM_X64, SHIM_X86};
use crate::module::{AssemblyVersion, Constant, FieldDef, Instruction, MethodDef, Module, TypeDef};
use crate::patcher::{LEGACY_START, LEGACY_VERSION_FIELD, legacy_call};
use crate::state::{HostPlatform, InstallationContext};

/// Version of the bundled manager
pub const TOOL_VERSION: AssemblyVersion = AssemblyVersion::new(0, 23, 0, 0);

/// Entry point the fixture game is configured with
pub const ENTRY_POINT: &str = "[Assembly-CSharp.dll]MainMenu.Awake:After";

/// Libraries every fixture bundle ships besides the manager
const PLAIN_LIBRARIES: &[&str] = &["0Harmony.dll", "dnlib.dll", "System.Xml.dll"];

/// Smallest PE image goblin accepts: DOS header, PE signature and a COFF
/// header without optional header
pub fn pe_image(machine: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x200];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    bytes[0x80..0x84].copy_from_slice(b"PE\0\0");
    bytes[0x84..0x86].copy_from_slice(&machine.to_le_bytes());
    bytes
}

const GAME_ASSEMBLY: &[u8] = include_bytes!("../tests/fixtures/Assembly-CSharp.dll");
const FIRSTPASS_ASSEMBLY: &[u8] = include_bytes!("../tests/fixtures/Assembly-CSharp-firstpass.dll");
const MANAGER_ASSEMBLY_0_23: &[u8] = include_bytes!("../tests/fixtures/ModManager-0.23.dll");

/// Game assembly with a menu type to patch
pub fn game_module() -> Module {
    Module::load(GAME_ASSEMBLY).unwrap()
}

/// Second game assembly, used as an older patch location
pub fn firstpass_module() -> Module {
    Module::load(FIRSTPASS_ASSEMBLY).unwrap()
}

/// Game assembly patched the way legacy releases did: the whole manager type
/// copied in, with a call to its start routine at the end of `MainMenu.Awake`
pub fn legacy_patched_module() -> Module {
    let mut module = game_module();
    let mut manager = TypeDef::new("ModManager", "ModManager");
    manager.fields.push(FieldDef::constant(
        LEGACY_VERSION_FIELD,
        Constant::String("0.12.5".to_string()),
    ));
    manager
        .methods
        .push(MethodDef::new(LEGACY_START, vec![Instruction::ret()]));
    module.add_type(manager);

    let index = module.type_index("MainMenu").unwrap();
    let awake = module
        .type_at_mut(index)
        .and_then(|t| t.methods.iter_mut().find(|m| m.name == "Awake"))
        .unwrap();
    let ret = awake.body.len() - 1;
    awake.body.insert(ret, legacy_call());
    module
}

/// Manager assembly at `version`
pub fn manager_module(version: AssemblyVersion) -> Module {
    let mut module = Module::load(MANAGER_ASSEMBLY_0_23).unwrap();
    module.version = version;
    module
}

/// Scratch game directory and bundle
pub struct GameFixture {
    /// Keeps the directories alive
    pub temp: TempDir,
    pub game_root: PathBuf,
    pub bundle_dir: PathBuf,
    pub managed_dir: PathBuf,
    pub game: GameDefinition,
}

impl GameFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let game_root = temp.path().join("Example");
        let bundle_dir = temp.path().join("bundle");
        let managed_dir = game_root.join("Example_Data/Managed");
        fs::create_dir_all(&managed_dir).unwrap();
        fs::create_dir_all(&bundle_dir).unwrap();

        fs::write(game_root.join("Example.exe"), pe_image(0x8664)).unwrap();
        game_module()
            .write_file(&managed_dir.join("Assembly-CSharp.dll"))
            .unwrap();

        manager_module(TOOL_VERSION)
            .write_file(&bundle_dir.join(MANAGER_ASSEMBLY))
            .unwrap();
        for library in PLAIN_LIBRARIES {
            fs::write(bundle_dir.join(library), library.as_bytes()).unwrap();
        }
        fs::write(bundle_dir.join(SHIM_X86), b"shim x86").unwrap();
        fs::write(bundle_dir.join(SHIM_X64), b"shim x64").unwrap();

        let mut game = GameDefinition::new("Example", "Example", ENTRY_POINT);
        game.game_exe = Some("Example.exe".to_string());

        Self {
            temp,
            game_root,
            bundle_dir,
            managed_dir,
            game,
        }
    }

    pub fn context(&self, host: HostPlatform) -> InstallationContext {
        InstallationContext::build(&self.game, &self.game_root, &self.bundle_dir, host).unwrap()
    }

    pub fn entry_assembly(&self) -> PathBuf {
        self.managed_dir.join("Assembly-CSharp.dll")
    }

    pub fn manager_dir(&self) -> PathBuf {
        self.managed_dir.join("ModManager")
    }

    /// Write `module` into the managed folder under `file`
    pub fn write_assembly(&self, file: &str, module: &Module) -> PathBuf {
        let path = self.managed_dir.join(file);
        module.write_file(&path).unwrap();
        path
    }

    /// Put a manager assembly into the game as if a release had installed it
    pub fn install_manager(&self, version: AssemblyVersion) {
        fs::create_dir_all(self.manager_dir()).unwrap();
        manager_module(version)
            .write_file(&self.manager_dir().join(MANAGER_ASSEMBLY))
            .unwrap();
    }

    pub fn read(&self, path: &Path) -> Vec<u8> {
        fs::read(path).unwrap()
    }
}
