//! Common test utilities for modhook integration tests
//!
//! Builds a scratch game next to a bundle directory. Assemblies come from
//! `tests/fixtures`, written by `tests/fixtures/generate.py`.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

pub const GAMES_YAML: &str = r#"
games:
  - name: Example
    folder: Example
    entry_point: "[Assembly-CSharp.dll]MainMenu.Awake:After"
    game_exe: Example.exe
  - name: Other Game
    folder: Other
    entry_point: "Other.Boot.Start:Before"
    comment: ships its own loader
"#;

/// Libraries every bundle ships besides the manager
pub const LIBRARIES: &[&str] = &["0Harmony.dll", "dnlib.dll", "System.Xml.dll"];

/// `MainMenu` with `Awake` and friends, plus a few `Game` types
pub const GAME_ASSEMBLY: &[u8] = include_bytes!("../fixtures/Assembly-CSharp.dll");

/// A second, unrelated game assembly
#[allow(dead_code)]
pub const FIRSTPASS_ASSEMBLY: &[u8] = include_bytes!("../fixtures/Assembly-CSharp-firstpass.dll");

#[allow(dead_code)]
pub const MANAGER_0_21: &[u8] = include_bytes!("../fixtures/ModManager-0.21.dll");
pub const MANAGER_0_23: &[u8] = include_bytes!("../fixtures/ModManager-0.23.dll");

/// Smallest x64 PE header goblin accepts
pub fn pe_image_x64() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x200];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    bytes[0x80..0x84].copy_from_slice(b"PE\0\0");
    bytes[0x84..0x86].copy_from_slice(&0x8664u16.to_le_bytes());
    bytes
}

/// A scratch game installation with a bundle next to it
#[allow(dead_code)]
pub struct TestGame {
    /// Temporary directory
    pub temp: TempDir,
    /// Game root
    pub root: PathBuf,
    pub bundle: PathBuf,
    pub managed: PathBuf,
}

#[allow(dead_code)]
impl TestGame {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let root = temp.path().join("Example");
        let bundle = temp.path().join("bundle");
        let managed = root.join("Example_Data").join("Managed");
        fs::create_dir_all(&managed).expect("Failed to create managed directory");
        fs::create_dir_all(&bundle).expect("Failed to create bundle directory");

        fs::write(root.join("Example.exe"), pe_image_x64()).expect("Failed to write exe");
        fs::write(managed.join("Assembly-CSharp.dll"), GAME_ASSEMBLY)
            .expect("Failed to write assembly");

        fs::write(bundle.join("games.yaml"), GAMES_YAML).expect("Failed to write games.yaml");
        fs::write(bundle.join("ModManager.dll"), MANAGER_0_23)
            .expect("Failed to write manager");
        for library in LIBRARIES {
            fs::write(bundle.join(library), library.as_bytes()).expect("Failed to write library");
        }
        fs::write(bundle.join("version_x86.dll"), b"shim x86").expect("Failed to write shim");
        fs::write(bundle.join("version_x64.dll"), b"shim x64").expect("Failed to write shim");

        Self {
            temp,
            root,
            bundle,
            managed,
        }
    }

    /// modhook pointed at this game, acting as a Linux host
    #[allow(deprecated)]
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("modhook").expect("Failed to find modhook binary");
        cmd.env_remove("RUST_LOG");
        cmd.env("MODHOOK_GAME_DIR", &self.root);
        cmd.env("MODHOOK_BUNDLE_DIR", &self.bundle);
        cmd.env("MODHOOK_HOST", "linux");
        cmd
    }

    /// Same as [`cmd`](Self::cmd) but acting as a Windows host
    pub fn windows_cmd(&self) -> Command {
        let mut cmd = self.cmd();
        cmd.env("MODHOOK_HOST", "windows");
        cmd
    }

    pub fn entry_assembly(&self) -> PathBuf {
        self.managed.join("Assembly-CSharp.dll")
    }

    pub fn manager_dir(&self) -> PathBuf {
        self.managed.join("ModManager")
    }

    pub fn read(&self, path: &Path) -> Vec<u8> {
        fs::read(path).expect("Failed to read file")
    }

    /// Detected state as printed by `status --json`
    pub fn status(&self) -> serde_json::Value {
        let output = self
            .cmd()
            .args(["status", "--json"])
            .output()
            .expect("Failed to run status");
        assert!(output.status.success(), "status failed: {output:?}");
        serde_json::from_slice(&output.stdout).expect("Failed to parse status")
    }

    pub fn is_patched(&self) -> bool {
        self.status()["has_injected_assembly"] == true
    }

    /// Every `.backup_` file anywhere in the game
    pub fn backups(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).expect("Failed to read directory") {
                let path = entry.expect("Failed to read entry").path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.to_string_lossy().ends_with(".backup_") {
                    found.push(path);
                }
            }
        }
        found
    }

    pub fn make_readonly(&self, path: &Path) {
        let mut permissions = fs::metadata(path).expect("Failed to stat").permissions();
        permissions.set_readonly(true);
        fs::set_permissions(path, permissions).expect("Failed to set permissions");
    }
}
