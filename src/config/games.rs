//! Game definitions (games.yaml)
//!
//! The bundle ships one `games.yaml` listing every supported game:
//!
//! ```yaml
//! games:
//!   - name: Example Game
//!     folder: ExampleGame
//!     mods_directory: Mods
//!     entry_point: "[Assembly-CSharp.dll]GameManager.Awake:After"
//!     old_patch_target: "[Assembly-CSharp.dll]MainMenu.Start:Before"
//!     game_exe: "ExampleGame*.exe"
//!     minimal_manager_version: "0.22"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entry_point::EntryPointSpec;
use crate::error::{self, Result};
use crate::state::version::Version;

use super::schema;

/// File name of the game definitions inside the bundle
pub const GAMES_FILE: &str = "games.yaml";

fn default_mods_directory() -> String {
    "Mods".to_string()
}

/// One supported game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDefinition {
    /// Display name, also used to select the game
    pub name: String,

    /// Install folder name under the platform's game library
    pub folder: String,

    /// Mods folder relative to the game root
    #[serde(default = "default_mods_directory")]
    pub mods_directory: String,

    /// Where the bootstrap call is injected
    pub entry_point: String,

    /// Entry point used by older releases of the game
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_patch_target: Option<String>,

    /// Executable name or glob in the game root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_exe: Option<String>,

    /// Lowest manager version the game supports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimal_manager_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl GameDefinition {
    pub fn new(
        name: impl Into<String>,
        folder: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            folder: folder.into(),
            mods_directory: default_mods_directory(),
            entry_point: entry_point.into(),
            old_patch_target: None,
            game_exe: None,
            minimal_manager_version: None,
            comment: None,
        }
    }

    /// Value of a field by its schema identifier
    pub fn field(&self, id: &str) -> Option<&str> {
        match id {
            "name" => Some(&self.name),
            "folder" => Some(&self.folder),
            "mods_directory" => Some(&self.mods_directory),
            "entry_point" => Some(&self.entry_point),
            "old_patch_target" => self.old_patch_target.as_deref(),
            "game_exe" => self.game_exe.as_deref(),
            "minimal_manager_version" => self.minimal_manager_version.as_deref(),
            "comment" => self.comment.as_deref(),
            _ => None,
        }
    }

    /// Check every field against the schema
    ///
    /// # Errors
    /// Returns [`crate::error::ModhookError::ConfigInvalid`] listing every violation.
    pub fn validate(&self) -> Result<()> {
        let problems = schema::violations(self);
        if problems.is_empty() {
            return Ok(());
        }
        let label = if self.name.trim().is_empty() {
            "?"
        } else {
            self.name.as_str()
        };
        Err(error::config::invalid(format!(
            "[{label}] {}",
            problems.join(", ")
        )))
    }

    pub fn entry_point(&self) -> Result<EntryPointSpec> {
        EntryPointSpec::parse(&self.entry_point)
    }

    pub fn old_patch_target(&self) -> Result<Option<EntryPointSpec>> {
        self.old_patch_target
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(EntryPointSpec::parse)
            .transpose()
    }

    /// Declared minimal manager version; games without one are assumed current
    pub fn minimal_manager_version(&self) -> Version {
        self.minimal_manager_version
            .as_deref()
            .and_then(Version::parse)
            .unwrap_or(crate::state::version::LEGACY_LIBRARIES_BEFORE)
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct GamesFile {
    #[serde(default)]
    games: Vec<GameDefinition>,
}

/// All game definitions from one games.yaml
#[derive(Debug, Clone, Default)]
pub struct GameCatalog {
    games: Vec<GameDefinition>,
}

impl GameCatalog {
    /// Parse and validate a games.yaml document
    ///
    /// Games are kept sorted by name.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: GamesFile = serde_yaml::from_str(yaml)?;
        let mut games = file.games;

        for game in &games {
            game.validate()?;
        }

        games.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = games.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(error::config::invalid(format!(
                "game '{}' is defined more than once",
                pair[0].name
            )));
        }

        Ok(Self { games })
    }

    /// Load games.yaml from disk
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(error::config::not_found(path.display().to_string()));
        }
        let yaml = fs::read_to_string(path)
            .map_err(|e| error::fs::read_failed(path.display().to_string(), e.to_string()))?;
        Self::from_yaml(&yaml).map_err(|e| match e {
            crate::error::ModhookError::ConfigParseFailed { reason, .. } => {
                error::config::parse_failed(path.display().to_string(), reason)
            }
            other => other,
        })
    }

    pub fn games(&self) -> &[GameDefinition] {
        &self.games
    }

    /// Find a game by name, ignoring ASCII case
    pub fn find(&self, name: &str) -> Result<&GameDefinition> {
        self.games
            .iter()
            .find(|g| g.name == name)
            .or_else(|| self.games.iter().find(|g| g.name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| error::config::game_not_found(name))
    }

    /// Game installed under a folder called `folder`, ignoring ASCII case
    pub fn find_by_folder(&self, folder: &str) -> Option<&GameDefinition> {
        self.games
            .iter()
            .find(|g| g.folder.eq_ignore_ascii_case(folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModhookError;

    const GAMES_YAML: &str = r#"
games:
  - name: Zeta Racing
    folder: ZetaRacing
    entry_point: "ZetaRacing.Boot.Start"
  - name: Example Game
    folder: ExampleGame
    mods_directory: Plugins
    entry_point: "[Assembly-CSharp.dll]GameManager.Awake:After"
    old_patch_target: "[Assembly-CSharp.dll]MainMenu.Start:Before"
    game_exe: "ExampleGame*.exe"
    minimal_manager_version: "0.21"
    comment: needs the old Harmony
"#;

    #[test]
    fn test_from_yaml_sorts_by_name() {
        let catalog = GameCatalog::from_yaml(GAMES_YAML).unwrap();
        let names: Vec<_> = catalog.games().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Example Game", "Zeta Racing"]);
    }

    #[test]
    fn test_defaults() {
        let catalog = GameCatalog::from_yaml(GAMES_YAML).unwrap();
        let zeta = catalog.find("Zeta Racing").unwrap();
        assert_eq!(zeta.mods_directory, "Mods");
        assert_eq!(zeta.old_patch_target().unwrap(), None);
        assert_eq!(zeta.minimal_manager_version(), Version::new(0, 22));
    }

    #[test]
    fn test_typed_accessors() {
        let catalog = GameCatalog::from_yaml(GAMES_YAML).unwrap();
        let game = catalog.find("example game").unwrap();

        assert_eq!(game.entry_point().unwrap().method(), "Awake");
        assert_eq!(
            game.old_patch_target().unwrap().unwrap().type_name(),
            "MainMenu"
        );
        assert_eq!(game.minimal_manager_version(), Version::new(0, 21));
    }

    #[test]
    fn test_find_unknown_game() {
        let catalog = GameCatalog::from_yaml(GAMES_YAML).unwrap();
        assert!(matches!(
            catalog.find("Missing"),
            Err(ModhookError::GameNotFound { .. })
        ));
    }

    #[test]
    fn test_find_by_folder() {
        let catalog = GameCatalog::from_yaml(GAMES_YAML).unwrap();
        assert_eq!(
            catalog.find_by_folder("examplegame").map(|g| g.name.as_str()),
            Some("Example Game")
        );
        assert!(catalog.find_by_folder("Elsewhere").is_none());
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let yaml = r#"
games:
  - name: Broken
    folder: ""
    entry_point: "NoDot"
    minimal_manager_version: "soon"
"#;
        let err = GameCatalog::from_yaml(yaml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("[Broken]"));
        assert!(message.contains("folder is empty"));
        assert!(message.contains("entry_point is not a valid entry point"));
        assert!(message.contains("minimal_manager_version is not a valid version"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
games:
  - name: Twin
    folder: A
    entry_point: "A.Main"
  - name: Twin
    folder: B
    entry_point: "B.Main"
"#;
        assert!(matches!(
            GameCatalog::from_yaml(yaml),
            Err(ModhookError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = GameCatalog::load(&temp.path().join(GAMES_FILE)).unwrap_err();
        assert!(matches!(err, ModhookError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_parse_error_names_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(GAMES_FILE);
        fs::write(&path, "games: [unterminated").unwrap();

        let err = GameCatalog::load(&path).unwrap_err();
        match err {
            ModhookError::ConfigParseFailed { path: p, .. } => assert!(p.ends_with(GAMES_FILE)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
