//! Configuration file handling for modhook
//!
//! This module contains data structures for:
//! - `games.yaml` - Supported game definitions shipped with the bundle
//! - `install.yaml` - Per-game installation state written into the game

pub mod game_state;
pub mod games;
pub mod schema;

// Re-export commonly used types
pub use game_state::{GAME_STATE_FILE, GameState};
pub use games::{GAMES_FILE, GameCatalog, GameDefinition};
