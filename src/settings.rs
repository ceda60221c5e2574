use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

pub const SETTINGS_FILENAME: &str = "settings.json";

/// Client and demo-backend settings. Every field has a default, so a
/// partial (or empty) `settings.json` is fine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub save_file: String,
    /// How many undo offers stay redeemable at once.
    pub undo_depth: usize,
    pub undo_duration_ms: u64,
    pub undo_label: String,
    pub stale_after_ms: u64,
    pub title_max: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            save_file: "todos.redb".to_string(),
            undo_depth: 1,
            undo_duration_ms: 5000,
            undo_label: "Undo".to_string(),
            stale_after_ms: 30_000,
            title_max: crate::world::TITLE_MAX,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| SettingsError::Io(format!("{}: {e}", path.display())))?;
        Settings::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Settings, SettingsError> {
        serde_json::from_str(content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    pub fn undo_duration(&self) -> Duration {
        Duration::from_millis(self.undo_duration_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "cannot read settings: {e}"),
            SettingsError::Parse(e) => write!(f, "cannot parse settings: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

// ── Tests ──────────────────────────────────────────────────────
