use anyhow::{Context, Result};
use pulse_types::Theme;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Preferences persisted on this device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub theme: Theme,
}

/// Where preferences are kept
pub trait PreferenceStore: Send + Sync {
    /// Stored preferences, or defaults when nothing was saved yet
    fn load(&self) -> Result<Preferences>;

    fn save(&self, preferences: &Preferences) -> Result<()>;
}

/// JSON file, `~/.pulse/preferences.json` by default
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    file_path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new() -> Result<Self> {
        Ok(Self::in_dir(crate::session::state_dir()?))
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            file_path: dir.as_ref().join("preferences.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> Result<Preferences> {
        if !self.file_path.exists() {
            return Ok(Preferences::default());
        }

        let json = fs::read_to_string(&self.file_path).context("Failed to read preferences file")?;
        let preferences = serde_json::from_str(&json).context("Failed to parse preferences")?;
        Ok(preferences)
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent).context("Failed to create .pulse directory")?;
        }

        let json = serde_json::to_string_pretty(preferences).context("Failed to serialize preferences")?;
        fs::write(&self.file_path, json).context("Failed to write preferences file")?;
        Ok(())
    }
}

/// Preferences that live only as long as the process
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    preferences: Mutex<Preferences>,
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Preferences> {
        Ok(self
            .preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        *self.preferences.lock().unwrap_or_else(PoisonError::into_inner) = preferences.clone();
        Ok(())
    }
}
