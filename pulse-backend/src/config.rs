use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which backend implementation to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted backend over HTTP
    Rest,
    /// Embedded SQLite database
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Remote {
    pub url: String,
    pub anon_key: String,
    pub poll_interval_secs: u64,
}

impl Remote {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Local {
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend: BackendKind,
    pub remote: Remote,
    pub local: Local,
}

impl Settings {
    /// Load `pulse.toml` from the working directory if present
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load settings from an explicit file (or `pulse.toml` in the working
    /// directory), falling back to defaults, with environment variables on top.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("backend", "local")?
            .set_default("remote.url", "http://localhost:54321")?
            .set_default("remote.anon_key", "")?
            .set_default("remote.poll_interval_secs", 5)?
            .set_default("local.database_path", "pulse.db")?;

        match config_file {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                let current_dir_path = PathBuf::from("pulse.toml");
                if current_dir_path.exists() {
                    builder = builder.add_source(File::from(current_dir_path).required(false));
                }
            }
        }

        // Environment variables have the highest priority
        if let Ok(kind) = std::env::var("PULSE_BACKEND") {
            builder = builder.set_override("backend", kind)?;
        }
        if let Ok(url) = std::env::var("PULSE_URL") {
            builder = builder.set_override("remote.url", url)?;
        }
        if let Ok(key) = std::env::var("PULSE_ANON_KEY") {
            builder = builder.set_override("remote.anon_key", key)?;
        }
        if let Ok(secs) = std::env::var("PULSE_POLL_INTERVAL_SECS") {
            builder = builder.set_override("remote.poll_interval_secs", secs)?;
        }
        if let Ok(db_path) = std::env::var("PULSE_DATABASE_PATH") {
            builder = builder.set_override("local.database_path", db_path)?;
        }

        let s = builder.build()?;
        s.try_deserialize()
    }
}
