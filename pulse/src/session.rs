use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory under the home directory holding client state
pub const STATE_DIR: &str = ".pulse";

/// `~/.pulse`, created on demand by the stores that write into it
pub fn state_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir().context("Failed to determine home directory")?;
    Ok(home_dir.join(STATE_DIR))
}

/// Stores the backend access token between runs.
///
/// The token lives in `~/.pulse/session` with 0600 permissions so only the
/// owner can read it.
#[derive(Debug, Clone)]
pub struct SessionStore {
    file_path: PathBuf,
}

impl SessionStore {
    /// Store at the default path `~/.pulse/session`
    pub fn new() -> Result<Self> {
        Ok(Self::in_dir(state_dir()?))
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            file_path: dir.as_ref().join("session"),
        }
    }

    /// Load the stored token.
    ///
    /// Returns `Ok(None)` when there is no file or its content cannot be a
    /// token (empty, wrong length, control characters).
    pub fn load(&self) -> Result<Option<String>> {
        if !self.file_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).context("Failed to read session file")?;
        let token = content.trim();

        if token.is_empty() {
            log::warn!("Session file is empty, treating as no session");
            return Ok(None);
        }

        // Access tokens range from 32-char hex to ~1 KiB JWTs
        if token.len() < 8 || token.len() > 4096 {
            log::warn!("Session token has invalid length: {}, treating as corrupted", token.len());
            return Ok(None);
        }

        if token.chars().any(|c| c.is_control()) {
            log::warn!("Session file contains control characters, treating as corrupted");
            return Ok(None);
        }

        log::debug!("Loaded session token from {}", self.file_path.display());
        Ok(Some(token.to_string()))
    }

    /// Save the token atomically with 0600 permissions, removing stale
    /// session files left by earlier runs.
    pub fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent).context("Failed to create .pulse directory")?;
        }

        self.cleanup_old_files()?;

        let temp_path = self.file_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).context("Failed to create temporary session file")?;
        file.write_all(token.as_bytes())
            .context("Failed to write session token")?;
        file.sync_all().context("Failed to sync session file to disk")?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&temp_path, permissions)
                .context("Failed to set session file permissions")?;
        }

        fs::rename(&temp_path, &self.file_path).context("Failed to rename temporary session file")?;

        log::info!("Saved session token to {}", self.file_path.display());
        Ok(())
    }

    /// Remove the token. Succeeds when there is nothing to remove.
    pub fn delete(&self) -> Result<()> {
        if self.file_path.exists() {
            fs::remove_file(&self.file_path).context("Failed to delete session file")?;
            log::info!("Deleted session file at {}", self.file_path.display());
        } else {
            log::debug!("Session file does not exist, nothing to delete");
        }
        Ok(())
    }

    fn cleanup_old_files(&self) -> Result<()> {
        let Some(parent) = self.file_path.parent() else {
            return Ok(());
        };
        if !parent.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(parent).context("Failed to read .pulse directory")? {
            let path = entry.context("Failed to read directory entry")?.path();
            if path == self.file_path {
                continue;
            }

            let is_stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with("session"))
                .unwrap_or(false);
            if is_stale {
                log::debug!("Removing stale session file: {}", path.display());
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("Failed to remove stale session file {}: {}", path.display(), e);
                }
            }
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}
