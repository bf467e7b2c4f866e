use std::sync::Arc;

use tokio::sync::watch;

use pulse_types::Theme;

use crate::error::ClientResult;
use crate::preferences::{PreferenceStore, Preferences};

/// Light/dark preference, persisted on every change
#[derive(Clone)]
pub struct ThemeStore {
    prefs: Arc<dyn PreferenceStore>,
    state: Arc<watch::Sender<Theme>>,
}

impl ThemeStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        let (state, _) = watch::channel(Theme::default());
        Self {
            prefs,
            state: Arc::new(state),
        }
    }

    /// Load the saved theme. A missing or unreadable file means light.
    pub fn initialize(&self) -> Theme {
        let theme = match self.prefs.load() {
            Ok(preferences) => preferences.theme,
            Err(e) => {
                log::warn!("Could not load preferences, using default theme: {:#}", e);
                Theme::default()
            }
        };
        self.state.send_replace(theme);
        theme
    }

    pub fn current(&self) -> Theme {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Theme> {
        self.state.subscribe()
    }

    pub fn toggle(&self) -> ClientResult<Theme> {
        let next = self.current().toggled();
        self.set(next)?;
        Ok(next)
    }

    pub fn set(&self, theme: Theme) -> ClientResult<()> {
        let mut preferences = self.prefs.load().unwrap_or_default();
        preferences.theme = theme;
        self.persist(&preferences)?;
        self.state.send_replace(theme);
        log::debug!(target: "settings", "Theme set to {}", theme.as_str());
        Ok(())
    }

    fn persist(&self, preferences: &Preferences) -> ClientResult<()> {
        self.prefs.save(preferences).map_err(|e| {
            log::error!("Error saving preferences: {:#}", e);
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::{FilePreferenceStore, MemoryPreferenceStore};
    use tempfile::TempDir;

    #[test]
    fn test_defaults_to_light() {
        let store = ThemeStore::new(Arc::new(MemoryPreferenceStore::default()));
        assert_eq!(store.initialize(), Theme::Light);
    }

    #[test]
    fn test_toggle_persists() {
        let prefs = Arc::new(MemoryPreferenceStore::default());
        let store = ThemeStore::new(prefs.clone());
        store.initialize();
        let rx = store.watch();

        assert_eq!(store.toggle().unwrap(), Theme::Dark);
        assert_eq!(*rx.borrow(), Theme::Dark);
        assert_eq!(prefs.load().unwrap().theme, Theme::Dark);

        assert_eq!(store.toggle().unwrap(), Theme::Light);
    }

    #[test]
    fn test_theme_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let store = ThemeStore::new(Arc::new(FilePreferenceStore::in_dir(temp_dir.path())));
        store.set(Theme::Dark).unwrap();

        let reopened = ThemeStore::new(Arc::new(FilePreferenceStore::in_dir(temp_dir.path())));
        assert_eq!(reopened.initialize(), Theme::Dark);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_light() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = FilePreferenceStore::in_dir(temp_dir.path());
        std::fs::write(prefs.path(), "{broken").unwrap();

        let store = ThemeStore::new(Arc::new(prefs));
        assert_eq!(store.initialize(), Theme::Light);
        store.set(Theme::Dark).unwrap();
        assert_eq!(store.current(), Theme::Dark);
    }
}
