//! Persistent daemon settings.
//!
//! Handles loading, saving and hot-reloading of the YAML settings file that
//! carries the active feedback profile, the theme name and per-application
//! profile overrides.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::sync::RwLock;

/// Feedback profile level.
///
/// Levels are ordered: `Silent < Quiet < Full`. A lower level selects fewer
/// theme slices, see [`crate::theme::Theme::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Silent,
    Quiet,
    Full,
}

impl Level {
    /// Profile slices consulted for this level, most specific first.
    pub fn slices(self) -> &'static [Level] {
        match self {
            Level::Full => &[Level::Full, Level::Quiet, Level::Silent],
            Level::Quiet => &[Level::Quiet, Level::Silent],
            Level::Silent => &[Level::Silent],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Full => "full",
            Level::Quiet => "quiet",
            Level::Silent => "silent",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Level::Full),
            "quiet" => Ok(Level::Quiet),
            "silent" => Ok(Level::Silent),
            _ => Err(()),
        }
    }
}

/// Per-application settings subtree, keyed by the munged application id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    /// Profile override for this application. Can only lower the level.
    #[serde(default)]
    pub profile: Option<Level>,
}

/// Daemon settings as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Active feedback profile.
    #[serde(default = "defaults::profile")]
    pub profile: Level,

    /// Name of the feedback theme to load.
    #[serde(default = "defaults::theme")]
    pub theme: String,

    /// Sound theme consulted when resolving event sounds.
    #[serde(default = "defaults::sound_theme")]
    pub sound_theme: String,

    /// Application ids allowed to use the `important` hint. When absent every
    /// application may use it.
    #[serde(default, rename = "allow-important")]
    pub allow_important: Option<Vec<String>>,

    /// Per-application overrides, keyed by munged app id.
    #[serde(default)]
    pub applications: HashMap<String, AppSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: defaults::profile(),
            theme: defaults::theme(),
            sound_theme: defaults::sound_theme(),
            allow_important: None,
            applications: HashMap::new(),
        }
    }
}

mod defaults {
    use super::Level;

    pub fn profile() -> Level {
        Level::Full
    }

    pub fn theme() -> String {
        "default".to_string()
    }

    pub fn sound_theme() -> String {
        "freedesktop".to_string()
    }
}

/// Maps an application id onto the restricted character set used for settings
/// keys. Anything outside `[0-9a-zA-Z-]` becomes `-`, the result is lowercased.
pub fn munge_app_id(app_id: &str) -> String {
    app_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn locate_settings() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("FEEDBACKD_SETTINGS") {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("feedbackd/settings.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/feedbackd/settings.yml");
    if etc.exists() {
        return Some(etc.to_path_buf());
    }

    None
}

/// Settings store that owns the settings data and its file location.
///
/// Cheap to clone; all clones share the same in-memory settings.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings: Arc<RwLock<Settings>>,
    path: PathBuf,
}

impl SettingsManager {
    pub fn new(settings: Settings, path: PathBuf) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            path,
        }
    }

    /// Loads settings from the given path or the standard locations.
    ///
    /// A missing settings file is not an error; the defaults apply and the
    /// file is created on the first save.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path.or_else(locate_settings) {
            Some(p) => p,
            None => {
                let fallback = env::var_os("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
                    .unwrap_or_else(|| PathBuf::from("/etc"))
                    .join("feedbackd/settings.yml");
                info!("No settings file found, using defaults");
                return Ok(Self::new(Settings::default(), fallback));
            }
        };

        info!("Loading settings from: {}", path.display());
        let settings = Self::load_from_path(&path)?;
        Ok(Self::new(settings, path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a snapshot of the current settings.
    pub async fn snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Reloads settings from disk, returning the previous state.
    pub async fn reload(&self) -> Result<Settings> {
        let new = Self::load_from_path(&self.path)?;
        let mut guard = self.settings.write().await;
        let old = std::mem::replace(&mut *guard, new);
        Ok(old)
    }

    /// Persists the current settings atomically (write to tmp, then rename).
    pub async fn save(&self) -> Result<()> {
        let settings = self.settings.read().await;
        let yaml = serde_yaml::to_string(&*settings).context("Failed to serialize settings")?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("yml.tmp");
        fs::write(&tmp, yaml)
            .with_context(|| format!("Failed to write temporary settings to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move settings to {}", self.path.display()))?;

        Ok(())
    }

    /// Updates the stored profile and saves. Returns `false` when the level
    /// was already active.
    pub async fn set_profile(&self, level: Level) -> Result<bool> {
        {
            let mut guard = self.settings.write().await;
            if guard.profile == level {
                return Ok(false);
            }
            guard.profile = level;
        }
        self.save().await?;
        Ok(true)
    }

    pub async fn profile(&self) -> Level {
        self.settings.read().await.profile
    }

    pub async fn theme_name(&self) -> String {
        self.settings.read().await.theme.clone()
    }

    pub async fn sound_theme(&self) -> String {
        self.settings.read().await.sound_theme.clone()
    }

    /// Profile override for an application, `Full` when none is set.
    pub async fn app_level(&self, app_id: &str) -> Level {
        let key = munge_app_id(app_id);
        self.settings
            .read()
            .await
            .applications
            .get(&key)
            .and_then(|app| app.profile)
            .unwrap_or(Level::Full)
    }

    /// Whether the application may use the `important` hint.
    pub async fn allows_important(&self, app_id: &str) -> bool {
        match &self.settings.read().await.allow_important {
            None => true,
            Some(apps) => apps.iter().any(|a| a == app_id),
        }
    }

    fn load_from_path(path: &Path) -> Result<Settings> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_settings(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn level_ordering() {
        assert!(Level::Silent < Level::Quiet);
        assert!(Level::Quiet < Level::Full);
    }

    #[test]
    fn level_slices() {
        assert_eq!(Level::Full.slices(), &[Level::Full, Level::Quiet, Level::Silent]);
        assert_eq!(Level::Quiet.slices(), &[Level::Quiet, Level::Silent]);
        assert_eq!(Level::Silent.slices(), &[Level::Silent]);
    }

    #[test]
    fn level_roundtrip() {
        for level in [Level::Full, Level::Quiet, Level::Silent] {
            assert_eq!(level.as_str().parse::<Level>().unwrap(), level);
        }
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn munges_app_ids() {
        assert_eq!(munge_app_id("org.example.Phone"), "org-example-phone");
        assert_eq!(munge_app_id("plain-id"), "plain-id");
        assert_eq!(munge_app_id("space cadet!"), "space-cadet-");
    }

    #[tokio::test]
    async fn loads_settings_file() {
        let file = write_settings(
            r#"
profile: quiet
theme: pine64-pinephone
allow-important:
  - org.example.alarm
applications:
  org-example-mail:
    profile: silent
"#,
        );

        let manager = SettingsManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(manager.profile().await, Level::Quiet);
        assert_eq!(manager.theme_name().await, "pine64-pinephone");
        assert_eq!(manager.app_level("org.example.Mail").await, Level::Silent);
        assert_eq!(manager.app_level("org.example.other").await, Level::Full);
        assert!(manager.allows_important("org.example.alarm").await);
        assert!(!manager.allows_important("org.example.mail").await);
    }

    #[tokio::test]
    async fn defaults_when_missing_keys() {
        let file = write_settings("profile: full\n");
        let manager = SettingsManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(manager.theme_name().await, "default");
        assert_eq!(manager.sound_theme().await, "freedesktop");
        assert!(manager.allows_important("anyone").await);
    }

    #[tokio::test]
    async fn set_profile_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        let manager = SettingsManager::new(Settings::default(), path.clone());

        assert!(manager.set_profile(Level::Silent).await.unwrap());
        assert!(!manager.set_profile(Level::Silent).await.unwrap());

        let reloaded = SettingsManager::load(Some(path)).await.unwrap();
        assert_eq!(reloaded.profile().await, Level::Silent);
    }

    #[tokio::test]
    async fn reload_returns_previous_state(){
        let file = write_settings("profile: full\n");
        let manager = SettingsManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();

        std::fs::write(file.path(), "profile: silent\n").unwrap();
        let old = manager.reload().await.unwrap();
        assert_eq!(old.profile, Level::Full);
        assert_eq!(manager.profile().await, Level::Silent);
    }
}
