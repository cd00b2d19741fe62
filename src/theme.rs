//! Feedback theme model and loader.
//!
//! A theme maps `(profile, event name)` pairs to feedback definitions. Themes
//! are JSON files searched in the user config dir and the system data dirs,
//! may inherit from a parent theme (with the reserved name `$device` standing
//! in for the device-specific theme) and are flattened at load time with child
//! entries shadowing parent entries.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::settings::Level;

/// Environment variable forcing a specific theme file (testing override).
pub const THEME_FILE_VAR: &str = "FEEDBACK_THEME";

/// Reserved parent name resolving to the device-specific theme.
const DEVICE_THEME: &str = "$device";

/// Parent chains longer than this are rejected.
const MAX_PARENT_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("Failed to read theme file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed theme file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid theme file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("No theme file found for '{name}'")]
    NotFound { name: String },

    #[error("Theme parent chain contains a cycle at '{name}'")]
    Cycle { name: String },

    #[error("Theme parent chain deeper than {MAX_PARENT_DEPTH}")]
    TooDeep,
}

/// A single feedback definition inside a theme file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum FeedbackCfg {
    Dummy,
    Sound {
        /// Sound-theme event to play, e.g. `phone-incoming-call`.
        effect: String,
        #[serde(rename = "media-role", default = "default_media_role")]
        media_role: String,
        #[serde(rename = "file-name", default, skip_serializing_if = "Option::is_none")]
        file_name: Option<PathBuf>,
    },
    VibraRumble {
        #[serde(default = "default_count")]
        count: u32,
        #[serde(default)]
        pause: u32,
        duration: u32,
        #[serde(default = "default_magnitude")]
        magnitude: f64,
    },
    VibraPeriodic {
        #[serde(default = "default_magnitude")]
        magnitude: f64,
    },
    VibraPattern {
        magnitudes: Vec<f64>,
        durations: Vec<u32>,
    },
    Led {
        color: String,
        frequency: u32,
        #[serde(rename = "max-brightness", default = "default_max_brightness")]
        max_brightness: u32,
    },
}

fn default_media_role() -> String {
    "event".to_string()
}

fn default_count() -> u32 {
    1
}

fn default_magnitude() -> f64 {
    1.0
}

fn default_max_brightness() -> u32 {
    100
}

impl FeedbackCfg {
    fn validate(&self) -> Result<(), String> {
        match self {
            FeedbackCfg::VibraRumble { magnitude, .. }
            | FeedbackCfg::VibraPeriodic { magnitude } => {
                if !(0.0..=1.0).contains(magnitude) {
                    return Err(format!("magnitude {magnitude} out of range"));
                }
            }
            FeedbackCfg::VibraPattern {
                magnitudes,
                durations,
            } => {
                if magnitudes.is_empty() || magnitudes.len() != durations.len() {
                    return Err("magnitudes and durations must have equal non-zero length".into());
                }
                if magnitudes.iter().any(|m| !(0.0..=1.0).contains(m)) {
                    return Err("pattern magnitude out of range".into());
                }
            }
            FeedbackCfg::Led { max_brightness, .. } => {
                if *max_brightness > 100 {
                    return Err(format!("max-brightness {max_brightness} out of range"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EntryCfg {
    #[serde(rename = "event-name")]
    event_name: String,
    #[serde(flatten)]
    feedback: FeedbackCfg,
}

#[derive(Debug, Deserialize)]
struct ProfileCfg {
    name: Level,
    #[serde(default)]
    feedbacks: Vec<EntryCfg>,
}

#[derive(Debug, Deserialize)]
struct ThemeFile {
    name: String,
    #[serde(rename = "parent-name")]
    parent_name: Option<String>,
    #[serde(default)]
    profiles: Vec<ProfileCfg>,
}

/// A fully resolved theme with the parent chain flattened in.
#[derive(Debug, Clone, Default)]
pub struct Theme {
    name: String,
    profiles: HashMap<Level, HashMap<String, FeedbackCfg>>,
}

impl Theme {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the feedbacks for `event` visible at `level`, together with the
    /// profile slice each one came from.
    ///
    /// All slices selected by the level contribute, so an event may yield e.g.
    /// a sound from `full` and an LED from `silent` at the same time.
    pub fn lookup(&self, level: Level, event: &str) -> Vec<(Level, FeedbackCfg)> {
        level
            .slices()
            .iter()
            .filter_map(|slice| {
                self.profiles
                    .get(slice)
                    .and_then(|events| events.get(event))
                    .map(|cfg| (*slice, cfg.clone()))
            })
            .collect()
    }

    /// Merges `child` entries over this theme. Child `(profile, event)` keys
    /// shadow the parent's.
    fn merge_child(&mut self, child: Theme) {
        self.name = child.name;
        for (level, events) in child.profiles {
            let slot = self.profiles.entry(level).or_default();
            for (event, cfg) in events {
                slot.insert(event, cfg);
            }
        }
    }

    fn from_file(file: ThemeFile, path: &Path) -> Result<Self, ThemeError> {
        let mut profiles: HashMap<Level, HashMap<String, FeedbackCfg>> = HashMap::new();
        for profile in file.profiles {
            let slot = profiles.entry(profile.name).or_default();
            for entry in profile.feedbacks {
                entry.feedback.validate().map_err(|reason| ThemeError::Invalid {
                    path: path.to_path_buf(),
                    reason: format!("event '{}': {}", entry.event_name, reason),
                })?;
                slot.insert(entry.event_name, entry.feedback);
            }
        }
        Ok(Theme {
            name: file.name,
            profiles,
        })
    }

    #[cfg(test)]
    pub fn insert(&mut self, level: Level, event: &str, cfg: FeedbackCfg) {
        self.profiles
            .entry(level)
            .or_default()
            .insert(event.to_string(), cfg);
    }
}

/// Locates and loads themes.
///
/// Construction captures the search path and the device compatibles so the
/// loader stays deterministic across SIGHUP reloads and testable without
/// touching global process state.
#[derive(Debug, Clone)]
pub struct ThemeLoader {
    search_dirs: Vec<PathBuf>,
    compatibles: Vec<String>,
    file_override: Option<PathBuf>,
}

impl ThemeLoader {
    /// Loader over the standard search path: the user config dir followed by
    /// each system data dir, under `feedbackd/themes/`.
    pub fn new() -> Self {
        let mut search_dirs = Vec::new();

        if let Some(cfg_dir) = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
        {
            search_dirs.push(cfg_dir.join("feedbackd/themes"));
        }

        let data_dirs =
            env::var("XDG_DATA_DIRS").unwrap_or_else(|_| "/usr/local/share:/usr/share".into());
        for dir in data_dirs.split(':').filter(|d| !d.is_empty()) {
            search_dirs.push(Path::new(dir).join("feedbackd/themes"));
        }

        Self {
            search_dirs,
            compatibles: device_compatibles(),
            file_override: env::var_os(THEME_FILE_VAR).map(PathBuf::from),
        }
    }

    /// Loader with an explicit search path and compatible list (tests).
    pub fn with_paths(search_dirs: Vec<PathBuf>, compatibles: Vec<String>) -> Self {
        Self {
            search_dirs,
            compatibles,
            file_override: None,
        }
    }

    /// Loads the effective theme.
    ///
    /// Selection order: the `FEEDBACK_THEME` file override, then `theme_name`
    /// (unless it is the default), then the device compatibles, then
    /// `default`. The first candidate that loads wins; a candidate that fails
    /// to parse is skipped with a warning.
    pub fn load(&self, theme_name: &str) -> Result<Theme, ThemeError> {
        if let Some(path) = &self.file_override {
            debug!("Loading theme override from {}", path.display());
            return self.load_chain(path.clone());
        }

        let mut candidates: Vec<&str> = Vec::new();
        if theme_name != "default" {
            candidates.push(theme_name);
        }
        candidates.extend(self.compatibles.iter().map(String::as_str));
        candidates.push("default");

        let mut last_err = None;
        for name in candidates {
            let Some(path) = self.find_theme_file(name) else {
                continue;
            };
            match self.load_chain(path.clone()) {
                Ok(theme) => return Ok(theme),
                Err(err) => {
                    warn!("Skipping theme '{}' at {}: {}", name, path.display(), err);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(ThemeError::NotFound {
            name: theme_name.to_string(),
        }))
    }

    /// Loads a theme file and flattens its parent chain.
    fn load_chain(&self, path: PathBuf) -> Result<Theme, ThemeError> {
        let mut chain = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut next = Some(path);

        while let Some(path) = next.take() {
            if chain.len() >= MAX_PARENT_DEPTH {
                return Err(ThemeError::TooDeep);
            }

            let file = Self::parse_file(&path)?;
            if seen.iter().any(|n| *n == file.name) {
                return Err(ThemeError::Cycle { name: file.name });
            }
            seen.push(file.name.clone());

            match file.parent_name.as_deref() {
                Some(DEVICE_THEME) => {
                    next = self
                        .compatibles
                        .iter()
                        .find_map(|c| self.find_theme_file(c))
                        .or_else(|| self.find_theme_file("default"));
                }
                Some(parent) => {
                    next = Some(self.find_theme_file(parent).ok_or_else(|| {
                        ThemeError::NotFound {
                            name: parent.to_string(),
                        }
                    })?);
                }
                None => {}
            }

            chain.push(Theme::from_file(file, &path)?);
        }

        // Walk from the root of the chain down so children shadow parents.
        let mut theme = Theme::default();
        for child in chain.into_iter().rev() {
            theme.merge_child(child);
        }
        debug!("Loaded theme '{}'", theme.name());
        Ok(theme)
    }

    fn parse_file(path: &Path) -> Result<ThemeFile, ThemeError> {
        let content = fs::read_to_string(path).map_err(|source| ThemeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ThemeError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn find_theme_file(&self, name: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(format!("{name}.json")))
            .find(|path| path.exists())
    }
}

impl Default for ThemeLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Device identifiers from the device tree, most specific first.
fn device_compatibles() -> Vec<String> {
    let Ok(raw) = fs::read("/proc/device-tree/compatible") else {
        return Vec::new();
    };
    raw.split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .filter_map(|s| String::from_utf8(s.to_vec()).ok())
        .collect()
}
