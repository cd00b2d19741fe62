//! Event sound playback.
//!
//! Plays sound-theme events or explicit files through the system audio
//! output. Each in-flight playback is keyed so it can be cancelled
//! individually. The sound theme name follows the settings store.

use anyhow::{Context, Result};
use log::{debug, warn};
use rodio::{Decoder, OutputStreamHandle, Sink};
use std::{
    collections::HashMap,
    env, fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

const SOUND_EXTENSIONS: [&str; 3] = ["oga", "ogg", "wav"];
const FALLBACK_SOUND_THEME: &str = "freedesktop";

/// System audio output with per-playback cancellation.
pub struct SoundDevice {
    handle: OutputStreamHandle,
    theme_name: RwLock<String>,
    playbacks: Mutex<HashMap<u64, Arc<Sink>>>,
}

impl fmt::Debug for SoundDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundDevice")
            .field("theme_name", &self.theme_name)
            .finish_non_exhaustive()
    }
}

impl SoundDevice {
    /// Opens the default audio output.
    ///
    /// The output stream itself is parked on a dedicated thread for the
    /// process lifetime; only the (sendable) handle crosses threads.
    pub fn new(theme_name: String) -> Result<SoundDevice> {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("sound-output".into())
            .spawn(move || match rodio::OutputStream::try_default() {
                Ok((stream, handle)) => {
                    if tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    // The stream must outlive every sink fed from its handle.
                    let _stream = stream;
                    loop {
                        std::thread::park();
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                }
            })
            .context("Failed to spawn audio output thread")?;

        let handle = rx
            .recv()
            .context("Audio output thread died")?
            .context("Failed to open audio output")?;

        Ok(SoundDevice {
            handle,
            theme_name: RwLock::new(theme_name),
            playbacks: Mutex::new(HashMap::new()),
        })
    }

    /// Applies a new sound theme name for subsequent lookups.
    pub fn set_theme_name(&self, name: String) {
        debug!("Setting sound theme to {name}");
        *self.theme_name.write().unwrap() = name;
    }

    /// Resolves a sound-theme event name to a file.
    pub fn locate(&self, event: &str) -> Option<PathBuf> {
        let theme = self.theme_name.read().unwrap().clone();
        locate_in(&sound_dirs(), &theme, event)
    }

    /// Plays the file at `path`, returning once playback finished or was
    /// cancelled via [`SoundDevice::stop`] with the same key.
    pub async fn play(&self, key: u64, path: &Path) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open sound file {}", path.display()))?;
        let source = Decoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        let sink = Arc::new(
            Sink::try_new(&self.handle).context("Failed to create playback sink")?,
        );
        sink.append(source);

        self.playbacks.lock().unwrap().insert(key, sink.clone());

        let waited = sink.clone();
        let result = tokio::task::spawn_blocking(move || waited.sleep_until_end()).await;

        self.playbacks.lock().unwrap().remove(&key);
        result.context("Playback task failed")?;
        Ok(())
    }

    /// Cancels the playback registered under `key`, if any.
    pub fn stop(&self, key: u64) {
        if let Some(sink) = self.playbacks.lock().unwrap().remove(&key) {
            debug!("Cancelling playback {key}");
            sink.stop();
        }
    }
}

/// Data dirs holding `sounds/` trees, user dir first.
fn sound_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(data_home) = env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".local/share")))
    {
        dirs.push(data_home.join("sounds"));
    }

    let data_dirs =
        env::var("XDG_DATA_DIRS").unwrap_or_else(|_| "/usr/local/share:/usr/share".into());
    for dir in data_dirs.split(':').filter(|d| !d.is_empty()) {
        dirs.push(Path::new(dir).join("sounds"));
    }
    dirs
}

/// XDG sound theme lookup: the configured theme first, then the freedesktop
/// fallback, each checked in the `stereo/` subdir and the theme root.
fn locate_in(roots: &[PathBuf], theme: &str, event: &str) -> Option<PathBuf> {
    let mut themes = vec![theme];
    if theme != FALLBACK_SOUND_THEME {
        themes.push(FALLBACK_SOUND_THEME);
    }

    for theme in themes {
        for root in roots {
            for subdir in ["stereo", ""] {
                for ext in SOUND_EXTENSIONS {
                    let candidate = root.join(theme).join(subdir).join(format!("{event}.{ext}"));
                    if candidate.exists() {
                        return Some(candidate);
                    }
                }
            }
        }
    }

    warn!("No sound found for event '{event}' in theme '{theme}'");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn locates_theme_sound() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let expected = root.join("custom/stereo/phone-incoming-call.oga");
        touch(&expected);

        let found = locate_in(&[root], "custom", "phone-incoming-call").unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn falls_back_to_freedesktop_theme() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let expected = root.join("freedesktop/stereo/bell.oga");
        touch(&expected);

        let found = locate_in(&[root], "custom", "bell").unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn prefers_configured_theme_over_fallback() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        touch(&root.join("freedesktop/stereo/bell.oga"));
        let expected = root.join("custom/stereo/bell.wav");
        touch(&expected);

        let found = locate_in(&[root], "custom", "bell").unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn missing_sound_yields_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            locate_in(&[dir.path().to_path_buf()], "custom", "no-such-event"),
            None
        );
    }
}
