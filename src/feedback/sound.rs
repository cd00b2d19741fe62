//! Sound feedback, backed by the sound device.

use log::{debug, warn};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::{EndReason, Feedback, RunContext};
use crate::dev::Devices;

#[derive(Debug)]
pub struct SoundFeedback {
    effect: Option<String>,
    media_role: String,
    file_name: Option<PathBuf>,
    cancel: CancellationToken,
}

impl SoundFeedback {
    pub fn new(effect: String, media_role: String, file_name: Option<PathBuf>) -> SoundFeedback {
        SoundFeedback {
            effect: Some(effect),
            media_role,
            file_name,
            cancel: CancellationToken::new(),
        }
    }

    /// Sound feedback for an explicit file, as synthesized from the
    /// `sound-file` hint.
    pub fn from_file(file_name: PathBuf) -> SoundFeedback {
        SoundFeedback {
            effect: None,
            media_role: "event".to_string(),
            file_name: Some(file_name),
            cancel: CancellationToken::new(),
        }
    }
}

impl Feedback for SoundFeedback {
    fn kind(&self) -> &'static str {
        "sound"
    }

    fn is_available(&self, devices: &Devices) -> bool {
        devices.sound.is_some()
    }

    fn is_sound(&self) -> bool {
        true
    }

    fn run(&self, ctx: RunContext) -> bool {
        let Some(sound) = ctx.devices.sound.as_ref() else {
            return false;
        };

        let path = self
            .file_name
            .clone()
            .or_else(|| self.effect.as_deref().and_then(|e| sound.locate(e)));
        let cancel = self.cancel.clone();
        let effect = self.effect.clone();

        let Some(path) = path else {
            // A missing sound still counts as a naturally finished feedback.
            warn!("No sound for {:?}", effect);
            tokio::spawn(async move {
                ctx.finish(EndReason::Natural);
            });
            return true;
        };

        debug!(
            "Playing '{}' with media role '{}'",
            path.display(),
            self.media_role
        );

        tokio::spawn(async move {
            let key = ctx.playback_key();
            let devices = ctx.devices.clone();
            let Some(sound) = devices.sound.as_ref() else {
                ctx.finish(EndReason::Natural);
                return;
            };

            let reason = tokio::select! {
                () = cancel.cancelled() => {
                    sound.stop(key);
                    EndReason::Explicit
                }
                result = sound.play(key, &path) => {
                    if let Err(err) = result {
                        warn!("Failed to play '{}': {err}", path.display());
                    }
                    EndReason::Natural
                }
            };
            ctx.finish(reason);
        });
        true
    }

    fn end(&self) {
        self.cancel.cancel();
    }
}
