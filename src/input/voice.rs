//! Audio loopback for voice-input tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::action::Action;
use crate::core::context::Context;
use crate::core::errors::Result;
use crate::input::devices::AudioDevice;

/// Keeps the Aloop driver enabled; disables it when dropped.
#[must_use = "the loopback is disabled as soon as the guard is dropped"]
pub struct AloopGuard {
    audio: Arc<dyn AudioDevice>,
}

impl std::fmt::Debug for AloopGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AloopGuard")
    }
}

/// Enable the loopback so played audio reaches the microphone input.
pub fn enable_aloop(ctx: &Context, audio: Arc<dyn AudioDevice>) -> Result<AloopGuard> {
    audio.set_aloop(ctx, true)?;
    tracing::debug!("aloop enabled");
    Ok(AloopGuard { audio })
}

impl Drop for AloopGuard {
    fn drop(&mut self) {
        if let Err(err) = self.audio.set_aloop(&Context::background(), false) {
            tracing::warn!(error = %err, "[ITH-AUDIO] failed to disable aloop");
        }
    }
}

/// Action playing `file` through the loopback.
pub fn audio_from_file(audio: Arc<dyn AudioDevice>, file: impl AsRef<Path>) -> Action {
    let file: PathBuf = file.as_ref().to_path_buf();
    Action::new(move |ctx| audio.play(ctx, &file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeAudio {
        log: Mutex<Vec<String>>,
    }

    impl AudioDevice for FakeAudio {
        fn set_aloop(&self, _ctx: &Context, enabled: bool) -> Result<()> {
            self.log.lock().push(format!("aloop {enabled}"));
            Ok(())
        }

        fn play(&self, _ctx: &Context, file: &Path) -> Result<()> {
            self.log.lock().push(format!("play {}", file.display()));
            Ok(())
        }
    }

    #[test]
    fn guard_disables_on_drop() {
        let audio = Arc::new(FakeAudio::default());
        {
            let _aloop = enable_aloop(&Context::background(), audio.clone()).unwrap();
            audio_from_file(audio.clone(), "voice_hello.wav")
                .run(&Context::background())
                .unwrap();
        }
        assert_eq!(
            *audio.log.lock(),
            vec!["aloop true", "play voice_hello.wav", "aloop false"]
        );
    }
}
