// Voice synthesis stage
//
// The cloning engine is single-instance and non-reentrant. It lives behind a
// `TtsEngineHandle`, which every run clones and which hands out exclusive
// access in FIFO order. Nothing else may hold the engine.

pub mod http;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::audio::{AudioClip, PcmBuffer};
use crate::error::{Result, SkitError};
use crate::script::{Actor, ScriptLine, ScriptModel};

pub use http::HttpVoiceEngine;

/// Raw engine output for one line
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Encoded WAV bytes as produced by the engine
    pub wav: Vec<u8>,
}

/// Main trait for the voice-cloning collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechEngine: Send {
    /// Speak `text` in the voice recorded in `voice_sample`
    async fn synthesize(&mut self, text: &str, voice_sample: &Path) -> Result<SynthesizedAudio>;
}

/// Shared, serialized access to the one engine instance
#[derive(Clone)]
pub struct TtsEngineHandle {
    inner: Arc<Mutex<Box<dyn SpeechEngine>>>,
}

impl TtsEngineHandle {
    pub fn new(engine: Box<dyn SpeechEngine>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Wait for exclusive use of the engine; released when the guard drops
    pub async fn acquire(&self) -> MutexGuard<'_, Box<dyn SpeechEngine>> {
        self.inner.lock().await
    }
}

/// Actor to reference recording
pub type VoiceMap = BTreeMap<Actor, PathBuf>;

pub struct VoiceSynthesisStage {
    engine: TtsEngineHandle,
    timeout: Duration,
    retry_simplified: bool,
}

impl VoiceSynthesisStage {
    pub fn new(engine: TtsEngineHandle, timeout: Duration, retry_simplified: bool) -> Self {
        Self {
            engine,
            timeout,
            retry_simplified,
        }
    }

    /// Synthesize every line in order into `clips_dir`.
    ///
    /// A clip already present from an earlier attempt is measured and reused.
    /// The first failing line aborts the stage.
    pub async fn synthesize(
        &self,
        script: &ScriptModel,
        voices: &VoiceMap,
        clips_dir: &Path,
    ) -> Result<Vec<AudioClip>> {
        tokio::fs::create_dir_all(clips_dir).await?;

        let progress = ProgressBar::new(script.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} lines {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut clips = Vec::with_capacity(script.len());
        for line in &script.lines {
            progress.set_message(line.actor.to_string());
            let clip = self.synthesize_line(line, voices, clips_dir).await;
            match clip {
                Ok(clip) => {
                    clips.push(clip);
                    progress.inc(1);
                }
                Err(e) => {
                    progress.abandon_with_message("failed");
                    return Err(e);
                }
            }
        }
        progress.finish_and_clear();

        info!("Synthesized {} clips", clips.len());
        Ok(clips)
    }

    async fn synthesize_line(
        &self,
        line: &ScriptLine,
        voices: &VoiceMap,
        clips_dir: &Path,
    ) -> Result<AudioClip> {
        let path = clips_dir.join(AudioClip::file_name(line.index, &line.actor));

        if let Some(clip) = reuse_existing_clip(line, &path) {
            info!("Reusing existing clip for line {}: {}", line.index, path.display());
            return Ok(clip);
        }

        let voice = voices.get(&line.actor)
            .ok_or_else(|| line_error(line, format!("No voice sample configured for '{}'", line.actor)))?;
        if !voice.exists() {
            return Err(line_error(line, format!("Voice sample missing: {}", voice.display())));
        }

        info!("Generating audio for {} (line {}): {}", line.actor, line.index, line.text);

        let audio = match self.call_engine(&line.text, voice).await {
            Ok(audio) => audio,
            Err(cause) => {
                let simplified = simplify_text(&line.text);
                if !self.retry_simplified || simplified.is_empty() || simplified == line.text {
                    return Err(line_error(line, cause));
                }
                warn!("Engine failed on line {} ({}); retrying with simplified text", line.index, cause);
                self.call_engine(&simplified, voice).await
                    .map_err(|retry_cause| line_error(line, retry_cause))?
            }
        };

        let pcm = PcmBuffer::from_wav_bytes(&audio.wav)
            .map_err(|e| line_error(line, format!("Engine returned undecodable audio: {}", e)))?;
        if pcm.is_empty() {
            return Err(line_error(line, "Engine returned zero-length audio".to_string()));
        }

        tokio::fs::write(&path, &audio.wav).await?;
        let clip = AudioClip::from_buffer(line.index, line.actor.clone(), path, &pcm);
        debug!(
            "Clip {} saved: {:.2}s at {} Hz",
            clip.path.display(), clip.duration_seconds, clip.sample_rate
        );
        Ok(clip)
    }

    /// One engine call under the shared lock, bounded by the configured timeout
    async fn call_engine(&self, text: &str, voice: &Path) -> std::result::Result<SynthesizedAudio, String> {
        let mut engine = self.engine.acquire().await;
        match tokio::time::timeout(self.timeout, engine.synthesize(text, voice)).await {
            Ok(Ok(audio)) => Ok(audio),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("Timed out after {}s", self.timeout.as_secs())),
        }
    }
}

fn reuse_existing_clip(line: &ScriptLine, path: &Path) -> Option<AudioClip> {
    if !path.exists() {
        return None;
    }
    match PcmBuffer::read_wav(path) {
        Ok(pcm) if !pcm.is_empty() => Some(AudioClip::from_buffer(
            line.index,
            line.actor.clone(),
            path.to_path_buf(),
            &pcm,
        )),
        _ => {
            warn!("Ignoring unreadable clip {}", path.display());
            None
        }
    }
}

fn line_error(line: &ScriptLine, cause: String) -> SkitError {
    SkitError::Synthesis {
        line_index: line.index,
        actor: line.actor.to_string(),
        text: line.text.clone(),
        cause,
    }
}

/// Keep only alphanumerics and spaces
pub fn simplify_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
