// OpenAI Whisper command-line implementation
// Runs `whisper` with word timestamps enabled and reads its JSON output

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TranscriberConfig;
use crate::error::{Result, SkitError};
use super::{Transcriber, WordTimestamp};

/// Whisper JSON output format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperOutput {
    #[serde(default)]
    pub text: String,
    pub segments: Vec<WhisperSegment>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<WhisperWord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub probability: Option<f64>,
}

impl WhisperOutput {
    /// Flatten segment words into one ordered list
    pub fn into_words(self) -> Vec<WordTimestamp> {
        self.segments
            .into_iter()
            .flat_map(|segment| segment.words)
            .map(|w| WordTimestamp::new(w.word, w.start, w.end))
            .collect()
    }
}

pub struct WhisperCliTranscriber {
    config: TranscriberConfig,
}

impl WhisperCliTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    /// Check that the whisper command is on the path
    pub async fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.config.binary_path)
            .arg("--help")
            .output()
            .await
            .map_err(|e| SkitError::Config(format!("whisper command not found: {}", e)))?;

        if output.status.success() {
            info!("Whisper command-line tool is available");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SkitError::Config(format!("whisper is not usable: {}", stderr)))
        }
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe_words(&self, audio_path: &Path) -> Result<Vec<WordTimestamp>> {
        let temp_dir = tempfile::tempdir()?;
        let output_dir = temp_dir.path();

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(audio_path)
            .arg("--model").arg(&self.config.model)
            .arg("--output_dir").arg(output_dir)
            .arg("--output_format").arg("json")
            .arg("--word_timestamps").arg("True")
            .arg("--verbose").arg("False")
            .kill_on_drop(true);

        if let Some(lang) = &self.config.language {
            cmd.arg("--language").arg(lang);
        }

        debug!("Executing whisper: {:?}", cmd);

        let output = cmd.output().await
            .map_err(|e| SkitError::Service(format!("Failed to execute whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SkitError::Service(format!("Whisper transcription failed: {}", stderr)));
        }

        let stem = audio_path.file_stem()
            .ok_or_else(|| SkitError::Alignment("Invalid audio filename".to_string()))?;
        let json_file = output_dir.join(format!("{}.json", stem.to_string_lossy()));

        let content = tokio::fs::read_to_string(&json_file).await
            .map_err(|e| SkitError::Alignment(format!("Whisper JSON output not readable: {}", e)))?;
        let parsed: WhisperOutput = serde_json::from_str(&content)
            .map_err(|e| SkitError::Alignment(format!("Failed to parse whisper JSON: {}", e)))?;

        Ok(parsed.into_words())
    }
}
