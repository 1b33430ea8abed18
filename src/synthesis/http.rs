//! HTTP client for a voice-cloning server.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::Path;
use tracing::debug;

use crate::config::TtsConfig;
use crate::error::{Result, SkitError};
use super::{SpeechEngine, SynthesizedAudio};

/// Clones a voice from a reference WAV by uploading it with every request.
///
/// The server answers `POST /synthesize` with the generated WAV bytes.
pub struct HttpVoiceEngine {
    client: Client,
    config: TtsConfig,
}

impl HttpVoiceEngine {
    pub fn new(config: TtsConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("skitgen/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!("{}/synthesize", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechEngine for HttpVoiceEngine {
    async fn synthesize(&mut self, text: &str, voice_sample: &Path) -> Result<SynthesizedAudio> {
        let voice_bytes = tokio::fs::read(voice_sample).await
            .map_err(|_| SkitError::FileNotFound(voice_sample.display().to_string()))?;

        let file_name = voice_sample
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("voice.wav")
            .to_string();

        let voice_part = Part::bytes(voice_bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;

        let form = Form::new()
            .text("text", text.to_string())
            .text("exaggeration", self.config.exaggeration.to_string())
            .text("cfg_weight", self.config.cfg_weight.to_string())
            .part("voice", voice_part);

        debug!("POST {} ({} chars)", self.url(), text.len());

        let response = self.client
            .post(self.url())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SkitError::Service(format!(
                "Voice server error {}: {}", status, error_text
            )));
        }

        let wav = response.bytes().await?.to_vec();
        Ok(SynthesizedAudio { wav })
    }
}
