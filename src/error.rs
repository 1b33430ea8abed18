use thiserror::Error;

use crate::run::Stage;

#[derive(Error, Debug)]
pub enum SkitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Script generation error: {0}")]
    ScriptGeneration(String),

    #[error("Synthesis failed for line {line_index} ({actor}: {text:?}): {cause}")]
    Synthesis {
        line_index: usize,
        actor: String,
        text: String,
        cause: String,
    },

    #[error("Audio assembly error: {0}")]
    Assembly(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("External service error: {0}")]
    Service(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Run {run_id} failed at stage {stage}: {cause}")]
    RunFailed {
        run_id: String,
        stage: Stage,
        cause: Box<SkitError>,
    },
}

impl SkitError {
    /// Whether re-invoking the run (via resume) can succeed without changing inputs.
    pub fn is_retryable(&self) -> bool {
        match self {
            SkitError::Assembly(_) | SkitError::Config(_) | SkitError::Toml(_) | SkitError::FileNotFound(_) => false,
            SkitError::RunFailed { cause, .. } => cause.is_retryable(),
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, SkitError>;
