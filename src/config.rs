use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::error::{Result, SkitError};

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a comedy writer known for sit-com dialogue. Peter is teaching Stewie about a topic in a humorous way.

Create around 10 lines of cohesive dialogue to explore a topic where:

- Stewie opens with a dumb observation
- Peter responds with a witty segue into the topic
- Stewie interjects occasionally with incorrect or tangential observations
- Peter responds with corrections and offers specific and correct information
- Peter finishes with a call to action to share this video

Use simple, clear language and make layered jokes!

Format as JSON: {"script": [{"actor": "Peter", "line": "text"}, ...]}
No other text, just the JSON."#;

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_retry_simplified() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory under which every run gets its own directory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub transcriber: TranscriberConfig,
    pub assembly: AssemblyConfig,
    pub captions: CaptionConfig,
    pub media: MediaConfig,
    /// Speaking characters keyed by the actor name the LLM must use
    pub characters: BTreeMap<String, CharacterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// Model used to write the dialogue
    pub model: String,
    /// System prompt describing the dialogue format
    pub system_prompt: String,
    /// Upper bound on the number of dialogue lines accepted
    pub max_lines: usize,
    /// Attempts before giving up on malformed responses
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Voice-cloning server URL
    pub endpoint: String,
    pub exaggeration: f32,
    pub cfg_weight: f32,
    /// Retry a failed line once with punctuation stripped
    #[serde(default = "default_retry_simplified")]
    pub retry_simplified: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to the whisper command-line tool
    pub binary_path: String,
    pub model: String,
    /// Language hint; autodetect when unset
    pub language: Option<String>,
    /// Words starting this close to a line start belong to that line
    pub boundary_epsilon: f64,
    /// Allowed gap between the last transcribed word and the end of the master track
    pub max_duration_drift: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Silence inserted between consecutive lines, in seconds
    pub silence_gap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    pub max_cue_words: usize,
    /// Seconds
    pub max_cue_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Directory scanned for background clips
    pub background_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Font file used for burned-in captions; its directory is handed to libass
    pub font_path: PathBuf,
    pub font_name: String,
    pub font_size: u32,
    /// ASS colour for caption text, e.g. &H00FFFFFF
    pub base_color: String,
    /// ASS colour for the word being spoken
    pub highlight_color: String,
    pub outline: u32,
    /// Distance of the caption baseline from the bottom edge
    pub caption_margin_v: u32,
    pub sprite_width: u32,
    /// Overlay position of the active sprite
    pub sprite_x: i32,
    pub sprite_y: i32,
    pub video_codec: String,
    /// Additional encoding options
    /// Common options: ["-preset", "medium", "-crf", "23"]
    pub encode_options: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// Reference recording the voice is cloned from
    pub voice: PathBuf,
    /// Image shown while this character speaks
    pub sprite: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let mut characters = BTreeMap::new();
        characters.insert(
            "Peter".to_string(),
            CharacterConfig {
                voice: PathBuf::from("assets/voices/peter.wav"),
                sprite: PathBuf::from("assets/images/peter.png"),
            },
        );
        characters.insert(
            "Stewie".to_string(),
            CharacterConfig {
                voice: PathBuf::from("assets/voices/stewie.wav"),
                sprite: PathBuf::from("assets/images/stewie.png"),
            },
        );

        Self {
            output_dir: default_output_dir(),
            llm: LlmConfig {
                endpoint: "http://localhost:11434".to_string(),
                model: "deepseek-r1:32b".to_string(),
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                max_lines: 12,
                max_retries: 5,
                timeout_secs: 120,
            },
            tts: TtsConfig {
                endpoint: "http://localhost:8004".to_string(),
                exaggeration: 1.0,
                cfg_weight: 0.7,
                retry_simplified: true,
                timeout_secs: 300,
            },
            transcriber: TranscriberConfig {
                binary_path: "whisper".to_string(),
                model: "base".to_string(),
                language: Some("en".to_string()),
                boundary_epsilon: 0.02,
                max_duration_drift: 2.0,
                timeout_secs: 600,
            },
            assembly: AssemblyConfig {
                silence_gap: 0.2,
            },
            captions: CaptionConfig {
                max_cue_words: 2,
                max_cue_duration: 1.5,
            },
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
                background_dir: PathBuf::from("assets/background_videos"),
                width: 1080,
                height: 1920,
                font_path: PathBuf::from("assets/fonts/LuckiestGuy-Regular.ttf"),
                font_name: "Luckiest Guy".to_string(),
                font_size: 100,
                base_color: "&H00FFFFFF".to_string(),
                highlight_color: "&H0000FF00".to_string(),
                outline: 3,
                caption_margin_v: 400,
                sprite_width: 600,
                sprite_x: 240,
                sprite_y: 1100,
                video_codec: "libx264".to_string(),
                encode_options: vec![
                    // "-preset".to_string(), "medium".to_string(),
                    // "-crf".to_string(), "23".to_string(),
                ],
                timeout_secs: 1800,
            },
            characters,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SkitError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SkitError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SkitError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject settings no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.characters.is_empty() {
            return Err(SkitError::Config("At least one character must be configured".to_string()));
        }
        if self.llm.max_lines == 0 {
            return Err(SkitError::Config("llm.max_lines must be at least 1".to_string()));
        }
        if self.captions.max_cue_words == 0 {
            return Err(SkitError::Config("captions.max_cue_words must be at least 1".to_string()));
        }
        if !(self.captions.max_cue_duration > 0.0) {
            return Err(SkitError::Config("captions.max_cue_duration must be positive".to_string()));
        }
        if !(self.assembly.silence_gap >= 0.0) {
            return Err(SkitError::Config("assembly.silence_gap must not be negative".to_string()));
        }
        if !(self.transcriber.boundary_epsilon >= 0.0) {
            return Err(SkitError::Config("transcriber.boundary_epsilon must not be negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skitgen.toml");

        let mut config = Config::default();
        config.captions.max_cue_words = 4;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.captions.max_cue_words, 4);
        assert_eq!(loaded.characters.len(), 2);
        assert!(loaded.characters.contains_key("Stewie"));
    }

    #[test]
    fn test_malformed_file_is_a_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skitgen.toml");
        std::fs::write(&path, "[captions]\nmax_cue_words = \"many\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, SkitError::Toml(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = Config::default();
        config.captions.max_cue_words = 0;
        assert!(matches!(config.validate(), Err(SkitError::Config(_))));

        let mut config = Config::default();
        config.assembly.silence_gap = -0.1;
        assert!(matches!(config.validate(), Err(SkitError::Config(_))));

        let mut config = Config::default();
        config.characters.clear();
        assert!(matches!(config.validate(), Err(SkitError::Config(_))));
    }
}
