//! Skitgen - Automated Dialogue Video Generation
//!
//! Turns a topic into a short vertical video: an LLM writes a two-character
//! dialogue, a voice-cloning server speaks each line, whisper times every
//! word, and ffmpeg composites karaoke captions and speaker sprites over a
//! background clip.

pub mod cli;
pub mod config;
pub mod error;
pub mod script;
pub mod synthesis;
pub mod audio;
pub mod align;
pub mod captions;
pub mod media;
pub mod run;
pub mod workflow;
