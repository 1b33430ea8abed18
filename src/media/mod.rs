// Video compositing
//
// - Commands: ffmpeg command builder
// - Compositor: builds the overlay/caption filter graph and runs it
// - Background: picks a clip from the background pool

pub mod background;
pub mod commands;
pub mod compositor;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use background::select_background;
pub use commands::*;
pub use compositor::FfmpegCompositor;

use crate::audio::OffsetTable;
use crate::captions::CaptionTimeline;
use crate::error::Result;
use crate::script::Actor;

/// Everything the compositor needs to produce the final video
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub background_video: PathBuf,
    pub master_audio: PathBuf,
    pub offsets: OffsetTable,
    pub timeline: CaptionTimeline,
    /// Karaoke subtitles to burn in
    pub subtitles: PathBuf,
    pub sprites: BTreeMap<Actor, PathBuf>,
    pub output_path: PathBuf,
}

/// Main trait for the external compositing engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Encode the final video to `request.output_path`
    async fn compose(&self, request: &RenderRequest) -> Result<()>;

    /// Check that the compositor can be invoked
    async fn check_availability(&self) -> Result<()>;
}
