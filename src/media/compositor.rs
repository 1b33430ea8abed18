use async_trait::async_trait;
use tracing::{debug, info};

use crate::captions::SpriteSchedule;
use crate::config::MediaConfig;
use crate::error::{Result, SkitError};
use crate::script::Actor;
use super::{Compositor, MediaCommand, MediaCommandBuilder, RenderRequest};

/// ffmpeg-based compositor: background, active-speaker sprite, burned-in captions
pub struct FfmpegCompositor {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegCompositor {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }

    /// Build the full ffmpeg invocation for a render request
    pub fn build_command(&self, request: &RenderRequest) -> Result<MediaCommand> {
        let actors = request.timeline.sprites.actors();

        let mut command = self.command_builder
            .custom("Video composition")
            .overwrite()
            .looped_input(&request.background_video);

        for actor in &actors {
            let sprite = request.sprites.get(actor)
                .ok_or_else(|| SkitError::Render(format!("No sprite configured for '{}'", actor)))?;
            command = command.still_input(sprite);
        }

        let audio_input = actors.len() + 1;
        let graph = self.filter_graph(&actors, &request.timeline.sprites, &request.subtitles.to_string_lossy());
        debug!("Filter graph: {}", graph);

        let command = command
            .input(&request.master_audio)
            .filter_complex(graph)
            .map("[final_v]")
            .map(format!("{}:a", audio_input))
            .video_codec(&self.config.video_codec)
            .args(self.config.encode_options.iter().cloned())
            .audio_codec("aac")
            .audio_bitrate("192k")
            .pixel_format("yuv420p")
            .duration(request.offsets.total_duration())
            .output(&request.output_path);

        Ok(command)
    }

    /// Inputs: 0 = background, 1..=n = sprites in `actors` order
    fn filter_graph(&self, actors: &[Actor], sprites: &SpriteSchedule, subtitles: &str) -> String {
        let (width, height) = (self.config.width, self.config.height);
        let mut parts = vec![format!(
            "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1[bg]",
            w = width,
            h = height
        )];

        let mut current = "bg".to_string();
        for (i, actor) in actors.iter().enumerate() {
            parts.push(format!("[{}:v]scale={}:-1[sprite{}]", i + 1, self.config.sprite_width, i));

            let label = format!("v{}", i);
            parts.push(format!(
                "[{}][sprite{}]overlay={}:{}:enable='{}'[{}]",
                current,
                i,
                self.config.sprite_x,
                self.config.sprite_y,
                enable_expression(sprites, actor),
                label
            ));
            current = label;
        }

        let fonts_dir = self.config.font_path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());
        parts.push(format!(
            "[{}]subtitles='{}':fontsdir='{}'[final_v]",
            current,
            escape_filter_path(subtitles),
            escape_filter_path(&fonts_dir)
        ));

        parts.join(";")
    }
}

/// Half-open `[start, end)` windows in which `actor`'s sprite is visible
pub fn enable_expression(sprites: &SpriteSchedule, actor: &Actor) -> String {
    let windows: Vec<String> = sprites
        .for_actor(actor)
        .map(|i| format!("gte(t,{:.3})*lt(t,{:.3})", i.start_seconds, i.end_seconds))
        .collect();

    if windows.is_empty() {
        "0".to_string()
    } else {
        windows.join("+")
    }
}

fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "/").replace('\'', "\\'")
}

#[async_trait]
impl Compositor for FfmpegCompositor {
    async fn compose(&self, request: &RenderRequest) -> Result<()> {
        info!(
            "Composing {} over {} -> {}",
            request.master_audio.display(),
            request.background_video.display(),
            request.output_path.display()
        );

        let command = self.build_command(request)?;
        command.execute().await?;

        info!("Video composition completed successfully");
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        self.command_builder.version_check().execute().await
            .map_err(|e| SkitError::Config(format!("Media processor not available: {}", e)))?;
        info!("Media processor is available");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{LineOffset, OffsetTable};
    use crate::captions::{CaptionTimeline, SpriteInterval};
    use crate::config::Config;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn request() -> RenderRequest {
        let intervals = vec![
            SpriteInterval { actor: Actor::new("Peter"), line_index: 0, start_seconds: 0.0, end_seconds: 0.9 },
            SpriteInterval { actor: Actor::new("Stewie"), line_index: 1, start_seconds: 1.2, end_seconds: 1.4 },
            SpriteInterval { actor: Actor::new("Stewie"), line_index: 1, start_seconds: 1.4, end_seconds: 2.6 },
        ];
        let mut sprites = BTreeMap::new();
        sprites.insert(Actor::new("Peter"), PathBuf::from("assets/peter.png"));
        sprites.insert(Actor::new("Stewie"), PathBuf::from("assets/stewie.png"));

        RenderRequest {
            background_video: PathBuf::from("bg/minecraft.mp4"),
            master_audio: PathBuf::from("run/master_audio.wav"),
            offsets: OffsetTable {
                silence_gap: 0.2,
                entries: vec![
                    LineOffset { line_index: 0, start_seconds: 0.0, end_seconds: 1.0 },
                    LineOffset { line_index: 1, start_seconds: 1.2, end_seconds: 2.7 },
                ],
            },
            timeline: CaptionTimeline {
                cues: Vec::new(),
                sprites: SpriteSchedule { intervals },
            },
            subtitles: PathBuf::from("run/subtitles_highlight.ass"),
            sprites,
            output_path: PathBuf::from("run/final_video.partial.mp4"),
        }
    }

    #[test]
    fn test_enable_expression() {
        let req = request();
        assert_eq!(
            enable_expression(&req.timeline.sprites, &Actor::new("Stewie")),
            "gte(t,1.200)*lt(t,1.400)+gte(t,1.400)*lt(t,2.600)"
        );
        assert_eq!(enable_expression(&req.timeline.sprites, &Actor::new("Lois")), "0");
    }

    #[test]
    fn test_command_maps_inputs_and_duration() {
        let compositor = FfmpegCompositor::new(Config::default().media);
        let cmd = compositor.build_command(&request()).unwrap();

        let joined = cmd.args.join(" ");
        assert!(joined.contains("-stream_loop -1 -i bg/minecraft.mp4"));
        assert!(joined.contains("-loop 1 -i assets/peter.png -loop 1 -i assets/stewie.png -i run/master_audio.wav"));
        assert!(joined.contains("-map [final_v] -map 3:a"));
        assert!(joined.contains("-t 2.700"));
        assert_eq!(cmd.args.last().unwrap(), "run/final_video.partial.mp4");

        let graph_pos = cmd.args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &cmd.args[graph_pos + 1];
        assert!(graph.starts_with("[0:v]scale=1080:1920"));
        assert!(graph.contains("[bg][sprite0]overlay=240:1100:enable='gte(t,0.000)*lt(t,0.900)'[v0]"));
        assert!(graph.contains("[v0][sprite1]overlay"));
        assert!(graph.ends_with("[v1]subtitles='run/subtitles_highlight.ass':fontsdir='assets/fonts'[final_v]"));
    }

    #[test]
    fn test_missing_sprite_is_a_render_error() {
        let mut req = request();
        req.sprites.remove(&Actor::new("Stewie"));

        let compositor = FfmpegCompositor::new(Config::default().media);
        assert!(matches!(compositor.build_command(&req), Err(SkitError::Render(_))));
    }
}
