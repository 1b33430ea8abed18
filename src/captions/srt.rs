use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::Result;
use super::{CaptionTimeline, SpriteSchedule};

/// Generate an SRT file with one entry per caption cue
pub async fn generate_cue_srt<P: AsRef<Path>>(
    timeline: &CaptionTimeline,
    output_path: P,
) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    let entries = timeline
        .cues
        .iter()
        .map(|cue| (cue.cue_start, cue.cue_end, cue.text()));
    fs::write(output_path, render_srt(entries)).await?;

    info!("SRT file generated successfully");
    Ok(())
}

/// Generate an SRT file naming the active character for each sprite interval
pub async fn generate_character_srt<P: AsRef<Path>>(
    sprites: &SpriteSchedule,
    output_path: P,
) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating character SRT file: {}", output_path.display());

    let entries = sprites
        .intervals
        .iter()
        .map(|i| (i.start_seconds, i.end_seconds, i.actor.to_string()));
    fs::write(output_path, render_srt(entries)).await?;

    Ok(())
}

fn render_srt<I: Iterator<Item = (f64, f64, String)>>(entries: I) -> String {
    let mut srt_content = String::new();

    for (index, (start, end, text)) in entries.enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(start),
            format_srt_time(end),
            text.trim()
        ));
    }

    srt_content
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::SpriteInterval;
    use crate::script::Actor;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(65.123), "00:01:05,123");
        assert_eq!(format_srt_time(3661.500), "01:01:01,500");
    }

    #[tokio::test]
    async fn test_character_srt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("character_subtitles.srt");
        let sprites = SpriteSchedule {
            intervals: vec![
                SpriteInterval { actor: Actor::new("Peter"), line_index: 0, start_seconds: 0.0, end_seconds: 0.9 },
                SpriteInterval { actor: Actor::new("Stewie"), line_index: 1, start_seconds: 1.2, end_seconds: 2.6 },
            ],
        };

        generate_character_srt(&sprites, &path).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        assert_eq!(
            content,
            "1\n00:00:00,000 --> 00:00:00,900\nPeter\n\n2\n00:00:01,200 --> 00:00:02,600\nStewie\n\n"
        );
    }
}
