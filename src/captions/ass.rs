use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::config::MediaConfig;
use crate::error::Result;
use super::CaptionTimeline;

/// Generate an ASS file where each cue is shown with its spoken word highlighted
pub async fn generate_ass_highlight<P: AsRef<Path>>(
    timeline: &CaptionTimeline,
    style: &MediaConfig,
    output_path: P,
) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating ASS highlight file: {}", output_path.display());

    let content = render_ass(timeline, style);
    fs::write(output_path, content).await?;

    info!("ASS file generated successfully");
    Ok(())
}

pub fn render_ass(timeline: &CaptionTimeline, style: &MediaConfig) -> String {
    let mut out = format!(
        "[Script Info]\n\
         ScriptType: v4.00+\n\
         PlayResX: {width}\n\
         PlayResY: {height}\n\
         WrapStyle: 2\n\
         ScaledBorderAndShadow: yes\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: Default,{font},{size},{base},{highlight},&H00000000,&H00000000,1,0,0,0,100,100,0,0,1,{outline},0,2,60,60,{margin},1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
        width = style.width,
        height = style.height,
        font = style.font_name,
        size = style.font_size,
        base = style.base_color,
        highlight = style.highlight_color,
        outline = style.outline,
        margin = style.caption_margin_v,
    );

    let highlight = inline_color(&style.highlight_color);
    let base = inline_color(&style.base_color);

    for cue in &timeline.cues {
        for (active, span) in cue.highlights.iter().enumerate() {
            let start = cue.cue_start + span.onset;
            let end = cue.cue_start + span.end;
            if end <= start {
                continue;
            }

            let text = cue
                .words
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    let word = escape_ass_text(&w.word);
                    if i == active {
                        format!("{{\\c{}}}{}{{\\c{}}}", highlight, word, base)
                    } else {
                        word
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");

            out.push_str(&format!(
                "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
                format_ass_time(start),
                format_ass_time(end),
                text
            ));
        }
    }

    out
}

/// Format time in seconds to ASS time format (H:MM:SS.cc)
fn format_ass_time(seconds: f64) -> String {
    let total_centis = (seconds.max(0.0) * 100.0).round() as u64;
    let hours = total_centis / 360_000;
    let minutes = (total_centis % 360_000) / 6_000;
    let secs = (total_centis % 6_000) / 100;
    let centis = total_centis % 100;

    format!("{}:{:02}:{:02}.{:02}", hours, minutes, secs, centis)
}

/// `&HAABBGGRR` style colour to the `&HBBGGRR&` form override tags take
fn inline_color(color: &str) -> String {
    let hex = color.trim_start_matches("&H").trim_start_matches("&h").trim_end_matches('&');
    let digits: Vec<char> = hex.chars().collect();
    let bgr: String = digits[digits.len().saturating_sub(6)..].iter().collect();
    format!("&H{}&", bgr)
}

/// Override blocks cannot be escaped in ASS, so braces become parentheses
fn escape_ass_text(text: &str) -> String {
    text.replace('\\', "/")
        .replace('{', "(")
        .replace('}', ")")
}
