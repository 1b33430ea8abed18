use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SkitError};
use super::{AudioClip, PcmBuffer};

/// A clip together with its decoded samples
#[derive(Debug, Clone)]
pub struct LoadedClip {
    pub clip: AudioClip,
    pub pcm: PcmBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineOffset {
    pub line_index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

/// Where each line sits on the master track, in script order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OffsetTable {
    pub silence_gap: f64,
    pub entries: Vec<LineOffset>,
}

impl OffsetTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// End of the last line
    pub fn total_duration(&self) -> f64 {
        self.entries.last().map(|e| e.end_seconds).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct MasterTrack {
    pub pcm: PcmBuffer,
    /// Sum of clip durations plus the inserted gaps
    pub duration_seconds: f64,
}

/// Concatenates clips in line order with fixed silence between them
pub struct AudioAssembler {
    silence_gap: f64,
}

impl AudioAssembler {
    pub fn new(silence_gap: f64) -> Self {
        Self {
            silence_gap: silence_gap.max(0.0),
        }
    }

    pub fn assemble(&self, clips: &[LoadedClip]) -> Result<(MasterTrack, OffsetTable)> {
        let first = clips.first()
            .ok_or_else(|| SkitError::Assembly("No clips to assemble".to_string()))?;
        let sample_rate = first.pcm.sample_rate;
        let channels = first.pcm.channels;

        for (position, loaded) in clips.iter().enumerate() {
            if loaded.pcm.sample_rate != sample_rate {
                return Err(SkitError::Assembly(format!(
                    "Clip for line {} has sample rate {} Hz, expected {} Hz",
                    loaded.clip.line_index, loaded.pcm.sample_rate, sample_rate
                )));
            }
            if loaded.pcm.channels != channels {
                return Err(SkitError::Assembly(format!(
                    "Clip for line {} has {} channels, expected {}",
                    loaded.clip.line_index, loaded.pcm.channels, channels
                )));
            }
            if loaded.clip.line_index != position {
                return Err(SkitError::Assembly(format!(
                    "Clip at position {} belongs to line {}",
                    position, loaded.clip.line_index
                )));
            }
        }

        let gap_frames = (self.silence_gap * sample_rate as f64).round() as usize;
        let gap_samples = gap_frames * channels as usize;
        let total_samples = clips.iter().map(|c| c.pcm.samples.len()).sum::<usize>()
            + gap_samples * (clips.len() - 1);

        let mut samples = Vec::with_capacity(total_samples);
        let mut entries = Vec::with_capacity(clips.len());
        let mut cursor = 0.0;

        for (position, loaded) in clips.iter().enumerate() {
            if position > 0 {
                samples.resize(samples.len() + gap_samples, 0.0);
                cursor += self.silence_gap;
            }

            let start_seconds = cursor;
            cursor += loaded.clip.duration_seconds;
            entries.push(LineOffset {
                line_index: loaded.clip.line_index,
                start_seconds,
                end_seconds: cursor,
            });
            samples.extend_from_slice(&loaded.pcm.samples);

            debug!(
                "Line {} placed at {:.3}s-{:.3}s",
                loaded.clip.line_index, start_seconds, cursor
            );
        }

        info!(
            "Assembled {} clips into {:.2}s master track ({} Hz, {} ch)",
            clips.len(), cursor, sample_rate, channels
        );

        let master = MasterTrack {
            pcm: PcmBuffer::new(samples, sample_rate, channels),
            duration_seconds: cursor,
        };
        let table = OffsetTable {
            silence_gap: self.silence_gap,
            entries,
        };

        Ok((master, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Actor;
    use std::path::PathBuf;

    fn loaded(line_index: usize, seconds: f64, sample_rate: u32) -> LoadedClip {
        let frames = (seconds * sample_rate as f64).round() as usize;
        let pcm = PcmBuffer::new(vec![0.1; frames], sample_rate, 1);
        let actor = Actor::new(if line_index % 2 == 0 { "A" } else { "B" });
        let clip = AudioClip::from_buffer(
            line_index,
            actor.clone(),
            PathBuf::from(AudioClip::file_name(line_index, &actor)),
            &pcm,
        );
        LoadedClip { clip, pcm }
    }

    #[test]
    fn test_two_line_offsets() {
        let clips = vec![loaded(0, 1.0, 100), loaded(1, 1.5, 100)];
        let (master, table) = AudioAssembler::new(0.2).assemble(&clips).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.entries[0].line_index, 0);
        assert!((table.entries[0].start_seconds - 0.0).abs() < 1e-9);
        assert!((table.entries[0].end_seconds - 1.0).abs() < 1e-9);
        assert_eq!(table.entries[1].line_index, 1);
        assert!((table.entries[1].start_seconds - 1.2).abs() < 1e-9);
        assert!((table.entries[1].end_seconds - 2.7).abs() < 1e-9);

        assert!((master.duration_seconds - 2.7).abs() < 1e-9);
        assert_eq!(master.pcm.frames(), 100 + 20 + 150);
    }

    #[test]
    fn test_total_duration_and_partition() {
        let sequences: Vec<(Vec<f64>, f64)> = vec![
            (vec![0.5], 0.3),
            (vec![1.0, 2.0, 0.25], 0.0),
            (vec![0.75, 0.75, 1.25, 3.0], 0.5),
        ];

        for (durations, gap) in sequences {
            let clips: Vec<LoadedClip> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| loaded(i, *d, 1000))
                .collect();
            let (master, table) = AudioAssembler::new(gap).assemble(&clips).unwrap();

            let expected = durations.iter().sum::<f64>() + (durations.len() - 1) as f64 * gap;
            assert!((master.duration_seconds - expected).abs() < 1e-9);
            assert!((table.total_duration() - expected).abs() < 1e-9);
            assert!((master.pcm.duration_seconds() - expected).abs() < 1e-3);

            assert_eq!(table.entries[0].start_seconds, 0.0);
            for pair in table.entries.windows(2) {
                assert_eq!(pair[0].line_index + 1, pair[1].line_index);
                assert!(pair[0].start_seconds < pair[0].end_seconds);
                assert!((pair[0].end_seconds + gap - pair[1].start_seconds).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_silence_is_inserted_between_clips_only() {
        let clips = vec![loaded(0, 0.1, 10), loaded(1, 0.1, 10)];
        let (master, _) = AudioAssembler::new(0.5).assemble(&clips).unwrap();

        assert_eq!(master.pcm.samples.len(), 1 + 5 + 1);
        assert_eq!(master.pcm.samples[0], 0.1);
        assert!(master.pcm.samples[1..6].iter().all(|s| *s == 0.0));
        assert_eq!(master.pcm.samples[6], 0.1);
    }

    #[test]
    fn test_sample_rate_mismatch_is_fatal() {
        let clips = vec![loaded(0, 1.0, 24000), loaded(1, 1.0, 22050)];
        let err = AudioAssembler::new(0.2).assemble(&clips).unwrap_err();

        assert!(matches!(err, SkitError::Assembly(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_empty_clip_list_is_rejected() {
        assert!(matches!(
            AudioAssembler::new(0.2).assemble(&[]),
            Err(SkitError::Assembly(_))
        ));
    }
}
