// Word alignment
//
// The transcriber only knows the master track's clock. `AlignmentMapper`
// validates what it returns and attributes every word to the script line
// whose interval contains the word's start, using the offset table.
//
// To add a new transcription service, implement `Transcriber` and map the
// service output into `WordTimestamp`s with `line_index: None`.

pub mod whisper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::OffsetTable;
use crate::error::{Result, SkitError};

pub use whisper::WhisperCliTranscriber;

/// Shortest duration a word is allowed to have
const MIN_WORD_DURATION: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Unset until the word is attributed to a line
    pub line_index: Option<usize>,
}

impl WordTimestamp {
    pub fn new<S: Into<String>>(word: S, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            word: word.into(),
            start_seconds,
            end_seconds,
            line_index: None,
        }
    }
}

/// Main trait for the transcription collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Word-level timestamps on the audio file's own clock, in order
    async fn transcribe_words(&self, audio_path: &Path) -> Result<Vec<WordTimestamp>>;
}

pub struct AlignmentMapper {
    boundary_epsilon: f64,
    max_duration_drift: f64,
    timeout: Duration,
}

impl AlignmentMapper {
    pub fn new(boundary_epsilon: f64, max_duration_drift: f64, timeout: Duration) -> Self {
        Self {
            boundary_epsilon,
            max_duration_drift,
            timeout,
        }
    }

    /// Transcribe the master track and check the result against its duration
    pub async fn align(
        &self,
        transcriber: &dyn Transcriber,
        master_audio: &Path,
        master_duration: f64,
    ) -> Result<Vec<WordTimestamp>> {
        info!("Transcribing master track {}", master_audio.display());

        let words = match tokio::time::timeout(self.timeout, transcriber.transcribe_words(master_audio)).await {
            Ok(Ok(words)) => words,
            Ok(Err(SkitError::Alignment(cause))) => return Err(SkitError::Alignment(cause)),
            Ok(Err(e)) => return Err(SkitError::Alignment(format!("Transcription failed: {}", e))),
            Err(_) => {
                return Err(SkitError::Alignment(format!(
                    "Transcription timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        let words = normalize_words(words);
        self.validate(&words, master_duration)?;

        info!("Transcription returned {} words", words.len());
        Ok(words)
    }

    /// Reject empty, unordered or truncated timing
    pub fn validate(&self, words: &[WordTimestamp], master_duration: f64) -> Result<()> {
        let last = words.last()
            .ok_or_else(|| SkitError::Alignment("Transcription returned no words".to_string()))?;

        if let Some(pair) = words.windows(2).find(|p| p[1].start_seconds < p[0].start_seconds) {
            return Err(SkitError::Alignment(format!(
                "Words out of order: '{}' at {:.3}s follows '{}' at {:.3}s",
                pair[1].word, pair[1].start_seconds, pair[0].word, pair[0].start_seconds
            )));
        }

        let drift = (last.end_seconds - master_duration).abs();
        if drift > self.max_duration_drift {
            return Err(SkitError::Alignment(format!(
                "Transcribed duration {:.2}s deviates from master track {:.2}s by {:.2}s",
                last.end_seconds, master_duration, drift
            )));
        }

        Ok(())
    }

    /// Attribute every word to the line containing its start.
    ///
    /// A start within epsilon of a line's start belongs to that line; a start
    /// inside the silence after a line stays with that line.
    pub fn assign(&self, words: &[WordTimestamp], table: &OffsetTable) -> Result<Vec<WordTimestamp>> {
        if table.is_empty() {
            return Err(SkitError::Alignment("Offset table is empty".to_string()));
        }

        let assigned = words
            .iter()
            .map(|word| {
                let line_index = self.line_for(word.start_seconds, table);
                if word.end_seconds > table.entries[line_index].end_seconds + self.boundary_epsilon {
                    debug!(
                        "Word '{}' runs past the end of line {} ({:.3}s > {:.3}s)",
                        word.word, line_index, word.end_seconds, table.entries[line_index].end_seconds
                    );
                }
                WordTimestamp {
                    line_index: Some(table.entries[line_index].line_index),
                    ..word.clone()
                }
            })
            .collect();

        Ok(assigned)
    }

    /// Position in the table of the last line whose start is at or before `start`
    fn line_for(&self, start: f64, table: &OffsetTable) -> usize {
        table
            .entries
            .partition_point(|entry| entry.start_seconds - self.boundary_epsilon <= start)
            .saturating_sub(1)
    }
}

/// Trim words, drop empty ones and give zero-length words a minimal span
fn normalize_words(words: Vec<WordTimestamp>) -> Vec<WordTimestamp> {
    words
        .into_iter()
        .filter_map(|mut word| {
            word.word = word.word.trim().to_string();
            if word.word.is_empty() {
                return None;
            }
            if word.end_seconds <= word.start_seconds {
                warn!("Widening zero-length word '{}' at {:.3}s", word.word, word.start_seconds);
                word.end_seconds = word.start_seconds + MIN_WORD_DURATION;
            }
            Some(word)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::LineOffset;
    use std::path::PathBuf;

    fn mapper() -> AlignmentMapper {
        AlignmentMapper::new(0.02, 2.0, Duration::from_secs(5))
    }

    fn table() -> OffsetTable {
        OffsetTable {
            silence_gap: 0.2,
            entries: vec![
                LineOffset { line_index: 0, start_seconds: 0.0, end_seconds: 1.0 },
                LineOffset { line_index: 1, start_seconds: 1.2, end_seconds: 2.7 },
            ],
        }
    }

    fn lines_of(words: &[WordTimestamp]) -> Vec<usize> {
        words.iter().map(|w| w.line_index.unwrap()).collect()
    }

    #[test]
    fn test_assign_two_line_dialogue() {
        let words = vec![
            WordTimestamp::new("hi", 0.0, 0.9),
            WordTimestamp::new("yo", 1.2, 1.4),
            WordTimestamp::new("there", 1.4, 2.6),
        ];
        let assigned = mapper().assign(&words, &table()).unwrap();
        assert_eq!(lines_of(&assigned), vec![0, 1, 1]);
    }

    #[test]
    fn test_boundary_ties_resolve_to_later_line() {
        let table = OffsetTable {
            silence_gap: 0.0,
            entries: vec![
                LineOffset { line_index: 0, start_seconds: 0.0, end_seconds: 1.0 },
                LineOffset { line_index: 1, start_seconds: 1.0, end_seconds: 2.0 },
                LineOffset { line_index: 2, start_seconds: 2.0, end_seconds: 3.0 },
            ],
        };
        let words = vec![
            WordTimestamp::new("exact", 1.0, 1.3),
            WordTimestamp::new("early", 1.99, 2.3),
            WordTimestamp::new("before", 1.97, 1.99),
        ];
        let assigned = mapper().assign(&words, &table).unwrap();
        assert_eq!(lines_of(&assigned), vec![1, 2, 1]);
    }

    #[test]
    fn test_words_in_gap_and_outside_track() {
        let words = vec![
            WordTimestamp::new("lead", -0.05, 0.1),
            WordTimestamp::new("gap", 1.05, 1.15),
            WordTimestamp::new("tail", 2.9, 3.0),
        ];
        let assigned = mapper().assign(&words, &table()).unwrap();
        assert_eq!(lines_of(&assigned), vec![0, 0, 1]);
    }

    #[test]
    fn test_spanning_word_goes_to_start_line() {
        let words = vec![WordTimestamp::new("long", 0.8, 1.5)];
        let assigned = mapper().assign(&words, &table()).unwrap();
        assert_eq!(lines_of(&assigned), vec![0]);
    }

    #[test]
    fn test_every_word_gets_exactly_one_line() {
        let table = table();
        let words: Vec<WordTimestamp> = (0..60)
            .map(|i| {
                let start = i as f64 * 0.05;
                WordTimestamp::new(format!("w{}", i), start, start + 0.04)
            })
            .collect();
        let assigned = mapper().assign(&words, &table).unwrap();

        assert_eq!(assigned.len(), words.len());
        for word in &assigned {
            let line = word.line_index.unwrap();
            assert!(line < table.len());
        }
        // non-decreasing attribution over an ordered word list
        let lines = lines_of(&assigned);
        assert!(lines.windows(2).all(|p| p[0] <= p[1]));
    }

    #[test]
    fn test_validate_rejects_empty_and_truncated() {
        let m = mapper();
        assert!(matches!(m.validate(&[], 2.7), Err(SkitError::Alignment(_))));

        let truncated = vec![WordTimestamp::new("hi", 0.0, 0.4)];
        assert!(matches!(m.validate(&truncated, 10.0), Err(SkitError::Alignment(_))));

        let fine = vec![WordTimestamp::new("hi", 0.0, 2.6)];
        assert!(m.validate(&fine, 2.7).is_ok());
    }

    #[test]
    fn test_validate_rejects_unordered_words() {
        let words = vec![
            WordTimestamp::new("b", 1.0, 1.5),
            WordTimestamp::new("a", 0.5, 0.9),
        ];
        assert!(matches!(mapper().validate(&words, 1.5), Err(SkitError::Alignment(_))));
    }

    #[test]
    fn test_normalize_words() {
        let words = normalize_words(vec![
            WordTimestamp::new(" hi", 0.0, 0.5),
            WordTimestamp::new("  ", 0.5, 0.6),
            WordTimestamp::new("yo", 1.0, 1.0),
        ]);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].word, "hi");
        assert!(words[1].end_seconds > words[1].start_seconds);
    }

    #[tokio::test]
    async fn test_align_wraps_collaborator_failures() {
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe_words()
            .returning(|_| Err(SkitError::Service("whisper crashed".to_string())));

        let err = mapper()
            .align(&transcriber, &PathBuf::from("master.wav"), 2.7)
            .await
            .unwrap_err();
        assert!(matches!(err, SkitError::Alignment(_)));
    }

    #[tokio::test]
    async fn test_align_returns_validated_words() {
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe_words()
            .times(1)
            .returning(|_| Ok(vec![
                WordTimestamp::new(" hi", 0.0, 0.9),
                WordTimestamp::new(" yo", 1.2, 1.4),
                WordTimestamp::new(" there", 1.4, 2.6),
            ]));

        let words = mapper()
            .align(&transcriber, &PathBuf::from("master.wav"), 2.7)
            .await
            .unwrap();
        tokio_test::assert_ok!(mapper().validate(&words, 2.7));
        assert_eq!(words[2].word, "there");
        assert!(words.iter().all(|w| w.line_index.is_none()));
    }
}
