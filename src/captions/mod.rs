// Caption timeline
//
// Groups line-tagged words into short cues, computes the per-word highlight
// spans for the karaoke effect and derives which character sprite is shown
// when. Rendering to subtitle files lives in `ass` and `srt`.

pub mod ass;
pub mod srt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::align::WordTimestamp;
use crate::script::{Actor, ScriptModel};

pub use ass::generate_ass_highlight;
pub use srt::{generate_character_srt, generate_cue_srt};

/// Highlight window of one word, relative to its cue's start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WordHighlight {
    pub onset: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCue {
    pub line_index: usize,
    pub cue_start: f64,
    pub cue_end: f64,
    pub words: Vec<WordTimestamp>,
    /// One entry per word, same order
    pub highlights: Vec<WordHighlight>,
}

impl CaptionCue {
    fn open(line_index: usize, word: WordTimestamp) -> Self {
        Self {
            line_index,
            cue_start: word.start_seconds,
            cue_end: word.end_seconds,
            words: vec![word],
            highlights: Vec::new(),
        }
    }

    fn close(mut self) -> Self {
        self.cue_end = self.words.last().map(|w| w.end_seconds).unwrap_or(self.cue_start);
        self.highlights = self
            .words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let next_onset = self.words.get(i + 1).map(|next| next.start_seconds).unwrap_or(self.cue_end);
                WordHighlight {
                    onset: word.start_seconds - self.cue_start,
                    end: next_onset - self.cue_start,
                }
            })
            .collect();
        self
    }

    pub fn text(&self) -> String {
        self.words.iter().map(|w| w.word.as_str()).collect::<Vec<_>>().join(" ")
    }

    pub fn duration(&self) -> f64 {
        self.cue_end - self.cue_start
    }
}

/// Active sprite for one cue, over `[start_seconds, end_seconds)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpriteInterval {
    pub actor: Actor,
    pub line_index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpriteSchedule {
    pub intervals: Vec<SpriteInterval>,
}

impl SpriteSchedule {
    pub fn for_actor<'a>(&'a self, actor: &'a Actor) -> impl Iterator<Item = &'a SpriteInterval> + 'a {
        self.intervals.iter().filter(move |i| &i.actor == actor)
    }

    /// Actors in order of first appearance
    pub fn actors(&self) -> Vec<Actor> {
        let mut seen: Vec<Actor> = Vec::new();
        for interval in &self.intervals {
            if !seen.contains(&interval.actor) {
                seen.push(interval.actor.clone());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptionTimeline {
    pub cues: Vec<CaptionCue>,
    pub sprites: SpriteSchedule,
}

#[derive(Debug, Clone, Copy)]
pub struct CueLimits {
    pub max_cue_words: usize,
    pub max_cue_duration: f64,
}

pub struct CaptionTimelineBuilder {
    limits: CueLimits,
}

impl CaptionTimelineBuilder {
    pub fn new(limits: CueLimits) -> Self {
        Self { limits }
    }

    /// Greedy grouping; a cue never crosses a line boundary
    pub fn build(&self, words: &[WordTimestamp], script: &ScriptModel) -> CaptionTimeline {
        let mut cues: Vec<CaptionCue> = Vec::new();
        let mut current: Option<CaptionCue> = None;

        for word in words {
            let Some(line_index) = word.line_index else {
                warn!("Skipping unattributed word '{}'", word.word);
                continue;
            };

            current = match current.take() {
                Some(mut cue) if self.fits(&cue, word, line_index) => {
                    cue.words.push(word.clone());
                    Some(cue)
                }
                Some(cue) => {
                    cues.push(cue.close());
                    Some(CaptionCue::open(line_index, word.clone()))
                }
                None => Some(CaptionCue::open(line_index, word.clone())),
            };
        }
        if let Some(cue) = current {
            cues.push(cue.close());
        }

        let intervals = cues
            .iter()
            .filter_map(|cue| match script.actor_of(cue.line_index) {
                Some(actor) => Some(SpriteInterval {
                    actor: actor.clone(),
                    line_index: cue.line_index,
                    start_seconds: cue.cue_start,
                    end_seconds: cue.cue_end,
                }),
                None => {
                    warn!("Cue at {:.3}s references unknown line {}", cue.cue_start, cue.line_index);
                    None
                }
            })
            .collect();

        info!("Built {} caption cues from {} words", cues.len(), words.len());

        CaptionTimeline {
            cues,
            sprites: SpriteSchedule { intervals },
        }
    }

    fn fits(&self, cue: &CaptionCue, word: &WordTimestamp, line_index: usize) -> bool {
        cue.words.len() < self.limits.max_cue_words
            && (word.end_seconds - cue.cue_start) < self.limits.max_cue_duration
            && line_index == cue.line_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptLine;

    fn script() -> ScriptModel {
        ScriptModel {
            topic: "t".to_string(),
            lines: vec![
                ScriptLine { index: 0, actor: Actor::new("A"), text: "hi".to_string() },
                ScriptLine { index: 1, actor: Actor::new("B"), text: "yo there".to_string() },
            ],
        }
    }

    fn word(text: &str, start: f64, end: f64, line: usize) -> WordTimestamp {
        WordTimestamp {
            line_index: Some(line),
            ..WordTimestamp::new(text, start, end)
        }
    }

    fn builder(max_cue_words: usize, max_cue_duration: f64) -> CaptionTimelineBuilder {
        CaptionTimelineBuilder::new(CueLimits { max_cue_words, max_cue_duration })
    }

    #[test]
    fn test_forced_split_at_line_change() {
        let words = vec![
            word("hi", 0.0, 0.9, 0),
            word("yo", 1.2, 1.4, 1),
            word("there", 1.4, 2.6, 1),
        ];
        let timeline = builder(2, 3.0).build(&words, &script());

        assert_eq!(timeline.cues.len(), 2);
        assert_eq!(timeline.cues[0].text(), "hi");
        assert_eq!(timeline.cues[0].line_index, 0);
        assert_eq!(timeline.cues[1].text(), "yo there");
        assert_eq!(timeline.cues[1].cue_start, 1.2);
        assert_eq!(timeline.cues[1].cue_end, 2.6);
    }

    #[test]
    fn test_highlight_spans() {
        let words = vec![
            word("yo", 1.2, 1.4, 1),
            word("there", 1.5, 2.6, 1),
        ];
        let timeline = builder(2, 3.0).build(&words, &script());
        let cue = &timeline.cues[0];

        assert_eq!(cue.highlights.len(), 2);
        assert!((cue.highlights[0].onset - 0.0).abs() < 1e-9);
        assert!((cue.highlights[0].end - 0.3).abs() < 1e-9);
        assert!((cue.highlights[1].onset - 0.3).abs() < 1e-9);
        assert!((cue.highlights[1].end - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_limits_are_respected() {
        let words: Vec<WordTimestamp> = (0..20)
            .map(|i| {
                let start = i as f64 * 0.3;
                word(&format!("w{}", i), start, start + 0.25, if i < 11 { 0 } else { 1 })
            })
            .collect();

        for (max_words, max_duration) in [(1, 10.0), (3, 10.0), (5, 0.8), (8, 1.0)] {
            let timeline = builder(max_words, max_duration).build(&words, &script());

            let total: usize = timeline.cues.iter().map(|c| c.words.len()).sum();
            assert_eq!(total, words.len());
            for cue in &timeline.cues {
                assert!(cue.words.len() <= max_words);
                assert!(cue.duration() < max_duration);
                assert!(cue.words.iter().all(|w| w.line_index == Some(cue.line_index)));
                assert_eq!(cue.cue_start, cue.words[0].start_seconds);
                assert_eq!(cue.cue_end, cue.words.last().unwrap().end_seconds);
            }
        }
    }

    #[test]
    fn test_sprite_schedule_follows_cues() {
        let words = vec![
            word("hi", 0.0, 0.9, 0),
            word("yo", 1.2, 1.4, 1),
            word("there", 1.4, 2.6, 1),
        ];
        let timeline = builder(1, 3.0).build(&words, &script());

        assert_eq!(timeline.sprites.intervals.len(), timeline.cues.len());
        for (cue, interval) in timeline.cues.iter().zip(&timeline.sprites.intervals) {
            assert_eq!(interval.start_seconds, cue.cue_start);
            assert_eq!(interval.end_seconds, cue.cue_end);
        }
        assert_eq!(timeline.sprites.intervals[0].actor, Actor::new("A"));
        assert_eq!(timeline.sprites.for_actor(&Actor::new("B")).count(), 2);
        assert_eq!(timeline.sprites.actors(), vec![Actor::new("A"), Actor::new("B")]);
    }

    #[test]
    fn test_empty_input_gives_empty_timeline() {
        let timeline = builder(2, 3.0).build(&[], &script());
        assert!(timeline.cues.is_empty());
        assert!(timeline.sprites.intervals.is_empty());
    }

    #[test]
    fn test_overlong_word_forms_its_own_cue() {
        let words = vec![
            word("supercalifragilistic", 0.0, 4.0, 0),
            word("wow", 4.0, 4.3, 0),
        ];
        let timeline = builder(3, 2.0).build(&words, &script());
        assert_eq!(timeline.cues.len(), 2);
    }
}
