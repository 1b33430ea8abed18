// Dialogue script model and generation
//
// The script is the ordered list of lines every later stage re-associates
// timing with. Generators only hand back raw model text; `parse_script_response`
// is the single place that text is turned into a `ScriptModel`, and it rejects
// anything that does not match the schema exactly.

pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Result, SkitError};

pub use ollama::OllamaScriptGenerator;

/// Name of a configured speaking character
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub index: usize,
    pub actor: Actor,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptModel {
    pub topic: String,
    pub lines: Vec<ScriptLine>,
}

impl ScriptModel {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn actor_of(&self, line_index: usize) -> Option<&Actor> {
        self.lines.get(line_index).map(|line| &line.actor)
    }
}

/// Wire shape the model must produce, nothing more and nothing less
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptResponse {
    script: Vec<ScriptEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptEntry {
    actor: String,
    line: String,
}

/// Main trait for the dialogue-writing collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Write a dialogue about `topic`
    async fn generate(&self, topic: &str) -> Result<ScriptModel>;
}

/// Validate raw model output against the script schema
pub fn parse_script_response(
    raw: &str,
    topic: &str,
    actors: &BTreeSet<String>,
    max_lines: usize,
) -> Result<ScriptModel> {
    let cleaned = strip_wrappers(raw);

    let response: ScriptResponse = serde_json::from_str(&cleaned)
        .map_err(|e| SkitError::ScriptGeneration(format!("Response is not a valid script object: {}", e)))?;

    if response.script.is_empty() {
        return Err(SkitError::ScriptGeneration("Script contains no lines".to_string()));
    }
    if response.script.len() > max_lines {
        return Err(SkitError::ScriptGeneration(format!(
            "Script has {} lines, at most {} allowed",
            response.script.len(),
            max_lines
        )));
    }

    let mut lines = Vec::with_capacity(response.script.len());
    for (index, entry) in response.script.into_iter().enumerate() {
        if !actors.contains(&entry.actor) {
            return Err(SkitError::ScriptGeneration(format!(
                "Line {} uses unknown actor '{}'",
                index, entry.actor
            )));
        }

        let text = normalize_line_text(&entry.line);
        if text.is_empty() {
            return Err(SkitError::ScriptGeneration(format!("Line {} is empty", index)));
        }

        lines.push(ScriptLine {
            index,
            actor: Actor::new(entry.actor),
            text,
        });
    }

    Ok(ScriptModel {
        topic: topic.to_string(),
        lines,
    })
}

/// Replace typographic punctuation the TTS engine stumbles on
pub fn normalize_line_text(text: &str) -> String {
    text.trim()
        .replace('\u{2019}', "'")
        .replace('\u{2018}', "'")
        .replace('\u{2013}', "-")
        .replace('\u{2014}', "--")
        .replace('\u{201c}', "\"")
        .replace('\u{201d}', "\"")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop reasoning blocks and markdown fences around the JSON payload
fn strip_wrappers(raw: &str) -> String {
    let mut text = raw.to_string();

    while let Some(start) = text.find("<think>") {
        match text[start..].find("</think>") {
            Some(end) => text.replace_range(start..start + end + "</think>".len(), ""),
            None => {
                text.truncate(start);
                break;
            }
        }
    }

    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .unwrap_or(trimmed);

    unfenced.trim().to_string()
}
