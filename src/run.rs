// Run directories
//
// Every run owns one directory under the output root. The directory is an
// append-only artifact store keyed by artifact name; `run.json` records the
// state machine position and where each artifact lives, relative to the run
// directory.

use chrono::{DateTime, Local, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Result, SkitError};

pub const MANIFEST_FILE: &str = "run.json";

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Script,
    Synthesis,
    Assembly,
    Alignment,
    Timeline,
    Render,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Script,
        Stage::Synthesis,
        Stage::Assembly,
        Stage::Alignment,
        Stage::Timeline,
        Stage::Render,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Script => "script",
            Stage::Synthesis => "synthesis",
            Stage::Assembly => "assembly",
            Stage::Alignment => "alignment",
            Stage::Timeline => "timeline",
            Stage::Render => "render",
        }
    }

    /// State reached once this stage's artifacts are persisted
    pub fn completed_state(&self) -> RunState {
        match self {
            Stage::Script => RunState::ScriptReady,
            Stage::Synthesis => RunState::AudioSynthesized,
            Stage::Assembly => RunState::AudioAssembled,
            Stage::Alignment => RunState::Aligned,
            Stage::Timeline => RunState::TimelineBuilt,
            Stage::Render => RunState::Rendered,
        }
    }

    /// Artifacts that must all exist for the stage to count as complete
    pub fn artifacts(&self) -> &'static [Artifact] {
        match self {
            Stage::Script => &[Artifact::Script],
            Stage::Synthesis => &[Artifact::Clips],
            Stage::Assembly => &[Artifact::MasterAudio, Artifact::Offsets],
            Stage::Alignment => &[Artifact::Words],
            Stage::Timeline => &[
                Artifact::HighlightSubtitles,
                Artifact::CueSubtitles,
                Artifact::CharacterSubtitles,
                Artifact::Timeline,
            ],
            Stage::Render => &[Artifact::FinalVideo],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Created,
    ScriptReady,
    AudioSynthesized,
    AudioAssembled,
    Aligned,
    TimelineBuilt,
    Rendered,
    Done,
    Failed { stage: Stage, cause: String },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Created => f.write_str("CREATED"),
            RunState::ScriptReady => f.write_str("SCRIPT_READY"),
            RunState::AudioSynthesized => f.write_str("AUDIO_SYNTHESIZED"),
            RunState::AudioAssembled => f.write_str("AUDIO_ASSEMBLED"),
            RunState::Aligned => f.write_str("ALIGNED"),
            RunState::TimelineBuilt => f.write_str("TIMELINE_BUILT"),
            RunState::Rendered => f.write_str("RENDERED"),
            RunState::Done => f.write_str("DONE"),
            RunState::Failed { stage, cause } => write!(f, "FAILED({}: {})", stage, cause),
        }
    }
}

/// Files a run persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Artifact {
    Script,
    /// Index of the per-line clips stored under `clips/`
    Clips,
    MasterAudio,
    Offsets,
    Words,
    Timeline,
    HighlightSubtitles,
    CueSubtitles,
    CharacterSubtitles,
    FinalVideo,
}

impl Artifact {
    pub fn key(&self) -> &'static str {
        match self {
            Artifact::Script => "script",
            Artifact::Clips => "clips",
            Artifact::MasterAudio => "master_audio",
            Artifact::Offsets => "offsets",
            Artifact::Words => "words",
            Artifact::Timeline => "timeline",
            Artifact::HighlightSubtitles => "subtitles_highlight",
            Artifact::CueSubtitles => "subtitles",
            Artifact::CharacterSubtitles => "character_subtitles",
            Artifact::FinalVideo => "final_video",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Script => "script.json",
            Artifact::Clips => "clips.json",
            Artifact::MasterAudio => "master_audio.wav",
            Artifact::Offsets => "offsets.json",
            Artifact::Words => "words.json",
            Artifact::Timeline => "timeline.json",
            Artifact::HighlightSubtitles => "subtitles_highlight.ass",
            Artifact::CueSubtitles => "subtitles.srt",
            Artifact::CharacterSubtitles => "character_subtitles.srt",
            Artifact::FinalVideo => "final_video.mp4",
        }
    }
}

/// Contents of `run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub topic: String,
    pub state: RunState,
    /// Artifact key to path relative to the run directory
    #[serde(default)]
    pub artifacts: BTreeMap<String, PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunManifest {
    pub fn new<S1: Into<String>, S2: Into<String>>(run_id: S1, topic: S2) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            topic: topic.into(),
            state: RunState::Created,
            artifacts: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, state: RunState) {
        debug!("Run {} -> {}", self.run_id, state);
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, stage: Stage, cause: String) {
        self.advance(RunState::Failed { stage, cause });
    }

    pub fn record_artifact(&mut self, artifact: Artifact, relative_path: PathBuf) {
        self.artifacts.insert(artifact.key().to_string(), relative_path);
    }

    pub fn forget_artifact(&mut self, artifact: Artifact) {
        self.artifacts.remove(artifact.key());
    }

    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }
}

/// Key to path mapping over one run directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.root.join(artifact.file_name())
    }

    pub fn exists(&self, artifact: Artifact) -> bool {
        self.path(artifact).is_file()
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join("clips")
    }

    /// Scratch location next to `artifact`; renamed into place once complete
    pub fn partial_path(&self, artifact: Artifact) -> PathBuf {
        let name = artifact.file_name();
        match name.rsplit_once('.') {
            Some((stem, ext)) => self.root.join(format!("{}.partial.{}", stem, ext)),
            None => self.root.join(format!("{}.partial", name)),
        }
    }

    pub fn stage_complete(&self, stage: Stage) -> bool {
        stage.artifacts().iter().all(|a| self.exists(*a))
    }

    /// Path relative to the run directory, for storing in the manifest
    pub fn relative(&self, path: &Path) -> PathBuf {
        pathdiff::diff_paths(path, &self.root).unwrap_or_else(|| path.to_path_buf())
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.root.join(relative)
        }
    }

    pub async fn write_json<T: Serialize>(&self, artifact: Artifact, value: &T) -> Result<PathBuf> {
        let path = self.path(artifact);
        write_json_atomic(&path, value).await?;
        debug!("Persisted {}", path.display());
        Ok(path)
    }

    pub async fn read_json<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<T> {
        let path = self.path(artifact);
        let content = fs::read_to_string(&path).await.map_err(|e| {
            SkitError::Artifact(format!("Cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| SkitError::Artifact(format!("Corrupt artifact {}: {}", path.display(), e)))
    }
}

/// One run's identity and storage
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub base_dir: PathBuf,
    pub store: ArtifactStore,
}

impl RunContext {
    pub fn new<P: AsRef<Path>, S: Into<String>>(base_dir: P, run_id: S) -> Self {
        let run_id = run_id.into();
        let base_dir = base_dir.as_ref().to_path_buf();
        let store = ArtifactStore::new(base_dir.join(&run_id));

        Self {
            run_id,
            base_dir,
            store,
        }
    }

    /// `YYYYMMDD-HHMMSS-xxxxxxxx`, local time plus a random suffix
    pub fn generate_run_id() -> String {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", stamp, &suffix[..8])
    }

    pub fn run_dir(&self) -> &Path {
        self.store.root()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir().join(MANIFEST_FILE)
    }

    pub async fn load_manifest(&self) -> Result<Option<RunManifest>> {
        read_manifest(&self.manifest_path()).await
    }

    pub async fn save_manifest(&self, manifest: &RunManifest) -> Result<()> {
        write_json_atomic(&self.manifest_path(), manifest).await
    }
}

async fn read_manifest(path: &Path) -> Result<Option<RunManifest>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).await?;
    let manifest = serde_json::from_str(&content)
        .map_err(|e| SkitError::Artifact(format!("Corrupt manifest {}: {}", path.display(), e)))?;
    Ok(Some(manifest))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Manifests of every run under `base_dir`, ordered by run id
pub async fn list_runs<P: AsRef<Path>>(base_dir: P) -> Result<Vec<RunManifest>> {
    let base_dir = base_dir.as_ref();
    if !base_dir.is_dir() {
        return Ok(Vec::new());
    }

    let run_dirs: Vec<PathBuf> = WalkDir::new(base_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.path().to_path_buf())
        .collect();

    let mut manifests = Vec::new();
    for dir in run_dirs {
        match read_manifest(&dir.join(MANIFEST_FILE)).await {
            Ok(Some(manifest)) => manifests.push(manifest),
            Ok(None) => debug!("Skipping {}: no manifest", dir.display()),
            Err(e) => warn!("Skipping {}: {}", dir.display(), e),
        }
    }

    manifests.sort_by(|a, b| a.run_id.cmp(&b.run_id));
    Ok(manifests)
}
