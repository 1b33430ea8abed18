use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::align::{AlignmentMapper, Transcriber, WhisperCliTranscriber, WordTimestamp};
use crate::audio::{AudioAssembler, AudioClip, LoadedClip, OffsetTable, PcmBuffer};
use crate::captions::{
    generate_ass_highlight, generate_character_srt, generate_cue_srt, CaptionTimeline,
    CaptionTimelineBuilder, CueLimits,
};
use crate::config::Config;
use crate::error::{Result, SkitError};
use crate::media::{select_background, Compositor, FfmpegCompositor, RenderRequest};
use crate::run::{Artifact, RunContext, RunManifest, RunState, Stage};
use crate::script::{Actor, OllamaScriptGenerator, ScriptGenerator, ScriptModel};
use crate::synthesis::{TtsEngineHandle, VoiceMap, VoiceSynthesisStage};

/// External capabilities a run depends on
#[derive(Clone)]
pub struct Collaborators {
    pub script_generator: Arc<dyn ScriptGenerator>,
    /// Shared by every run of this process
    pub tts: TtsEngineHandle,
    pub transcriber: Arc<dyn Transcriber>,
    pub compositor: Arc<dyn Compositor>,
}

impl Collaborators {
    /// Default service adapters, around an existing engine handle
    pub fn from_config(config: &Config, tts: TtsEngineHandle) -> Result<Self> {
        let actors: BTreeSet<String> = config.characters.keys().cloned().collect();

        Ok(Self {
            script_generator: Arc::new(OllamaScriptGenerator::new(config.llm.clone(), actors)?),
            tts,
            transcriber: Arc::new(WhisperCliTranscriber::new(config.transcriber.clone())),
            compositor: Arc::new(FfmpegCompositor::new(config.media.clone())),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub final_video: PathBuf,
    pub state: RunState,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub topic: String,
    pub result: Result<RunOutcome>,
}

/// Drives one run through the stage sequence, persisting after every stage
#[derive(Clone)]
pub struct RunOrchestrator {
    config: Arc<Config>,
    collaborators: Collaborators,
}

impl RunOrchestrator {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
        }
    }

    pub fn from_config(config: Config, tts: TtsEngineHandle) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config, tts)?;
        Ok(Self::new(config, collaborators))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self, run_id: &str) -> RunContext {
        RunContext::new(&self.config.output_dir, run_id)
    }

    /// Fail early when the compositor cannot be invoked at all
    pub async fn check_dependencies(&self) -> Result<()> {
        self.collaborators.compositor.check_availability().await
    }

    /// Start a fresh run for `topic`
    pub async fn generate(&self, topic: &str) -> Result<RunOutcome> {
        let run_id = RunContext::generate_run_id();
        self.run(&run_id, Some(topic)).await
    }

    /// Continue an existing run from its first missing artifact
    pub async fn resume(&self, run_id: &str) -> Result<RunOutcome> {
        self.run(run_id, None).await
    }

    /// Run (or resume) `run_id`. A new run needs a topic; an existing run
    /// keeps the topic recorded in its manifest.
    pub async fn run(&self, run_id: &str, topic: Option<&str>) -> Result<RunOutcome> {
        let ctx = self.context(run_id);

        let mut manifest = match ctx.load_manifest().await? {
            Some(manifest) => {
                if let Some(topic) = topic {
                    if topic != manifest.topic {
                        warn!("Run {} was created for topic '{}'; ignoring '{}'", run_id, manifest.topic, topic);
                    }
                }
                manifest
            }
            None => {
                let topic = topic.ok_or_else(|| {
                    SkitError::Artifact(format!(
                        "No run '{}' under {}",
                        run_id,
                        self.config.output_dir.display()
                    ))
                })?;
                fs::create_dir_all(ctx.run_dir()).await?;
                let manifest = RunManifest::new(run_id, topic);
                ctx.save_manifest(&manifest).await?;
                info!("Created run {} in {}", run_id, ctx.run_dir().display());
                manifest
            }
        };

        let final_video = ctx.store.path(Artifact::FinalVideo);
        if manifest.is_done() && final_video.is_file() {
            info!("Run {} is already done: {}", run_id, final_video.display());
            return Ok(RunOutcome {
                run_id: run_id.to_string(),
                run_dir: ctx.run_dir().to_path_buf(),
                final_video,
                state: manifest.state,
            });
        }

        info!("Running {} ('{}') from state {}", run_id, manifest.topic, manifest.state);

        match self.execute(&ctx, &mut manifest).await {
            Ok(final_video) => {
                manifest.advance(RunState::Done);
                ctx.save_manifest(&manifest).await?;
                info!("Run {} finished: {}", run_id, final_video.display());

                Ok(RunOutcome {
                    run_id: run_id.to_string(),
                    run_dir: ctx.run_dir().to_path_buf(),
                    final_video,
                    state: manifest.state,
                })
            }
            Err((stage, cause)) => {
                error!("Run {} failed at {}: {}", run_id, stage, cause);
                manifest.fail(stage, cause.to_string());
                if let Err(e) = ctx.save_manifest(&manifest).await {
                    error!("Could not record failure of run {}: {}", run_id, e);
                }

                Err(SkitError::RunFailed {
                    run_id: run_id.to_string(),
                    stage,
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// One run per topic, at most `jobs` at a time, all on the same engine
    pub async fn run_batch(&self, topics: Vec<String>, jobs: usize) -> Vec<BatchOutcome> {
        let permits = Arc::new(Semaphore::new(jobs.max(1)));
        let mut set = JoinSet::new();

        for topic in topics {
            let orchestrator = self.clone();
            let permits = permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let result = orchestrator.generate(&topic).await;
                BatchOutcome { topic, result }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(run) => info!("Topic '{}' done: {}", outcome.topic, run.final_video.display()),
                        Err(e) => warn!("Topic '{}' failed: {}", outcome.topic, e),
                    }
                    outcomes.push(outcome);
                }
                Err(e) => error!("Batch task aborted: {}", e),
            }
        }

        outcomes
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        manifest: &mut RunManifest,
    ) -> std::result::Result<PathBuf, (Stage, SkitError)> {
        let pass = &mut StagePass { manifest, recomputed: false };
        let script = self.script_stage(ctx, pass).await.map_err(at(Stage::Script))?;
        let clips = self.synthesis_stage(ctx, pass, &script).await.map_err(at(Stage::Synthesis))?;
        let offsets = self.assembly_stage(ctx, pass, &clips).await.map_err(at(Stage::Assembly))?;
        let words = self.alignment_stage(ctx, pass, &offsets).await.map_err(at(Stage::Alignment))?;
        let timeline = self.timeline_stage(ctx, pass, &words, &script).await.map_err(at(Stage::Timeline))?;
        self.render_stage(ctx, pass, &offsets, &timeline).await.map_err(at(Stage::Render))
    }

    async fn script_stage(&self, ctx: &RunContext, pass: &mut StagePass<'_>) -> Result<ScriptModel> {
        if self.skip(ctx, pass, Stage::Script).await? {
            return ctx.store.read_json(Artifact::Script).await;
        }

        let attempts = self.config.llm.max_retries.max(1);
        let limit = Duration::from_secs(self.config.llm.timeout_secs.saturating_mul(attempts as u64));
        let script = tokio::time::timeout(limit, self.collaborators.script_generator.generate(&pass.manifest.topic))
            .await
            .map_err(|_| SkitError::ScriptGeneration(format!("Timed out after {}s", limit.as_secs())))??;

        if script.is_empty() {
            return Err(SkitError::ScriptGeneration("Script contains no lines".to_string()));
        }

        ctx.store.write_json(Artifact::Script, &script).await?;
        self.checkpoint(ctx, pass.manifest, Stage::Script).await?;
        Ok(script)
    }

    async fn synthesis_stage(
        &self,
        ctx: &RunContext,
        pass: &mut StagePass<'_>,
        script: &ScriptModel,
    ) -> Result<Vec<AudioClip>> {
        if self.skip(ctx, pass, Stage::Synthesis).await? {
            let clips: Vec<AudioClip> = ctx.store.read_json(Artifact::Clips).await?;
            let clips: Vec<AudioClip> = clips
                .into_iter()
                .map(|mut clip| {
                    clip.path = ctx.store.resolve(&clip.path);
                    clip
                })
                .collect();

            if clips.len() == script.len() && clips.iter().all(|c| c.path.is_file()) {
                return Ok(clips);
            }
            warn!("Clip index for run {} is incomplete; synthesizing missing lines", ctx.run_id);
            self.invalidate_after(ctx, pass, Stage::Synthesis).await?;
        }

        let voices: VoiceMap = self.config.characters
            .iter()
            .map(|(name, character)| (Actor::new(name.clone()), character.voice.clone()))
            .collect();

        let stage = VoiceSynthesisStage::new(
            self.collaborators.tts.clone(),
            Duration::from_secs(self.config.tts.timeout_secs),
            self.config.tts.retry_simplified,
        );
        let clips = stage.synthesize(script, &voices, &ctx.store.clips_dir()).await?;

        let index: Vec<AudioClip> = clips
            .iter()
            .map(|clip| AudioClip {
                path: ctx.store.relative(&clip.path),
                ..clip.clone()
            })
            .collect();
        ctx.store.write_json(Artifact::Clips, &index).await?;
        self.checkpoint(ctx, pass.manifest, Stage::Synthesis).await?;
        Ok(clips)
    }

    async fn assembly_stage(
        &self,
        ctx: &RunContext,
        pass: &mut StagePass<'_>,
        clips: &[AudioClip],
    ) -> Result<OffsetTable> {
        if self.skip(ctx, pass, Stage::Assembly).await? {
            return ctx.store.read_json(Artifact::Offsets).await;
        }

        let loaded = clips
            .iter()
            .map(|clip| -> Result<LoadedClip> {
                let pcm = PcmBuffer::read_wav(&clip.path)?;
                Ok(LoadedClip { clip: clip.clone(), pcm })
            })
            .collect::<Result<Vec<_>>>()?;

        let (master, offsets) = AudioAssembler::new(self.config.assembly.silence_gap).assemble(&loaded)?;

        let partial = ctx.store.partial_path(Artifact::MasterAudio);
        master.pcm.write_wav(&partial)?;
        fs::rename(&partial, ctx.store.path(Artifact::MasterAudio)).await?;
        ctx.store.write_json(Artifact::Offsets, &offsets).await?;

        self.checkpoint(ctx, pass.manifest, Stage::Assembly).await?;
        Ok(offsets)
    }

    async fn alignment_stage(
        &self,
        ctx: &RunContext,
        pass: &mut StagePass<'_>,
        offsets: &OffsetTable,
    ) -> Result<Vec<WordTimestamp>> {
        if self.skip(ctx, pass, Stage::Alignment).await? {
            return ctx.store.read_json(Artifact::Words).await;
        }

        let transcriber = &self.config.transcriber;
        let mapper = AlignmentMapper::new(
            transcriber.boundary_epsilon,
            transcriber.max_duration_drift,
            Duration::from_secs(transcriber.timeout_secs),
        );

        let words = mapper
            .align(
                self.collaborators.transcriber.as_ref(),
                &ctx.store.path(Artifact::MasterAudio),
                offsets.total_duration(),
            )
            .await?;
        let words = mapper.assign(&words, offsets)?;

        ctx.store.write_json(Artifact::Words, &words).await?;
        self.checkpoint(ctx, pass.manifest, Stage::Alignment).await?;
        Ok(words)
    }

    async fn timeline_stage(
        &self,
        ctx: &RunContext,
        pass: &mut StagePass<'_>,
        words: &[WordTimestamp],
        script: &ScriptModel,
    ) -> Result<CaptionTimeline> {
        if self.skip(ctx, pass, Stage::Timeline).await? {
            return ctx.store.read_json(Artifact::Timeline).await;
        }

        let builder = CaptionTimelineBuilder::new(CueLimits {
            max_cue_words: self.config.captions.max_cue_words,
            max_cue_duration: self.config.captions.max_cue_duration,
        });
        let timeline = builder.build(words, script);

        generate_ass_highlight(&timeline, &self.config.media, ctx.store.path(Artifact::HighlightSubtitles)).await?;
        generate_cue_srt(&timeline, ctx.store.path(Artifact::CueSubtitles)).await?;
        generate_character_srt(&timeline.sprites, ctx.store.path(Artifact::CharacterSubtitles)).await?;
        // written last: its presence marks the stage complete
        ctx.store.write_json(Artifact::Timeline, &timeline).await?;

        self.checkpoint(ctx, pass.manifest, Stage::Timeline).await?;
        Ok(timeline)
    }

    async fn render_stage(
        &self,
        ctx: &RunContext,
        pass: &mut StagePass<'_>,
        offsets: &OffsetTable,
        timeline: &CaptionTimeline,
    ) -> Result<PathBuf> {
        let final_video = ctx.store.path(Artifact::FinalVideo);
        if self.skip(ctx, pass, Stage::Render).await? {
            return Ok(final_video);
        }

        let media = &self.config.media;
        let sprites: BTreeMap<Actor, PathBuf> = self.config.characters
            .iter()
            .map(|(name, character)| (Actor::new(name.clone()), character.sprite.clone()))
            .collect();

        let partial = ctx.store.partial_path(Artifact::FinalVideo);
        let request = RenderRequest {
            background_video: select_background(&media.background_dir, &ctx.run_id)?,
            master_audio: ctx.store.path(Artifact::MasterAudio),
            offsets: offsets.clone(),
            timeline: timeline.clone(),
            subtitles: ctx.store.path(Artifact::HighlightSubtitles),
            sprites,
            output_path: partial.clone(),
        };

        let limit = Duration::from_secs(media.timeout_secs);
        let composed = match tokio::time::timeout(limit, self.collaborators.compositor.compose(&request)).await {
            Ok(result) => result,
            Err(_) => Err(SkitError::Render(format!("Compositor timed out after {}s", limit.as_secs()))),
        };

        if let Err(e) = composed {
            if fs::remove_file(&partial).await.is_ok() {
                debug!("Removed partial render {}", partial.display());
            }
            return Err(e);
        }
        if !partial.is_file() {
            return Err(SkitError::Render(format!(
                "Compositor reported success but wrote no file at {}",
                partial.display()
            )));
        }

        fs::rename(&partial, &final_video).await?;
        self.checkpoint(ctx, pass.manifest, Stage::Render).await?;
        Ok(final_video)
    }

    /// True when the stage's artifacts are already on disk and nothing before
    /// it was recomputed in this pass
    async fn skip(&self, ctx: &RunContext, pass: &mut StagePass<'_>, stage: Stage) -> Result<bool> {
        if pass.recomputed {
            return Ok(false);
        }
        if !ctx.store.stage_complete(stage) {
            self.invalidate_after(ctx, pass, stage).await?;
            return Ok(false);
        }
        info!("[{}] {} artifacts present, skipping", ctx.run_id, stage);
        record_stage(ctx, pass.manifest, stage);
        Ok(true)
    }

    /// `stage` is about to produce new output, so everything the later stages
    /// wrote from the old output is removed
    async fn invalidate_after(&self, ctx: &RunContext, pass: &mut StagePass<'_>, stage: Stage) -> Result<()> {
        pass.recomputed = true;
        for later in Stage::ALL.iter().filter(|s| **s > stage) {
            for artifact in later.artifacts() {
                let path = ctx.store.path(*artifact);
                if path.is_file() {
                    fs::remove_file(&path).await?;
                    debug!("[{}] Removed stale {}", ctx.run_id, path.display());
                }
                pass.manifest.forget_artifact(*artifact);
            }
            if *later == Stage::Synthesis && ctx.store.clips_dir().is_dir() {
                fs::remove_dir_all(ctx.store.clips_dir()).await?;
                debug!("[{}] Removed stale clips", ctx.run_id);
            }
        }
        Ok(())
    }

    async fn checkpoint(&self, ctx: &RunContext, manifest: &mut RunManifest, stage: Stage) -> Result<()> {
        record_stage(ctx, manifest, stage);
        ctx.save_manifest(manifest).await?;
        info!("[{}] {} complete -> {}", ctx.run_id, stage, manifest.state);
        Ok(())
    }
}

fn record_stage(ctx: &RunContext, manifest: &mut RunManifest, stage: Stage) {
    for artifact in stage.artifacts() {
        manifest.record_artifact(*artifact, ctx.store.relative(&ctx.store.path(*artifact)));
    }
    manifest.advance(stage.completed_state());
}

/// Mutable state of one pass over the stages
struct StagePass<'a> {
    manifest: &'a mut RunManifest,
    /// Set once a stage does real work; no later stage may reuse its old artifacts
    recomputed: bool,
}

fn at(stage: Stage) -> impl FnOnce(SkitError) -> (Stage, SkitError) {
    move |e| (stage, e)
}
