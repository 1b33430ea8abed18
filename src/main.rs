//! Skitgen - Automated Dialogue Video Generation
//!
//! Entry point: parses the command line, sets up logging and configuration
//! and hands the requested command to the run orchestrator.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{info, Level};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skitgen::align::WhisperCliTranscriber;
use skitgen::cli::{Args, Commands};
use skitgen::config::Config;
use skitgen::run::{list_runs, RunContext};
use skitgen::synthesis::{HttpVoiceEngine, TtsEngineHandle};
use skitgen::workflow::RunOrchestrator;

const DEFAULT_CONFIG_FILE: &str = "skitgen.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    let _log_guard = setup_logging(args.verbose)?;
    info!("Starting Skitgen - Automated Dialogue Video Generation");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::Runs => {
            let runs = list_runs(&config.output_dir).await?;
            if runs.is_empty() {
                println!("No runs found in {}", config.output_dir.display());
            } else {
                println!("{:<26} {:<20} {:<40}", "Run", "State", "Topic");
                println!("{}", "-".repeat(86));
                for run in runs {
                    println!("{:<26} {:<20} {:<40}", run.run_id, short_state(&run.state.to_string()), run.topic);
                }
            }
        }
        Commands::Status { run_id } => {
            let ctx = RunContext::new(&config.output_dir, &run_id);
            match ctx.load_manifest().await? {
                Some(manifest) => println!("{}", serde_json::to_string_pretty(&manifest)?),
                None => anyhow::bail!("No run '{}' in {}", run_id, config.output_dir.display()),
            }
        }
        Commands::Generate { topic, run_id } => {
            let orchestrator = build_orchestrator(config).await?;
            let outcome = match run_id {
                Some(run_id) => orchestrator.run(&run_id, Some(topic.as_str())).await?,
                None => orchestrator.generate(&topic).await?,
            };
            println!("{}", outcome.final_video.display());
        }
        Commands::Resume { run_id } => {
            let orchestrator = build_orchestrator(config).await?;
            let outcome = orchestrator.resume(&run_id).await?;
            println!("{}", outcome.final_video.display());
        }
        Commands::Batch { topics_file, jobs } => {
            let topics: Vec<String> = std::fs::read_to_string(&topics_file)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from)
                .collect();
            info!("Loaded {} topics from {}", topics.len(), topics_file.display());

            let orchestrator = build_orchestrator(config).await?;
            let outcomes = orchestrator.run_batch(topics, jobs).await;

            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(run) => println!("OK    {}  {}", run.run_id, outcome.topic),
                    Err(e) => println!("FAIL  {}  {}", outcome.topic, e),
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} runs failed", failed, outcomes.len());
            }
        }
    }

    info!("Skitgen completed successfully");
    Ok(())
}

/// One voice engine for the whole process, shared by every run
async fn build_orchestrator(config: Config) -> Result<RunOrchestrator> {
    WhisperCliTranscriber::new(config.transcriber.clone()).check_availability().await?;

    let engine = HttpVoiceEngine::new(config.tts.clone())?;
    let orchestrator = RunOrchestrator::from_config(config, TtsEngineHandle::new(Box::new(engine)))?;
    orchestrator.check_dependencies().await?;
    Ok(orchestrator)
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".skitgen").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "skitgen.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("skitgen.log").display());

    Ok(guard)
}

/// Failure causes can be long; keep the listing to the state name
fn short_state(state: &str) -> &str {
    state.split('(').next().unwrap_or(state)
}
