use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a video for a topic
    Generate {
        /// What the dialogue is about
        #[arg(short, long)]
        topic: String,

        /// Reuse this run id instead of generating one
        #[arg(short, long)]
        run_id: Option<String>,
    },

    /// Continue a failed or interrupted run
    Resume {
        /// Run to resume
        #[arg(short, long)]
        run_id: String,
    },

    /// Generate one video per line of a topics file
    Batch {
        /// File with one topic per line
        #[arg(short, long)]
        topics_file: PathBuf,

        /// Runs executing at the same time
        #[arg(short, long, default_value = "2")]
        jobs: usize,
    },

    /// Show the manifest of one run
    Status {
        #[arg(short, long)]
        run_id: String,
    },

    /// List runs in the output directory
    Runs,

    /// Write the default configuration to a file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "skitgen.toml")]
        output: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate() {
        let args = Args::try_parse_from(["skitgen", "-v", "generate", "--topic", "black holes"]).unwrap();
        assert!(args.verbose);
        match args.command {
            Commands::Generate { topic, run_id } => {
                assert_eq!(topic, "black holes");
                assert!(run_id.is_none());
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_parse_batch_defaults() {
        let args = Args::try_parse_from(["skitgen", "batch", "--topics-file", "topics.txt"]).unwrap();
        match args.command {
            Commands::Batch { topics_file, jobs } => {
                assert_eq!(topics_file, PathBuf::from("topics.txt"));
                assert_eq!(jobs, 2);
            }
            _ => panic!("expected batch"),
        }
    }
}
