//! respno-engine - command-line entry point
//!
//! Runs one transcript mutation against the JSON stores in the data folder
//! and prints the resulting report as JSON on stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use respno_common::config::{ensure_data_folder, load_toml_config, resolve_data_folder};
use respno_common::events::EventBus;
use respno_common::logging::init_logging;
use respno_engine::store::{JsonAnalysisStore, JsonTranscriptStore};
use respno_engine::{parse_schedule, NewTranscript, Reconciler, RespondentEngine};
use serde::Serialize;
use serde_json::{json, Map};
use tracing::info;

/// Command-line arguments for respno-engine
#[derive(Parser, Debug)]
#[command(name = "respno-engine")]
#[command(about = "Chronological respondent numbering for interview transcripts")]
#[command(version)]
struct Args {
    /// Folder holding transcripts.json and analyses.json
    #[arg(short, long, global = true)]
    data_folder: Option<PathBuf>,

    /// Config file (default: RESPNO_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a transcript from a plain-text file and resequence
    Create {
        #[arg(long)]
        project: String,
        /// Plain-text transcript
        #[arg(long)]
        file: PathBuf,
        /// Filename recorded on the transcript (default: the file's name)
        #[arg(long)]
        filename: Option<String>,
        /// Interview date, overrides the one found in the text
        #[arg(long)]
        date: Option<String>,
        /// Interview time, overrides the one found in the text
        #[arg(long)]
        time: Option<String>,
    },
    /// Remove a transcript and its analysis rows
    Delete {
        #[arg(long)]
        project: String,
        #[arg(long)]
        transcript: String,
    },
    /// Change a transcript's interview date/time (empty value clears)
    Edit {
        #[arg(long)]
        project: String,
        #[arg(long)]
        transcript: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        time: Option<String>,
    },
    /// Recompute respnos and reconcile analyses without other changes
    Resequence {
        #[arg(long)]
        project: String,
    },
    /// Drop analysis rows that no longer belong to any transcript
    Prune {
        #[arg(long)]
        project: String,
    },
    /// Show the interview date/time found in a text file
    Parse {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_source) =
        load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    config_source.log();

    let data_folder = resolve_data_folder(args.data_folder.as_deref(), &config);
    ensure_data_folder(&data_folder)
        .with_context(|| format!("Failed to prepare data folder {}", data_folder.display()))?;
    info!("Data folder: {}", data_folder.display());

    let engine = RespondentEngine::new(
        Arc::new(JsonTranscriptStore::new(&data_folder)),
        Arc::new(JsonAnalysisStore::new(&data_folder)),
        Reconciler::new(&config.reconcile),
        EventBus::default(),
    );

    let report = match args.command {
        Command::Create {
            project,
            file,
            filename,
            date,
            time,
        } => {
            let text = read_text(&file).await?;
            let filename = filename.unwrap_or_else(|| {
                file.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let mut fields = Map::new();
            fields.insert("originalFilename".to_string(), json!(filename));
            fields.insert("size".to_string(), json!(text.len()));

            engine
                .create_transcript(
                    &project,
                    NewTranscript {
                        text,
                        interview_date: date,
                        interview_time: time,
                        fields,
                    },
                )
                .await?
        }
        Command::Delete {
            project,
            transcript,
        } => engine.delete_transcript(&project, &transcript).await?,
        Command::Edit {
            project,
            transcript,
            date,
            time,
        } => {
            engine
                .edit_transcript_schedule(&project, &transcript, date.as_deref(), time.as_deref())
                .await?
        }
        Command::Resequence { project } => engine.resequence(&project).await?,
        Command::Prune { project } => engine.prune_orphans(&project).await?,
        Command::Parse { file } => {
            let text = read_text(&file).await?;
            return print_json(&parse_schedule(&text));
        }
    };

    print_json(&report)
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
