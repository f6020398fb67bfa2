use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{error, info};

use tutordb_core::config::Config;
use tutordb_core::types::{Coordinate, Lane};
use tutordb_rag::{QueryRequest, QuestionsRequest, RagService};

mod discover;

#[derive(Parser)]
#[command(name = "tutordb", about = "Curriculum-scoped retrieval for tutoring")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one file into a subtopic
    Ingest {
        #[command(flatten)]
        at: CoordinateArgs,
        /// Display title; defaults to the first heading or file name
        #[arg(long)]
        title: Option<String>,
        file: PathBuf,
    },
    /// Ingest every <subject>/<chapter>/<topic>/<subtopic>.{md,txt,pdf} under a root
    IngestDir { root: PathBuf },
    /// Ask a question scoped to a subtopic
    Query {
        #[command(flatten)]
        at: CoordinateArgs,
        /// fact, activity or both
        #[arg(long, default_value = "both")]
        lane: Lane,
        #[arg(long)]
        top_k: Option<i64>,
        question: String,
    },
    /// List practice questions for a subtopic
    Questions {
        #[command(flatten)]
        at: CoordinateArgs,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Show the live document of a subtopic
    Status {
        #[command(flatten)]
        at: CoordinateArgs,
    },
    /// Delete rows no subtopic points at any more
    Compact,
}

#[derive(Args)]
struct CoordinateArgs {
    #[arg(long)]
    subject: String,
    #[arg(long)]
    chapter: String,
    #[arg(long)]
    topic: String,
    #[arg(long)]
    subtopic: String,
}

impl CoordinateArgs {
    fn coordinate(&self) -> tutordb_core::Result<Coordinate> {
        Coordinate::new(&self.subject, &self.chapter, &self.topic, &self.subtopic)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let settings = Config::load()?.settings()?;
    let base_dir = std::env::current_dir()?;
    let service = RagService::open(&settings, &base_dir).await?;

    match cli.command {
        Commands::Ingest { at, title, file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let title = title.unwrap_or_else(|| discover::title_for(&file, &bytes));
            let source_name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let report = service.ingest_bytes(&at.coordinate()?, &title, &source_name, &bytes).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::IngestDir { root } => ingest_dir(&service, root).await?,
        Commands::Query { at, lane, top_k, question } => {
            let c = at.coordinate()?;
            let request = QueryRequest {
                subject: c.subject,
                chapter_id: c.chapter_id,
                topic_id: c.topic_id,
                subtopic_id: c.subtopic_id,
                question,
                top_k,
                lane,
            };
            let response = service.query(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Questions { at, limit } => {
            let c = at.coordinate()?;
            let request = QuestionsRequest {
                subject: c.subject,
                chapter_id: c.chapter_id,
                topic_id: c.topic_id,
                subtopic_id: c.subtopic_id,
                limit,
            };
            let response = service.questions(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Status { at } => match service.status(&at.coordinate()?).await? {
            Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
            None => println!("nothing ingested for this subtopic"),
        },
        Commands::Compact => {
            let report = service.compact().await?;
            println!(
                "removed {} documents, {} chunks, {} questions",
                report.documents_removed, report.chunks_removed, report.questions_removed
            );
        }
    }
    Ok(())
}

async fn ingest_dir(service: &RagService, root: PathBuf) -> Result<()> {
    let files = discover::discover(&root);
    if files.is_empty() {
        anyhow::bail!("no curriculum files under {}", root.display());
    }
    info!(root = %root.display(), files = files.len(), "ingesting directory");

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );
    let (mut ok, mut failed) = (0usize, 0usize);
    for file in files {
        pb.set_message(file.source_name.clone());
        let result = async {
            let bytes = std::fs::read(&file.path)?;
            let title = discover::title_for(&file.path, &bytes);
            Ok::<_, anyhow::Error>(service.ingest_bytes(&file.coordinate, &title, &file.source_name, &bytes).await?)
        }
        .await;
        match result {
            Ok(report) => {
                ok += 1;
                info!(coordinate = %file.coordinate, doc_id = %report.doc_id, chunks = report.fact_chunk_count + report.activity_chunk_count, "ingested");
            }
            Err(e) => {
                failed += 1;
                error!(path = %file.path.display(), error = %e, "ingestion failed");
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    println!("ingested {ok} files, {failed} failed");
    if failed > 0 {
        anyhow::bail!("{failed} files failed to ingest");
    }
    Ok(())
}
