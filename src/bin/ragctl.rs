use std::path::{Path, PathBuf};

use agentic_rag::{
    config::Config,
    extraction::{DocumentKind, FragmentExtractor},
    pipeline::PipelineCoordinator,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

const CLI_USER: &str = "ragctl";

#[derive(Parser)]
#[command(
    name = "ragctl",
    about = "Inspect document extraction and ask questions against local files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the detected kind and fragment count of every file under PATH.
    Extract { path: PathBuf },
    /// Index every file under PATH and answer QUERY against each document.
    Ask {
        path: PathBuf,
        #[arg(long)]
        query: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;
    match cli.command {
        Command::Extract { path } => extract(&config, &path),
        Command::Ask { path, query } => ask(&config, &path, &query).await,
    }
}

fn extract(config: &Config, root: &Path) -> Result<()> {
    let extractor = FragmentExtractor::new(config.fragment_chunk_size)?;
    for path in document_paths(root)? {
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let name = file_name(&path);
        let kind = DocumentKind::from_filename(&name);
        match extractor.extract(&bytes, &name) {
            Ok(fragments) => println!("{kind:<12}{:>6}  {}", fragments.len(), path.display()),
            Err(err) => println!("{kind:<12}{:>6}  {} ({err})", "error", path.display()),
        }
    }
    Ok(())
}

async fn ask(config: &Config, root: &Path, query: &str) -> Result<()> {
    let pipeline = PipelineCoordinator::from_config(config).context("Failed to build pipeline")?;
    let mut sessions = Vec::new();
    for path in document_paths(root)? {
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let outcome = pipeline
            .ingest(&bytes, &file_name(&path), CLI_USER)
            .await
            .with_context(|| format!("indexing {}", path.display()))?;
        eprintln!("indexed {} ({} fragments)", outcome.filename, outcome.stored_count);
        sessions.push(outcome);
    }

    for session in sessions {
        let answer = pipeline
            .query(query, &session.session_id)
            .await
            .with_context(|| format!("answering against {}", session.filename))?;
        println!("## {}", session.filename);
        println!("{}", answer.answer);
        if !answer.sources.is_empty() {
            println!("sources: {}", answer.sources.join(", "));
        }
        println!();
    }
    Ok(())
}

fn document_paths(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("{} does not exist", root.display());
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
