use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use quizgen::{
    config, logging,
    processing::{DocumentInput, DocumentKind, Progress, QuizService, validate},
};
use serde::Serialize;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "quizgen-cli",
    about = "Generate multiple-choice questions from PDFs and images"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate questions from files or directories (walked recursively).
    Generate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Write JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the page chunks of a PDF without calling the model.
    Chunks { pdf: PathBuf },
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
    config::init_config();
    logging::init_tracing_with(logging::LogTarget::Stderr);
    let config = config::get_config();
    config.log_warnings();
    let service = QuizService::from_config(config);

    match cli.command {
        Command::Generate { paths, output } => generate(&service, &paths, output.as_deref()).await,
        Command::Chunks { pdf } => chunks(&service, &pdf).await,
    }
}

async fn generate(service: &QuizService, paths: &[PathBuf], output: Option<&Path>) -> Result<()> {
    let inputs = collect_inputs(paths)?;
    if inputs.is_empty() {
        bail!("no PDF or image files found in the given paths");
    }

    let mut report = |progress: Progress| {
        tracing::info!(percent = progress.percent, "{}", progress.stage);
    };

    let json = match inputs.as_slice() {
        [single] if validate::document_kind(&single.mime_type) == Some(DocumentKind::Image) => {
            let outcome = service
                .process_image(single)
                .await
                .with_context(|| format!("failed to process {}", single.file_name))?;
            to_json(&outcome)?
        }
        [single] => {
            let outcome = service
                .process_pdf(single, &mut report)
                .await
                .with_context(|| format!("failed to process {}", single.file_name))?;
            to_json(&outcome)?
        }
        _ => {
            let outcome = service
                .process_documents(&inputs, &mut report)
                .await
                .context("failed to process documents")?;
            to_json(&outcome)?
        }
    };

    write_output(&json, output)
}

async fn chunks(service: &QuizService, pdf: &Path) -> Result<()> {
    let input = read_input(pdf)?;
    let chunks = service
        .extract_chunks(&input)
        .await
        .with_context(|| format!("failed to chunk {}", pdf.display()))?;
    write_output(&to_json(&chunks)?, None)
}

fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<DocumentInput>> {
    let mut inputs = Vec::new();
    for root in paths {
        if !root.exists() {
            bail!("path does not exist: {}", root.display());
        }
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        for path in files {
            if mime_type_for(&path).is_none() {
                tracing::debug!(path = %path.display(), "Skipping unsupported file");
                continue;
            }
            inputs.push(read_input(&path)?);
        }
    }
    Ok(inputs)
}

fn mime_type_for(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|extension| extension.to_str())
        .and_then(validate::mime_type_for_extension)
}

fn read_input(path: &Path) -> Result<DocumentInput> {
    let Some(mime_type) = mime_type_for(path) else {
        bail!("unsupported file type: {}", path.display());
    };
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(DocumentInput::new(file_name, mime_type, bytes))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}

fn write_output(json: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Wrote output");
        }
        None => println!("{json}"),
    }
    Ok(())
}
