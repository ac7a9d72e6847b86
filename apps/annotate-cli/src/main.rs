//! Invoice annotation CLI
//!
//! Straightens skewed pages of an invoice PDF, highlights the flagged line
//! items and adds a notes box. The JSON report goes to stdout, logs to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use annotate_core::{AnnotationConfig, CancellationFlag, Pipeline, SaveMode};
use anyhow::{Context, Result};
use clap::Parser;
use invoice_types::{line_items_from_json, ExtractionResult, LineItemRecord};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "annotate-cli")]
#[command(
    version,
    about = "Rotate and annotate invoice PDFs from extraction output"
)]
struct Args {
    /// Input PDF
    #[arg(long)]
    pdf: PathBuf,

    /// Extraction result (pages, fields, bounding polygons) as JSON
    #[arg(long)]
    extraction: PathBuf,

    /// Line items as a JSON array
    #[arg(long)]
    items: Option<PathBuf>,

    /// Notes text for the notes box
    #[arg(long, conflicts_with = "notes_file")]
    notes: Option<String>,

    /// Read the notes text from a file
    #[arg(long)]
    notes_file: Option<PathBuf>,

    /// TOML configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output PDF (default: replace the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep object numbering instead of rewriting the whole file
    #[arg(long)]
    incremental: bool,
}

fn read(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}: {}", what, path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the report only
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => AnnotationConfig::from_file(path)?,
        None => AnnotationConfig::default(),
    };

    let extraction = ExtractionResult::from_json(&read(&args.extraction, "extraction")?)
        .with_context(|| format!("Invalid extraction file: {}", args.extraction.display()))?;

    let records: Vec<LineItemRecord> = match &args.items {
        Some(path) => line_items_from_json(&read(path, "line items")?)
            .with_context(|| format!("Invalid line items file: {}", path.display()))?,
        None => Vec::new(),
    };

    let notes = match (&args.notes, &args.notes_file) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(path)) => Some(read(path, "notes")?),
        (None, None) => None,
    };

    let output = args.output.clone().unwrap_or_else(|| args.pdf.clone());
    let mode = if args.incremental {
        SaveMode::Incremental
    } else {
        SaveMode::Full
    };

    tracing::info!(
        pdf = %args.pdf.display(),
        output = %output.display(),
        records = records.len(),
        "Annotating document"
    );

    let report = Pipeline::new(config)
        .process_file(
            &args.pdf,
            &output,
            mode,
            &extraction,
            &records,
            notes.as_deref(),
            &CancellationFlag::new(),
        )
        .with_context(|| format!("Failed to annotate {}", args.pdf.display()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
