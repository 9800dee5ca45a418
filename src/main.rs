//! pdfkiln CLI
//!
//! Merge a folder of images into a PDF, resize the pages of a PDF to A4
//! width, or split the images out of a PDF.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdfkiln::{
    file_ops, paths, ExtractOptions, MergeOptions, Outcome, ProgressSink, ResizeOptions, RunReport,
    UnitFailure, DEFAULT_JPEG_QUALITY,
};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Convert between image folders and PDF documents
#[derive(Parser, Debug)]
#[command(name = "pdfkiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge all images in a folder into one PDF
    Merge(MergeArgs),
    /// Resize every page of a PDF to A4 width
    Modify(ModifyArgs),
    /// Extract the images embedded in a PDF
    Split(SplitArgs),
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Source folder containing images (searched recursively)
    #[arg(short, long)]
    source: PathBuf,

    /// Output file path OR directory. If directory, filename defaults to source folder name
    #[arg(short, long)]
    destination: PathBuf,

    /// Keep PNGs lossless instead of converting them to JPEG
    #[arg(long)]
    raw: bool,

    /// Resize pages to a fixed width (A4) without altering image quality
    #[arg(short, long)]
    resize: bool,

    /// JPEG quality (1-100) for converted PNGs
    #[arg(short, long, conflicts_with = "raw", value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,
}

#[derive(Args, Debug)]
struct ModifyArgs {
    /// Path to the PDF file to modify
    #[arg(short, long)]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct SplitArgs {
    /// Path to the source PDF file
    #[arg(short, long)]
    file: PathBuf,

    /// Output directory (defaults to the PDF's folder)
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Create a subfolder named after the file
    #[arg(long)]
    subfolder: bool,

    /// Keep original image formats instead of converting to JPEG
    #[arg(long)]
    raw: bool,

    /// JPEG quality (1-100) for converted images
    #[arg(short, long, conflicts_with = "raw", value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,
}

/// Feeds engine progress into a terminal progress bar.
struct BarSink {
    bar: ProgressBar,
    failed: usize,
}

impl BarSink {
    fn new(label: &'static str) -> anyhow::Result<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}")?
                .progress_chars("##-"),
        );
        bar.set_prefix(label);
        Ok(BarSink { bar, failed: 0 })
    }

    fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl ProgressSink for BarSink {
    fn on_progress(&mut self, percent: f64) {
        self.bar.set_position(percent.round() as u64);
    }

    fn on_unit_error(&mut self, _failure: &UnitFailure) {
        self.failed += 1;
        self.bar.set_message(format!("{} failed", self.failed));
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Merge(args) => merge(args),
        Command::Modify(args) => modify(args),
        Command::Split(args) => split(args),
    }
}

fn merge(args: MergeArgs) -> anyhow::Result<()> {
    if !args.source.is_dir() {
        bail!("source directory not found: {}", args.source.display());
    }

    let images = paths::collect_images(&args.source)
        .with_context(|| format!("failed to scan {}", args.source.display()))?;
    if images.is_empty() {
        println!("No images found in source directory.");
        return Ok(());
    }
    info!(count = images.len(), "found images");

    let output = paths::resolve_merge_output(&args.source, &args.destination)?;
    let options = MergeOptions {
        resize: args.resize,
        png_jpeg_quality: if args.raw {
            None
        } else {
            Some(args.quality.unwrap_or(DEFAULT_JPEG_QUALITY))
        },
        ..MergeOptions::default()
    };

    let mut sink = BarSink::new("Generating PDF")?;
    let report = file_ops::merge_images_to_pdf(&images, &output, &options, &mut sink)?;
    sink.finish();

    summarize(&report, "images");
    println!("PDF saved to: {}", output.display());
    Ok(())
}

fn modify(args: ModifyArgs) -> anyhow::Result<()> {
    paths::require_pdf_file(&args.file)?;
    let output = paths::modified_output_path(&args.file);

    let mut sink = BarSink::new("Resizing pages")?;
    let report = file_ops::resize_pdf_pages(&args.file, &output, &ResizeOptions::default(), &mut sink)?;
    sink.finish();

    summarize(&report, "pages");
    println!("Modified file saved to: {}", output.display());
    Ok(())
}

fn split(args: SplitArgs) -> anyhow::Result<()> {
    paths::require_pdf_file(&args.file)?;
    let output_dir = paths::split_output_dir(&args.file, args.destination.as_deref(), args.subfolder)?;
    let options = ExtractOptions {
        raw: args.raw,
        jpeg_quality: args.quality.unwrap_or(DEFAULT_JPEG_QUALITY),
    };

    let mut sink = BarSink::new("Scanning pages")?;
    let report = file_ops::extract_images(&args.file, &output_dir, &options, &mut sink)
        .with_context(|| format!("failed to extract images from {}", args.file.display()))?;
    sink.finish();

    summarize(&report, "pages");
    println!(
        "{} images extracted to: {}",
        report.produced,
        output_dir.display()
    );
    Ok(())
}

fn summarize(report: &RunReport, units: &str) {
    if let Outcome::Partial { failed } = report.outcome() {
        eprintln!(
            "warning: finished with {} error(s) across {} {}",
            failed, report.total_units, units
        );
        for failure in &report.failures {
            eprintln!("  - {}", failure);
        }
    }
}
