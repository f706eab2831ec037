use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rust_epub_clean::{BatchReport, CleanConfig, Cleaner, DirectoryStore, ReportCounters};

#[derive(Parser)]
#[command(name = "epub-clean")]
#[command(about = "Strip scan artifacts and banners from unpacked EPUBs and link their footnotes")]
#[command(version)]
struct Cli {
    /// Directory holding one unpacked EPUB per subdirectory
    books_dir: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reprocess books that already carry a marker for this configuration
    #[arg(long)]
    force: bool,

    /// Clean in memory and report, without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write the per-book CSV report here
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CleanConfig::load_from_path(path)?,
        None => CleanConfig::default(),
    };
    config.force |= cli.force;
    config.dry_run |= cli.dry_run;

    let cleaner = Cleaner::new(config).context("invalid configuration")?;
    let store = DirectoryStore::new(&cli.books_dir);
    let report = cleaner
        .run_batch(&store)
        .with_context(|| format!("cannot list books in {}", cli.books_dir.display()))?;

    print_summary(&report);

    if let Some(path) = &cli.report {
        let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        report
            .write_csv(file)
            .with_context(|| format!("cannot write report to {}", path.display()))?;
    }
    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!(
        "{} books: {} processed, {} skipped, {} failed",
        report.books.len(),
        report.processed(),
        report.skipped(),
        report.failed()
    );
    for book in report.books.iter().filter(|b| !b.status.message().is_empty()) {
        println!("  {}: {}", book.book_id, book.status);
    }
    let total = report.total();
    for (name, value) in ReportCounters::COLUMNS.iter().zip(total.values()) {
        if value > 0 {
            println!("  {name:<32} {value}");
        }
    }
}
