use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;

use layex_core::LayoutDatabase;
use layex_extract::{ExtractConfig, ExtractionReport, Extractor, Severity};

/// Arguments to [`run`].
#[derive(Parser)]
#[command(
    version,
    about,
    long_about = "Extract devices, wires and connectivity from the flat geometry of a layout cell"
)]
struct Args {
    /// Layout database (JSON).
    input: PathBuf,
    /// Cell to extract. Defaults to the database's top cell.
    #[arg(short, long)]
    cell: Option<String>,
    /// Extraction configuration (JSON). Missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Also extract every subcell below the cell.
    #[arg(short, long)]
    recursive: bool,
    /// Where to write the updated database. Defaults to the input file.
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Write the issue report as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let report = run(&args)?;
    print_report(&report);
    if report.error_count() > 0 {
        eprintln!("{} errors recorded.", report.error_count());
    }
    Ok(())
}

fn run(args: &Args) -> anyhow::Result<ExtractionReport> {
    let json = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read database {:?}.", args.input))?;
    let mut db = LayoutDatabase::from_json(&json)
        .with_context(|| format!("Failed to parse database {:?}.", args.input))?;

    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {:?}.", path))?;
            ExtractConfig::from_json(&text).with_context(|| format!("Invalid configuration {:?}.", path))?
        }
        None => ExtractConfig::default(),
    };

    let cell = match &args.cell {
        Some(name) => db.cell_id_by_name(name)?,
        None => db
            .top_cell
            .ok_or_else(|| anyhow!("Database has no top cell; pass --cell."))?,
    };

    let mut extractor = Extractor::new(config)?;
    let result = extractor.extract(&mut db, cell, args.recursive);
    let report = extractor.into_report();
    if let Some(path) = &args.report {
        fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report {:?}.", path))?;
    }
    let extracted = result.context("Extraction failed.")?;
    log::info!("Extracted cell {}", db.cell(&extracted)?.name);

    let out = args.out.as_ref().unwrap_or(&args.input);
    fs::write(out, db.to_json()?).with_context(|| format!("Failed to write database {:?}.", out))?;
    Ok(report)
}

fn print_report(report: &ExtractionReport) {
    for log in &report.cells {
        let ledger_ok = log.ledger().iter().all(|l| l.is_balanced(1e-6));
        println!(
            "{}: {} issues{}",
            log.cell(),
            log.issues().len(),
            if ledger_ok { "" } else { " (area ledger unbalanced)" }
        );
        for issue in log.issues() {
            let tag = match issue.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Info => "info",
            };
            println!("  {tag}: {:?}: {}", issue.kind, issue.message);
        }
    }
}
