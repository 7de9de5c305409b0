use strace_graph::cli::{Cli, Command};
use strace_graph::csv_output::CsvOptions;
use strace_graph::graph::GraphOptions;
use strace_graph::processor::{self, GraphFormat, ProcessStats};
use strace_graph::stream::StreamStats;
use strace_graph::{database, parallel_processor};

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(stats: &StreamStats) {
    tracing::info!(
        lines = stats.total_lines,
        records = stats.records,
        merged = stats.merged,
        unmatched = stats.unmatched_unfinished,
        "trace converted"
    );
    if stats.malformed_lines > 0 {
        tracing::warn!(
            malformed = stats.malformed_lines,
            "skipped lines that matched no strace format"
        );
    }
}

fn load(output: PathBuf, sequential: bool, files: Vec<PathBuf>) -> Result<()> {
    // Delete existing database if it exists
    if output.exists() {
        std::fs::remove_file(&output).context("Failed to delete existing database")?;
    }

    let db_path = output
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", output.display()))?;
    let db = Arc::new(database::Database::init(db_path)?);

    println!("Processing {} file(s)...", files.len());

    let start = std::time::Instant::now();
    let total_stats = if sequential {
        let mut total_stats = ProcessStats::default();

        for file_path in &files {
            println!("Processing: {}", file_path.display());
            let stats = processor::process_file(&db, file_path)?;
            total_stats.accumulate(&stats);

            println!(
                "  Lines: {} total, {} parsed, {} failed",
                stats.total_lines, stats.parsed_lines, stats.failed_lines
            );
        }
        total_stats
    } else {
        println!("Using {} threads", num_cpus::get());
        parallel_processor::process_files_parallel(Arc::clone(&db), files)?
    };

    let elapsed = start.elapsed();

    println!("\n=== Summary ===");
    println!("Total lines:  {}", total_stats.total_lines);
    println!("Parsed:       {}", total_stats.parsed_lines);
    println!("Failed:       {}", total_stats.failed_lines);
    println!("Time:         {:.2}s", elapsed.as_secs_f64());
    println!(
        "Throughput:   {:.1}K lines/sec",
        total_stats.total_lines as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / 1000.0
    );
    println!("\nDatabase:     {}", output.display());
    println!("Records in DB: {}", db.count_records()?);

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Csv {
            output,
            process_column,
            input,
        } => {
            let reader = processor::open_input(input.as_deref())?;
            let writer = processor::open_output(output.as_deref())?;
            let stats = processor::convert_to_csv(reader, writer, CsvOptions { process_column })?;
            report(&stats);
        }
        Command::Graph {
            output,
            compress,
            json,
            input,
        } => {
            let reader = processor::open_input(input.as_deref())?;
            let writer = processor::open_output(output.as_deref())?;
            let format = if json {
                GraphFormat::Json
            } else {
                GraphFormat::Html
            };
            let stats = processor::convert_to_graph(reader, writer, GraphOptions { compress }, format)?;
            report(&stats);
        }
        Command::Load {
            output,
            sequential,
            files,
        } => load(output, sequential, files)?,
    }

    Ok(())
}
