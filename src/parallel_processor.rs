use crate::database::Database;
use crate::processor::{self, ProcessStats};
use anyhow::{Result, anyhow};
use crossbeam::channel;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

/// Load trace files into the database with one worker per CPU.
///
/// Every file is an independent parser run; workers share nothing but the
/// path channel and the running totals.
pub fn process_files_parallel(db: Arc<Database>, files: Vec<PathBuf>) -> Result<ProcessStats> {
    let num_threads = num_cpus::get().min(files.len()).max(1);
    let num_files = files.len();
    let (sender, receiver) = channel::unbounded::<PathBuf>();

    for file in files {
        sender.send(file)?;
    }
    drop(sender);

    let progress = ProgressBar::new(num_files as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) | {msg}",
            )?
            .progress_chars("#>-"),
    );

    let start_time = Instant::now();
    let totals = Arc::new(Mutex::new(ProcessStats::default()));

    let mut handles = vec![];

    for worker_id in 0..num_threads {
        let receiver = receiver.clone();
        let db = Arc::clone(&db);
        let totals = Arc::clone(&totals);
        let progress = progress.clone();

        let handle = thread::spawn(move || -> Result<()> {
            let worker_conn = db.worker_connection()?;
            let mut appender = worker_conn.appender("records")?;

            while let Ok(file_path) = receiver.recv() {
                let file_name = file_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string();

                match processor::process_file_with_appender(&mut appender, &file_path) {
                    Ok(stats) => {
                        let current_total = {
                            let mut totals = totals
                                .lock()
                                .map_err(|_| anyhow!("statistics mutex poisoned"))?;
                            totals.accumulate(&stats);
                            totals.total_lines
                        };

                        let elapsed = start_time.elapsed().as_secs_f64();
                        let lines_per_sec = if elapsed > 0.0 {
                            current_total as f64 / elapsed
                        } else {
                            0.0
                        };

                        progress.inc(1);
                        progress.set_message(format!(
                            "{:.1}K lines/sec | Last: {}",
                            lines_per_sec / 1000.0,
                            file_name
                        ));
                    }
                    Err(e) => {
                        progress.inc(1);
                        tracing::error!(
                            worker_id,
                            file = %file_path.display(),
                            error = %e,
                            "failed to process trace file"
                        );
                    }
                }
            }

            appender.flush()?;
            Ok(())
        });

        handles.push(handle);
    }

    for (i, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(worker = i, error = %e, "worker returned error"),
            Err(_) => tracing::error!(worker = i, "worker panicked"),
        }
    }

    progress.finish_with_message("Complete!");

    let totals = totals
        .lock()
        .map_err(|_| anyhow!("statistics mutex poisoned"))?
        .clone();
    Ok(totals)
}
