use crate::csv_output::{CsvOptions, CsvOutput};
use crate::database::{self, Database};
use crate::graph::{GraphBuilder, GraphOptions};
use crate::html_output;
use crate::stream::{RecordStream, StreamStats};
use crate::types::Pid;
use anyhow::{Context, Result};
use duckdb::Appender;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ProcessStats {
    pub total_lines: usize,
    pub parsed_lines: usize,
    pub failed_lines: usize,
    pub time_processing: Duration,
}

impl ProcessStats {
    fn from_stream(stats: &StreamStats, elapsed: Duration) -> Self {
        Self {
            total_lines: stats.total_lines,
            parsed_lines: stats.records,
            failed_lines: stats.malformed_lines,
            time_processing: elapsed,
        }
    }

    pub fn accumulate(&mut self, other: &ProcessStats) {
        self.total_lines += other.total_lines;
        self.parsed_lines += other.parsed_lines;
        self.failed_lines += other.failed_lines;
        self.time_processing += other.time_processing;
    }
}

/// How the graph is written out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GraphFormat {
    #[default]
    Html,
    Json,
}

/// Extract PID from filename like "trace.12345" -> Some(12345)
pub fn extract_pid(filename: &str) -> Option<Pid> {
    let (_, suffix) = filename.rsplit_once('.')?;
    suffix.parse().ok()
}

/// Open a trace for reading; `None` or `-` reads standard input
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

/// Open the output sink; `None` writes to standard output
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

/// Convert a trace into one CSV row per record
pub fn convert_to_csv<R: BufRead, W: Write>(
    reader: R,
    out: W,
    options: CsvOptions,
) -> Result<StreamStats> {
    let mut stream = RecordStream::new(reader);
    let mut csv = CsvOutput::new(out, options);

    while let Some(record) = stream.next() {
        let record = record?;
        csv.write_record(&record, stream.multi_process())?;
    }
    csv.finish()?;

    Ok(stream.stats().clone())
}

/// Convert a trace into a process graph document
pub fn convert_to_graph<R: BufRead, W: Write>(
    reader: R,
    out: W,
    options: GraphOptions,
    format: GraphFormat,
) -> Result<StreamStats> {
    let mut stream = RecordStream::new(reader);
    let mut builder = GraphBuilder::new(options);

    for record in stream.by_ref() {
        builder.push(&record?);
    }
    if builder.elided() > 0 {
        tracing::debug!(elided = builder.elided(), "compression elided records");
    }

    let graph = builder.finish();
    match format {
        GraphFormat::Html => html_output::write_html(&graph, out)?,
        GraphFormat::Json => html_output::write_json(&graph, out)?,
    }

    Ok(stream.stats().clone())
}

fn file_identity(file_path: &Path) -> (String, Option<Pid>) {
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    (filename.to_string(), extract_pid(filename))
}

/// Process a single trace file and insert into database through one appender
pub fn process_file(db: &Database, file_path: &Path) -> Result<ProcessStats> {
    let conn = db.lock()?;
    let mut appender = conn.appender("records")?;
    let stats = process_file_with_appender(&mut appender, file_path)?;
    appender.flush()?;
    Ok(stats)
}

/// Process a file using a provided appender (for reuse across multiple files)
pub fn process_file_with_appender(
    appender: &mut Appender,
    file_path: &Path,
) -> Result<ProcessStats> {
    let start = Instant::now();
    let (filename, file_pid) = file_identity(file_path);

    let mut stream = RecordStream::open(file_path)?;
    for record in stream.by_ref() {
        database::append_record(appender, &filename, file_pid, &record?)?;
    }

    Ok(ProcessStats::from_stream(stream.stats(), start.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const FORK_TRACE: &str = "tests/fixtures/fork-trace.txt";

    #[test]
    fn test_extract_pid() {
        assert_eq!(extract_pid("trace.12345"), Some(12345));
        assert_eq!(
            extract_pid("zoom-trace-20251110-222110.1387679"),
            Some(1387679)
        );
        assert_eq!(extract_pid("notrace"), None);
        assert_eq!(extract_pid("trace.txt"), None);
    }

    #[test]
    fn test_process_fork_fixture() {
        let db = Database::init(":memory:").expect("Failed to create database");
        let stats = process_file(&db, Path::new(FORK_TRACE)).expect("Failed to process file");

        assert_eq!(stats.total_lines, 12, "Should read 12 lines");
        assert_eq!(stats.failed_lines, 1, "One line is malformed");
        assert_eq!(stats.parsed_lines, 8);
        assert_eq!(db.count_records().unwrap(), 8);

        let conn = db.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT name, split FROM records WHERE name = 'wait4'")
            .expect("Failed to prepare");
        let (name, split) = stmt
            .query_row([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))
            .expect("Failed to query");
        assert_eq!(name, "wait4");
        assert!(split);
    }

    #[test]
    fn test_process_file_with_appender_uses_file_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.4242");
        std::fs::write(&path, "1.0 getpid() = 4242\n1.1 +++ exited with 0 +++\n").unwrap();

        let db = Database::init(":memory:").unwrap();
        let conn = db.worker_connection().unwrap();
        let mut appender = conn.appender("records").unwrap();
        let stats = process_file_with_appender(&mut appender, &path).unwrap();
        appender.flush().unwrap();
        drop(appender);

        assert_eq!(stats.parsed_lines, 2);
        let pid: u32 = conn
            .query_row("SELECT DISTINCT pid FROM records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(pid, 4242);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let db = Database::init(":memory:").unwrap();
        let err = process_file(&db, Path::new("tests/fixtures/does-not-exist")).unwrap_err();
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn test_convert_to_graph_json() {
        let input = std::fs::read_to_string(FORK_TRACE).unwrap();
        let mut out = Vec::new();
        let stats = convert_to_graph(
            Cursor::new(input),
            &mut out,
            GraphOptions::default(),
            GraphFormat::Json,
        )
        .unwrap();
        assert_eq!(stats.records, 8);

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let creation: Vec<_> = value["edges"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["kind"] == "creation")
            .collect();
        assert_eq!(creation.len(), 1);
        assert_eq!(creation[0]["from"], "1700000000.000300");
        assert_eq!(creation[0]["to"], "1700000000.000200");
    }

    #[test]
    fn test_convert_to_csv_keeps_pids_tagged_after_first_fork() {
        let input = "\
10:00:00.000001 execve(\"/bin/sh\", [\"sh\"], 0x7ffd) = 0
10:00:00.000002 clone(child_stack=NULL, flags=SIGCHLD) = 124
[pid   124] 10:00:00.000003 execve(\"/bin/true\", [\"true\"], 0x7ffd) = 0
[pid   123] 10:00:00.000004 wait4(-1, NULL, 0, NULL) = 124
";
        let mut out = Vec::new();
        convert_to_csv(Cursor::new(input), &mut out, CsvOptions::default()).unwrap();

        let text = String::from_utf8(out).unwrap();
        let pids: Vec<_> = text
            .lines()
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(pids, vec!["PROCESS", "", "", "124", "123"]);
    }

    #[test]
    fn test_convert_to_csv_counts_rows() {
        let input = std::fs::read_to_string(FORK_TRACE).unwrap();
        let mut out = Vec::new();
        convert_to_csv(Cursor::new(input), &mut out, CsvOptions::default()).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 9);
        assert!(text.starts_with("PROCESS,"));
    }
}
