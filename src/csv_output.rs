//! Row-per-record CSV export

use crate::types::Record;
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};

/// Argument columns written per row; extra arguments are dropped
pub const ARG_COLUMNS: usize = 6;

/// Whether rows carry a leading PROCESS column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ProcessColumn {
    /// Present iff any process identifier appears in the trace
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvOptions {
    pub process_column: ProcessColumn,
}

/// Streaming CSV writer.
///
/// In `Auto` mode the layout is fixed by the first record that arrives once
/// the stream has seen a process identifier, or by the end of input. Records
/// before that point are spooled to an anonymous temporary file as JSON
/// lines and rendered when the header is written.
pub struct CsvOutput<W: Write> {
    out: W,
    options: CsvOptions,
    with_pid: Option<bool>,
    spool: Option<BufWriter<File>>,
}

impl<W: Write> CsvOutput<W> {
    pub fn new(out: W, options: CsvOptions) -> Self {
        Self {
            out,
            options,
            with_pid: None,
            spool: None,
        }
    }

    /// Escape CSV field (handle commas, quotes, newlines)
    pub fn escape_field(field: &str) -> String {
        if field.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    pub fn header(with_pid: bool) -> String {
        let mut headers = Vec::with_capacity(ARG_COLUMNS + 8);
        if with_pid {
            headers.push("PROCESS".to_string());
        }
        headers.extend(
            ["TIMESTAMP", "NAME", "CATEGORY", "SPLIT", "ARGC"]
                .iter()
                .map(|h| h.to_string()),
        );
        headers.extend((1..=ARG_COLUMNS).map(|i| format!("ARG{i}")));
        headers.push("RESULT".to_string());
        headers.push("ELAPSED".to_string());
        headers.join(",")
    }

    /// Format a record as one CSV row
    pub fn format_record(record: &Record, with_pid: bool) -> String {
        let mut fields = Vec::with_capacity(ARG_COLUMNS + 8);
        if with_pid {
            fields.push(record.pid.map(|pid| pid.to_string()).unwrap_or_default());
        }
        fields.push(Self::escape_field(&record.timestamp));
        fields.push(Self::escape_field(&record.name));
        fields.push(record.category().to_string());
        fields.push(if record.split { "1" } else { "0" }.to_string());
        fields.push(record.args.len().to_string());
        for i in 0..ARG_COLUMNS {
            fields.push(
                record
                    .args
                    .get(i)
                    .map(|arg| Self::escape_field(arg))
                    .unwrap_or_default(),
            );
        }
        fields.push(Self::escape_field(&record.result));
        fields.push(
            record
                .elapsed
                .as_deref()
                .map(Self::escape_field)
                .unwrap_or_default(),
        );
        fields.join(",")
    }

    /// Write one record.
    ///
    /// `multi_process` is the stream's current view of whether process
    /// identifiers have appeared. It only ever flips from false to true.
    pub fn write_record(&mut self, record: &Record, multi_process: bool) -> Result<()> {
        let with_pid = match (self.with_pid, self.options.process_column) {
            (Some(with_pid), _) => with_pid,
            (None, ProcessColumn::Always) => self.start(true)?,
            (None, ProcessColumn::Never) => self.start(false)?,
            (None, ProcessColumn::Auto) if multi_process => self.start(true)?,
            (None, ProcessColumn::Auto) => return self.spool_record(record),
        };

        writeln!(self.out, "{}", Self::format_record(record, with_pid))
            .context("Failed to write CSV row")?;
        Ok(())
    }

    /// Render any still-spooled rows, flush and hand back the writer
    pub fn finish(mut self) -> Result<W> {
        if self.with_pid.is_none() && self.spool.is_some() {
            self.start(false)?;
        }
        self.out.flush().context("Failed to flush CSV output")?;
        Ok(self.out)
    }

    /// Fix the layout: write the header, then every spooled row
    fn start(&mut self, with_pid: bool) -> Result<bool> {
        writeln!(self.out, "{}", Self::header(with_pid)).context("Failed to write CSV header")?;
        self.with_pid = Some(with_pid);

        if let Some(spool) = self.spool.take() {
            let mut file = spool
                .into_inner()
                .context("Failed to flush CSV spool file")?;
            file.seek(SeekFrom::Start(0))
                .context("Failed to rewind CSV spool file")?;
            for line in BufReader::new(file).lines() {
                let line = line.context("Failed to read CSV spool file")?;
                let record: Record =
                    serde_json::from_str(&line).context("Failed to decode spooled CSV row")?;
                writeln!(self.out, "{}", Self::format_record(&record, with_pid))
                    .context("Failed to write CSV row")?;
            }
        }
        Ok(with_pid)
    }

    fn spool_record(&mut self, record: &Record) -> Result<()> {
        let mut spool = match self.spool.take() {
            Some(spool) => spool,
            None => BufWriter::new(
                tempfile::tempfile().context("Failed to create CSV spool file")?,
            ),
        };
        serde_json::to_writer(&mut spool, record).context("Failed to spool CSV row")?;
        spool.write_all(b"\n").context("Failed to spool CSV row")?;
        self.spool = Some(spool);
        Ok(())
    }
}
