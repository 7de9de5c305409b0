use crate::parser::{self, TraceLine};
use crate::types::{Pid, Record};
use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Counters collected while reading one trace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub total_lines: usize,
    pub records: usize,
    pub malformed_lines: usize,
    pub ignored_lines: usize,
    pub merged: usize,
    pub lost_unfinished: usize,
    pub orphaned_resumed: usize,
    pub unmatched_unfinished: usize,
}

type PendingKey = (Option<Pid>, String);

/// Streaming reader turning raw strace lines into [`Record`]s.
///
/// Unfinished calls are held back, keyed by process and call name, until
/// their resumed half arrives; the merged record is yielded in place of the
/// resumed line. Whatever is still pending when the source runs dry is
/// flushed in issuance order.
///
/// The reader is owned by the stream and released when the stream is
/// dropped. [`RecordStream::open`] owns the file it opens; a caller passing
/// `io::stdin().lock()` keeps standard input open.
pub struct RecordStream<R> {
    reader: R,
    line: Vec<u8>,
    pending: HashMap<PendingKey, Record>,
    /// Issuance order of pending keys, consulted when flushing at end
    pending_order: VecDeque<PendingKey>,
    flushing: bool,
    exhausted: bool,
    multi_process: bool,
    stats: StreamStats,
}

impl RecordStream<BufReader<File>> {
    /// Open a trace file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open trace file: {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> RecordStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            pending: HashMap::new(),
            pending_order: VecDeque::new(),
            flushing: false,
            exhausted: false,
            multi_process: false,
            stats: StreamStats::default(),
        }
    }

    /// Whether any line seen so far carried a process identifier.
    ///
    /// Flips to true eagerly; only final once the stream is exhausted.
    pub fn multi_process(&self) -> bool {
        self.multi_process
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Number of unfinished calls currently waiting for their resumed half
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Read the next physical line into `self.line`; false at end of input.
    ///
    /// Lines are raw bytes: the traced program's own output may be
    /// interleaved with the trace and need not be UTF-8.
    fn read_line(&mut self) -> Result<bool> {
        self.line.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .context("Failed to read trace line")?;
        if read == 0 {
            return Ok(false);
        }
        self.stats.total_lines += 1;
        Ok(true)
    }

    fn hold(&mut self, call: Record) {
        let key = (call.pid, call.name.clone());
        if let Some(lost) = self.pending.insert(key.clone(), call) {
            self.stats.lost_unfinished += 1;
            tracing::debug!(
                pid = ?lost.pid,
                name = %lost.name,
                timestamp = %lost.timestamp,
                "unfinished call superseded before it resumed"
            );
        } else {
            self.pending_order.push_back(key);
        }
    }

    fn take_pending(&mut self, key: &PendingKey) -> Option<Record> {
        let call = self.pending.remove(key)?;
        self.pending_order.retain(|k| k != key);
        Some(call)
    }

    /// Join a resumed half onto its pending unfinished half
    fn merge(&mut self, resumed: Record) -> Record {
        let key = (resumed.pid, resumed.name.clone());
        match self.take_pending(&key) {
            Some(mut call) => {
                self.stats.merged += 1;
                call.started = Some(std::mem::replace(&mut call.timestamp, resumed.timestamp));
                call.args.extend(resumed.args);
                call.result = resumed.result;
                call.elapsed = resumed.elapsed;
                call.split = true;
                call
            }
            None => {
                self.stats.orphaned_resumed += 1;
                tracing::debug!(
                    pid = ?resumed.pid,
                    name = %resumed.name,
                    timestamp = %resumed.timestamp,
                    "resumed call without an unfinished half"
                );
                resumed
            }
        }
    }

    fn flush_next(&mut self) -> Option<Record> {
        while let Some(key) = self.pending_order.pop_front() {
            if let Some(call) = self.pending.remove(&key) {
                self.stats.unmatched_unfinished += 1;
                self.stats.records += 1;
                return Some(call);
            }
        }
        None
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if self.flushing {
            return Ok(self.flush_next());
        }

        loop {
            if !self.read_line()? {
                self.flushing = true;
                return Ok(self.flush_next());
            }

            let parsed = {
                let line = String::from_utf8_lossy(&self.line);
                match parser::parse_line(&line) {
                    Some(parsed) => parsed,
                    None => {
                        if !line.trim().is_empty() {
                            self.stats.malformed_lines += 1;
                            tracing::debug!(
                                line_number = self.stats.total_lines,
                                line = line.trim_end(),
                                "skipping malformed trace line"
                            );
                        }
                        continue;
                    }
                }
            };

            let record = match parsed {
                TraceLine::Complete(record) => Some(record),
                TraceLine::Unfinished(call) => {
                    self.observe(call.pid);
                    self.hold(call);
                    None
                }
                TraceLine::Resumed(resumed) => {
                    self.observe(resumed.pid);
                    Some(self.merge(resumed))
                }
                TraceLine::ResumedUnfinished(part) => {
                    self.observe(part.pid);
                    let key = (part.pid, part.name.clone());
                    let call = match self.take_pending(&key) {
                        Some(mut call) => {
                            call.args.extend(part.args);
                            call
                        }
                        None => part,
                    };
                    self.hold(call);
                    None
                }
                TraceLine::Ignored(pid) => {
                    self.observe(pid);
                    self.stats.ignored_lines += 1;
                    None
                }
            };

            if let Some(record) = record {
                self.observe(record.pid);
                self.stats.records += 1;
                return Ok(Some(record));
            }
        }
    }

    fn observe(&mut self, pid: Option<Pid>) {
        if pid.is_some() {
            self.multi_process = true;
        }
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}
