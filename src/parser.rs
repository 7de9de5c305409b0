use crate::types::{EXIT_NAME, KILL_NAME, Pid, Record, UNFINISHED_RESULT};

const UNFINISHED_MARKER: &str = "<unfinished ...>";
const RESUMED_PREFIX: &str = "<... ";
const RESUMED_MARKER: &str = " resumed>";

/// One physical trace line, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLine {
    /// A whole call, or an exited/killed pseudo-record
    Complete(Record),
    /// First half of a blocking call; result is a placeholder
    Unfinished(Record),
    /// Second half of a blocking call
    Resumed(Record),
    /// Continuation that blocked again: `<... x resumed> <unfinished ...>`
    ResumedUnfinished(Record),
    /// Signal deliveries and other well-formed lines that carry no call
    Ignored(Option<Pid>),
}

/// Tracks quote and bracket nesting while scanning argument text
#[derive(Debug, Default)]
struct Nesting {
    depth: usize,
    in_quotes: bool,
    escaped: bool,
}

impl Nesting {
    /// Feed one character; true when it sits outside every quote and bracket
    fn top_level(&mut self, c: char) -> bool {
        if self.in_quotes {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_quotes = false;
            }
            return false;
        }
        match c {
            '"' => {
                self.in_quotes = true;
                false
            }
            '(' | '[' | '{' => {
                self.depth += 1;
                false
            }
            ')' | ']' | '}' if self.depth > 0 => {
                self.depth -= 1;
                false
            }
            _ => true,
        }
    }
}

/// Split an argument list on top-level commas.
///
/// Commas inside quoted strings, `[...]`, `{...}` and `(...)` do not end an
/// argument. One dangling comma at either edge is dropped, since strace cuts
/// unfinished/resumed halves right next to a separator.
pub fn split_arguments(text: &str) -> Vec<String> {
    let text = text.trim();
    let text = text.strip_prefix(',').unwrap_or(text);
    let text = text.strip_suffix(',').unwrap_or(text).trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut nesting = Nesting::default();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if nesting.top_level(c) && c == ',' {
            args.push(text[start..i].trim().to_string());
            start = i + 1;
        }
    }
    args.push(text[start..].trim().to_string());
    args
}

/// Byte offset of the `)` closing an argument list that starts at `text[0]`
fn find_closing_paren(text: &str) -> Option<usize> {
    let mut nesting = Nesting::default();
    text.char_indices()
        .find(|&(_, c)| nesting.top_level(c) && c == ')')
        .map(|(i, _)| i)
}

/// Byte offset of the last `<unfinished ...>` marker outside quoted strings
fn find_unfinished(text: &str) -> Option<usize> {
    let mut nesting = Nesting::default();
    let mut found = None;
    for (i, c) in text.char_indices() {
        if nesting.top_level(c) && c == '<' && text[i..].starts_with(UNFINISHED_MARKER) {
            found = Some(i);
        }
    }
    found
}

fn is_pid(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Timestamps are opaque; anything that cannot start a call body qualifies
fn is_timestamp(token: &str) -> bool {
    !token.is_empty()
        && !token.contains('(')
        && !token.starts_with(['<', '+', '-', '['])
}

fn is_elapsed(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
        && token.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

fn is_call_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Split `[pid N] ts rest` or `N ts rest` or `ts rest` into its parts
fn split_header(line: &str) -> Option<(Option<Pid>, &str, &str)> {
    // `-r` right-aligns relative timestamps
    let line = line.trim_start();
    let (pid, rest) = if let Some(tagged) = line.strip_prefix("[pid") {
        let close = tagged.find(']')?;
        let pid = tagged[..close].trim().parse().ok()?;
        (Some(pid), tagged[close + 1..].trim_start())
    } else {
        let (first, after) = line.split_once(' ')?;
        let after = after.trim_start();
        let followed_by_timestamp = after
            .split_once(' ')
            .is_some_and(|(token, _)| is_timestamp(token));
        if is_pid(first) && followed_by_timestamp {
            (Some(first.parse().ok()?), after)
        } else {
            (None, line)
        }
    };

    let (timestamp, rest) = rest.split_once(' ')?;
    if !is_timestamp(timestamp) {
        return None;
    }
    Some((pid, timestamp, rest.trim_start()))
}

/// Split `result <elapsed>` into its parts; the bracket only counts as an
/// elapsed time when it holds a number (`-y` also decorates results with `<...>`)
fn parse_outcome(text: &str) -> Option<(String, Option<String>)> {
    let text = text.trim();
    let mut result = text;
    let mut elapsed = None;

    if let Some(inner) = text.strip_suffix('>') {
        if let Some(open) = inner.rfind('<') {
            let candidate = &inner[open + 1..];
            if is_elapsed(candidate) {
                elapsed = Some(candidate.to_string());
                result = text[..open].trim_end();
            }
        }
    }

    if result.is_empty() {
        return None;
    }
    Some((result.to_string(), elapsed))
}

fn record(pid: Option<Pid>, timestamp: &str, name: &str, args: Vec<String>) -> Record {
    Record {
        pid,
        timestamp: timestamp.to_string(),
        started: None,
        name: name.to_string(),
        args,
        result: UNFINISHED_RESULT.to_string(),
        elapsed: None,
        split: false,
    }
}

/// Parse a regular strace line body: `syscall(args) = ret <duration>`
pub fn parse_regular(pid: Option<Pid>, timestamp: &str, body: &str) -> Option<Record> {
    let paren_pos = body.find('(')?;
    let name = body[..paren_pos].trim();
    if !is_call_name(name) {
        return None;
    }

    let rest_from_paren = &body[paren_pos + 1..];
    let close = find_closing_paren(rest_from_paren)?;
    let after_equals = rest_from_paren[close + 1..]
        .trim_start()
        .strip_prefix('=')?;
    let (result, elapsed) = parse_outcome(after_equals)?;

    let mut call = record(pid, timestamp, name, split_arguments(&rest_from_paren[..close]));
    call.result = result;
    call.elapsed = elapsed;
    Some(call)
}

/// Parse an unfinished line body: `syscall(args <unfinished ...>`
pub fn parse_unfinished(pid: Option<Pid>, timestamp: &str, body: &str) -> Option<Record> {
    let marker = find_unfinished(body)?;
    let paren_pos = body[..marker].find('(')?;
    let name = body[..paren_pos].trim();
    if !is_call_name(name) {
        return None;
    }

    let mut call = record(
        pid,
        timestamp,
        name,
        split_arguments(&body[paren_pos + 1..marker]),
    );
    call.split = true;
    Some(call)
}

/// Parse a resumed line body: `<... syscall resumed>args) = ret <duration>`
pub fn parse_resumed(pid: Option<Pid>, timestamp: &str, body: &str) -> Option<TraceLine> {
    let rest = body.strip_prefix(RESUMED_PREFIX)?;
    let marker = rest.find(RESUMED_MARKER)?;
    let name = rest[..marker].trim();
    if !is_call_name(name) {
        return None;
    }
    let after_resumed = &rest[marker + RESUMED_MARKER.len()..];

    if let Some(unfinished) = find_unfinished(after_resumed) {
        let mut call = record(pid, timestamp, name, split_arguments(&after_resumed[..unfinished]));
        call.split = true;
        return Some(TraceLine::ResumedUnfinished(call));
    }

    let close = find_closing_paren(after_resumed)?;
    let after_equals = after_resumed[close + 1..].trim_start().strip_prefix('=')?;
    let (result, elapsed) = parse_outcome(after_equals)?;

    let mut call = record(pid, timestamp, name, split_arguments(&after_resumed[..close]));
    call.result = result;
    call.elapsed = elapsed;
    call.split = true;
    Some(TraceLine::Resumed(call))
}

/// Parse `+++ exited with N +++` and `+++ killed by SIG... +++`
fn parse_lifecycle(pid: Option<Pid>, timestamp: &str, body: &str) -> Option<TraceLine> {
    let inner = body.strip_prefix("+++")?.strip_suffix("+++")?.trim();
    let (name, detail) = if let Some(status) = inner.strip_prefix("exited with ") {
        (EXIT_NAME, status.trim())
    } else if let Some(signal) = inner.strip_prefix("killed by ") {
        (KILL_NAME, signal.trim())
    } else {
        return Some(TraceLine::Ignored(pid));
    };
    if detail.is_empty() {
        return None;
    }

    let mut event = record(pid, timestamp, name, Vec::new());
    event.result = detail.to_string();
    Some(TraceLine::Complete(event))
}

/// Parse any strace line by trying all formats.
///
/// Returns `None` for lines matching no known shape.
pub fn parse_line(line: &str) -> Option<TraceLine> {
    let line = line.trim_end();
    let (pid, timestamp, body) = split_header(line)?;

    if body.starts_with("+++") {
        return parse_lifecycle(pid, timestamp, body);
    }
    if body.starts_with("---") {
        return Some(TraceLine::Ignored(pid));
    }
    if body.starts_with(RESUMED_PREFIX) {
        return parse_resumed(pid, timestamp, body);
    }
    if find_unfinished(body).is_some() {
        return parse_unfinished(pid, timestamp, body).map(TraceLine::Unfinished);
    }
    parse_regular(pid, timestamp, body).map(TraceLine::Complete)
}
