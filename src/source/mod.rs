pub mod general;
pub mod plain;
pub mod slow;

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::ValueEnum;

/// One entry read from a query log.
#[derive(Clone, Debug, PartialEq)]
pub enum LogEvent {
    Query {
        conn_id: u64,
        sql: String,
        at: Option<DateTime<Local>>,
        duration: Option<Duration>,
        rows: Option<u64>,
    },
    ConnectionOpened { conn_id: u64 },
    ConnectionClosed { conn_id: u64 },
    Unknown,
}

/// Supported log layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// MySQL general query log
    General,
    /// MySQL slow query log
    Slow,
    /// Plain SQL, statements terminated by `;`
    Plain,
}

impl LogFormat {
    pub fn parser(self) -> Box<dyn LogParser> {
        match self {
            LogFormat::General => Box::new(general::GeneralLogParser::new()),
            LogFormat::Slow => Box::new(slow::SlowLogParser::new()),
            LogFormat::Plain => Box::new(plain::PlainSqlParser::new()),
        }
    }
}

/// Incremental log parser. One instance per input stream.
pub trait LogParser: Send + 'static {
    /// Parse one event from the front of `buf`, returning it with the number
    /// of bytes consumed, or `None` when more input is needed. With `eof`
    /// set, a trailing partial entry is flushed.
    fn try_parse(&mut self, buf: &[u8], eof: bool) -> Option<(LogEvent, usize)>;

    fn format_name(&self) -> &'static str;
}

/// Line starting at `from` without its terminator, and the offset after it.
/// `None` when the line is not newline-terminated yet.
fn next_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let pos = buf.get(from..)?.iter().position(|&b| b == b'\n')?;
    let line = &buf[from..from + pos];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, from + pos + 1))
}

/// Byte length of the entry at the front of `buf`: its first line plus every
/// following line `continues` accepts. `None` until the entry is known to be
/// complete.
fn entry_len(buf: &[u8], eof: bool, mut continues: impl FnMut(&[u8]) -> bool) -> Option<usize> {
    if buf.is_empty() {
        return None;
    }

    let mut end = match next_line(buf, 0) {
        Some((_, next)) => next,
        None if eof => return Some(buf.len()),
        None => return None,
    };

    loop {
        match next_line(buf, end) {
            Some((line, next)) => {
                if !continues(line) {
                    return Some(end);
                }
                end = next;
            }
            None => {
                // a partial line can already be recognised as the next entry
                let rest = &buf[end..];
                if !rest.is_empty() && !continues(rest) {
                    return Some(end);
                }
                return eof.then_some(buf.len());
            }
        }
    }
}

/// Server banner lines written at startup and on log rotation.
fn is_banner(line: &[u8]) -> bool {
    let line = String::from_utf8_lossy(line);
    (line.contains(", Version: ") && line.contains("started with:"))
        || line.starts_with("Tcp port:")
        || (line.starts_with("Time ") && line.contains("Id Command"))
}

/// Parse the timestamps MySQL writes into its logs: RFC 3339 (5.7+) or the
/// older `YYMMDD H:MM:SS` form.
fn parse_log_time(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Local));
    }
    let compact = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let naive = NaiveDateTime::parse_from_str(&compact, "%y%m%d %H:%M:%S").ok()?;
    Local.from_local_datetime(&naive).single()
}
