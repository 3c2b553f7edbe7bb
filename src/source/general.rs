use chrono::{DateTime, Local};
use tracing::{debug, trace};

use super::{entry_len, is_banner, next_line, parse_log_time, LogEvent, LogParser};

/// Parser for the MySQL general query log.
///
/// Each entry is a header line `<time>\t<id> <Command>\t<argument>`, followed
/// by continuation lines for multi-line statements. Older servers omit the
/// time column when it repeats and start the line with tabs instead.
pub struct GeneralLogParser {
    /// Last timestamp seen, reused by entries that omit it.
    last_time: Option<DateTime<Local>>,
}

struct Header<'a> {
    time: Option<DateTime<Local>>,
    conn_id: u64,
    command: &'a str,
    argument: &'a str,
}

impl GeneralLogParser {
    pub fn new() -> Self {
        Self { last_time: None }
    }

    fn to_event(&mut self, entry: &str) -> LogEvent {
        let mut lines = entry.split('\n');
        let first = lines.next().unwrap_or_default().trim_end_matches('\r');

        let Some(header) = parse_header(first) else {
            debug!("Skipping general log line: {first:?}");
            return LogEvent::Unknown;
        };

        if header.time.is_some() {
            self.last_time = header.time;
        }
        let conn_id = header.conn_id;

        match header.command {
            "Connect" => LogEvent::ConnectionOpened { conn_id },
            "Quit" => LogEvent::ConnectionClosed { conn_id },
            "Query" | "Execute" => {
                let mut sql = header.argument.to_string();
                for line in lines {
                    sql.push('\n');
                    sql.push_str(line.trim_end_matches('\r'));
                }
                let sql = sql.trim();
                if sql.is_empty() {
                    return LogEvent::Unknown;
                }
                trace!("Query [conn:{conn_id}]: {sql}");
                LogEvent::Query {
                    conn_id,
                    sql: sql.to_string(),
                    at: self.last_time,
                    duration: None,
                    rows: None,
                }
            }
            other => {
                trace!("Ignoring command {other:?} on conn {conn_id}");
                LogEvent::Unknown
            }
        }
    }
}

impl LogParser for GeneralLogParser {
    fn try_parse(&mut self, buf: &[u8], eof: bool) -> Option<(LogEvent, usize)> {
        let first_is_entry = match next_line(buf, 0) {
            Some((line, _)) => is_entry_start(line),
            None => is_entry_start(buf),
        };

        let len = if first_is_entry {
            entry_len(buf, eof, |line| !is_entry_start(line) && !is_banner(line))?
        } else {
            // banner or stray line: consume it alone
            entry_len(buf, eof, |_| false)?
        };

        let entry = String::from_utf8_lossy(&buf[..len]);
        let entry = entry.strip_suffix('\n').unwrap_or(&entry);
        let event = if first_is_entry {
            self.to_event(entry)
        } else {
            LogEvent::Unknown
        };

        Some((event, len))
    }

    fn format_name(&self) -> &'static str {
        "general"
    }
}

/// Whether `line` opens a new log entry.
fn is_entry_start(line: &[u8]) -> bool {
    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    match digits {
        // 2024-03-01T10:00:00.000000Z
        4 => line.get(4) == Some(&b'-') && line.contains(&b'\t'),
        // 240301 10:00:00
        6 => line.get(6) == Some(&b' ') && line.contains(&b'\t'),
        // repeated timestamp omitted
        0 => line.strip_prefix(b"\t\t").is_some_and(starts_with_id_command),
        _ => false,
    }
}

/// `   12 Query` style prefix: connection id, one space, capitalised command.
fn starts_with_id_command(rest: &[u8]) -> bool {
    let rest = rest.trim_ascii_start();
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    digits > 0
        && rest.get(digits) == Some(&b' ')
        && rest.get(digits + 1).is_some_and(|b| b.is_ascii_uppercase())
}

fn parse_header(line: &str) -> Option<Header<'_>> {
    let (time, rest) = if line.starts_with('\t') {
        (None, line.trim_start_matches('\t'))
    } else {
        let (time, rest) = line.split_once('\t')?;
        (parse_log_time(time), rest)
    };

    let rest = rest.trim_start();
    let id_end = rest.find(|c: char| !c.is_ascii_digit())?;
    let conn_id = rest[..id_end].parse().ok()?;

    let rest = rest[id_end..].trim_start();
    let (command, argument) = rest.split_once('\t').unwrap_or((rest, ""));

    Some(Header {
        time,
        conn_id,
        command: command.trim(),
        argument,
    })
}
