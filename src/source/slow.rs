use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, trace, warn};

use super::{entry_len, is_banner, next_line, parse_log_time, LogEvent, LogParser};

/// Parser for the MySQL slow query log.
///
/// An entry is a block of `# Key: value` header comments followed by the
/// statement, with `use <db>;` and `SET timestamp=...;` lines injected by
/// the server before it:
///
/// ```text
/// # Time: 2024-03-01T10:00:00.123456Z
/// # User@Host: app[app] @ localhost []  Id:     8
/// # Query_time: 0.000215  Lock_time: 0.000002 Rows_sent: 1  Rows_examined: 1
/// SET timestamp=1709287200;
/// SELECT * FROM orders WHERE id = 7;
/// ```
pub struct SlowLogParser {
    last_time: Option<DateTime<Local>>,
}

impl SlowLogParser {
    pub fn new() -> Self {
        Self { last_time: None }
    }

    fn to_event(&mut self, entry: &str) -> LogEvent {
        let mut conn_id = 0;
        let mut duration = None;
        let mut rows = None;
        let mut body: Vec<&str> = Vec::new();

        for line in entry.lines() {
            if let Some(time) = line.strip_prefix("# Time:") {
                match parse_log_time(time) {
                    Some(ts) => self.last_time = Some(ts),
                    None => warn!("Unparseable slow log time: {time:?}"),
                }
            } else if line.starts_with("# User@Host:") {
                if let Some((_, id)) = line.split_once("Id:") {
                    conn_id = id.trim().parse().unwrap_or(0);
                }
            } else if line.starts_with("# Query_time:") {
                let (d, r) = parse_metrics(line);
                duration = d;
                rows = r;
            } else if line.starts_with('#') && body.is_empty() {
                trace!("Skipping slow log header: {line}");
            } else if !is_injected(line) {
                body.push(line);
            }
        }

        let sql = body.join("\n");
        let sql = sql.trim().trim_end_matches(';').trim_end();
        if sql.is_empty() {
            debug!("Slow log entry without statement");
            return LogEvent::Unknown;
        }

        LogEvent::Query {
            conn_id,
            sql: sql.to_string(),
            at: self.last_time,
            duration,
            rows,
        }
    }
}

impl LogParser for SlowLogParser {
    fn try_parse(&mut self, buf: &[u8], eof: bool) -> Option<(LogEvent, usize)> {
        let first = next_line(buf, 0).map_or(buf, |(line, _)| line);
        if !is_entry_start(first) {
            let len = entry_len(buf, eof, |_| false)?;
            return Some((LogEvent::Unknown, len));
        }

        let mut seen_user = first.starts_with(b"# User@Host:");
        let mut seen_body = false;
        let len = entry_len(buf, eof, |line| {
            if line.starts_with(b"# Time:") || is_banner(line) {
                return false;
            }
            if line.starts_with(b"# User@Host:") {
                if seen_user || seen_body {
                    return false;
                }
                seen_user = true;
            } else if !line.starts_with(b"#") {
                seen_body = true;
            }
            true
        })?;

        let entry = String::from_utf8_lossy(&buf[..len]);
        Some((self.to_event(&entry), len))
    }

    fn format_name(&self) -> &'static str {
        "slow"
    }
}

fn is_entry_start(line: &[u8]) -> bool {
    line.starts_with(b"# Time:") || line.starts_with(b"# User@Host:")
}

/// Lines the server writes ahead of every statement.
fn is_injected(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    lower.starts_with("set timestamp=") || (lower.starts_with("use ") && lower.ends_with(';'))
}

/// `Query_time` and `Rows_sent` from a `# Query_time: ...` line.
fn parse_metrics(line: &str) -> (Option<Duration>, Option<u64>) {
    let mut duration = None;
    let mut rows = None;

    let tokens: Vec<&str> = line.trim_start_matches('#').split_whitespace().collect();
    for pair in tokens.windows(2) {
        match pair[0] {
            "Query_time:" => {
                duration = pair[1]
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64);
            }
            "Rows_sent:" => rows = pair[1].parse().ok(),
            _ => {}
        }
    }

    (duration, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "/usr/sbin/mysqld, Version: 8.0.32 (MySQL Community Server - GPL). started with:\n\
Tcp port: 3306  Unix socket: /var/run/mysqld/mysqld.sock\n\
Time                 Id Command    Argument\n\
# Time: 2024-03-01T10:00:00.123456Z\n\
# User@Host: app[app] @ localhost []  Id:     8\n\
# Query_time: 0.250000  Lock_time: 0.000002 Rows_sent: 3  Rows_examined: 1000\n\
use shop;\n\
SET timestamp=1709287200;\n\
SELECT *\n\
FROM orders WHERE total > 100;\n\
# User@Host: app[app] @ localhost []  Id:     9\n\
# Query_time: 1.5  Lock_time: 0.0 Rows_sent: 0  Rows_examined: 0\n\
SET timestamp=1709287201;\n\
UPDATE orders SET state = 'paid' WHERE id = 4;\n";

    fn queries(input: &[u8]) -> Vec<LogEvent> {
        let mut parser = SlowLogParser::new();
        let mut offset = 0;
        let mut events = Vec::new();
        while let Some((event, consumed)) = parser.try_parse(&input[offset..], true) {
            if event != LogEvent::Unknown {
                events.push(event);
            }
            offset += consumed;
        }
        events
    }

    #[test]
    fn test_entries() {
        let events = queries(LOG.as_bytes());
        assert_eq!(events.len(), 2);

        match &events[0] {
            LogEvent::Query { conn_id, sql, at, duration, rows } => {
                assert_eq!(*conn_id, 8);
                assert_eq!(sql, "SELECT *\nFROM orders WHERE total > 100");
                assert!(at.is_some());
                assert_eq!(*duration, Some(Duration::from_millis(250)));
                assert_eq!(*rows, Some(3));
            }
            other => panic!("expected query, got {other:?}"),
        }

        match &events[1] {
            LogEvent::Query { conn_id, sql, at, duration, rows } => {
                assert_eq!(*conn_id, 9);
                assert_eq!(sql, "UPDATE orders SET state = 'paid' WHERE id = 4");
                // no `# Time:` line, reuses the previous one
                assert!(at.is_some());
                assert_eq!(*duration, Some(Duration::from_millis(1500)));
                assert_eq!(*rows, Some(0));
            }
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn test_waits_for_next_entry() {
        let mut parser = SlowLogParser::new();
        let buf = b"# Time: 2024-03-01T10:00:00Z\n# User@Host: a[a] @ h []  Id: 1\n# Query_time: 0.1  Lock_time: 0 Rows_sent: 1  Rows_examined: 1\nSELECT 1;\n";
        assert!(parser.try_parse(buf, false).is_none());

        let mut more = buf.to_vec();
        more.extend_from_slice(b"# Time: 2024-03-01T10:00:01Z\n");
        let (event, consumed) = parser.try_parse(&more, false).unwrap();
        assert_eq!(consumed, buf.len());
        assert!(matches!(event, LogEvent::Query { conn_id: 1, .. }));
    }

    #[test]
    fn test_parse_metrics() {
        assert_eq!(
            parse_metrics("# Query_time: 0.002000  Lock_time: 0.000100 Rows_sent: 42  Rows_examined: 42"),
            (Some(Duration::from_millis(2)), Some(42))
        );
        assert_eq!(parse_metrics("# Query_time: nan"), (None, None));
    }

    #[test]
    fn test_injected_lines() {
        assert!(is_injected("SET timestamp=1709287200;"));
        assert!(is_injected("use shop;"));
        assert!(!is_injected("SELECT used FROM t;"));
    }
}
