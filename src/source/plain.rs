use tracing::trace;

use super::{LogEvent, LogParser};
use crate::canonical::canonicalize;

/// Splits a plain SQL stream into statements on `;` outside quotes and
/// comments. Every statement is attributed to connection 0.
pub struct PlainSqlParser;

impl PlainSqlParser {
    pub fn new() -> Self {
        Self
    }
}

impl LogParser for PlainSqlParser {
    fn try_parse(&mut self, buf: &[u8], eof: bool) -> Option<(LogEvent, usize)> {
        if buf.is_empty() {
            return None;
        }

        let (text, consumed) = match statement_end(buf) {
            Some(end) => (&buf[..end], end + 1),
            None if eof => (buf, buf.len()),
            None => return None,
        };

        let sql = String::from_utf8_lossy(text);
        let sql = sql.trim();
        // comment-only chunks have no canonical form
        if canonicalize(sql).is_empty() {
            trace!("Skipping empty statement ({consumed} bytes)");
            return Some((LogEvent::Unknown, consumed));
        }

        Some((
            LogEvent::Query {
                conn_id: 0,
                sql: sql.to_string(),
                at: None,
                duration: None,
                rows: None,
            },
            consumed,
        ))
    }

    fn format_name(&self) -> &'static str {
        "plain"
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    Quoted(u8),
    LineComment,
    BlockComment,
}

/// Index of the first `;` that terminates a statement.
fn statement_end(buf: &[u8]) -> Option<usize> {
    let mut state = Lex::Code;
    let mut i = 0;

    while i < buf.len() {
        let b = buf[i];
        let next = buf.get(i + 1).copied();

        match state {
            Lex::Code => match b {
                b';' => return Some(i),
                b'\'' | b'"' | b'`' => state = Lex::Quoted(b),
                b'#' => state = Lex::LineComment,
                b'-' if next == Some(b'-')
                    && buf.get(i + 2).is_none_or(|c| c.is_ascii_whitespace()) =>
                {
                    state = Lex::LineComment
                }
                b'/' if next == Some(b'*') => {
                    state = Lex::BlockComment;
                    i += 1;
                }
                _ => {}
            },
            Lex::Quoted(q) => {
                if b == b'\\' && q != b'`' {
                    i += 1;
                } else if b == q {
                    state = Lex::Code;
                }
            }
            Lex::LineComment => {
                if b == b'\n' {
                    state = Lex::Code;
                }
            }
            Lex::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = Lex::Code;
                    i += 1;
                }
            }
        }
        i += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statements(input: &str) -> Vec<String> {
        let mut parser = PlainSqlParser::new();
        let bytes = input.as_bytes();
        let mut offset = 0;
        let mut out = Vec::new();
        while let Some((event, consumed)) = parser.try_parse(&bytes[offset..], true) {
            if let LogEvent::Query { sql, .. } = event {
                out.push(sql);
            }
            offset += consumed;
        }
        out
    }

    #[test]
    fn test_split_statements() {
        assert_eq!(
            statements("SELECT 1;\nSELECT 2;\n\nSELECT 3"),
            vec!["SELECT 1", "SELECT 2", "SELECT 3"]
        );
    }

    #[test]
    fn test_semicolons_inside_literals_and_comments() {
        assert_eq!(
            statements("SELECT 'a;b', `c;d` FROM t -- trailing; comment\nWHERE x = \"e\\\";\"; /* x; */ SELECT 2;"),
            vec![
                "SELECT 'a;b', `c;d` FROM t -- trailing; comment\nWHERE x = \"e\\\";\"",
                "/* x; */ SELECT 2",
            ]
        );
    }

    #[test]
    fn test_comment_only_tail_skipped() {
        assert_eq!(statements("SELECT 1;\n-- done\n"), vec!["SELECT 1"]);
        assert_eq!(statements(";;"), Vec::<String>::new());
    }

    #[test]
    fn test_partial_statement_waits() {
        let mut parser = PlainSqlParser::new();
        assert!(parser.try_parse(b"SELECT 'a;", false).is_none());
        assert!(parser.try_parse(b"SELECT 1", false).is_none());
        let (event, consumed) = parser.try_parse(b"SELECT 1; SEL", false).unwrap();
        assert_eq!(consumed, 9);
        assert!(matches!(event, LogEvent::Query { conn_id: 0, .. }));
    }
}
